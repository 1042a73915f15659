pub mod vwap;

pub use vwap::{average_volume, calculate_vwap};
