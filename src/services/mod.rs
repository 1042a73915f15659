//! Long-running service components.

pub mod engine;
pub mod fanout;
pub mod snapshot;
pub mod stream;

pub use snapshot::{PriceSnapshotProvider, SetupStore};
pub use stream::StreamConnectionManager;
