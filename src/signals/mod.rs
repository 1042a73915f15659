//! Confluence scoring and setup detection.

pub mod confluence;
pub mod detector;
pub mod rules;

pub use confluence::{
    calculate_confluence, ConfidenceBreakdown, ConfluenceFactor, ConfluenceInput, FactorWeights,
};
pub use detector::{SetupEngine, SymbolDetector};
pub use rules::{evaluate_rules, RuleContext, SetupCandidate};
