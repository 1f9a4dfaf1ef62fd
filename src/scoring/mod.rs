//! Confidence Scorer
//!
//! Composes signal strength, historical accuracy and data quality into one
//! confidence value and decides publish vs suppress.

pub mod confidence;
pub mod quality;

pub use confidence::{
    ConfidenceFactors, ConfidenceScore, ConfidenceScorer, ConfidenceWeights, ScoreDecision,
    DEFAULT_PUBLISH_THRESHOLD,
};
pub use quality::{DataQualityAssessor, DataQualityReport};
