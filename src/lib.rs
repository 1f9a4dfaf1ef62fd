//! chainpulse - blockchain signal processing and confidence scoring
//!
//! Normalized blocks flow through per-domain signal processors, an
//! anomaly/reorg guard, predictive analytics and a confidence scorer;
//! signals that clear scoring become published insights.
//!
//! Leaves first:
//! - `entity` - address → known entity snapshots with atomic refresh
//! - `processors` - mempool, exchange flow, miner treasury, whale streaks
//! - `guard` - k·σ spike rule, reorg detection, quiet-mode windows
//! - `predictive` - pluggable forecasts with accuracy tracking
//! - `scoring` - composite confidence and data quality
//! - `insight` - evidence, explainability and narrative text
//! - `pipeline` - coordinator, persistence, config, ingestion

pub mod entity;
pub mod error;
pub mod guard;
pub mod insight;
pub mod pipeline;
pub mod predictive;
pub mod processors;
pub mod scoring;
pub mod signals;
pub mod types;

pub use error::{SignalError, SignalResult};
pub use signals::{EvidenceRef, Signal, SignalType};
pub use types::{Block, KnownEntity, NormalizedTransaction};
