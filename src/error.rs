//! Error taxonomy for the signal engine
//!
//! Most variants are soft conditions that the coordinator turns into a
//! state transition (quiet window, retry, replay marker) rather than a
//! failure surfaced to callers. Anomalies are not errors at all: they are
//! carried as flags in signal payloads.

use crate::signals::SignalType;
use thiserror::Error;

pub type SignalResult<T> = Result<T, SignalError>;

#[derive(Debug, Error)]
pub enum SignalError {
    /// Missing block or mempool input for a height
    #[error("data gap at height {height}: {detail}")]
    DataGap { height: u64, detail: String },

    #[error("reorg detected at height {fork_height} (depth {depth})")]
    ReorgDetected { fork_height: u64, depth: u64 },

    /// Entity refresh failed; the last good snapshot keeps serving
    #[error("entity resolver stale: {0}")]
    EntityResolverStale(String),

    /// Transient computation fault inside one processor
    #[error("processor {signal_type} failed: {reason}")]
    ProcessorFailure {
        signal_type: SignalType,
        reason: String,
    },

    #[error("persistence failure: {0}")]
    PersistenceFailure(String),

    #[error("narrative generator unavailable: {0}")]
    NarrativeUnavailable(String),

    #[error("insight rejected: {0}")]
    InsightRejected(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SignalError {
    /// Failures worth another attempt with backoff
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SignalError::ProcessorFailure { .. } | SignalError::PersistenceFailure(_)
        )
    }

    pub fn processor(signal_type: SignalType, reason: impl Into<String>) -> Self {
        SignalError::ProcessorFailure {
            signal_type,
            reason: reason.into(),
        }
    }
}

impl From<rusqlite::Error> for SignalError {
    fn from(err: rusqlite::Error) -> Self {
        SignalError::PersistenceFailure(err.to_string())
    }
}
