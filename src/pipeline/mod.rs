//! # Pipeline
//!
//! Runtime plumbing around the signal engine:
//! - `config` - environment-driven settings for every component
//! - `db` - schema migrations and the SQLite signal/insight store
//! - `retry` - bounded jittered backoff shared by processors and writes
//! - `coordinator` - per-block state machine (Idle → Processing → Scoring →
//!   Publishing, Paused on reorg)
//! - `ingestion` - channel loop feeding blocks to the coordinator
//!
//! Signals are written once per (block_height, signal_type); a reorg
//! supersedes the stored row and the recomputed signal becomes the next
//! revision. See `/sql/` for the schema.

pub mod config;
pub mod coordinator;
pub mod db;
pub mod ingestion;
pub mod retry;

pub use config::PipelineConfig;
pub use coordinator::{BlockOutcome, BlockReport, CoordinatorState, PipelineCoordinator};
pub use db::{run_schema_migrations, SignalStore, SqliteSignalStore, StoredSignal, WriteOutcome};
pub use ingestion::{start_block_ingestion, IngestionStats};
pub use retry::{ExponentialBackoff, RetryPolicy};
