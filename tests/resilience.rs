//! Timeouts, processor failures and persistence failures

mod common;

use async_trait::async_trait;
use chainpulse::entity::EntitySnapshot;
use chainpulse::insight::Insight;
use chainpulse::pipeline::{
    PipelineConfig, PipelineCoordinator, SignalStore, SqliteSignalStore, StoredSignal, WriteOutcome,
};
use chainpulse::processors::{ProcessorRegistry, SignalProcessor};
use chainpulse::signals::{EvidenceRef, Signal, SignalType};
use chainpulse::types::Block;
use chainpulse::{SignalError, SignalResult};
use common::*;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Emits a fixed-strength signal; optionally slow or failing for the
/// first `fail_first` / `slow_first` calls
struct ScriptedProcessor {
    signal_type: SignalType,
    calls: Arc<AtomicUsize>,
    fail_first: usize,
    slow_first: usize,
    delay: Duration,
}

impl ScriptedProcessor {
    fn new(signal_type: SignalType, calls: Arc<AtomicUsize>) -> Self {
        Self {
            signal_type,
            calls,
            fail_first: 0,
            slow_first: 0,
            delay: Duration::ZERO,
        }
    }

    fn failing(mut self, times: usize) -> Self {
        self.fail_first = times;
        self
    }

    fn slow(mut self, times: usize, delay: Duration) -> Self {
        self.slow_first = times;
        self.delay = delay;
        self
    }
}

impl SignalProcessor for ScriptedProcessor {
    fn signal_type(&self) -> SignalType {
        self.signal_type
    }

    fn process(&mut self, block: &Block, _entities: &EntitySnapshot) -> SignalResult<Option<Signal>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.slow_first {
            std::thread::sleep(self.delay);
        }
        if call < self.fail_first {
            return Err(SignalError::processor(self.signal_type, format!("scripted failure {}", call)));
        }
        Ok(Some(
            Signal::new(self.signal_type, block.height, block.hash.clone())
                .with_strength(0.5)
                .with_evidence(vec![EvidenceRef::block(block.height)]),
        ))
    }

    fn rewind(&mut self, _from_height: u64) {}
}

fn counter() -> Arc<AtomicUsize> {
    Arc::new(AtomicUsize::new(0))
}

#[tokio::test]
async fn test_timed_out_block_is_abandoned_then_retried() {
    let config = PipelineConfig {
        block_timeout_ms: 100,
        ..test_config()
    };
    let (_temp, store) = sqlite_store();
    let calls = counter();
    let mut registry = ProcessorRegistry::new();
    registry.register(Box::new(
        ScriptedProcessor::new(SignalType::MinerTreasury, calls.clone()).slow(1, Duration::from_millis(400)),
    ));
    let mut coordinator = coordinator_with(&config, store.clone()).await.with_processors(registry);

    let outcome = coordinator.on_block(deposit_block(0, 1, 10.0)).await;
    assert_eq!(outcome.abandoned, vec![1]);
    assert!(outcome.processed.is_empty());
    assert_eq!(coordinator.pending_heights(), vec![1]);
    assert!(store.active_signals(1).await.unwrap().is_empty());

    // Let the stray computation finish and release the processor
    tokio::time::sleep(Duration::from_millis(500)).await;

    let outcome = coordinator.retry_pending().await;
    let report = outcome.report(1).expect("processed on retry");
    assert_eq!(report.signals_written, 1);
    assert!(coordinator.pending_heights().is_empty());
    assert_eq!(store.active_signals(1).await.unwrap().len(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_failing_processor_does_not_block_others() {
    let config = test_config();
    let (_temp, store) = sqlite_store();
    let broken_calls = counter();
    let flaky_calls = counter();

    let mut registry = ProcessorRegistry::with_defaults(&config.processor_config());
    registry.register(Box::new(
        ScriptedProcessor::new(SignalType::MinerTreasury, broken_calls.clone()).failing(usize::MAX),
    ));
    registry.register(Box::new(
        ScriptedProcessor::new(SignalType::WhaleAccumulation, flaky_calls.clone()).failing(2),
    ));
    let mut coordinator = coordinator_with(&config, store.clone()).await.with_processors(registry);

    let outcome = coordinator.on_block(deposit_block(0, 1, 10.0)).await;
    let report = outcome.report(1).unwrap();

    assert_eq!(report.failed_types.len(), 1);
    assert_eq!(report.failed_types[0].0, SignalType::MinerTreasury);
    assert_eq!(broken_calls.load(Ordering::SeqCst), 3);

    assert!(report.signal(SignalType::WhaleAccumulation).is_some());
    assert_eq!(flaky_calls.load(Ordering::SeqCst), 3);

    let stored = store.active_signals(1).await.unwrap();
    assert!(stored.iter().any(|s| s.signal.signal_type == SignalType::WhaleAccumulation));
    assert!(stored.iter().all(|s| s.signal.signal_type != SignalType::MinerTreasury));
    assert_eq!(coordinator.state(), &chainpulse::pipeline::CoordinatorState::Idle);
}

/// SQLite store whose signal writes fail for one type while `failing` is set
struct FailingStore {
    inner: Arc<SqliteSignalStore>,
    failing_type: SignalType,
    failing: AtomicBool,
}

#[async_trait]
impl SignalStore for FailingStore {
    async fn write_signal(&self, signal: &Signal) -> SignalResult<WriteOutcome> {
        if self.failing.load(Ordering::SeqCst) && signal.signal_type == self.failing_type {
            return Err(SignalError::PersistenceFailure("disk I/O error".to_string()));
        }
        self.inner.write_signal(signal).await
    }

    async fn supersede_range(&self, from_height: u64) -> SignalResult<Vec<SignalType>> {
        self.inner.supersede_range(from_height).await
    }

    async fn write_insight(&self, signal_row_id: i64, insight: &Insight) -> SignalResult<bool> {
        self.inner.write_insight(signal_row_id, insight).await
    }

    async fn mark_needs_replay(&self, height: u64, block_hash: &str, reason: &str) -> SignalResult<()> {
        self.inner.mark_needs_replay(height, block_hash, reason).await
    }

    async fn clear_replay(&self, height: u64) -> SignalResult<()> {
        self.inner.clear_replay(height).await
    }

    async fn replay_heights(&self) -> SignalResult<Vec<u64>> {
        self.inner.replay_heights().await
    }

    async fn active_signals(&self, height: u64) -> SignalResult<Vec<StoredSignal>> {
        self.inner.active_signals(height).await
    }

    async fn signal_revisions(&self, height: u64, signal_type: SignalType) -> SignalResult<Vec<StoredSignal>> {
        self.inner.signal_revisions(height, signal_type).await
    }

    async fn insights_for_height(&self, height: u64) -> SignalResult<Vec<Insight>> {
        self.inner.insights_for_height(height).await
    }
}

#[tokio::test]
async fn test_persistence_failure_records_replay_until_rerun() {
    let config = test_config();
    let (_temp, inner) = sqlite_store();
    let store = Arc::new(FailingStore {
        inner: inner.clone(),
        failing_type: SignalType::ExchangeFlow,
        failing: AtomicBool::new(true),
    });

    let mut registry = ProcessorRegistry::new();
    registry.register(Box::new(ScriptedProcessor::new(SignalType::ExchangeFlow, counter())));
    registry.register(Box::new(ScriptedProcessor::new(SignalType::MinerTreasury, counter())));
    let mut coordinator = PipelineCoordinator::new(&config, resolver().await, store.clone())
        .with_processors(registry);

    let block = deposit_block(0, 1, 10.0);
    let outcome = coordinator.on_block(block.clone()).await;
    let report = outcome.report(1).unwrap();

    assert!(report.persistence_failed);
    assert!(report.signal(SignalType::ExchangeFlow).is_none());
    assert!(report.signal(SignalType::MinerTreasury).is_some());
    assert!(outcome
        .conditions
        .iter()
        .any(|c| matches!(c, SignalError::PersistenceFailure(_))));
    assert_eq!(coordinator.replay_heights(), vec![1]);
    assert_eq!(inner.replay_heights().await.unwrap(), vec![1]);

    // Storage recovers; redelivering the block completes it
    store.failing.store(false, Ordering::SeqCst);
    let outcome = coordinator.on_block(block).await;
    let report = outcome.report(1).expect("incomplete block re-run");
    assert!(!report.persistence_failed);
    assert_eq!(report.signals_written, 1);

    assert!(coordinator.replay_heights().is_empty());
    assert!(inner.replay_heights().await.unwrap().is_empty());
    assert_eq!(inner.active_signals(1).await.unwrap().len(), 2);
    assert_eq!(
        inner
            .signal_revisions(1, SignalType::MinerTreasury)
            .await
            .unwrap()
            .len(),
        1
    );
}
