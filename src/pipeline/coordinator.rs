//! Per-block orchestration
//!
//! `PipelineCoordinator` owns every stateful component and walks each
//! block through `Idle → Processing → Scoring → Publishing → Idle`,
//! stepping into `Paused(range)` while a reorged range is recomputed.
//!
//! Triggers land in a pending queue keyed by (height, hash) and are drained
//! in height order, so a block deferred by a gap or abandoned on timeout is
//! retried on every later trigger.

use super::config::PipelineConfig;
use super::db::{SignalStore, WriteOutcome};
use super::retry::RetryPolicy;
use crate::entity::{EntityResolver, EntitySnapshot};
use crate::error::{SignalError, SignalResult};
use crate::guard::{AnomalyReorgGuard, ChainEvent, HeightRange};
use crate::insight::{Insight, InsightAssembler, NarrativeGenerator};
use crate::predictive::{EwmaForecaster, ForecastStrategy, PredictiveAnalytics, PredictiveConfig};
use crate::processors::{ProcessorRegistry, SharedProcessor};
use crate::scoring::{ConfidenceFactors, ConfidenceScorer, DataQualityAssessor, ScoreDecision};
use crate::signals::{Signal, SignalType};
use crate::types::Block;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;

/// Triggers a gapped block waits for its missing ancestors before the
/// coordinator skips past them
const DEFAULT_GAP_PATIENCE: u32 = 6;

/// Pending triggers kept before the oldest are dropped
const MAX_PENDING_BLOCKS: usize = 1_024;

/// Processed blocks kept so a late fill or re-run can replay the heights
/// above it
const RETAINED_BLOCKS: usize = 24;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorState {
    Idle,
    Processing(u64),
    Scoring(u64),
    Publishing(u64),
    /// Recomputing a reorged range; later heights wait
    Paused(HeightRange),
}

impl fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoordinatorState::Idle => write!(f, "Idle"),
            CoordinatorState::Processing(h) => write!(f, "Processing({})", h),
            CoordinatorState::Scoring(h) => write!(f, "Scoring({})", h),
            CoordinatorState::Publishing(h) => write!(f, "Publishing({})", h),
            CoordinatorState::Paused(range) => write!(f, "Paused({})", range),
        }
    }
}

/// What happened to one block that went through processing
#[derive(Debug, Clone)]
pub struct BlockReport {
    pub height: u64,
    pub hash: String,
    pub event: ChainEvent,
    /// Signals as persisted (revision filled in)
    pub signals: Vec<Signal>,
    /// Rows newly inserted; re-runs of a stored block insert none
    pub signals_written: usize,
    pub insights: Vec<Insight>,
    pub suppressed: Vec<(SignalType, ScoreDecision)>,
    /// Types whose processor failed after all retries
    pub failed_types: Vec<(SignalType, String)>,
    /// Types that could not run for lack of input
    pub data_gaps: Vec<SignalType>,
    pub persistence_failed: bool,
}

impl BlockReport {
    fn new(block: &Block, event: ChainEvent) -> Self {
        Self {
            height: block.height,
            hash: block.hash.clone(),
            event,
            signals: Vec::new(),
            signals_written: 0,
            insights: Vec::new(),
            suppressed: Vec::new(),
            failed_types: Vec::new(),
            data_gaps: Vec::new(),
            persistence_failed: false,
        }
    }

    pub fn signal(&self, signal_type: SignalType) -> Option<&Signal> {
        self.signals.iter().find(|s| s.signal_type == signal_type)
    }

    pub fn insight(&self, signal_type: SignalType) -> Option<&Insight> {
        self.insights.iter().find(|i| i.signal_type == signal_type)
    }

    pub fn was_suppressed(&self, signal_type: SignalType) -> Option<ScoreDecision> {
        self.suppressed
            .iter()
            .find(|(t, _)| *t == signal_type)
            .map(|(_, d)| *d)
    }
}

/// Result of one trigger
#[derive(Debug, Default)]
pub struct BlockOutcome {
    pub transitions: Vec<CoordinatorState>,
    pub processed: Vec<BlockReport>,
    /// Heights still waiting (gap or pause)
    pub deferred: Vec<u64>,
    /// Heights whose processing ran out of time; retried next trigger
    pub abandoned: Vec<u64>,
    /// Heights discarded (duplicate, below horizon, unplaceable)
    pub dropped: Vec<u64>,
    /// Soft conditions met while draining
    pub conditions: Vec<SignalError>,
}

impl BlockOutcome {
    pub fn report(&self, height: u64) -> Option<&BlockReport> {
        self.processed.iter().rev().find(|r| r.height == height)
    }

    pub fn signals_written(&self) -> usize {
        self.processed.iter().map(|r| r.signals_written).sum()
    }

    pub fn insights_published(&self) -> usize {
        self.processed.iter().map(|r| r.insights.len()).sum()
    }

    pub fn insights(&self) -> impl Iterator<Item = &Insight> {
        self.processed.iter().flat_map(|r| r.insights.iter())
    }
}

#[derive(Debug)]
struct PendingBlock {
    block: Block,
    triggers_waited: u32,
}

#[derive(Debug, Clone, Copy)]
struct Pause {
    range: HeightRange,
    /// Quiet window that must lift before resuming; none for shallow reorgs
    window: Option<u64>,
}

enum Step {
    Processed,
    Deferred,
    Abandoned,
    Dropped,
}

/// Retry an async operation under `policy`, only for transient errors
async fn with_retries<T, F, Fut>(policy: RetryPolicy, what: &str, mut op: F) -> SignalResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SignalResult<T>>,
{
    let mut backoff = policy.backoff();
    loop {
        match op().await {
            Err(e) if e.is_transient() => {
                log::warn!("⚠️  {} failed (attempt {}): {}", what, backoff.retries_used() + 1, e);
                if backoff.sleep().await.is_err() {
                    return Err(e);
                }
            }
            other => return other,
        }
    }
}

/// Run one processor on the blocking pool, retrying transient failures
async fn run_processor(
    signal_type: SignalType,
    processor: SharedProcessor,
    block: Arc<Block>,
    snapshot: Arc<EntitySnapshot>,
    policy: RetryPolicy,
) -> (SignalType, SignalResult<Option<Signal>>) {
    let mut backoff = policy.backoff();
    loop {
        let processor = Arc::clone(&processor);
        let task_block = Arc::clone(&block);
        let task_snapshot = Arc::clone(&snapshot);

        let result = match tokio::task::spawn_blocking(move || {
            let mut guard = processor.lock().unwrap_or_else(|e| e.into_inner());
            guard.process(&task_block, &task_snapshot)
        })
        .await
        {
            Ok(result) => result,
            Err(e) => Err(SignalError::processor(signal_type, format!("task failed: {}", e))),
        };

        match result {
            Err(e) if e.is_transient() => {
                log::warn!("⚠️  {} failed at height {}: {}", signal_type, block.height, e);
                if backoff.sleep().await.is_err() {
                    return (signal_type, Err(e));
                }
            }
            other => return (signal_type, other),
        }
    }
}

/// Run every registered processor for `block` in parallel
async fn run_processors(
    registry: ProcessorRegistry,
    block: Arc<Block>,
    snapshot: Arc<EntitySnapshot>,
    policy: RetryPolicy,
) -> Vec<(SignalType, SignalResult<Option<Signal>>)> {
    let mut tasks = JoinSet::new();
    for signal_type in registry.types() {
        if let Some(processor) = registry.get(signal_type) {
            tasks.spawn(run_processor(
                signal_type,
                processor,
                Arc::clone(&block),
                Arc::clone(&snapshot),
                policy,
            ));
        }
    }

    let mut results = Vec::with_capacity(registry.len());
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(result) => results.push(result),
            Err(e) => log::error!("❌ Processor task lost at height {}: {}", block.height, e),
        }
    }
    results.sort_by_key(|(signal_type, _)| *signal_type);
    results
}

pub struct PipelineCoordinator {
    resolver: Arc<EntityResolver>,
    store: Arc<dyn SignalStore>,
    processors: ProcessorRegistry,
    guard: AnomalyReorgGuard,
    predictive_config: PredictiveConfig,
    predictive: PredictiveAnalytics,
    scorer: ConfidenceScorer,
    quality: DataQualityAssessor,
    assembler: InsightAssembler,
    processor_retry: RetryPolicy,
    persistence_retry: RetryPolicy,
    block_timeout: Duration,
    gap_patience: u32,
    state: CoordinatorState,
    pause: Option<Pause>,
    pending: BTreeMap<(u64, String), PendingBlock>,
    /// Accepted heights whose processing was incomplete (data gap or
    /// failed writes), keyed to the block hash
    incomplete: BTreeMap<u64, String>,
    replay: BTreeSet<u64>,
    /// Most recent processed blocks on the accepted chain
    retained: BTreeMap<u64, Arc<Block>>,
}

impl PipelineCoordinator {
    pub fn new(config: &PipelineConfig, resolver: Arc<EntityResolver>, store: Arc<dyn SignalStore>) -> Self {
        let predictive_config = config.predictive_config();
        Self {
            resolver,
            store,
            processors: ProcessorRegistry::with_defaults(&config.processor_config()),
            guard: AnomalyReorgGuard::new(&config.guard_config()),
            predictive: PredictiveAnalytics::new(&predictive_config, Arc::new(EwmaForecaster::default())),
            predictive_config,
            scorer: ConfidenceScorer::new(config.publish_threshold),
            quality: DataQualityAssessor::new(config.max_snapshot_age_secs()),
            assembler: InsightAssembler::new(config.publish_threshold),
            processor_retry: config.processor_retry(),
            persistence_retry: config.persistence_retry(),
            block_timeout: config.block_timeout(),
            gap_patience: DEFAULT_GAP_PATIENCE,
            state: CoordinatorState::Idle,
            pause: None,
            pending: BTreeMap::new(),
            incomplete: BTreeMap::new(),
            replay: BTreeSet::new(),
            retained: BTreeMap::new(),
        }
    }

    /// Replace the processor registry
    pub fn with_processors(mut self, processors: ProcessorRegistry) -> Self {
        self.processors = processors;
        self
    }

    pub fn with_forecaster(mut self, strategy: Arc<dyn ForecastStrategy>) -> Self {
        self.predictive = PredictiveAnalytics::new(&self.predictive_config, strategy);
        self
    }

    pub fn with_narrator(mut self, narrator: Arc<dyn NarrativeGenerator>) -> Self {
        self.assembler = InsightAssembler::new(self.scorer.threshold()).with_narrator(narrator);
        self
    }

    pub fn with_gap_patience(mut self, triggers: u32) -> Self {
        self.gap_patience = triggers;
        self
    }

    pub fn state(&self) -> &CoordinatorState {
        &self.state
    }

    pub fn guard(&self) -> &AnomalyReorgGuard {
        &self.guard
    }

    pub fn predictive(&self) -> &PredictiveAnalytics {
        &self.predictive
    }

    pub fn pending_heights(&self) -> Vec<u64> {
        self.pending.keys().map(|(h, _)| *h).collect()
    }

    /// Heights recorded as needing manual replay
    pub fn replay_heights(&self) -> Vec<u64> {
        self.replay.iter().copied().collect()
    }

    /// Trigger processing for a newly observed block
    pub async fn on_block(&mut self, block: Block) -> BlockOutcome {
        let key = (block.height, block.hash.clone());
        self.pending.entry(key).or_insert(PendingBlock {
            block,
            triggers_waited: 0,
        });

        while self.pending.len() > MAX_PENDING_BLOCKS {
            if let Some(((height, hash), _)) = self.pending.pop_first() {
                log::error!("❌ Pending queue full, dropping block {} ({})", height, hash);
            }
        }

        self.drain().await
    }

    /// Retry deferred and abandoned blocks without a new trigger
    pub async fn retry_pending(&mut self) -> BlockOutcome {
        self.drain().await
    }

    fn transition(&mut self, next: CoordinatorState, outcome: &mut BlockOutcome) {
        if self.state != next {
            log::debug!("🔄 Coordinator {} → {}", self.state, next);
            self.state = next.clone();
            outcome.transitions.push(next);
        }
    }

    /// State to rest in between blocks
    fn resting_state(&self) -> CoordinatorState {
        match self.pause {
            Some(pause) => CoordinatorState::Paused(pause.range),
            None => CoordinatorState::Idle,
        }
    }

    async fn drain(&mut self) -> BlockOutcome {
        let mut outcome = BlockOutcome::default();
        for entry in self.pending.values_mut() {
            entry.triggers_waited += 1;
        }

        let mut deferred: HashSet<(u64, String)> = HashSet::new();

        loop {
            let next = self
                .pending
                .keys()
                .find(|k| !deferred.contains(*k))
                .cloned();
            let Some(key) = next else {
                break;
            };
            let Some(entry) = self.pending.remove(&key) else {
                break;
            };

            match self.step(entry, &mut outcome).await {
                Step::Processed => deferred.clear(),
                Step::Deferred => {
                    deferred.insert(key);
                }
                // Everything queued above it depends on this height
                Step::Abandoned => break,
                Step::Dropped => {}
            }
        }

        outcome.deferred = self
            .pending_heights()
            .into_iter()
            .filter(|h| !outcome.abandoned.contains(h))
            .collect();
        let resting = self.resting_state();
        self.transition(resting, &mut outcome);
        outcome
    }

    fn requeue(&mut self, entry: PendingBlock) {
        let key = (entry.block.height, entry.block.hash.clone());
        self.pending.insert(key, entry);
    }

    fn retain(&mut self, block: Arc<Block>) {
        let height = block.height;
        self.retained.retain(|h, _| *h < height);
        self.retained.insert(height, block);
        while self.retained.len() > RETAINED_BLOCKS {
            self.retained.pop_first();
        }
    }

    /// Queue the accepted blocks above `height` so they are recomputed
    /// after it
    ///
    /// Returns false, queueing nothing, when any of them is no longer
    /// retained.
    fn requeue_descendants(&mut self, height: u64) -> bool {
        let mut descendants = Vec::new();
        for (h, hash) in self.guard.tracker().accepted_above(height) {
            match self.retained.get(&h) {
                Some(block) if block.hash == hash => descendants.push(Arc::clone(block)),
                _ => return false,
            }
        }

        for block in descendants {
            let key = (block.height, block.hash.clone());
            self.pending.entry(key).or_insert_with(|| PendingBlock {
                block: Block::clone(&block),
                triggers_waited: 0,
            });
        }
        true
    }

    async fn step(&mut self, entry: PendingBlock, outcome: &mut BlockOutcome) -> Step {
        let height = entry.block.height;

        if let Some(pause) = self.pause {
            if height > pause.range.end {
                log::debug!("⏸️  Height {} waits for recompute of {}", height, pause.range);
                self.requeue(entry);
                return Step::Deferred;
            }
        }

        let event = self.guard.classify(&entry.block);
        match event {
            ChainEvent::Extends => self.process_block(entry, event, outcome).await,

            ChainEvent::Duplicate => {
                if self.incomplete.get(&height) != Some(&entry.block.hash) {
                    log::debug!("🔁 Block {} already processed, skipping", height);
                    outcome.dropped.push(height);
                    Step::Dropped
                } else if self.requeue_descendants(height) {
                    log::info!("🔁 Re-running incomplete block {}", height);
                    self.process_block(entry, event, outcome).await
                } else {
                    log::warn!(
                        "⚠️  Cannot re-run block {}: blocks above it are no longer retained",
                        height
                    );
                    outcome.dropped.push(height);
                    Step::Dropped
                }
            }

            ChainEvent::Fill { height } => {
                if self.requeue_descendants(height) {
                    log::info!("🧩 Late block {} fills a skipped height, recomputing from there", height);
                    self.process_block(entry, event, outcome).await
                } else {
                    log::warn!(
                        "⚠️  Dropping late block {}: blocks above it are no longer retained",
                        height
                    );
                    outcome.dropped.push(height);
                    Step::Dropped
                }
            }

            ChainEvent::Reorg {
                fork_height,
                old_tip,
                depth,
            } => {
                outcome.conditions.push(SignalError::ReorgDetected { fork_height, depth });
                self.begin_reorg(fork_height, old_tip, depth, &entry.block, outcome).await;
                self.process_block(entry, event, outcome).await
            }

            ChainEvent::Gap { from, to } => {
                let tip = self.guard.tracker().tip().map(|(h, _)| h).unwrap_or(0);
                if entry.triggers_waited <= self.gap_patience {
                    self.guard.note_missing_blocks(from, to);
                    outcome.conditions.push(SignalError::DataGap {
                        height,
                        detail: format!("missing heights {}..={}", from, to),
                    });
                    self.requeue(entry);
                    Step::Deferred
                } else if from > tip {
                    log::warn!(
                        "⚠️  Giving up on heights {}..={} after {} triggers, processing {}",
                        from,
                        to,
                        entry.triggers_waited,
                        height
                    );
                    self.process_block(entry, ChainEvent::Extends, outcome).await
                } else {
                    log::warn!(
                        "⚠️  Dropping block {} ({}): branch ancestor never arrived",
                        height,
                        entry.block.hash
                    );
                    outcome.dropped.push(height);
                    Step::Dropped
                }
            }

            ChainEvent::BelowHorizon { height } => {
                log::warn!("⚠️  Block {} is below the reorg horizon, dropping", height);
                outcome.dropped.push(height);
                Step::Dropped
            }
        }
    }

    /// Invalidate everything derived from `fork_height` onwards
    async fn begin_reorg(
        &mut self,
        fork_height: u64,
        old_tip: u64,
        depth: u64,
        block: &Block,
        outcome: &mut BlockOutcome,
    ) {
        let store = Arc::clone(&self.store);
        let affected = match with_retries(self.persistence_retry, "supersede", || {
            store.supersede_range(fork_height)
        })
        .await
        {
            Ok(types) => types,
            Err(e) => {
                log::error!("❌ Could not supersede signals from {}: {}", fork_height, e);
                self.record_replay(block, &e.to_string()).await;
                Vec::new()
            }
        };

        self.processors.rewind_all(fork_height);
        self.predictive.rewind(fork_height);
        self.incomplete.retain(|h, _| *h < fork_height);
        self.retained.retain(|h, _| *h < fork_height);

        let window = self
            .guard
            .begin_reorg(fork_height, old_tip, depth, &affected)
            .map(|(id, _)| id);
        let range = HeightRange::new(fork_height, old_tip);
        self.pause = Some(Pause { range, window });
        self.transition(CoordinatorState::Paused(range), outcome);
    }

    async fn record_replay(&mut self, block: &Block, reason: &str) {
        self.replay.insert(block.height);
        self.incomplete.insert(block.height, block.hash.clone());
        if let Err(e) = self.store.mark_needs_replay(block.height, &block.hash, reason).await {
            log::error!(
                "❌ Could not record block {} for replay ({}); kept in memory only",
                block.height,
                e
            );
        }
    }

    async fn process_block(&mut self, entry: PendingBlock, event: ChainEvent, outcome: &mut BlockOutcome) -> Step {
        let block = Arc::new(entry.block);
        let height = block.height;
        let started = Instant::now();
        self.transition(CoordinatorState::Processing(height), outcome);

        let snapshot = self.resolver.snapshot();
        let computed = tokio::time::timeout(
            self.block_timeout,
            run_processors(
                self.processors.clone(),
                Arc::clone(&block),
                Arc::clone(&snapshot),
                self.processor_retry,
            ),
        )
        .await;

        let results = match computed {
            Ok(results) => results,
            Err(_) => {
                log::warn!(
                    "⏱️  Block {} abandoned after {}ms, will retry on next trigger",
                    height,
                    self.block_timeout.as_millis()
                );
                outcome.abandoned.push(height);
                let resting = self.resting_state();
                self.transition(resting, outcome);
                self.requeue(PendingBlock {
                    block: Arc::unwrap_or_clone(block),
                    triggers_waited: entry.triggers_waited,
                });
                return Step::Abandoned;
            }
        };

        let mut report = BlockReport::new(&block, event);
        let mut signals = Vec::new();
        for (signal_type, result) in results {
            match result {
                Ok(Some(mut signal)) => {
                    self.guard.inspect_signal(&mut signal);
                    signals.push(signal);
                }
                Ok(None) => {}
                Err(SignalError::DataGap { detail, .. }) => {
                    log::warn!("⚠️  {} has no input at height {}: {}", signal_type, height, detail);
                    if signal_type.depends_on_mempool() {
                        self.guard.note_missing_mempool(height);
                    }
                    report.data_gaps.push(signal_type);
                }
                Err(e) => {
                    log::error!("❌ {} gave up at height {}: {}", signal_type, height, e);
                    report.failed_types.push((signal_type, e.to_string()));
                }
            }
        }
        signals.extend(self.predictive.observe(height, &block.hash, &signals));

        // Persist every signal before scoring so nothing is lost on a later failure
        let mut persisted: Vec<(Signal, i64)> = Vec::with_capacity(signals.len());
        let mut failures = Vec::new();
        for mut signal in signals {
            let store = Arc::clone(&self.store);
            let what = format!("write {} at {}", signal.signal_type, height);
            match with_retries(self.persistence_retry, &what, || store.write_signal(&signal)).await {
                Ok(written) => {
                    if let WriteOutcome::Inserted { .. } = written {
                        report.signals_written += 1;
                    }
                    signal.revision = written.revision();
                    persisted.push((signal, written.row_id()));
                }
                Err(e) => {
                    log::error!("❌ Failed to persist {} at {}: {}", signal.signal_type, height, e);
                    failures.push(format!("{}: {}", signal.signal_type, e));
                }
            }
        }

        self.transition(CoordinatorState::Scoring(height), outcome);
        let now = chrono::Utc::now().timestamp();
        let mut publishable = Vec::new();
        for (signal, row_id) in &persisted {
            let quality = self.quality.assess(signal.signal_type, &block, &snapshot, now);
            let factors = ConfidenceFactors::new(
                signal.strength,
                self.predictive.historical_accuracy(signal.signal_type),
                quality.score,
            );
            let quiet = self.guard.is_suppressed(height, signal.signal_type);
            let score = self.scorer.score(&factors, quiet);

            if score.decision.is_publish() {
                publishable.push((signal, *row_id, score, quality));
            } else {
                log::debug!(
                    "🔕 {} at {} suppressed: {:?} (confidence {:.3})",
                    signal.signal_type,
                    height,
                    score.decision,
                    score.confidence
                );
                report.suppressed.push((signal.signal_type, score.decision));
            }
        }

        self.transition(CoordinatorState::Publishing(height), outcome);
        for (signal, row_id, score, quality) in publishable {
            let insight = match self.assembler.assemble(signal, &score, &quality).await {
                Ok(insight) => insight,
                Err(e) => {
                    log::warn!("⚠️  {}", e);
                    report.suppressed.push((signal.signal_type, score.decision));
                    continue;
                }
            };

            let store = Arc::clone(&self.store);
            let what = format!("write insight {}", insight.id);
            match with_retries(self.persistence_retry, &what, || store.write_insight(row_id, &insight)).await {
                Ok(true) => {
                    log::info!("📣 {} (confidence {:.2})", insight.headline, insight.confidence);
                    report.insights.push(insight);
                }
                Ok(false) => log::debug!("Insight {} already published", insight.id),
                Err(e) => {
                    log::error!("❌ Failed to persist insight {}: {}", insight.id, e);
                    failures.push(format!("insight {}: {}", insight.id, e));
                }
            }
        }

        report.signals = persisted.into_iter().map(|(s, _)| s).collect();

        if failures.is_empty() {
            if self.replay.remove(&height) {
                if let Err(e) = self.store.clear_replay(height).await {
                    log::warn!("⚠️  Could not clear replay marker for {}: {}", height, e);
                }
            }
        } else {
            report.persistence_failed = true;
            let reason = failures.join("; ");
            outcome
                .conditions
                .push(SignalError::PersistenceFailure(reason.clone()));
            self.record_replay(&block, &reason).await;
        }

        self.guard.accept(&block);
        if report.data_gaps.is_empty() && !report.persistence_failed {
            self.guard.mark_recomputed(height);
            self.incomplete.remove(&height);
        } else {
            // The height still counts toward reorg and gap windows; the
            // missing-mempool window and the replay set track what is left
            self.guard.mark_attempted(height);
            self.incomplete.insert(height, block.hash.clone());
        }
        self.retain(Arc::clone(&block));

        if let Some(pause) = self.pause {
            let still_open = pause.window.map(|id| self.guard.quiet().is_open(id)).unwrap_or(false);
            if !still_open {
                log::info!("▶️  Recompute of {} complete, resuming", pause.range);
                self.pause = None;
            }
        }

        log::info!(
            "✅ Block {} processed in {}ms: {} signals ({} new), {} insights, {} suppressed",
            height,
            started.elapsed().as_millis(),
            report.signals.len(),
            report.signals_written,
            report.insights.len(),
            report.suppressed.len()
        );

        outcome.processed.push(report);
        let resting = self.resting_state();
        self.transition(resting, outcome);
        Step::Processed
    }
}
