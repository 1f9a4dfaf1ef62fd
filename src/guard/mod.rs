//! Anomaly & Reorg Guard
//!
//! Sits around processor execution: classifies each block against the
//! accepted chain, tags mempool fee spikes with the shared k·σ rule, and
//! owns the quiet-mode windows that force suppression over a range.

pub mod anomaly;
pub mod quiet;
pub mod reorg;

pub use anomaly::{AnomalyRule, SpikeDetector};
pub use quiet::{HeightRange, QuietModeRegistry, QuietReason, QuietWindow};
pub use reorg::{ChainEvent, ChainTracker};

use crate::signals::{Signal, SignalType};
use crate::types::Block;

#[derive(Debug, Clone)]
pub struct GuardConfig {
    pub anomaly_multiplier: f64,
    /// Reorgs deeper than this open a quiet window
    pub reorg_depth_trigger: u64,
    /// Accepted heights remembered for reorg detection
    pub tracked_heights: usize,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            anomaly_multiplier: 3.0,
            reorg_depth_trigger: 1,
            tracked_heights: 288,
        }
    }
}

pub struct AnomalyReorgGuard {
    tracker: ChainTracker,
    quiet: QuietModeRegistry,
    spikes: SpikeDetector,
    reorg_depth_trigger: u64,
}

impl AnomalyReorgGuard {
    pub fn new(config: &GuardConfig) -> Self {
        Self {
            tracker: ChainTracker::new(config.tracked_heights),
            quiet: QuietModeRegistry::new(),
            spikes: SpikeDetector::new(AnomalyRule::new(config.anomaly_multiplier)),
            reorg_depth_trigger: config.reorg_depth_trigger,
        }
    }

    pub fn classify(&self, block: &Block) -> ChainEvent {
        self.tracker.classify(block)
    }

    /// Record a processed block on the accepted chain
    pub fn accept(&mut self, block: &Block) {
        self.tracker.accept(block);
        if let Some(oldest) = self.tracker.oldest_height() {
            self.quiet.prune_below(oldest);
        }
    }

    /// Roll the accepted chain back to before `fork_height`
    ///
    /// Returns the quiet window opened for the replaced range when the
    /// reorg is deeper than the trigger. `affected` are the signal types
    /// that had stored signals in the range; none means all types.
    pub fn begin_reorg(
        &mut self,
        fork_height: u64,
        old_tip: u64,
        depth: u64,
        affected: &[SignalType],
    ) -> Option<(u64, HeightRange)> {
        log::warn!(
            "🔀 Reorg detected: fork at height {}, old tip {}, depth {}",
            fork_height,
            old_tip,
            depth
        );
        self.tracker.truncate_from(fork_height);

        if depth <= self.reorg_depth_trigger {
            log::info!(
                "🔁 Shallow reorg (depth {} ≤ {}), recomputing without quiet mode",
                depth,
                self.reorg_depth_trigger
            );
            return None;
        }

        let range = HeightRange::new(fork_height, old_tip);
        let id = self
            .quiet
            .open(range, affected.iter().copied(), QuietReason::Reorg { depth });
        Some((id, range))
    }

    /// Missing heights suppress every type until they are delivered
    pub fn note_missing_blocks(&mut self, from: u64, to: u64) -> u64 {
        self.quiet.open(
            HeightRange::new(from, to),
            Vec::<SignalType>::new(),
            QuietReason::MissingBlocks,
        )
    }

    /// Missing mempool data suppresses mempool-derived types at `height`
    pub fn note_missing_mempool(&mut self, height: u64) -> u64 {
        let scope: Vec<SignalType> = SignalType::all()
            .into_iter()
            .filter(|t| t.depends_on_mempool())
            .collect();
        self.quiet
            .open(HeightRange::single(height), scope, QuietReason::MissingMempool)
    }

    /// Tag fee spikes on mempool signals; true when a spike was found
    pub fn inspect_signal(&self, signal: &mut Signal) -> bool {
        self.spikes.inspect(signal)
    }

    pub fn is_suppressed(&self, height: u64, signal_type: SignalType) -> bool {
        self.quiet.is_suppressed(height, signal_type)
    }

    pub fn mark_recomputed(&mut self, height: u64) -> Vec<u64> {
        self.quiet.mark_recomputed(height)
    }

    /// Recomputed with a data gap; missing-mempool windows stay open
    pub fn mark_attempted(&mut self, height: u64) -> Vec<u64> {
        self.quiet.mark_attempted(height)
    }

    pub fn quiet(&self) -> &QuietModeRegistry {
        &self.quiet
    }

    pub fn tracker(&self) -> &ChainTracker {
        &self.tracker
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(height: u64, hash: &str, parent: &str) -> Block {
        Block {
            height,
            hash: hash.to_string(),
            parent_hash: parent.to_string(),
            timestamp: 0,
            transactions: vec![],
            mempool: None,
        }
    }

    fn guard_with_chain() -> AnomalyReorgGuard {
        let mut g = AnomalyReorgGuard::new(&GuardConfig::default());
        for h in 10..=13u64 {
            g.accept(&block(h, &format!("a{}", h), &format!("a{}", h - 1)));
        }
        g
    }

    #[test]
    fn test_shallow_reorg_opens_no_window() {
        let mut g = guard_with_chain();
        assert!(g.begin_reorg(13, 13, 1, &[SignalType::ExchangeFlow]).is_none());
        assert!(g.quiet().is_empty());
        assert_eq!(g.tracker().tip(), Some((12, "a12")));
    }

    #[test]
    fn test_deep_reorg_opens_scoped_window() {
        let mut g = guard_with_chain();
        let (id, range) = g
            .begin_reorg(11, 13, 3, &[SignalType::ExchangeFlow, SignalType::MinerTreasury])
            .unwrap();

        assert_eq!(range, HeightRange::new(11, 13));
        assert!(g.is_suppressed(12, SignalType::ExchangeFlow));
        assert!(!g.is_suppressed(12, SignalType::MempoolNowcast));

        for h in 11..=13 {
            g.mark_recomputed(h);
        }
        assert!(!g.quiet().is_open(id));
    }

    #[test]
    fn test_deep_reorg_without_stored_signals_covers_all_types() {
        let mut g = guard_with_chain();
        g.begin_reorg(12, 13, 2, &[]).unwrap();
        assert!(g.is_suppressed(12, SignalType::WhaleAccumulation));
        assert!(g.is_suppressed(13, SignalType::FeeForecast));
    }

    #[test]
    fn test_missing_mempool_scope() {
        let mut g = guard_with_chain();
        g.note_missing_mempool(14);
        assert!(g.is_suppressed(14, SignalType::MempoolNowcast));
        assert!(g.is_suppressed(14, SignalType::FeeForecast));
        assert!(!g.is_suppressed(14, SignalType::ExchangeFlow));
    }

    #[test]
    fn test_missing_blocks_window_is_idempotent() {
        let mut g = guard_with_chain();
        let a = g.note_missing_blocks(14, 15);
        let b = g.note_missing_blocks(14, 15);
        assert_eq!(a, b);
        assert!(g.is_suppressed(15, SignalType::ExchangeFlow));
    }
}
