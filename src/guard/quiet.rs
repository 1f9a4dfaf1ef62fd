//! Quiet-mode windows
//!
//! A window covers a height range and a set of signal types. Insights for
//! covered (height, type) pairs are suppressed until every height in the
//! range has been recomputed, at which point the window lifts.

use crate::signals::SignalType;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::fmt;

/// Inclusive block height range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HeightRange {
    pub start: u64,
    pub end: u64,
}

impl HeightRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self {
            start: start.min(end),
            end: start.max(end),
        }
    }

    pub fn single(height: u64) -> Self {
        Self::new(height, height)
    }

    pub fn contains(&self, height: u64) -> bool {
        height >= self.start && height <= self.end
    }

    /// Number of heights covered
    pub fn height_count(&self) -> u64 {
        self.end - self.start + 1
    }
}

impl fmt::Display for HeightRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum QuietReason {
    Reorg { depth: u64 },
    /// Skipped heights or a parent that was never delivered
    MissingBlocks,
    /// Mempool snapshot missing for a block
    MissingMempool,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuietWindow {
    pub id: u64,
    pub range: HeightRange,
    pub scope: BTreeSet<SignalType>,
    pub reason: QuietReason,
    pub opened_at: i64,
    /// Heights in `range` recomputed so far; the range itself is never
    /// materialized
    recomputed: BTreeSet<u64>,
}

impl QuietWindow {
    pub fn covers(&self, height: u64, signal_type: SignalType) -> bool {
        self.range.contains(height) && self.scope.contains(&signal_type)
    }

    /// Heights not yet recomputed
    pub fn pending(&self) -> impl Iterator<Item = u64> + '_ {
        (self.range.start..=self.range.end).filter(move |h| !self.recomputed.contains(h))
    }

    pub fn pending_count(&self) -> u64 {
        self.range.height_count() - self.recomputed.len() as u64
    }

    /// Record a recompute of `height`; true when nothing is left pending
    fn record(&mut self, height: u64) -> bool {
        if self.range.contains(height) && self.recomputed.insert(height) {
            return self.pending_count() == 0;
        }
        false
    }
}

#[derive(Debug, Default)]
pub struct QuietModeRegistry {
    windows: Vec<QuietWindow>,
    next_id: u64,
}

impl QuietModeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a window; an empty scope covers every signal type
    ///
    /// Re-opening an identical window returns the existing id.
    pub fn open(
        &mut self,
        range: HeightRange,
        scope: impl IntoIterator<Item = SignalType>,
        reason: QuietReason,
    ) -> u64 {
        let mut scope: BTreeSet<SignalType> = scope.into_iter().collect();
        if scope.is_empty() {
            scope = SignalType::all().into_iter().collect();
        }

        if let Some(existing) = self
            .windows
            .iter()
            .find(|w| w.range == range && w.scope == scope && w.reason == reason)
        {
            return existing.id;
        }

        self.next_id += 1;
        let id = self.next_id;

        log::info!(
            "🔇 Quiet window #{} opened for heights {} ({:?}, {} types)",
            id,
            range,
            reason,
            scope.len()
        );

        self.windows.push(QuietWindow {
            id,
            range,
            scope,
            reason,
            opened_at: chrono::Utc::now().timestamp(),
            recomputed: BTreeSet::new(),
        });
        id
    }

    pub fn is_suppressed(&self, height: u64, signal_type: SignalType) -> bool {
        self.windows.iter().any(|w| w.covers(height, signal_type))
    }

    /// Signal types suppressed at `height`
    pub fn suppressed_types(&self, height: u64) -> BTreeSet<SignalType> {
        self.windows
            .iter()
            .filter(|w| w.range.contains(height))
            .flat_map(|w| w.scope.iter().copied())
            .collect()
    }

    /// Note that `height` went through a full recompute; returns the ids of
    /// windows that lifted as a result
    pub fn mark_recomputed(&mut self, height: u64) -> Vec<u64> {
        self.record_where(height, |_| true)
    }

    /// Note that `height` was recomputed with some input still missing
    ///
    /// Counts toward every window except the missing-mempool ones, which
    /// stay until the data arrives.
    pub fn mark_attempted(&mut self, height: u64) -> Vec<u64> {
        self.record_where(height, |w| w.reason != QuietReason::MissingMempool)
    }

    fn record_where(&mut self, height: u64, applies: impl Fn(&QuietWindow) -> bool) -> Vec<u64> {
        let mut lifted = Vec::new();
        for window in &mut self.windows {
            if applies(&*window) && window.record(height) {
                lifted.push(window.id);
            }
        }
        if !lifted.is_empty() {
            let lifted_set: HashSet<u64> = lifted.iter().copied().collect();
            self.windows.retain(|w| {
                if lifted_set.contains(&w.id) {
                    log::info!("🔔 Quiet window #{} lifted (heights {} recomputed)", w.id, w.range);
                    false
                } else {
                    true
                }
            });
        }
        lifted
    }

    pub fn is_open(&self, id: u64) -> bool {
        self.windows.iter().any(|w| w.id == id)
    }

    pub fn window(&self, id: u64) -> Option<&QuietWindow> {
        self.windows.iter().find(|w| w.id == id)
    }

    pub fn active(&self) -> &[QuietWindow] {
        &self.windows
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Drop windows that end below `height`; they can no longer be recomputed
    pub fn prune_below(&mut self, height: u64) -> usize {
        let before = self.windows.len();
        self.windows.retain(|w| {
            let keep = w.range.end >= height;
            if !keep {
                log::warn!(
                    "⚠️  Dropping quiet window #{} ({}) below horizon {} with {} heights never recomputed",
                    w.id,
                    w.range,
                    height,
                    w.pending_count()
                );
            }
            keep
        });
        before - self.windows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_scoped_to_types_and_range() {
        let mut q = QuietModeRegistry::new();
        q.open(
            HeightRange::new(100, 102),
            [SignalType::ExchangeFlow],
            QuietReason::Reorg { depth: 3 },
        );

        assert!(q.is_suppressed(101, SignalType::ExchangeFlow));
        assert!(!q.is_suppressed(101, SignalType::MempoolNowcast));
        assert!(!q.is_suppressed(103, SignalType::ExchangeFlow));
    }

    #[test]
    fn test_empty_scope_covers_all_types() {
        let mut q = QuietModeRegistry::new();
        q.open(HeightRange::single(7), Vec::<SignalType>::new(), QuietReason::MissingBlocks);
        for t in SignalType::all() {
            assert!(q.is_suppressed(7, t));
        }
        assert_eq!(q.suppressed_types(7).len(), 6);
    }

    #[test]
    fn test_reopening_identical_window_is_noop() {
        let mut q = QuietModeRegistry::new();
        let a = q.open(HeightRange::new(3, 4), Vec::<SignalType>::new(), QuietReason::MissingBlocks);
        let b = q.open(HeightRange::new(3, 4), Vec::<SignalType>::new(), QuietReason::MissingBlocks);
        assert_eq!(a, b);
        assert_eq!(q.active().len(), 1);
    }

    #[test]
    fn test_window_lifts_after_every_height_recomputed() {
        let mut q = QuietModeRegistry::new();
        let id = q.open(HeightRange::new(10, 12), [SignalType::MinerTreasury], QuietReason::Reorg { depth: 3 });

        assert!(q.mark_recomputed(10).is_empty());
        assert!(q.mark_recomputed(12).is_empty());
        assert!(q.is_open(id));
        assert_eq!(q.window(id).unwrap().pending().collect::<Vec<_>>(), vec![11]);

        assert_eq!(q.mark_recomputed(11), vec![id]);
        assert!(!q.is_open(id));
        assert!(!q.is_suppressed(11, SignalType::MinerTreasury));
    }

    #[test]
    fn test_overlapping_windows_lift_independently() {
        let mut q = QuietModeRegistry::new();
        let a = q.open(HeightRange::single(5), [SignalType::MempoolNowcast], QuietReason::MissingMempool);
        let b = q.open(HeightRange::new(5, 6), [SignalType::ExchangeFlow], QuietReason::Reorg { depth: 2 });

        assert_eq!(q.mark_recomputed(5), vec![a]);
        assert!(q.is_open(b));
        assert_eq!(q.mark_recomputed(6), vec![b]);
        assert!(q.is_empty());
    }

    #[test]
    fn test_huge_gap_window_stays_compact() {
        let mut q = QuietModeRegistry::new();
        let id = q.open(HeightRange::new(101, 5_000_099), Vec::<SignalType>::new(), QuietReason::MissingBlocks);

        let window = q.window(id).unwrap();
        assert_eq!(window.pending_count(), 4_999_999);
        assert_eq!(window.pending().take(2).collect::<Vec<_>>(), vec![101, 102]);
        assert!(window.recomputed.is_empty());

        assert!(q.mark_recomputed(200).is_empty());
        assert_eq!(q.window(id).unwrap().pending_count(), 4_999_998);
        // Heights outside the range are not recorded
        assert!(q.mark_recomputed(7).is_empty());
        assert_eq!(q.window(id).unwrap().recomputed.len(), 1);
    }

    #[test]
    fn test_attempted_recompute_keeps_missing_mempool_window() {
        let mut q = QuietModeRegistry::new();
        let mempool = q.open(HeightRange::single(11), [SignalType::MempoolNowcast], QuietReason::MissingMempool);
        let reorg = q.open(HeightRange::single(11), [SignalType::ExchangeFlow], QuietReason::Reorg { depth: 2 });

        assert_eq!(q.mark_attempted(11), vec![reorg]);
        assert!(q.is_open(mempool));
        assert!(q.is_suppressed(11, SignalType::MempoolNowcast));

        assert_eq!(q.mark_recomputed(11), vec![mempool]);
        assert!(q.is_empty());
    }

    #[test]
    fn test_prune_below_horizon() {
        let mut q = QuietModeRegistry::new();
        q.open(HeightRange::new(1, 2), Vec::<SignalType>::new(), QuietReason::MissingBlocks);
        q.open(HeightRange::new(50, 60), Vec::<SignalType>::new(), QuietReason::MissingBlocks);
        assert_eq!(q.prune_below(10), 1);
        assert_eq!(q.active().len(), 1);
    }

    #[test]
    fn test_height_range_normalizes() {
        let r = HeightRange::new(9, 3);
        assert_eq!((r.start, r.end), (3, 9));
        assert_eq!(r.height_count(), 7);
        assert_eq!(r.to_string(), "3..=9");
    }
}
