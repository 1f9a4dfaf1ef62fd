//! Rolling baselines keyed by block height
//!
//! Every sample remembers the height that produced it, so a reorg (or a
//! re-run of the same height) can drop samples from a height onwards
//! without rebuilding the window.

use serde::Serialize;
use statrs::statistics::Statistics;
use std::collections::{BTreeMap, VecDeque};

/// Largest |z| reported; keeps payloads finite when the baseline is flat
pub const MAX_Z_SCORE: f64 = 1_000.0;

const FLAT_EPSILON: f64 = 1e-12;

/// Mean / standard deviation summary of a window
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Baseline {
    pub mean: f64,
    pub std_dev: f64,
    pub samples: usize,
}

impl Baseline {
    /// Standard deviations between `value` and the mean, capped at `MAX_Z_SCORE`
    pub fn z_score(&self, value: f64) -> f64 {
        let deviation = value - self.mean;
        if self.std_dev < FLAT_EPSILON {
            if deviation.abs() < FLAT_EPSILON {
                return 0.0;
            }
            return MAX_Z_SCORE.copysign(deviation);
        }
        (deviation / self.std_dev).clamp(-MAX_Z_SCORE, MAX_Z_SCORE)
    }
}

/// Fixed-capacity window of `(height, value)` samples
#[derive(Debug, Clone)]
pub struct RollingWindow {
    capacity: usize,
    samples: VecDeque<(u64, f64)>,
}

impl RollingWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            samples: VecDeque::with_capacity(capacity.max(1)),
        }
    }

    /// Add a sample for `height`, replacing anything at or above it
    pub fn push(&mut self, height: u64, value: f64) {
        self.rewind(height);
        self.samples.push_back((height, value));
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    /// Add several samples that all belong to `height`
    ///
    /// They share one key, so a later `rewind(height)` drops them together.
    pub fn push_all(&mut self, height: u64, values: impl IntoIterator<Item = f64>) {
        self.rewind(height);
        for value in values {
            self.samples.push_back((height, value));
        }
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    /// Drop samples recorded at `from_height` or later
    pub fn rewind(&mut self, from_height: u64) {
        while matches!(self.samples.back(), Some((h, _)) if *h >= from_height) {
            self.samples.pop_back();
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn last(&self) -> Option<f64> {
        self.samples.back().map(|(_, v)| *v)
    }

    pub fn last_height(&self) -> Option<u64> {
        self.samples.back().map(|(h, _)| *h)
    }

    pub fn values(&self) -> Vec<f64> {
        self.samples.iter().map(|(_, v)| *v).collect()
    }

    /// Value recorded at exactly `height`
    pub fn value_at(&self, height: u64) -> Option<f64> {
        self.samples
            .iter()
            .rev()
            .find(|(h, _)| *h == height)
            .map(|(_, v)| *v)
    }

    /// Mean and population standard deviation, once `min_samples` exist
    pub fn baseline(&self, min_samples: usize) -> Option<Baseline> {
        if self.samples.is_empty() || self.samples.len() < min_samples {
            return None;
        }
        let mean = self.samples.iter().map(|(_, v)| *v).mean();
        let std_dev = self.samples.iter().map(|(_, v)| *v).population_std_dev();
        if !mean.is_finite() || !std_dev.is_finite() {
            return None;
        }
        Some(Baseline {
            mean,
            std_dev,
            samples: self.samples.len(),
        })
    }
}

/// Per-height journal of contributions, bounded to the most recent heights
///
/// Day-bucketed processors record what each height added so a rewind can
/// subtract exactly that.
#[derive(Debug, Clone)]
pub struct HeightLog<T> {
    max_heights: usize,
    entries: BTreeMap<u64, Vec<T>>,
}

impl<T> HeightLog<T> {
    pub fn new(max_heights: usize) -> Self {
        Self {
            max_heights: max_heights.max(1),
            entries: BTreeMap::new(),
        }
    }

    /// Record the contributions of `height`, pruning the oldest heights
    pub fn record(&mut self, height: u64, items: Vec<T>) {
        self.entries.insert(height, items);
        while self.entries.len() > self.max_heights {
            self.entries.pop_first();
        }
    }

    /// Remove and return everything recorded at `from_height` or later
    pub fn take_from(&mut self, from_height: u64) -> Vec<(u64, T)> {
        let tail = self.entries.split_off(&from_height);
        tail.into_iter()
            .flat_map(|(height, items)| items.into_iter().map(move |item| (height, item)))
            .collect()
    }

    /// Most recent height and its items
    pub fn newest(&self) -> Option<(u64, &[T])> {
        self.entries
            .iter()
            .next_back()
            .map(|(height, items)| (*height, items.as_slice()))
    }

    /// All recorded items, oldest height first
    pub fn iter(&self) -> impl Iterator<Item = (u64, &T)> + '_ {
        self.entries
            .iter()
            .flat_map(|(height, items)| items.iter().map(move |item| (*height, item)))
    }

    pub fn oldest_height(&self) -> Option<u64> {
        self.entries.keys().next().copied()
    }

    pub fn newest_height(&self) -> Option<u64> {
        self.entries.keys().next_back().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
