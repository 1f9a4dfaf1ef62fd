//! Signal Processors
//!
//! One processor per signal domain, all behind the `SignalProcessor`
//! contract and registered by `SignalType`. Each processor owns its rolling
//! state exclusively; the only input they share is the immutable entity
//! snapshot.

pub mod exchange_flow;
pub mod mempool;
pub mod miner_treasury;
pub mod rolling;
pub mod whale;

pub use exchange_flow::ExchangeFlowProcessor;
pub use mempool::MempoolProcessor;
pub use miner_treasury::MinerTreasuryProcessor;
pub use rolling::{Baseline, HeightLog, RollingWindow};
pub use whale::WhaleAccumulationProcessor;

use crate::entity::EntitySnapshot;
use crate::error::SignalResult;
use crate::guard::anomaly::AnomalyRule;
use crate::signals::{Signal, SignalType};
use crate::types::Block;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Common contract of every per-domain processor
///
/// `process` must be repeatable: calling it twice for the same height
/// leaves the state as if it had been called once.
pub trait SignalProcessor: Send {
    fn signal_type(&self) -> SignalType;

    /// Consume one block; `Ok(None)` while baselines are warming up or
    /// nothing qualifies
    fn process(&mut self, block: &Block, entities: &EntitySnapshot) -> SignalResult<Option<Signal>>;

    /// Forget everything derived from `from_height` onwards
    fn rewind(&mut self, from_height: u64);
}

/// Tuning shared by the processors
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub anomaly_multiplier: f64,
    pub min_baseline_samples: usize,
    pub flow_baseline_blocks: usize,
    pub mempool_baseline_blocks: usize,
    pub treasury_history_days: usize,
    pub accumulation_window_days: usize,
    pub whale_volume_floor: f64,
    /// Heights of contributions kept for rewinds (about two days of blocks)
    pub rewind_depth: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            anomaly_multiplier: 3.0,
            min_baseline_samples: 20,
            flow_baseline_blocks: 144,
            mempool_baseline_blocks: 144,
            treasury_history_days: 30,
            accumulation_window_days: 7,
            whale_volume_floor: 100.0,
            rewind_depth: 288,
        }
    }
}

impl ProcessorConfig {
    pub fn anomaly_rule(&self) -> AnomalyRule {
        AnomalyRule::new(self.anomaly_multiplier)
    }
}

/// Processor behind its own lock; only one task touches it at a time
pub type SharedProcessor = Arc<Mutex<Box<dyn SignalProcessor>>>;

/// Lookup table of processors keyed by signal type
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    processors: BTreeMap<SignalType, SharedProcessor>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the four block processors
    pub fn with_defaults(config: &ProcessorConfig) -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(MempoolProcessor::new(config)));
        registry.register(Box::new(ExchangeFlowProcessor::new(config)));
        registry.register(Box::new(MinerTreasuryProcessor::new(config)));
        registry.register(Box::new(WhaleAccumulationProcessor::new(config)));
        registry
    }

    /// Register a processor, replacing any previous one for its type
    pub fn register(&mut self, processor: Box<dyn SignalProcessor>) {
        let signal_type = processor.signal_type();
        if self
            .processors
            .insert(signal_type, Arc::new(Mutex::new(processor)))
            .is_some()
        {
            log::warn!("⚠️  Replaced processor for {}", signal_type);
        }
    }

    pub fn get(&self, signal_type: SignalType) -> Option<SharedProcessor> {
        self.processors.get(&signal_type).cloned()
    }

    /// Registered types in stable order
    pub fn types(&self) -> Vec<SignalType> {
        self.processors.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    /// Rewind every processor to before `from_height`
    pub fn rewind_all(&self, from_height: u64) {
        for (signal_type, processor) in &self.processors {
            let mut guard = processor.lock().unwrap_or_else(|e| e.into_inner());
            guard.rewind(from_height);
            log::debug!("⏪ Rewound {} to height {}", signal_type, from_height);
        }
    }
}
