//! Mempool nowcast
//!
//! Fee-rate quantiles over the mempool observed with each block, an
//! inclusion estimate per quantile and the deviation of current fee
//! pressure (median fee rate) from its trailing baseline.

use super::rolling::RollingWindow;
use super::{ProcessorConfig, SignalProcessor};
use crate::entity::EntitySnapshot;
use crate::error::{SignalError, SignalResult};
use crate::guard::anomaly::AnomalyRule;
use crate::signals::{EvidenceRef, Signal, SignalType};
use crate::types::{Block, MempoolSnapshot, BLOCK_CAPACITY_VBYTES, TARGET_BLOCK_INTERVAL_SECS};
use serde::Serialize;
use serde_json::json;
use statrs::statistics::{Data, OrderStatistics, Statistics};

/// Floor on the fill-rate baseline so sparse test chains don't explode estimates
const MIN_EFFECTIVE_FILL: f64 = 0.25;

const EVIDENCE_TXS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FeeQuantiles {
    pub p10: f64,
    pub p50: f64,
    pub p90: f64,
}

impl FeeQuantiles {
    /// Quantiles of the snapshot's fee rates; zeros for an empty mempool
    pub fn from_snapshot(snapshot: &MempoolSnapshot) -> Self {
        let rates: Vec<f64> = snapshot
            .entries
            .iter()
            .map(|e| e.fee_rate)
            .filter(|r| r.is_finite() && *r >= 0.0)
            .collect();

        if rates.is_empty() {
            return Self { p10: 0.0, p50: 0.0, p90: 0.0 };
        }

        let mut data = Data::new(rates);
        Self {
            p10: data.percentile(10),
            p50: data.percentile(50),
            p90: data.percentile(90),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InclusionEstimate {
    pub quantile: &'static str,
    pub fee_rate: f64,
    pub vbytes_ahead: u64,
    pub blocks: u64,
    pub minutes: u64,
}

/// Blocks until a transaction paying `fee_rate` is mined, given the
/// mempool ahead of it and the effective block capacity
pub fn estimate_inclusion(
    quantile: &'static str,
    fee_rate: f64,
    snapshot: &MempoolSnapshot,
    fill_rate: f64,
) -> InclusionEstimate {
    let vbytes_ahead: u64 = snapshot
        .entries
        .iter()
        .filter(|e| e.fee_rate > fee_rate)
        .map(|e| e.vsize)
        .sum();

    let effective = BLOCK_CAPACITY_VBYTES as f64 * fill_rate.clamp(MIN_EFFECTIVE_FILL, 1.0);
    let blocks = (vbytes_ahead as f64 / effective).floor() as u64 + 1;

    InclusionEstimate {
        quantile,
        fee_rate,
        vbytes_ahead,
        blocks,
        minutes: blocks * TARGET_BLOCK_INTERVAL_SECS / 60,
    }
}

pub struct MempoolProcessor {
    rule: AnomalyRule,
    min_samples: usize,
    fee_pressure: RollingWindow,
    fill_rate: RollingWindow,
}

impl MempoolProcessor {
    pub fn new(config: &ProcessorConfig) -> Self {
        Self {
            rule: config.anomaly_rule(),
            min_samples: config.min_baseline_samples,
            fee_pressure: RollingWindow::new(config.mempool_baseline_blocks),
            fill_rate: RollingWindow::new(config.mempool_baseline_blocks),
        }
    }

    fn average_fill(&self) -> f64 {
        let values = self.fill_rate.values();
        if values.is_empty() {
            return 1.0;
        }
        values.mean()
    }
}

impl SignalProcessor for MempoolProcessor {
    fn signal_type(&self) -> SignalType {
        SignalType::MempoolNowcast
    }

    fn process(&mut self, block: &Block, _entities: &EntitySnapshot) -> SignalResult<Option<Signal>> {
        self.rewind(block.height);
        self.fill_rate.push(block.height, block.fill_rate());

        let snapshot = block.mempool.as_ref().ok_or_else(|| SignalError::DataGap {
            height: block.height,
            detail: "no mempool snapshot delivered with block".to_string(),
        })?;

        let quantiles = FeeQuantiles::from_snapshot(snapshot);
        let pressure = quantiles.p50;

        let baseline = self.fee_pressure.baseline(self.min_samples);
        self.fee_pressure.push(block.height, pressure);

        let Some(baseline) = baseline else {
            log::debug!(
                "Mempool baseline warming up ({}/{} samples)",
                self.fee_pressure.len(),
                self.min_samples
            );
            return Ok(None);
        };

        let fill = self.average_fill();
        let inclusion: Vec<InclusionEstimate> = [
            ("p10", quantiles.p10),
            ("p50", quantiles.p50),
            ("p90", quantiles.p90),
        ]
        .into_iter()
        .map(|(name, rate)| estimate_inclusion(name, rate, snapshot, fill))
        .collect();

        let z = baseline.z_score(pressure);

        let mut top: Vec<_> = snapshot.entries.iter().collect();
        top.sort_by(|a, b| b.fee_rate.total_cmp(&a.fee_rate));
        let mut evidence = vec![EvidenceRef::block(block.height)];
        evidence.extend(
            top.iter()
                .take(EVIDENCE_TXS)
                .map(|e| EvidenceRef::block(block.height).with_txid(e.txid.clone())),
        );

        let signal = Signal::new(SignalType::MempoolNowcast, block.height, block.hash.clone())
            .with_strength(self.rule.strength(z))
            .with_payload(json!({
                "p10": quantiles.p10,
                "p50": quantiles.p50,
                "p90": quantiles.p90,
                "fee_pressure": pressure,
                "fee_pressure_z": z,
                "baseline_mean": baseline.mean,
                "baseline_std": baseline.std_dev,
                "baseline_samples": baseline.samples,
                "mempool_tx_count": snapshot.entries.len(),
                "mempool_vsize": snapshot.total_vsize(),
                "avg_fill_rate": fill,
                "inclusion": inclusion,
            }))
            .with_evidence(evidence);

        Ok(Some(signal))
    }

    fn rewind(&mut self, from_height: u64) {
        self.fee_pressure.rewind(from_height);
        self.fill_rate.rewind(from_height);
    }
}
