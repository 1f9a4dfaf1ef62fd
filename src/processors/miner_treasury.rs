//! Mining-pool treasury deltas
//!
//! Balance changes of pool addresses are summed per UTC day. When the
//! first block of a new day arrives, the finished day's delta is scored
//! against that pool's history of daily deltas.

use super::rolling::{Baseline, HeightLog, RollingWindow};
use super::{ProcessorConfig, SignalProcessor};
use crate::entity::EntitySnapshot;
use crate::error::SignalResult;
use crate::guard::anomaly::AnomalyRule;
use crate::signals::{EvidenceRef, Signal, SignalType};
use crate::types::{Block, EntityType, SECS_PER_DAY};
use serde_json::json;
use std::collections::HashMap;

const EVIDENCE_TXS: usize = 5;

/// Days of running totals kept behind the current day for rewinds
const RETAINED_DAYS: i64 = 2;

#[derive(Debug, Clone)]
struct PoolContribution {
    entity_id: String,
    day: i64,
    delta: f64,
    txid: String,
}

#[derive(Debug)]
struct FinalizedDay {
    entity_id: String,
    delta: f64,
    baseline: Baseline,
    z: f64,
}

pub struct MinerTreasuryProcessor {
    rule: AnomalyRule,
    min_samples: usize,
    history_days: usize,
    day_totals: HashMap<(String, i64), f64>,
    journal: HeightLog<PoolContribution>,
    days: HeightLog<i64>,
    history: HashMap<String, RollingWindow>,
}

fn format_day(day: i64) -> String {
    chrono::DateTime::from_timestamp(day * SECS_PER_DAY, 0)
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| day.to_string())
}

impl MinerTreasuryProcessor {
    pub fn new(config: &ProcessorConfig) -> Self {
        Self {
            rule: config.anomaly_rule(),
            min_samples: config.min_baseline_samples,
            history_days: config.treasury_history_days,
            day_totals: HashMap::new(),
            journal: HeightLog::new(config.rewind_depth),
            days: HeightLog::new(config.rewind_depth),
            history: HashMap::new(),
        }
    }

    fn current_day(&self) -> Option<i64> {
        self.days.newest().and_then(|(_, days)| days.first().copied())
    }

    /// Push `day`'s delta into each pool's history, keyed by the rollover height
    ///
    /// `empty_days` days with no blocks followed `day`; each enters the
    /// history as a zero delta.
    fn finalize_day(
        &mut self,
        day: i64,
        empty_days: i64,
        height: u64,
        entities: &EntitySnapshot,
    ) -> Vec<FinalizedDay> {
        let history_days = self.history_days;
        let zeros = usize::try_from(empty_days.max(0)).unwrap_or(usize::MAX).min(history_days);
        let mut finalized = Vec::new();

        for pool in entities.entities_of_type(EntityType::MiningPool) {
            let delta = self
                .day_totals
                .get(&(pool.entity_id.clone(), day))
                .copied()
                .unwrap_or(0.0);

            let window = self
                .history
                .entry(pool.entity_id.clone())
                .or_insert_with(|| RollingWindow::new(history_days));
            let baseline = window.baseline(self.min_samples);
            window.push_all(height, std::iter::once(delta).chain(std::iter::repeat(0.0).take(zeros)));

            if let Some(baseline) = baseline {
                finalized.push(FinalizedDay {
                    entity_id: pool.entity_id.clone(),
                    delta,
                    z: baseline.z_score(delta),
                    baseline,
                });
            }
        }

        finalized
    }

    fn contributions(block: &Block, day: i64, entities: &EntitySnapshot) -> Vec<PoolContribution> {
        let mut out = Vec::new();
        for tx in &block.transactions {
            let mut per_pool: HashMap<&str, f64> = HashMap::new();
            for input in &tx.inputs {
                if let Some(pool) = entities.lookup_typed(&input.address, EntityType::MiningPool) {
                    *per_pool.entry(pool.entity_id.as_str()).or_default() -= input.amount;
                }
            }
            for output in &tx.outputs {
                if let Some(pool) = entities.lookup_typed(&output.address, EntityType::MiningPool) {
                    *per_pool.entry(pool.entity_id.as_str()).or_default() += output.amount;
                }
            }
            for (entity_id, delta) in per_pool {
                if delta != 0.0 {
                    out.push(PoolContribution {
                        entity_id: entity_id.to_string(),
                        day,
                        delta,
                        txid: tx.txid.clone(),
                    });
                }
            }
        }
        out
    }

    fn evidence_for(&self, entity_id: &str, entity_name: &str, day: i64, height: u64) -> Vec<EvidenceRef> {
        let mut txs: Vec<(u64, &PoolContribution)> = self
            .journal
            .iter()
            .filter(|(_, c)| c.entity_id == entity_id && c.day == day)
            .collect();
        txs.sort_by(|a, b| b.1.delta.abs().total_cmp(&a.1.delta.abs()));

        let mut evidence: Vec<EvidenceRef> = txs
            .into_iter()
            .take(EVIDENCE_TXS)
            .map(|(h, c)| {
                EvidenceRef::block(h)
                    .with_txid(c.txid.clone())
                    .with_entity(entity_id, entity_name)
                    .with_amount(c.delta)
            })
            .collect();
        evidence.push(EvidenceRef::block(height).with_entity(entity_id, entity_name));
        evidence
    }
}

impl SignalProcessor for MinerTreasuryProcessor {
    fn signal_type(&self) -> SignalType {
        SignalType::MinerTreasury
    }

    fn process(&mut self, block: &Block, entities: &EntitySnapshot) -> SignalResult<Option<Signal>> {
        self.rewind(block.height);

        // Block timestamps may step backwards; days never do
        let previous_day = self.current_day();
        let day = previous_day.map_or(block.day(), |d| d.max(block.day()));

        let finalized = match previous_day {
            Some(prev) if day > prev => {
                let empty_days = day - prev - 1;
                Some((prev, self.finalize_day(prev, empty_days, block.height, entities)))
            }
            _ => None,
        };

        let contributions = Self::contributions(block, day, entities);
        for c in &contributions {
            *self.day_totals.entry((c.entity_id.clone(), c.day)).or_default() += c.delta;
        }
        self.journal.record(block.height, contributions);
        self.days.record(block.height, vec![day]);
        self.day_totals.retain(|(_, d), _| *d >= day - RETAINED_DAYS);

        let Some((finished_day, results)) = finalized else {
            return Ok(None);
        };
        let Some(focus) = results.iter().max_by(|a, b| a.z.abs().total_cmp(&b.z.abs())) else {
            return Ok(None);
        };
        let Some(entity) = entities.entity(&focus.entity_id) else {
            return Ok(None);
        };

        let anomalous = self.rule.z_exceeds(focus.z.abs());
        let direction = if focus.delta >= 0.0 { "accumulating" } else { "distributing" };
        let evidence = self.evidence_for(&entity.entity_id, &entity.name, finished_day, block.height);

        if anomalous {
            log::info!(
                "⛏️  Treasury anomaly for {} on {}: {:+.2} BTC (z={:.1})",
                entity.name,
                format_day(finished_day),
                focus.delta,
                focus.z
            );
        }

        let pools: Vec<_> = results
            .iter()
            .map(|r| json!({"entity_id": r.entity_id, "delta": r.delta, "z_score": r.z}))
            .collect();

        let signal = Signal::new(SignalType::MinerTreasury, block.height, block.hash.clone())
            .with_strength(self.rule.strength(focus.z))
            .with_payload(json!({
                "entity_id": entity.entity_id,
                "entity_name": entity.name,
                "day": format_day(finished_day),
                "delta": focus.delta,
                "baseline_mean": focus.baseline.mean,
                "baseline_std": focus.baseline.std_dev,
                "baseline_samples": focus.baseline.samples,
                "z_score": focus.z,
                "anomalous": anomalous,
                "direction": direction,
                "pools": pools,
            }))
            .with_evidence(evidence);

        Ok(Some(signal))
    }

    fn rewind(&mut self, from_height: u64) {
        for (_, c) in self.journal.take_from(from_height) {
            if let Some(total) = self.day_totals.get_mut(&(c.entity_id, c.day)) {
                *total -= c.delta;
            }
        }
        self.days.take_from(from_height);
        for window in self.history.values_mut() {
            window.rewind(from_height);
        }
    }
}
