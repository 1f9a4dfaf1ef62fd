//! Exchange inflow vs trailing per-entity baseline
//!
//! Inflow is the BTC paid to addresses of a known exchange in one block,
//! excluding transfers where the same exchange also funds the transaction
//! (internal wallet shuffling).

use super::rolling::{Baseline, RollingWindow};
use super::{ProcessorConfig, SignalProcessor};
use crate::entity::EntitySnapshot;
use crate::error::SignalResult;
use crate::guard::anomaly::AnomalyRule;
use crate::signals::{EvidenceRef, Signal, SignalType};
use crate::types::{Block, EntityType};
use serde_json::json;
use std::collections::{HashMap, HashSet};

const EVIDENCE_TXS: usize = 10;

#[derive(Debug, Default)]
struct EntityInflow {
    total: f64,
    /// (txid, amount) per contributing transaction
    transactions: Vec<(String, f64)>,
}

#[derive(Debug)]
struct Evaluation {
    entity_id: String,
    inflow: f64,
    baseline: Baseline,
    z: f64,
    anomalous: bool,
}

pub struct ExchangeFlowProcessor {
    rule: AnomalyRule,
    min_samples: usize,
    window_blocks: usize,
    baselines: HashMap<String, RollingWindow>,
    aggregate: RollingWindow,
}

impl ExchangeFlowProcessor {
    pub fn new(config: &ProcessorConfig) -> Self {
        Self {
            rule: config.anomaly_rule(),
            min_samples: config.min_baseline_samples,
            window_blocks: config.flow_baseline_blocks,
            baselines: HashMap::new(),
            aggregate: RollingWindow::new(config.flow_baseline_blocks),
        }
    }

    /// Per-exchange inflow for one block
    fn collect_inflows(block: &Block, entities: &EntitySnapshot) -> HashMap<String, EntityInflow> {
        let mut inflows: HashMap<String, EntityInflow> = HashMap::new();

        for tx in &block.transactions {
            let funding: HashSet<&str> = tx
                .inputs
                .iter()
                .filter_map(|i| entities.lookup_typed(&i.address, EntityType::Exchange))
                .map(|e| e.entity_id.as_str())
                .collect();

            let mut per_tx: HashMap<&str, f64> = HashMap::new();
            for output in &tx.outputs {
                let Some(exchange) = entities.lookup_typed(&output.address, EntityType::Exchange) else {
                    continue;
                };
                if funding.contains(exchange.entity_id.as_str()) {
                    continue;
                }
                *per_tx.entry(exchange.entity_id.as_str()).or_default() += output.amount;
            }

            for (entity_id, amount) in per_tx {
                let entry = inflows.entry(entity_id.to_string()).or_default();
                entry.total += amount;
                entry.transactions.push((tx.txid.clone(), amount));
            }
        }

        inflows
    }
}

impl SignalProcessor for ExchangeFlowProcessor {
    fn signal_type(&self) -> SignalType {
        SignalType::ExchangeFlow
    }

    fn process(&mut self, block: &Block, entities: &EntitySnapshot) -> SignalResult<Option<Signal>> {
        self.rewind(block.height);

        let exchanges = entities.entities_of_type(EntityType::Exchange);
        if exchanges.is_empty() {
            return Ok(None);
        }

        let mut inflows = Self::collect_inflows(block, entities);
        let aggregate_inflow: f64 = inflows.values().map(|i| i.total).sum();

        // Score against the baseline as it stood before this block
        let window_blocks = self.window_blocks;
        let mut evaluations = Vec::new();
        for exchange in &exchanges {
            let observed = inflows.get(&exchange.entity_id).map(|i| i.total).unwrap_or(0.0);
            let window = self
                .baselines
                .entry(exchange.entity_id.clone())
                .or_insert_with(|| RollingWindow::new(window_blocks));

            if let Some(baseline) = window.baseline(self.min_samples) {
                let z = baseline.z_score(observed);
                evaluations.push(Evaluation {
                    entity_id: exchange.entity_id.clone(),
                    inflow: observed,
                    baseline,
                    z,
                    anomalous: self.rule.is_anomalous(&baseline, observed),
                });
            }
            window.push(block.height, observed);
        }

        let aggregate_baseline = self.aggregate.baseline(self.min_samples);
        self.aggregate.push(block.height, aggregate_inflow);

        let Some(focus) = evaluations.iter().max_by(|a, b| a.z.total_cmp(&b.z)) else {
            log::debug!("Exchange flow baselines warming up at height {}", block.height);
            return Ok(None);
        };

        let Some(entity) = entities.entity(&focus.entity_id) else {
            return Ok(None);
        };

        let anomalous_entities: Vec<&str> = evaluations
            .iter()
            .filter(|e| e.anomalous)
            .map(|e| e.entity_id.as_str())
            .collect();

        let mut evidence: Vec<EvidenceRef> = match inflows.remove(&focus.entity_id) {
            Some(mut inflow) => {
                inflow.transactions.sort_by(|a, b| b.1.total_cmp(&a.1));
                inflow
                    .transactions
                    .into_iter()
                    .take(EVIDENCE_TXS)
                    .map(|(txid, amount)| {
                        EvidenceRef::block(block.height)
                            .with_txid(txid)
                            .with_entity(entity.entity_id.clone(), entity.name.clone())
                            .with_amount(amount)
                    })
                    .collect()
            }
            None => Vec::new(),
        };
        if evidence.is_empty() {
            evidence.push(
                EvidenceRef::block(block.height).with_entity(entity.entity_id.clone(), entity.name.clone()),
            );
        }

        let aggregate_z = aggregate_baseline.map(|b| b.z_score(aggregate_inflow));

        // Only inflow above the mean counts toward strength
        let strength = self.rule.strength(focus.z.max(0.0));

        if focus.anomalous {
            log::info!(
                "🚨 Exchange inflow anomaly at height {}: {} received {:.2} BTC (mean {:.2}, σ {:.2}, z={:.1})",
                block.height,
                entity.name,
                focus.inflow,
                focus.baseline.mean,
                focus.baseline.std_dev,
                focus.z
            );
        }

        let signal = Signal::new(SignalType::ExchangeFlow, block.height, block.hash.clone())
            .with_strength(strength)
            .with_payload(json!({
                "entity_id": entity.entity_id,
                "entity_name": entity.name,
                "inflow": focus.inflow,
                "baseline_mean": focus.baseline.mean,
                "baseline_std": focus.baseline.std_dev,
                "baseline_samples": focus.baseline.samples,
                "z_score": focus.z,
                "threshold": self.rule.threshold(&focus.baseline),
                "anomalous": focus.anomalous,
                "anomalous_entities": anomalous_entities,
                "aggregate_inflow": aggregate_inflow,
                "aggregate_z": aggregate_z,
            }))
            .with_evidence(evidence);

        Ok(Some(signal))
    }

    fn rewind(&mut self, from_height: u64) {
        for window in self.baselines.values_mut() {
            window.rewind(from_height);
        }
        self.aggregate.rewind(from_height);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processors::test_support::{block, entity, snapshot, tx};

    fn config() -> ProcessorConfig {
        ProcessorConfig {
            min_baseline_samples: 10,
            ..Default::default()
        }
    }

    fn entities() -> EntitySnapshot {
        snapshot(vec![
            entity("binance", "Binance", EntityType::Exchange, &["bn-hot", "bn-cold"]),
            entity("kraken", "Kraken", EntityType::Exchange, &["kr-1"]),
            entity("foundry", "Foundry USA", EntityType::MiningPool, &["fd-1"]),
        ])
    }

    /// Baseline of mean 500 / σ 100 for binance (alternating 400, 600)
    fn warm(p: &mut ExchangeFlowProcessor, entities: &EntitySnapshot, blocks: u64) {
        for h in 0..blocks {
            let amount = if h % 2 == 0 { 400.0 } else { 600.0 };
            let txs = vec![
                tx(&format!("w{}", h), &[("user", amount)], &[("bn-hot", amount)]),
                tx(&format!("k{}", h), &[("user2", 10.0)], &[("kr-1", 10.0 + (h % 2) as f64)]),
            ];
            p.process(&block(h, h as i64 * 600, txs), entities).unwrap();
        }
    }

    fn inflow_block(height: u64, amount: f64) -> Block {
        block(
            height,
            height as i64 * 600,
            vec![
                tx("deposit", &[("whale", amount)], &[("bn-hot", amount)]),
                tx("k-side", &[("user2", 10.0)], &[("kr-1", 10.5)]),
            ],
        )
    }

    #[test]
    fn test_no_exchanges_no_signal() {
        let mut p = ExchangeFlowProcessor::new(&config());
        let out = p.process(&inflow_block(1, 10.0), &snapshot(vec![])).unwrap();
        assert!(out.is_none());
    }

    #[test]
    fn test_warm_up_returns_none() {
        let mut p = ExchangeFlowProcessor::new(&config());
        let entities = entities();
        for h in 0..10 {
            let out = p.process(&inflow_block(h, 500.0), &entities).unwrap();
            assert!(out.is_none());
        }
    }

    #[test]
    fn test_five_thousand_btc_against_500_100_baseline() {
        let mut p = ExchangeFlowProcessor::new(&config());
        let entities = entities();
        warm(&mut p, &entities, 20);

        let signal = p.process(&inflow_block(20, 5_000.0), &entities).unwrap().unwrap();

        let z = signal.payload_f64("z_score").unwrap();
        assert!((z - 45.0).abs() < 1e-6, "z = {}", z);
        assert_eq!(signal.strength, 1.0);
        assert!(signal.is_anomalous());
        assert_eq!(signal.payload["entity_name"], "Binance");
        assert_eq!(signal.evidence[0].txid.as_deref(), Some("deposit"));
        assert_eq!(signal.evidence[0].entity_name.as_deref(), Some("Binance"));
        assert_eq!(signal.evidence[0].amount, Some(5_000.0));
    }

    #[test]
    fn test_four_sigma_flagged_two_sigma_not() {
        let entities = entities();

        let mut p = ExchangeFlowProcessor::new(&config());
        warm(&mut p, &entities, 20);
        let four = p.process(&inflow_block(20, 900.0), &entities).unwrap().unwrap();
        assert!(four.is_anomalous());

        let mut p = ExchangeFlowProcessor::new(&config());
        warm(&mut p, &entities, 20);
        let two = p.process(&inflow_block(20, 700.0), &entities).unwrap().unwrap();
        assert!(!two.is_anomalous());
        assert!(two.strength < 0.5);
    }

    #[test]
    fn test_internal_transfer_is_not_inflow() {
        let entities = entities();
        let block = block(
            1,
            600,
            vec![tx("shuffle", &[("bn-cold", 300.0)], &[("bn-hot", 299.9)])],
        );
        let inflows = ExchangeFlowProcessor::collect_inflows(&block, &entities);
        assert!(inflows.is_empty());
    }

    #[test]
    fn test_aggregate_inflow_spans_exchanges() {
        let entities = entities();
        let block = block(
            1,
            600,
            vec![
                tx("a", &[("u1", 5.0)], &[("bn-hot", 5.0)]),
                tx("b", &[("u2", 3.0)], &[("kr-1", 2.0), ("fd-1", 1.0)]),
            ],
        );
        let inflows = ExchangeFlowProcessor::collect_inflows(&block, &entities);
        let total: f64 = inflows.values().map(|i| i.total).sum();
        assert_eq!(total, 7.0);
        assert!(!inflows.contains_key("foundry"));
    }

    #[test]
    fn test_reprocessing_height_does_not_shift_baseline() {
        let entities = entities();
        let mut p = ExchangeFlowProcessor::new(&config());
        warm(&mut p, &entities, 20);

        let first = p.process(&inflow_block(20, 5_000.0), &entities).unwrap().unwrap();
        let again = p.process(&inflow_block(20, 5_000.0), &entities).unwrap().unwrap();
        assert_eq!(first.payload, again.payload);
    }

    #[test]
    fn test_rewind_restores_earlier_baseline() {
        let entities = entities();
        let mut p = ExchangeFlowProcessor::new(&config());
        warm(&mut p, &entities, 20);
        p.process(&inflow_block(20, 5_000.0), &entities).unwrap();
        p.process(&inflow_block(21, 5_000.0), &entities).unwrap();

        p.rewind(20);
        let replay = p.process(&inflow_block(20, 5_000.0), &entities).unwrap().unwrap();
        assert!((replay.payload_f64("z_score").unwrap() - 45.0).abs() < 1e-6);
    }
}
