//! Data quality factor
//!
//! Starts from 1.0 and applies a penalty per problem found in the inputs a
//! signal was computed from. Inputs a signal cannot do without drive the
//! factor to 0.

use crate::entity::EntitySnapshot;
use crate::signals::SignalType;
use crate::types::{is_well_formed_hash, Block};
use serde::Serialize;

const MALFORMED_HASH_PENALTY: f64 = 0.5;
const MALFORMED_PARENT_PENALTY: f64 = 0.8;
const EMPTY_BLOCK_PENALTY: f64 = 0.7;
const STALE_SNAPSHOT_PENALTY: f64 = 0.6;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataQualityReport {
    pub score: f64,
    pub issues: Vec<String>,
}

impl DataQualityReport {
    fn clean() -> Self {
        Self {
            score: 1.0,
            issues: Vec::new(),
        }
    }

    fn penalize(&mut self, factor: f64, issue: &str) {
        self.score *= factor;
        self.issues.push(issue.to_string());
    }
}

/// Types whose payload attributes flow to a named entity
fn needs_entities(signal_type: SignalType) -> bool {
    matches!(
        signal_type,
        SignalType::ExchangeFlow | SignalType::MinerTreasury | SignalType::LiquidityPressure
    )
}

#[derive(Debug, Clone)]
pub struct DataQualityAssessor {
    max_snapshot_age_secs: i64,
}

impl DataQualityAssessor {
    pub fn new(max_snapshot_age_secs: i64) -> Self {
        Self {
            max_snapshot_age_secs: max_snapshot_age_secs.max(1),
        }
    }

    pub fn assess(
        &self,
        signal_type: SignalType,
        block: &Block,
        snapshot: &EntitySnapshot,
        now: i64,
    ) -> DataQualityReport {
        let mut report = DataQualityReport::clean();

        if !is_well_formed_hash(&block.hash) {
            report.penalize(MALFORMED_HASH_PENALTY, "malformed block hash");
        }
        if !is_well_formed_hash(&block.parent_hash) {
            report.penalize(MALFORMED_PARENT_PENALTY, "malformed parent hash");
        }
        if block.transactions.is_empty() {
            report.penalize(EMPTY_BLOCK_PENALTY, "block has no transactions");
        }

        if signal_type.depends_on_mempool() && block.mempool.is_none() {
            report.penalize(0.0, "mempool snapshot missing");
        }

        if needs_entities(signal_type) && snapshot.is_empty() {
            report.penalize(0.0, "entity snapshot empty");
        } else if !snapshot.is_empty() && snapshot.age_secs(now) > self.max_snapshot_age_secs {
            report.penalize(STALE_SNAPSHOT_PENALTY, "entity snapshot stale");
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processors::test_support::{block, entity, mempool, snapshot, tx};
    use crate::types::EntityType;

    fn entities() -> EntitySnapshot {
        snapshot(vec![entity("binance", "Binance", EntityType::Exchange, &["bn"])])
    }

    fn good_block() -> Block {
        let mut b = block(10, 6_000, vec![tx("t", &[("a", 1.0)], &[("bn", 1.0)])]);
        b.mempool = Some(mempool(&[5.0]));
        b
    }

    #[test]
    fn test_clean_inputs_score_one() {
        let q = DataQualityAssessor::new(900);
        let report = q.assess(SignalType::ExchangeFlow, &good_block(), &entities(), 100);
        assert_eq!(report.score, 1.0);
        assert!(report.issues.is_empty());
    }

    #[test]
    fn test_malformed_hash_penalized() {
        let q = DataQualityAssessor::new(900);
        let mut b = good_block();
        b.hash = "not-hex".to_string();
        let report = q.assess(SignalType::ExchangeFlow, &b, &entities(), 100);
        assert_eq!(report.score, 0.5);
    }

    #[test]
    fn test_missing_mempool_zeroes_mempool_types_only() {
        let q = DataQualityAssessor::new(900);
        let mut b = good_block();
        b.mempool = None;
        assert_eq!(q.assess(SignalType::FeeForecast, &b, &entities(), 100).score, 0.0);
        assert_eq!(q.assess(SignalType::ExchangeFlow, &b, &entities(), 100).score, 1.0);
    }

    #[test]
    fn test_stale_snapshot_penalized() {
        let q = DataQualityAssessor::new(900);
        let report = q.assess(SignalType::WhaleAccumulation, &good_block(), &entities(), 5_000);
        assert!((report.score - 0.6).abs() < 1e-12);
        assert_eq!(report.issues, vec!["entity snapshot stale".to_string()]);
    }

    #[test]
    fn test_empty_snapshot_zeroes_entity_types() {
        let q = DataQualityAssessor::new(900);
        let empty = EntitySnapshot::empty();
        assert_eq!(q.assess(SignalType::MinerTreasury, &good_block(), &empty, 0).score, 0.0);
        assert_eq!(q.assess(SignalType::MempoolNowcast, &good_block(), &empty, 0).score, 1.0);
    }
}
