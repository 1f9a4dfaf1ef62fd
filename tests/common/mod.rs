//! Builders shared by the integration tests

#![allow(dead_code)]

use chainpulse::entity::{EntityResolver, StaticEntitySource};
use chainpulse::pipeline::{PipelineConfig, PipelineCoordinator, SignalStore, SqliteSignalStore};
use chainpulse::types::{
    Block, EntityType, KnownEntity, MempoolEntry, MempoolSnapshot, NormalizedTransaction, TxInput,
    TxOutput, SECS_PER_DAY,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tempfile::NamedTempFile;

pub const BINANCE_HOT: &str = "bc1qbinancehotwallet";
pub const GENESIS_TIME: i64 = 1_700_000_000;

/// 32-byte hex hash distinct per (branch, height)
pub fn hash(branch: u8, height: u64) -> String {
    format!("{:02x}{:062x}", branch, height)
}

pub fn tx(txid: &str, inputs: &[(&str, f64)], outputs: &[(&str, f64)]) -> NormalizedTransaction {
    NormalizedTransaction {
        txid: txid.to_string(),
        inputs: inputs
            .iter()
            .map(|(a, v)| TxInput { address: a.to_string(), amount: *v })
            .collect(),
        outputs: outputs
            .iter()
            .map(|(a, v)| TxOutput { address: a.to_string(), amount: *v })
            .collect(),
        fee: 2_000,
        vsize: 300,
        entity_tags: None,
    }
}

pub fn mempool(rates: &[f64]) -> MempoolSnapshot {
    MempoolSnapshot {
        observed_at: GENESIS_TIME,
        entries: rates
            .iter()
            .enumerate()
            .map(|(i, rate)| MempoolEntry {
                txid: format!("mem{}", i),
                fee_rate: *rate,
                vsize: 150_000,
            })
            .collect(),
    }
}

/// Block on `branch` whose parent is the same branch one height down
pub fn block_on(branch: u8, height: u64, transactions: Vec<NormalizedTransaction>) -> Block {
    Block {
        height,
        hash: hash(branch, height),
        parent_hash: hash(branch, height - 1),
        timestamp: GENESIS_TIME + height as i64 * 600,
        transactions,
        mempool: Some(mempool(&[4.0, 8.0, 12.0, 30.0])),
    }
}

/// Block paying `amount` BTC into the Binance hot wallet
pub fn deposit_block(branch: u8, height: u64, amount: f64) -> Block {
    let txid = format!("deposit-{}-{}", branch, height);
    block_on(
        branch,
        height,
        vec![tx(&txid, &[("bc1qcustomer", amount + 0.001)], &[(BINANCE_HOT, amount)])],
    )
}

/// Alternating 400 / 600 BTC deposits: mean 500, σ 100
pub fn baseline_amount(height: u64) -> f64 {
    if height % 2 == 0 {
        400.0
    } else {
        600.0
    }
}

pub fn day_block(height: u64, day: i64, transactions: Vec<NormalizedTransaction>) -> Block {
    let mut b = block_on(0, height, transactions);
    b.timestamp = day * SECS_PER_DAY + SECS_PER_DAY / 2;
    b
}

pub fn binance() -> KnownEntity {
    KnownEntity {
        entity_id: "binance".to_string(),
        entity_type: EntityType::Exchange,
        name: "Binance".to_string(),
        addresses: vec![BINANCE_HOT.to_string()],
        metadata: BTreeMap::new(),
    }
}

pub fn test_config() -> PipelineConfig {
    PipelineConfig {
        min_baseline_samples: 20,
        processor_backoff_ms: 1,
        processor_backoff_max_ms: 4,
        ..PipelineConfig::default()
    }
}

pub fn sqlite_store() -> (NamedTempFile, Arc<SqliteSignalStore>) {
    let temp_file = NamedTempFile::new().unwrap();
    let store = SqliteSignalStore::open_with_schema(temp_file.path().to_str().unwrap(), "sql").unwrap();
    (temp_file, Arc::new(store))
}

pub async fn resolver() -> Arc<EntityResolver> {
    let resolver = Arc::new(EntityResolver::new(Arc::new(StaticEntitySource::new(vec![binance()]))));
    resolver.refresh().await.unwrap();
    resolver
}

pub async fn coordinator_with(
    config: &PipelineConfig,
    store: Arc<dyn SignalStore>,
) -> PipelineCoordinator {
    PipelineCoordinator::new(config, resolver().await, store)
}
