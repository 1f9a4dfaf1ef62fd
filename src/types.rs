//! Normalized chain data as delivered by the upstream ingestion feed
//!
//! Amounts are in BTC, fees in satoshis, sizes in virtual bytes. These
//! records are read-only inside the engine.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Seconds per UTC day, used for day bucketing
pub const SECS_PER_DAY: i64 = 86_400;

/// Block capacity in virtual bytes
pub const BLOCK_CAPACITY_VBYTES: u64 = 1_000_000;

/// Target block interval in seconds
pub const TARGET_BLOCK_INTERVAL_SECS: u64 = 600;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxInput {
    pub address: String,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxOutput {
    pub address: String,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedTransaction {
    pub txid: String,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    /// Fee in satoshis
    #[serde(default)]
    pub fee: u64,
    #[serde(default)]
    pub vsize: u64,
    /// Entity ids the upstream feed already attached, if any
    #[serde(default)]
    pub entity_tags: Option<Vec<String>>,
}

impl NormalizedTransaction {
    pub fn total_output(&self) -> f64 {
        self.outputs.iter().map(|o| o.amount).sum()
    }
}

/// One unconfirmed transaction in the mempool snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MempoolEntry {
    pub txid: String,
    /// sat/vB
    pub fee_rate: f64,
    pub vsize: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MempoolSnapshot {
    pub observed_at: i64,
    pub entries: Vec<MempoolEntry>,
}

impl MempoolSnapshot {
    pub fn total_vsize(&self) -> u64 {
        self.entries.iter().map(|e| e.vsize).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub height: u64,
    pub hash: String,
    pub parent_hash: String,
    /// Unix timestamp (seconds)
    pub timestamp: i64,
    pub transactions: Vec<NormalizedTransaction>,
    /// Mempool state observed when this block arrived
    #[serde(default)]
    pub mempool: Option<MempoolSnapshot>,
}

impl Block {
    /// UTC day index of the block timestamp
    pub fn day(&self) -> i64 {
        self.timestamp.div_euclid(SECS_PER_DAY)
    }

    /// Sum of transaction vsizes
    pub fn vsize(&self) -> u64 {
        self.transactions.iter().map(|t| t.vsize).sum()
    }

    /// Fraction of block capacity used, in [0, 1]
    pub fn fill_rate(&self) -> f64 {
        (self.vsize() as f64 / BLOCK_CAPACITY_VBYTES as f64).clamp(0.0, 1.0)
    }
}

/// True when `hash` is 32 bytes of hex
pub fn is_well_formed_hash(hash: &str) -> bool {
    matches!(hex::decode(hash), Ok(bytes) if bytes.len() == 32)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Exchange,
    MiningPool,
    Treasury,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Exchange => "exchange",
            EntityType::MiningPool => "mining_pool",
            EntityType::Treasury => "treasury",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "exchange" => Some(EntityType::Exchange),
            "mining_pool" => Some(EntityType::MiningPool),
            "treasury" => Some(EntityType::Treasury),
            _ => None,
        }
    }
}

/// A known real-world actor and the addresses it controls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnownEntity {
    pub entity_id: String,
    pub entity_type: EntityType,
    pub name: String,
    pub addresses: Vec<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}
