//! Signal type definitions
//!
//! A signal is one quantified, typed observation about one block. The pair
//! `(block_height, signal_type)` is its natural key.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SignalType {
    /// Fee-rate quantiles and inclusion estimates for the current mempool
    MempoolNowcast,
    /// Per-block inflow to known exchanges vs trailing baseline
    ExchangeFlow,
    /// Daily balance delta of mining-pool addresses
    MinerTreasury,
    /// Multi-day net accumulation streak of a single address
    WhaleAccumulation,
    /// Next-block fee forecast (predictive)
    FeeForecast,
    /// Next-block liquidity pressure index (predictive)
    LiquidityPressure,
}

impl SignalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalType::MempoolNowcast => "MEMPOOL_NOWCAST",
            SignalType::ExchangeFlow => "EXCHANGE_FLOW",
            SignalType::MinerTreasury => "MINER_TREASURY",
            SignalType::WhaleAccumulation => "WHALE_ACCUMULATION",
            SignalType::FeeForecast => "FEE_FORECAST",
            SignalType::LiquidityPressure => "LIQUIDITY_PRESSURE",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "MEMPOOL_NOWCAST" => Some(SignalType::MempoolNowcast),
            "EXCHANGE_FLOW" => Some(SignalType::ExchangeFlow),
            "MINER_TREASURY" => Some(SignalType::MinerTreasury),
            "WHALE_ACCUMULATION" => Some(SignalType::WhaleAccumulation),
            "FEE_FORECAST" => Some(SignalType::FeeForecast),
            "LIQUIDITY_PRESSURE" => Some(SignalType::LiquidityPressure),
            _ => None,
        }
    }

    pub fn all() -> [SignalType; 6] {
        [
            SignalType::MempoolNowcast,
            SignalType::ExchangeFlow,
            SignalType::MinerTreasury,
            SignalType::WhaleAccumulation,
            SignalType::FeeForecast,
            SignalType::LiquidityPressure,
        ]
    }

    pub fn is_predictive(&self) -> bool {
        matches!(self, SignalType::FeeForecast | SignalType::LiquidityPressure)
    }

    /// Signal types whose inputs include the mempool snapshot
    pub fn depends_on_mempool(&self) -> bool {
        matches!(self, SignalType::MempoolNowcast | SignalType::FeeForecast)
    }
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference substantiating a signal: a block, a transaction, an entity
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EvidenceRef {
    pub block_height: u64,
    pub txid: Option<String>,
    pub entity_id: Option<String>,
    pub entity_name: Option<String>,
    pub amount: Option<f64>,
}

impl EvidenceRef {
    pub fn block(block_height: u64) -> Self {
        Self {
            block_height,
            ..Default::default()
        }
    }

    pub fn with_txid(mut self, txid: impl Into<String>) -> Self {
        self.txid = Some(txid.into());
        self
    }

    pub fn with_entity(mut self, entity_id: impl Into<String>, entity_name: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self.entity_name = Some(entity_name.into());
        self
    }

    pub fn with_amount(mut self, amount: f64) -> Self {
        self.amount = Some(amount);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    pub lower: f64,
    pub upper: f64,
    /// Nominal coverage, e.g. 0.9
    pub level: f64,
}

impl ConfidenceInterval {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.lower && value <= self.upper
    }

    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }
}

/// Signal record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub signal_type: SignalType,
    /// Always within [0, 1]
    pub strength: f64,
    pub payload: serde_json::Value,
    pub block_height: u64,
    pub block_hash: String,
    pub evidence: Vec<EvidenceRef>,
    pub is_predictive: bool,
    pub confidence_interval: Option<ConfidenceInterval>,
    /// 0 for the first computation, incremented on reorg recomputation
    pub revision: u32,
    pub created_at: i64,
}

impl Signal {
    pub fn new(signal_type: SignalType, block_height: u64, block_hash: impl Into<String>) -> Self {
        Self {
            signal_type,
            strength: 0.0,
            payload: serde_json::Value::Null,
            block_height,
            block_hash: block_hash.into(),
            evidence: Vec::new(),
            is_predictive: signal_type.is_predictive(),
            confidence_interval: None,
            revision: 0,
            created_at: chrono::Utc::now().timestamp(),
        }
    }

    /// Set strength, clamped to [0, 1] (NaN becomes 0)
    pub fn with_strength(mut self, strength: f64) -> Self {
        self.strength = clamp_unit(strength);
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_evidence(mut self, evidence: Vec<EvidenceRef>) -> Self {
        self.evidence = evidence;
        self
    }

    pub fn with_interval(mut self, interval: ConfidenceInterval) -> Self {
        self.confidence_interval = Some(interval);
        self
    }

    /// Payload field as f64, if present
    pub fn payload_f64(&self, key: &str) -> Option<f64> {
        self.payload.get(key).and_then(|v| v.as_f64())
    }

    /// True when the payload carries an anomaly flag
    pub fn is_anomalous(&self) -> bool {
        self.payload
            .get("anomalous")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    pub fn key(&self) -> (u64, SignalType) {
        (self.block_height, self.signal_type)
    }
}

/// Clamp to [0, 1], mapping NaN to 0
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
