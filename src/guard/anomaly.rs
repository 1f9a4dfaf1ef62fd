//! k·σ anomaly rule shared by exchange-flow detection and mempool spikes

use crate::processors::rolling::Baseline;
use crate::signals::{clamp_unit, Signal, SignalType};
use serde_json::json;

/// Default anomaly multiplier (standard deviations)
pub const DEFAULT_ANOMALY_MULTIPLIER: f64 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnomalyRule {
    multiplier: f64,
}

impl AnomalyRule {
    pub fn new(multiplier: f64) -> Self {
        let multiplier = if multiplier.is_finite() && multiplier > 0.0 {
            multiplier
        } else {
            log::warn!(
                "⚠️  Invalid anomaly multiplier {}, using {}",
                multiplier,
                DEFAULT_ANOMALY_MULTIPLIER
            );
            DEFAULT_ANOMALY_MULTIPLIER
        };
        Self { multiplier }
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    /// `mean + k·σ`
    pub fn threshold(&self, baseline: &Baseline) -> f64 {
        baseline.mean + self.multiplier * baseline.std_dev
    }

    /// Observation strictly above `mean + k·σ`
    pub fn is_anomalous(&self, baseline: &Baseline, observed: f64) -> bool {
        observed > self.threshold(baseline)
    }

    /// Same rule expressed on an already computed z-score
    pub fn z_exceeds(&self, z: f64) -> bool {
        z > self.multiplier
    }

    /// Normalized deviation: |z| / 2k, clamped to [0, 1]
    ///
    /// The threshold itself maps to 0.5; twice the threshold saturates.
    pub fn strength(&self, z: f64) -> f64 {
        clamp_unit(z.abs() / (2.0 * self.multiplier))
    }
}

impl Default for AnomalyRule {
    fn default() -> Self {
        Self::new(DEFAULT_ANOMALY_MULTIPLIER)
    }
}

/// Tags mempool nowcasts whose fee pressure spiked past the rule
#[derive(Debug, Clone)]
pub struct SpikeDetector {
    rule: AnomalyRule,
}

impl SpikeDetector {
    pub fn new(rule: AnomalyRule) -> Self {
        Self { rule }
    }

    /// Annotate the signal in place; returns true when a spike was tagged
    pub fn inspect(&self, signal: &mut Signal) -> bool {
        if signal.signal_type != SignalType::MempoolNowcast {
            return false;
        }
        let Some(z) = signal.payload_f64("fee_pressure_z") else {
            return false;
        };
        let spike = self.rule.z_exceeds(z);
        if let Some(obj) = signal.payload.as_object_mut() {
            obj.insert("spike".to_string(), json!(spike));
            obj.insert("anomalous".to_string(), json!(spike));
        }
        if spike {
            log::info!(
                "📈 Mempool fee spike at height {}: z={:.2} (> {}σ)",
                signal.block_height,
                z,
                self.rule.multiplier()
            );
        }
        spike
    }
}
