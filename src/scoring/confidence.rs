//! Composite confidence and the publish decision

use crate::signals::clamp_unit;
use serde::{Deserialize, Serialize};

/// Default auto-publication threshold
pub const DEFAULT_PUBLISH_THRESHOLD: f64 = 0.7;

/// Absorbs float noise so a composite of exactly the threshold publishes
const THRESHOLD_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceFactors {
    pub signal_strength: f64,
    pub historical_accuracy: f64,
    pub data_quality: f64,
}

impl ConfidenceFactors {
    pub fn new(signal_strength: f64, historical_accuracy: f64, data_quality: f64) -> Self {
        Self {
            signal_strength,
            historical_accuracy,
            data_quality,
        }
    }

    /// Factors from possibly-missing inputs; anything missing is worst case
    pub fn from_parts(
        signal_strength: Option<f64>,
        historical_accuracy: Option<f64>,
        data_quality: Option<f64>,
    ) -> Self {
        Self::new(
            signal_strength.unwrap_or(0.0),
            historical_accuracy.unwrap_or(0.0),
            data_quality.unwrap_or(0.0),
        )
    }

    /// Each factor clamped to [0, 1] with NaN as 0
    pub fn sanitized(&self) -> Self {
        Self {
            signal_strength: clamp_unit(self.signal_strength),
            historical_accuracy: clamp_unit(self.historical_accuracy),
            data_quality: clamp_unit(self.data_quality),
        }
    }
}

/// Exponents of the weighted geometric mean; they sum to 1
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceWeights {
    pub strength: f64,
    pub accuracy: f64,
    pub quality: f64,
}

impl Default for ConfidenceWeights {
    fn default() -> Self {
        Self {
            strength: 0.5,
            accuracy: 0.3,
            quality: 0.2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreDecision {
    Publish,
    BelowThreshold,
    /// Would have been judged on score, but a quiet window covers it
    QuietMode,
}

impl ScoreDecision {
    pub fn is_publish(&self) -> bool {
        matches!(self, ScoreDecision::Publish)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConfidenceScore {
    pub confidence: f64,
    pub factors: ConfidenceFactors,
    pub decision: ScoreDecision,
}

#[derive(Debug, Clone)]
pub struct ConfidenceScorer {
    threshold: f64,
    weights: ConfidenceWeights,
}

impl Default for ConfidenceScorer {
    fn default() -> Self {
        Self::new(DEFAULT_PUBLISH_THRESHOLD)
    }
}

impl ConfidenceScorer {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold: clamp_unit(threshold),
            weights: ConfidenceWeights::default(),
        }
    }

    pub fn with_weights(mut self, weights: ConfidenceWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// strength^w1 · accuracy^w2 · quality^w3, always within [0, 1]
    ///
    /// Any zero factor yields zero; malformed input degrades rather than
    /// failing.
    pub fn compose(&self, factors: &ConfidenceFactors) -> f64 {
        let f = factors.sanitized();
        let w = &self.weights;
        let composite = f.signal_strength.powf(w.strength)
            * f.historical_accuracy.powf(w.accuracy)
            * f.data_quality.powf(w.quality);
        clamp_unit(composite)
    }

    /// Publish decision for an already composed confidence
    pub fn decide(&self, confidence: f64, quiet: bool) -> ScoreDecision {
        if quiet {
            return ScoreDecision::QuietMode;
        }
        if clamp_unit(confidence) + THRESHOLD_TOLERANCE >= self.threshold {
            ScoreDecision::Publish
        } else {
            ScoreDecision::BelowThreshold
        }
    }

    pub fn score(&self, factors: &ConfidenceFactors, quiet: bool) -> ConfidenceScore {
        let confidence = self.compose(factors);
        ConfidenceScore {
            confidence,
            factors: factors.sanitized(),
            decision: self.decide(confidence, quiet),
        }
    }
}
