//! Predictive Analytics Module
//!
//! Builds forward-looking signals from processor outputs rather than raw
//! blocks: a next-block fee forecast from the mempool nowcast and a
//! liquidity-pressure index from aggregate exchange inflow. Each forecast
//! is scored when its target height arrives, and the running accuracy
//! feeds the confidence scorer.

pub mod accuracy;
pub mod strategy;

pub use accuracy::{forecast_accuracy, AccuracyTracker, ResolvedForecast};
pub use strategy::{EwmaForecaster, Forecast, ForecastStrategy, NaiveForecaster};

use crate::guard::anomaly::AnomalyRule;
use crate::processors::rolling::RollingWindow;
use crate::signals::{ConfidenceInterval, EvidenceRef, Signal, SignalType};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Blocks ahead every forecast targets
pub const FORECAST_HORIZON: u64 = 1;

const SOURCE_EVIDENCE: usize = 3;

#[derive(Debug, Clone)]
pub struct PredictiveConfig {
    pub history_blocks: usize,
    pub accuracy_window: usize,
    pub min_accuracy_samples: usize,
    pub default_accuracy: f64,
    pub anomaly_multiplier: f64,
}

impl Default for PredictiveConfig {
    fn default() -> Self {
        Self {
            history_blocks: 144,
            accuracy_window: 144,
            min_accuracy_samples: 10,
            default_accuracy: 0.8,
            anomaly_multiplier: 3.0,
        }
    }
}

/// Which processor output feeds a forecast type
#[derive(Debug, Clone, Copy)]
struct SeriesSource {
    signal_type: SignalType,
    payload_key: &'static str,
}

fn source_for(forecast_type: SignalType) -> Option<SeriesSource> {
    match forecast_type {
        SignalType::FeeForecast => Some(SeriesSource {
            signal_type: SignalType::MempoolNowcast,
            payload_key: "fee_pressure",
        }),
        SignalType::LiquidityPressure => Some(SeriesSource {
            signal_type: SignalType::ExchangeFlow,
            payload_key: "aggregate_inflow",
        }),
        _ => None,
    }
}

struct ForecastSeries {
    history: RollingWindow,
    tracker: AccuracyTracker,
}

pub struct PredictiveAnalytics {
    strategy: Arc<dyn ForecastStrategy>,
    rule: AnomalyRule,
    default_accuracy: f64,
    series: BTreeMap<SignalType, ForecastSeries>,
}

impl PredictiveAnalytics {
    pub fn new(config: &PredictiveConfig, strategy: Arc<dyn ForecastStrategy>) -> Self {
        let series = [SignalType::FeeForecast, SignalType::LiquidityPressure]
            .into_iter()
            .map(|t| {
                (
                    t,
                    ForecastSeries {
                        history: RollingWindow::new(config.history_blocks),
                        tracker: AccuracyTracker::new(
                            config.accuracy_window,
                            config.min_accuracy_samples,
                            config.default_accuracy,
                        ),
                    },
                )
            })
            .collect();

        Self {
            strategy,
            rule: AnomalyRule::new(config.anomaly_multiplier),
            default_accuracy: config.default_accuracy,
            series,
        }
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// Feed one block's processor signals; returns predictive signals
    ///
    /// Re-observing a height replaces what was recorded for it.
    pub fn observe(&mut self, height: u64, block_hash: &str, signals: &[Signal]) -> Vec<Signal> {
        let mut out = Vec::new();

        for (forecast_type, series) in self.series.iter_mut() {
            series.history.rewind(height);
            series.tracker.rewind(height);

            let Some(source) = source_for(*forecast_type) else {
                continue;
            };
            let Some(source_signal) = signals.iter().find(|s| s.signal_type == source.signal_type) else {
                continue;
            };
            let Some(observed) = source_signal.payload_f64(source.payload_key) else {
                continue;
            };

            if let Some(outcome) = series.tracker.resolve(height, observed) {
                log::debug!(
                    "🎯 {} forecast for {}: predicted {:.3}, realized {:.3} (accuracy {:.2})",
                    forecast_type,
                    height,
                    outcome.predicted,
                    outcome.realized,
                    outcome.accuracy
                );
            }

            let baseline = series.history.baseline(2);
            series.history.push(height, observed);

            let Some(forecast) = self.strategy.forecast(&series.history.values()) else {
                continue;
            };
            // Fees and inflows are never negative
            let forecast = forecast.floored(0.0);
            let target_height = height + FORECAST_HORIZON;
            series.tracker.record_forecast(target_height, forecast);

            let z = baseline.map(|b| b.z_score(forecast.point)).unwrap_or(0.0);

            let mut evidence = vec![EvidenceRef::block(height)];
            evidence.extend(source_signal.evidence.iter().take(SOURCE_EVIDENCE).cloned());

            out.push(
                Signal::new(*forecast_type, height, block_hash)
                    .with_strength(self.rule.strength(z))
                    .with_interval(ConfidenceInterval {
                        lower: forecast.lower,
                        upper: forecast.upper,
                        level: forecast.level,
                    })
                    .with_payload(json!({
                        "target_height": target_height,
                        "horizon_blocks": FORECAST_HORIZON,
                        "point": forecast.point,
                        "lower": forecast.lower,
                        "upper": forecast.upper,
                        "level": forecast.level,
                        "observed": observed,
                        "source": source.signal_type.as_str(),
                        "index_z": z,
                        "strategy": self.strategy.name(),
                        "accuracy": series.tracker.accuracy(),
                        "coverage": series.tracker.coverage(),
                        "accuracy_samples": series.tracker.samples(),
                    }))
                    .with_evidence(evidence),
            );
        }

        out
    }

    /// Historical accuracy for a signal type
    ///
    /// Forecast types report their tracked accuracy; everything else gets
    /// the configured prior.
    pub fn historical_accuracy(&self, signal_type: SignalType) -> f64 {
        self.series
            .get(&signal_type)
            .map(|s| s.tracker.accuracy())
            .unwrap_or(self.default_accuracy)
    }

    pub fn coverage(&self, signal_type: SignalType) -> Option<f64> {
        self.series.get(&signal_type).and_then(|s| s.tracker.coverage())
    }

    pub fn rewind(&mut self, from_height: u64) {
        for series in self.series.values_mut() {
            series.history.rewind(from_height);
            series.tracker.rewind(from_height);
        }
    }
}
