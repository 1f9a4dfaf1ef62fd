//! Realized-vs-predicted accuracy tracking

use super::strategy::Forecast;
use crate::signals::clamp_unit;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResolvedForecast {
    pub target_height: u64,
    pub predicted: f64,
    pub realized: f64,
    /// 1 − relative error, in [0, 1]
    pub accuracy: f64,
    pub covered: bool,
}

/// Score of a single forecast against the realized value
pub fn forecast_accuracy(predicted: f64, realized: f64) -> f64 {
    let scale = realized.abs().max(predicted.abs());
    if scale < 1e-9 {
        return 1.0;
    }
    clamp_unit(1.0 - (realized - predicted).abs() / scale)
}

/// Running accuracy of one forecast type
///
/// Forecasts are keyed by the height they target. Until `min_samples`
/// forecasts have resolved, `accuracy()` reports the configured prior.
#[derive(Debug, Clone)]
pub struct AccuracyTracker {
    window: usize,
    min_samples: usize,
    prior: f64,
    forecasts: BTreeMap<u64, Forecast>,
    resolved: BTreeMap<u64, ResolvedForecast>,
}

impl AccuracyTracker {
    pub fn new(window: usize, min_samples: usize, prior: f64) -> Self {
        Self {
            window: window.max(1),
            min_samples: min_samples.max(1),
            prior: clamp_unit(prior),
            forecasts: BTreeMap::new(),
            resolved: BTreeMap::new(),
        }
    }

    pub fn record_forecast(&mut self, target_height: u64, forecast: Forecast) {
        self.forecasts.insert(target_height, forecast);
        while self.forecasts.len() > self.window {
            self.forecasts.pop_first();
        }
    }

    /// Score the forecast that targeted `height`, if one was made
    pub fn resolve(&mut self, height: u64, realized: f64) -> Option<ResolvedForecast> {
        let forecast = self.forecasts.get(&height)?;
        let outcome = ResolvedForecast {
            target_height: height,
            predicted: forecast.point,
            realized,
            accuracy: forecast_accuracy(forecast.point, realized),
            covered: forecast.contains(realized),
        };
        self.resolved.insert(height, outcome);
        while self.resolved.len() > self.window {
            self.resolved.pop_first();
        }
        Some(outcome)
    }

    pub fn samples(&self) -> usize {
        self.resolved.len()
    }

    /// Mean accuracy over the window, or the prior while samples are scarce
    pub fn accuracy(&self) -> f64 {
        if self.resolved.len() < self.min_samples {
            return self.prior;
        }
        let total: f64 = self.resolved.values().map(|r| r.accuracy).sum();
        clamp_unit(total / self.resolved.len() as f64)
    }

    /// Share of resolved forecasts whose interval contained the outcome
    pub fn coverage(&self) -> Option<f64> {
        if self.resolved.is_empty() {
            return None;
        }
        let covered = self.resolved.values().filter(|r| r.covered).count();
        Some(covered as f64 / self.resolved.len() as f64)
    }

    /// Drop outcomes realized at `from_height` or later and forecasts made there
    pub fn rewind(&mut self, from_height: u64) {
        self.resolved.split_off(&from_height);
        self.forecasts.split_off(&(from_height + 1));
    }
}
