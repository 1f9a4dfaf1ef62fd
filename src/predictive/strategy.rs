//! Pluggable forecasting strategies
//!
//! A strategy turns a value history (oldest first) into a one-step-ahead
//! point estimate with an interval. Strategies are stateless; the module
//! owns the series.

use serde::Serialize;
use statrs::distribution::{ContinuousCDF, Normal};
use statrs::statistics::{Data, OrderStatistics, Statistics};

/// Nominal interval coverage used when none is configured
pub const DEFAULT_INTERVAL_LEVEL: f64 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Forecast {
    pub point: f64,
    pub lower: f64,
    pub upper: f64,
    pub level: f64,
}

impl Forecast {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.lower && value <= self.upper
    }

    /// Floor the interval (and point) at `min`
    pub fn floored(mut self, min: f64) -> Self {
        self.point = self.point.max(min);
        self.lower = self.lower.max(min);
        self.upper = self.upper.max(min);
        self
    }
}

pub trait ForecastStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Forecast the next value; `None` when the history is too short
    fn forecast(&self, history: &[f64]) -> Option<Forecast>;
}

/// Two-sided standard normal quantile for `level` coverage
fn normal_quantile(level: f64) -> f64 {
    let p = 0.5 + level.clamp(0.0, 0.999_999) / 2.0;
    Normal::new(0.0, 1.0)
        .map(|n| n.inverse_cdf(p))
        .unwrap_or(1.645)
}

/// Exponentially weighted moving average with a residual-based interval
#[derive(Debug, Clone)]
pub struct EwmaForecaster {
    alpha: f64,
    level: f64,
    min_history: usize,
}

impl EwmaForecaster {
    pub fn new(alpha: f64, level: f64, min_history: usize) -> Self {
        Self {
            alpha: alpha.clamp(0.01, 1.0),
            level: level.clamp(0.5, 0.99),
            min_history: min_history.max(2),
        }
    }
}

impl Default for EwmaForecaster {
    fn default() -> Self {
        Self::new(0.3, DEFAULT_INTERVAL_LEVEL, 10)
    }
}

impl ForecastStrategy for EwmaForecaster {
    fn name(&self) -> &'static str {
        "ewma"
    }

    fn forecast(&self, history: &[f64]) -> Option<Forecast> {
        if history.len() < self.min_history {
            return None;
        }

        let mut smoothed = history[0];
        let mut residuals = Vec::with_capacity(history.len() - 1);
        for value in &history[1..] {
            residuals.push(value - smoothed);
            smoothed = self.alpha * value + (1.0 - self.alpha) * smoothed;
        }

        let sigma = residuals.iter().population_std_dev();
        let sigma = if sigma.is_finite() { sigma } else { 0.0 };
        let half_width = normal_quantile(self.level) * sigma;

        Some(Forecast {
            point: smoothed,
            lower: smoothed - half_width,
            upper: smoothed + half_width,
            level: self.level,
        })
    }
}

/// Last value carried forward with an empirical interval from past changes
#[derive(Debug, Clone)]
pub struct NaiveForecaster {
    level: f64,
    min_history: usize,
}

impl NaiveForecaster {
    pub fn new(level: f64, min_history: usize) -> Self {
        Self {
            level: level.clamp(0.5, 0.98),
            min_history: min_history.max(2),
        }
    }
}

impl Default for NaiveForecaster {
    fn default() -> Self {
        Self::new(DEFAULT_INTERVAL_LEVEL, 10)
    }
}

impl ForecastStrategy for NaiveForecaster {
    fn name(&self) -> &'static str {
        "naive"
    }

    fn forecast(&self, history: &[f64]) -> Option<Forecast> {
        if history.len() < self.min_history {
            return None;
        }
        let last = *history.last()?;
        let changes: Vec<f64> = history.windows(2).map(|w| w[1] - w[0]).collect();

        let tail = ((1.0 - self.level) / 2.0 * 100.0).round() as usize;
        let mut data = Data::new(changes);
        let low = data.percentile(tail);
        let high = data.percentile(100 - tail);

        Some(Forecast {
            point: last,
            lower: last + low.min(0.0),
            upper: last + high.max(0.0),
            level: self.level,
        })
    }
}
