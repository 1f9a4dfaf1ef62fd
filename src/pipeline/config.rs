//! Pipeline configuration from environment variables

use super::retry::RetryPolicy;
use crate::guard::GuardConfig;
use crate::predictive::PredictiveConfig;
use crate::processors::ProcessorConfig;
use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

/// Entity snapshots older than this many refresh intervals count as stale
const STALE_REFRESH_INTERVALS: u64 = 3;

/// Heights of reorg history kept by processors and the chain tracker
const REWIND_DEPTH_BLOCKS: usize = 288;

/// Configuration for the signal pipeline runtime
///
/// Loaded from environment variables with sensible defaults. Values that
/// fail to parse or fall outside their valid range are replaced by the
/// default with a warning.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Master enable flag for pipeline
    pub enabled: bool,

    /// Path to SQLite database file
    pub db_path: String,

    /// Directory holding the `*.sql` schema files
    pub schema_dir: String,

    /// Channel buffer size for block ingestion (blocks)
    pub channel_buffer: usize,

    /// Standard deviations above the mean that count as anomalous
    pub anomaly_multiplier: f64,

    /// Minimum composite confidence for auto-publication
    pub publish_threshold: f64,

    pub flow_baseline_blocks: usize,
    pub mempool_baseline_blocks: usize,

    /// Samples needed before a baseline is trusted
    pub min_baseline_samples: usize,

    pub treasury_history_days: usize,
    pub accumulation_window_days: usize,

    /// Cumulative net inflow (BTC) a whale streak must reach
    pub whale_volume_floor: f64,

    /// Reorgs deeper than this many blocks open a quiet window
    pub reorg_depth_trigger: u64,

    pub entity_refresh_interval_secs: u64,

    /// JSON catalogue path; the SQLite entity tables are used when unset
    pub entity_source_json: Option<String>,

    pub processor_max_attempts: u32,
    pub processor_backoff_ms: u64,
    pub processor_backoff_max_ms: u64,
    pub persistence_max_attempts: u32,

    /// Budget for the processing stage of one block
    pub block_timeout_ms: u64,

    /// Accuracy assumed for types without tracked forecasts
    pub default_historical_accuracy: f64,

    /// External narrative service; template text when unset
    pub narrator_url: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            db_path: "/var/lib/chainpulse/chainpulse.db".to_string(),
            schema_dir: "sql".to_string(),
            channel_buffer: 1_000,
            anomaly_multiplier: 3.0,
            publish_threshold: 0.7,
            flow_baseline_blocks: 144,
            mempool_baseline_blocks: 144,
            min_baseline_samples: 20,
            treasury_history_days: 30,
            accumulation_window_days: 7,
            whale_volume_floor: 100.0,
            reorg_depth_trigger: 1,
            entity_refresh_interval_secs: 300,
            entity_source_json: None,
            processor_max_attempts: 3,
            processor_backoff_ms: 50,
            processor_backoff_max_ms: 1_000,
            persistence_max_attempts: 3,
            block_timeout_ms: 10_000,
            default_historical_accuracy: 0.8,
            narrator_url: None,
        }
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: FromStr + Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => default,
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                log::warn!("⚠️  Invalid {}='{}', using default {}", key, raw, default);
                default
            }
        },
    }
}

fn parse_in_range<F>(lookup: &F, key: &str, default: f64, min: f64, max: f64) -> f64
where
    F: Fn(&str) -> Option<String>,
{
    let value = parse_or(lookup, key, default);
    if value.is_finite() && value >= min && value <= max {
        value
    } else {
        log::warn!("⚠️  {}={} outside [{}, {}], using default {}", key, value, min, max, default);
        default
    }
}

fn parse_positive<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: FromStr + Display + PartialOrd + Default + Copy,
    F: Fn(&str) -> Option<String>,
{
    let value = parse_or(lookup, key, default);
    if value > T::default() {
        value
    } else {
        log::warn!("⚠️  {} must be positive, using default {}", key, default);
        default
    }
}

fn non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).filter(|v| !v.trim().is_empty())
}

impl PipelineConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `ENABLE_PIPELINE` (default: false)
    /// - `CHAINPULSE_DB_PATH` (default: /var/lib/chainpulse/chainpulse.db)
    /// - `CHAINPULSE_SCHEMA_DIR` (default: sql)
    /// - `BLOCK_CHANNEL_BUFFER` (default: 1000)
    /// - `ANOMALY_STDDEV_MULTIPLIER` (default: 3.0)
    /// - `PUBLISH_CONFIDENCE_THRESHOLD` (default: 0.7)
    /// - `FLOW_BASELINE_BLOCKS` / `MEMPOOL_BASELINE_BLOCKS` (default: 144)
    /// - `MIN_BASELINE_SAMPLES` (default: 20)
    /// - `TREASURY_HISTORY_DAYS` (default: 30)
    /// - `ACCUMULATION_WINDOW_DAYS` (default: 7)
    /// - `WHALE_VOLUME_FLOOR_BTC` (default: 100)
    /// - `REORG_DEPTH_TRIGGER` (default: 1)
    /// - `ENTITY_REFRESH_INTERVAL_SECS` (default: 300)
    /// - `ENTITY_SOURCE_JSON` (optional)
    /// - `PROCESSOR_MAX_ATTEMPTS` (default: 3)
    /// - `PROCESSOR_BACKOFF_MS` / `PROCESSOR_BACKOFF_MAX_MS` (default: 50 / 1000)
    /// - `PERSISTENCE_MAX_ATTEMPTS` (default: 3)
    /// - `BLOCK_TIMEOUT_MS` (default: 10000)
    /// - `DEFAULT_HISTORICAL_ACCURACY` (default: 0.8)
    /// - `NARRATOR_URL` (optional)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as `from_env` with an arbitrary key → value source
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let d = Self::default();
        let lookup = &lookup;

        Self {
            enabled: parse_or(lookup, "ENABLE_PIPELINE", d.enabled),
            db_path: non_empty(lookup, "CHAINPULSE_DB_PATH").unwrap_or(d.db_path),
            schema_dir: non_empty(lookup, "CHAINPULSE_SCHEMA_DIR").unwrap_or(d.schema_dir),
            channel_buffer: parse_positive(lookup, "BLOCK_CHANNEL_BUFFER", d.channel_buffer),
            anomaly_multiplier: parse_in_range(
                lookup,
                "ANOMALY_STDDEV_MULTIPLIER",
                d.anomaly_multiplier,
                0.1,
                100.0,
            ),
            publish_threshold: parse_in_range(
                lookup,
                "PUBLISH_CONFIDENCE_THRESHOLD",
                d.publish_threshold,
                0.0,
                1.0,
            ),
            flow_baseline_blocks: parse_positive(lookup, "FLOW_BASELINE_BLOCKS", d.flow_baseline_blocks),
            mempool_baseline_blocks: parse_positive(
                lookup,
                "MEMPOOL_BASELINE_BLOCKS",
                d.mempool_baseline_blocks,
            ),
            min_baseline_samples: parse_positive(lookup, "MIN_BASELINE_SAMPLES", d.min_baseline_samples),
            treasury_history_days: parse_positive(
                lookup,
                "TREASURY_HISTORY_DAYS",
                d.treasury_history_days,
            ),
            accumulation_window_days: parse_positive(
                lookup,
                "ACCUMULATION_WINDOW_DAYS",
                d.accumulation_window_days,
            ),
            whale_volume_floor: parse_in_range(
                lookup,
                "WHALE_VOLUME_FLOOR_BTC",
                d.whale_volume_floor,
                f64::EPSILON,
                21_000_000.0,
            ),
            reorg_depth_trigger: parse_or(lookup, "REORG_DEPTH_TRIGGER", d.reorg_depth_trigger),
            entity_refresh_interval_secs: parse_positive(
                lookup,
                "ENTITY_REFRESH_INTERVAL_SECS",
                d.entity_refresh_interval_secs,
            ),
            entity_source_json: non_empty(lookup, "ENTITY_SOURCE_JSON"),
            processor_max_attempts: parse_positive(
                lookup,
                "PROCESSOR_MAX_ATTEMPTS",
                d.processor_max_attempts,
            ),
            processor_backoff_ms: parse_or(lookup, "PROCESSOR_BACKOFF_MS", d.processor_backoff_ms),
            processor_backoff_max_ms: parse_or(
                lookup,
                "PROCESSOR_BACKOFF_MAX_MS",
                d.processor_backoff_max_ms,
            ),
            persistence_max_attempts: parse_positive(
                lookup,
                "PERSISTENCE_MAX_ATTEMPTS",
                d.persistence_max_attempts,
            ),
            block_timeout_ms: parse_positive(lookup, "BLOCK_TIMEOUT_MS", d.block_timeout_ms),
            default_historical_accuracy: parse_in_range(
                lookup,
                "DEFAULT_HISTORICAL_ACCURACY",
                d.default_historical_accuracy,
                0.0,
                1.0,
            ),
            narrator_url: non_empty(lookup, "NARRATOR_URL"),
        }
    }

    pub fn processor_config(&self) -> ProcessorConfig {
        ProcessorConfig {
            anomaly_multiplier: self.anomaly_multiplier,
            min_baseline_samples: self.min_baseline_samples,
            flow_baseline_blocks: self.flow_baseline_blocks,
            mempool_baseline_blocks: self.mempool_baseline_blocks,
            treasury_history_days: self.treasury_history_days,
            accumulation_window_days: self.accumulation_window_days,
            whale_volume_floor: self.whale_volume_floor,
            rewind_depth: REWIND_DEPTH_BLOCKS,
        }
    }

    pub fn guard_config(&self) -> GuardConfig {
        GuardConfig {
            anomaly_multiplier: self.anomaly_multiplier,
            reorg_depth_trigger: self.reorg_depth_trigger,
            tracked_heights: REWIND_DEPTH_BLOCKS,
        }
    }

    pub fn predictive_config(&self) -> PredictiveConfig {
        PredictiveConfig {
            history_blocks: self.mempool_baseline_blocks.max(self.flow_baseline_blocks),
            anomaly_multiplier: self.anomaly_multiplier,
            default_accuracy: self.default_historical_accuracy,
            ..PredictiveConfig::default()
        }
    }

    pub fn processor_retry(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.processor_max_attempts,
            self.processor_backoff_ms,
            self.processor_backoff_max_ms,
        )
    }

    pub fn persistence_retry(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.persistence_max_attempts,
            self.processor_backoff_ms,
            self.processor_backoff_max_ms,
        )
    }

    pub fn block_timeout(&self) -> Duration {
        Duration::from_millis(self.block_timeout_ms)
    }

    pub fn entity_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.entity_refresh_interval_secs)
    }

    /// Entity snapshot age beyond which data quality is penalized
    pub fn max_snapshot_age_secs(&self) -> i64 {
        (self.entity_refresh_interval_secs * STALE_REFRESH_INTERVALS) as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> PipelineConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        PipelineConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = config_from(&[]);

        assert_eq!(config.db_path, "/var/lib/chainpulse/chainpulse.db");
        assert_eq!(config.schema_dir, "sql");
        assert_eq!(config.channel_buffer, 1_000);
        assert_eq!(config.anomaly_multiplier, 3.0);
        assert_eq!(config.publish_threshold, 0.7);
        assert_eq!(config.accumulation_window_days, 7);
        assert_eq!(config.reorg_depth_trigger, 1);
        assert_eq!(config.default_historical_accuracy, 0.8);
        assert!(config.entity_source_json.is_none());
        assert!(config.narrator_url.is_none());
        assert!(!config.enabled);
    }

    #[test]
    fn test_custom_config() {
        let config = config_from(&[
            ("CHAINPULSE_DB_PATH", "/tmp/test.db"),
            ("BLOCK_CHANNEL_BUFFER", "50"),
            ("ANOMALY_STDDEV_MULTIPLIER", "2.5"),
            ("PUBLISH_CONFIDENCE_THRESHOLD", "0.8"),
            ("REORG_DEPTH_TRIGGER", "3"),
            ("ENTITY_SOURCE_JSON", "/etc/entities.json"),
            ("ENABLE_PIPELINE", "true"),
        ]);

        assert_eq!(config.db_path, "/tmp/test.db");
        assert_eq!(config.channel_buffer, 50);
        assert_eq!(config.anomaly_multiplier, 2.5);
        assert_eq!(config.publish_threshold, 0.8);
        assert_eq!(config.reorg_depth_trigger, 3);
        assert_eq!(config.entity_source_json.as_deref(), Some("/etc/entities.json"));
        assert!(config.enabled);
        assert_eq!(config.processor_config().anomaly_multiplier, 2.5);
        assert_eq!(config.guard_config().reorg_depth_trigger, 3);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = config_from(&[
            ("PUBLISH_CONFIDENCE_THRESHOLD", "1.5"),
            ("BLOCK_CHANNEL_BUFFER", "0"),
            ("ANOMALY_STDDEV_MULTIPLIER", "lots"),
            ("ENABLE_PIPELINE", "yes please"),
            ("NARRATOR_URL", "  "),
        ]);

        assert_eq!(config.publish_threshold, 0.7);
        assert_eq!(config.channel_buffer, 1_000);
        assert_eq!(config.anomaly_multiplier, 3.0);
        assert!(!config.enabled);
        assert!(config.narrator_url.is_none());
    }

    #[test]
    fn test_derived_settings() {
        let config = config_from(&[("ENTITY_REFRESH_INTERVAL_SECS", "60"), ("PERSISTENCE_MAX_ATTEMPTS", "5")]);
        assert_eq!(config.max_snapshot_age_secs(), 180);
        assert_eq!(config.entity_refresh_interval(), Duration::from_secs(60));
        assert_eq!(config.persistence_retry().max_attempts, 5);
        assert_eq!(config.block_timeout(), Duration::from_millis(10_000));
    }
}
