//! Runtime configuration
//!
//! Defaults suit an interactive debugging session. `RuntimeConfig::load`
//! overrides them from `FLOWSTEP_*` environment variables.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use tracing::{info, warn};

use crate::CoreError;

/// Runtime configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Debounce interval of flow-state garbage collection
    #[serde(default = "default_gc_interval_ms")]
    pub gc_interval_ms: u64,

    /// Pause between two queue pumps in the async driver
    #[serde(default = "default_pump_interval_ms")]
    pub pump_interval_ms: u64,

    /// Number of retained log items; 0 keeps everything
    #[serde(default = "default_max_log_items")]
    pub max_log_items: usize,

    /// How long shutdown waits for running components
    #[serde(default = "default_stop_grace_period_ms")]
    pub stop_grace_period_ms: u64,

    /// Gzip level used when exporting snapshot archives
    #[serde(default = "default_archive_compression_level")]
    pub archive_compression_level: u32,
}

fn default_gc_interval_ms() -> u64 {
    1000
}

fn default_pump_interval_ms() -> u64 {
    1
}

fn default_max_log_items() -> usize {
    1000
}

fn default_stop_grace_period_ms() -> u64 {
    3000 // 3 seconds
}

fn default_archive_compression_level() -> u32 {
    6
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            gc_interval_ms: default_gc_interval_ms(),
            pump_interval_ms: default_pump_interval_ms(),
            max_log_items: default_max_log_items(),
            stop_grace_period_ms: default_stop_grace_period_ms(),
            archive_compression_level: default_archive_compression_level(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from environment variables on top of the defaults
    pub fn load() -> Result<Self, CoreError> {
        let mut config = Self::default();

        if let Some(value) = parse_env::<u64>("FLOWSTEP_GC_INTERVAL_MS") {
            config.gc_interval_ms = value;
        }

        if let Some(value) = parse_env::<u64>("FLOWSTEP_PUMP_INTERVAL_MS") {
            config.pump_interval_ms = value;
        }

        if let Some(value) = parse_env::<usize>("FLOWSTEP_MAX_LOG_ITEMS") {
            config.max_log_items = value;
        }

        if let Some(value) = parse_env::<u64>("FLOWSTEP_STOP_GRACE_PERIOD_MS") {
            config.stop_grace_period_ms = value;
        }

        if let Some(value) = parse_env::<u32>("FLOWSTEP_ARCHIVE_COMPRESSION_LEVEL") {
            config.archive_compression_level = value;
        }

        config.validate()?;

        info!(
            gc_interval_ms = config.gc_interval_ms,
            max_log_items = config.max_log_items,
            "Loaded runtime configuration"
        );

        Ok(config)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.gc_interval_ms == 0 {
            return Err(CoreError::ConfigurationError(
                "gc_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.archive_compression_level > 9 {
            return Err(CoreError::ConfigurationError(format!(
                "archive_compression_level must be between 0 and 9, got {}",
                self.archive_compression_level
            )));
        }
        Ok(())
    }

    /// Garbage collection debounce interval
    #[inline]
    pub fn gc_interval(&self) -> Duration {
        Duration::from_millis(self.gc_interval_ms)
    }

    /// Pause between queue pumps
    #[inline]
    pub fn pump_interval(&self) -> Duration {
        Duration::from_millis(self.pump_interval_ms)
    }

    /// Shutdown grace period
    #[inline]
    pub fn stop_grace_period(&self) -> Duration {
        Duration::from_millis(self.stop_grace_period_ms)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = env::var(name).ok()?;
    match raw.parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Invalid {} value: {}", name, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.gc_interval(), Duration::from_secs(1));
        assert_eq!(config.max_log_items, 1000);
        assert_eq!(config.stop_grace_period(), Duration::from_secs(3));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_deserialization_uses_defaults() {
        let config: RuntimeConfig = serde_json::from_value(json!({"max_log_items": 10})).unwrap();
        assert_eq!(config.max_log_items, 10);
        assert_eq!(config.gc_interval_ms, 1000);
        assert_eq!(config.archive_compression_level, 6);
    }

    #[test]
    fn test_validate_rejects_out_of_range_values() {
        let config = RuntimeConfig {
            gc_interval_ms: 0,
            ..RuntimeConfig::default()
        };
        assert!(matches!(config.validate(), Err(CoreError::ConfigurationError(_))));

        let config = RuntimeConfig {
            archive_compression_level: 12,
            ..RuntimeConfig::default()
        };
        assert!(matches!(config.validate(), Err(CoreError::ConfigurationError(_))));
    }

    #[test]
    fn test_load_from_env() {
        env::set_var("FLOWSTEP_MAX_LOG_ITEMS", "25");
        env::set_var("FLOWSTEP_PUMP_INTERVAL_MS", "not-a-number");

        let config = RuntimeConfig::load().unwrap();
        assert_eq!(config.max_log_items, 25);
        assert_eq!(config.pump_interval_ms, 1);

        env::remove_var("FLOWSTEP_MAX_LOG_ITEMS");
        env::remove_var("FLOWSTEP_PUMP_INTERVAL_MS");
    }
}
