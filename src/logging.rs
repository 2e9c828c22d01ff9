//! Structured logging for Flowstep binaries.
//!
//! Human readable output while debugging locally, JSON lines when the
//! output is collected by another tool.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    prelude::*,
    EnvFilter,
};

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is not set
    #[serde(default = "default_log_filter")]
    pub log_filter: String,

    /// Emit JSON lines instead of pretty output
    #[serde(default)]
    pub enable_json_logging: bool,
}

fn default_log_filter() -> String {
    "info,flowstep_core=info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter(),
            enable_json_logging: false,
        }
    }
}

impl LoggingConfig {
    /// Quiet configuration for command line tools
    pub fn quiet() -> Self {
        Self {
            log_filter: "warn".to_string(),
            ..Self::default()
        }
    }
}

/// Install the global subscriber
///
/// Fails if a global subscriber is already set.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter));

    let registry = tracing_subscriber::registry().with(env_filter);

    if config.enable_json_logging {
        let json_layer = fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_writer(std::io::stderr);
        tracing::subscriber::set_global_default(registry.with(json_layer))
            .context("Failed to set global default subscriber")?;
    } else {
        let fmt_layer = fmt::layer()
            .pretty()
            .with_target(true)
            .with_writer(std::io::stderr);
        tracing::subscriber::set_global_default(registry.with(fmt_layer))
            .context("Failed to set global default subscriber")?;
    }

    info!(
        log_format = if config.enable_json_logging { "json" } else { "pretty" },
        "Logging initialized"
    );
    Ok(())
}

/// Trait to add log context to results
pub trait LogExt<T, E> {
    /// Log the error with a message before returning
    fn log_err(self, message: &str) -> Result<T, E>;

    /// Log a message on success before returning
    fn log_ok(self, message: &str) -> Result<T, E>;
}

impl<T, E: std::fmt::Display> LogExt<T, E> for Result<T, E> {
    fn log_err(self, message: &str) -> Result<T, E> {
        if let Err(ref e) = self {
            tracing::error!("{}: {}", message, e);
        }
        self
    }

    fn log_ok(self, message: &str) -> Result<T, E> {
        if self.is_ok() {
            tracing::info!("{}", message);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults_from_empty_json() {
        let config: LoggingConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, LoggingConfig::default());
        assert!(!config.enable_json_logging);
    }

    #[test]
    fn test_log_ext_passes_results_through() {
        let ok: Result<u8, String> = Ok(1);
        assert_eq!(ok.log_ok("done").log_err("failed"), Ok(1));

        let err: Result<u8, String> = Err("boom".to_string());
        assert_eq!(err.log_err("failed"), Err("boom".to_string()));
    }
}
