//! Builds and installs the global `tracing` subscriber for the crate (spec §6 "Logging").
//!
//! Every binary/embedding calls [`install`] once at startup; every library crate just emits
//! `observability_deps::tracing` events and never touches `println!`.
#![warn(missing_docs)]

use observability_deps::tracing::subscriber::SetGlobalDefaultError;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// `key=value` pairs, one per line (the default, matching the teacher's `logfmt` crate).
    #[default]
    Logfmt,
    /// Newline-delimited JSON, useful for log shippers.
    Json,
}

/// Logging configuration. `RUST_LOG` (via [`EnvFilter`]) always takes precedence; `default_level`
/// is used only when the environment variable is unset.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Output format.
    pub format: LogFormat,
    /// Filter applied when `RUST_LOG` is not set, e.g. `"info"` or `"docdb=debug,warn"`.
    pub default_level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            default_level: "info".to_string(),
        }
    }
}

/// Error building or installing the subscriber.
#[derive(Debug, thiserror::Error)]
pub enum TroggingError {
    /// A global subscriber was already installed (e.g. by a second call to [`install`]).
    #[error("a global tracing subscriber is already set: {0}")]
    AlreadySet(#[from] SetGlobalDefaultError),
}

/// Install the global subscriber described by `config`. Returns an error if a subscriber was
/// already installed; safe to call once per process (tests should instead build a local
/// subscriber with [`test_writer_subscriber`] or rely on `test_helpers::maybe_start_logging`).
pub fn install(config: &LoggingConfig) -> Result<(), TroggingError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_level.clone()));

    match config.format {
        LogFormat::Logfmt => {
            let subscriber = Registry::default()
                .with(env_filter)
                .with(fmt::layer().event_format(logfmt::LogFmtFormatter));
            observability_deps::tracing::subscriber::set_global_default(subscriber)?;
        }
        LogFormat::Json => {
            let subscriber = Registry::default()
                .with(env_filter)
                .with(fmt::layer().json());
            observability_deps::tracing::subscriber::set_global_default(subscriber)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_logfmt_info() {
        let cfg = LoggingConfig::default();
        assert_eq!(cfg.format, LogFormat::Logfmt);
        assert_eq!(cfg.default_level, "info");
    }
}
