//! Logging setup.
//!
//! Library code only emits `tracing` events; applications call
//! [`init_tracing`] once at startup to install a subscriber.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{ConfigError, SyncResult};

const DEFAULT_FILTER: &str = "querysync_cache=info,querysync_market=info,warn";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Telemetry configuration from environment variables.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// `EnvFilter` directives, e.g. `querysync_cache=debug`.
    pub filter: String,
    pub format: LogFormat,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            filter: std::env::var("QUERYSYNC_LOG").unwrap_or_else(|_| DEFAULT_FILTER.to_string()),
            format: match std::env::var("QUERYSYNC_LOG_FORMAT").as_deref() {
                Ok("json") => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        }
    }
}

/// Install the global tracing subscriber.
///
/// Fails if the filter does not parse or a subscriber is already set.
pub fn init_tracing(config: &TelemetryConfig) -> SyncResult<()> {
    let env_filter = EnvFilter::try_new(&config.filter).map_err(|e| ConfigError::InvalidValue {
        field: "QUERYSYNC_LOG".to_string(),
        value: config.filter.clone(),
        reason: e.to_string(),
    })?;

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = match config.format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    };

    result.map_err(|e| ConfigError::Telemetry {
        reason: e.to_string(),
    })?;

    tracing::info!(filter = %config.filter, format = ?config.format, "Telemetry initialized");
    Ok(())
}
