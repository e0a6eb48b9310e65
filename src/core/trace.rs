//! Logging setup for the `finalizer` binary.
//!
//! The library only emits `tracing` events; installing a subscriber is the
//! binary's job. `RUST_LOG` wins over the configured filter.

use crate::core::config::LogConfig;
use crate::core::error::FinalizerError;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub fn env_filter(config: &LogConfig) -> Result<EnvFilter, FinalizerError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.filter).map_err(|e| {
            FinalizerError::ConfigError(format!("log.filter {:?}: {}", config.filter, e))
        }),
    }
}

/// Install the global subscriber, writing to stderr.
pub fn init_tracing(config: &LogConfig) -> Result<(), FinalizerError> {
    let filter = env_filter(config)?;
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .map_err(|e| FinalizerError::ConfigError(format!("tracing already initialized: {e}")))
}
