//! Logging initialization using tracing.
//!
//! Storage operations log structured fields (backend, volume, command argv)
//! rather than long prose, so the human-readable format is the compact one
//! and the JSON format flattens event fields for aggregation pipelines.

use anyhow::{anyhow, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn level_filter(level: &str) -> EnvFilter {
    // RUST_LOG takes precedence over the configured level.
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Initialize compact human-readable logging at the given level.
///
/// Fails when a global subscriber is already installed, so repeated
/// initialization in tests can simply discard the result.
pub fn init_logging(level: &str) -> Result<()> {
    tracing_subscriber::registry()
        .with(level_filter(level))
        .with(fmt::layer().compact().with_target(true))
        .try_init()
        .map_err(|e| anyhow!("Cannot install log subscriber: {}", e))
}

/// Initialize JSON logging at the given level, one object per event.
pub fn init_logging_json(level: &str) -> Result<()> {
    tracing_subscriber::registry()
        .with(level_filter(level))
        .with(fmt::layer().json().flatten_event(true).with_target(true))
        .try_init()
        .map_err(|e| anyhow!("Cannot install log subscriber: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_an_error() {
        // Whichever call wins the global subscriber slot, the next fails.
        init_logging("info").unwrap();
        assert!(init_logging_json("info").is_err());
        assert!(init_logging("debug").is_err());
    }
}
