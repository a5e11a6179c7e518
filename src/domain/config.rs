// ============================================================================
// Engine Configuration
// Runtime tuning for book actors, ledger listeners and the timeout sweep
// ============================================================================

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Runtime configuration of the trading and clearing engine.
///
/// Venue data (assets, exchanges) lives in persistence; this struct only
/// carries process tuning and may be loaded from a JSON document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of price levels per side included in published book updates
    pub snapshot_depth: usize,

    /// Capacity of each book actor's request queue
    pub book_queue_capacity: usize,

    /// Interval between ledger polls of one listener
    pub poll_interval_ms: u64,

    /// Settling delay before the one-time recheck after warm start
    pub recheck_delay_ms: u64,

    /// Interval of the settlement timeout sweep
    pub sweep_interval_ms: u64,

    /// First retry delay after a ledger lookup failure
    pub retry_backoff_initial_ms: u64,

    /// Upper bound for the doubling retry delay
    pub retry_backoff_max_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            snapshot_depth: 50,
            book_queue_capacity: 1024,
            poll_interval_ms: 5_000,
            recheck_delay_ms: 2_000,
            sweep_interval_ms: 60_000,
            retry_backoff_initial_ms: 1_000,
            retry_backoff_max_ms: 60_000,
        }
    }
}

impl EngineConfig {
    /// Parse and validate a JSON configuration document.
    /// Missing fields take their default values.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Malformed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Builder method: Set book snapshot depth
    pub fn with_snapshot_depth(mut self, depth: usize) -> Self {
        self.snapshot_depth = depth;
        self
    }

    /// Builder method: Set the listener poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Builder method: Set the warm-start recheck delay
    pub fn with_recheck_delay(mut self, delay: Duration) -> Self {
        self.recheck_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Builder method: Set the timeout sweep interval
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Builder method: Set the ledger retry backoff bounds
    pub fn with_retry_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.retry_backoff_initial_ms = initial.as_millis() as u64;
        self.retry_backoff_max_ms = max.as_millis() as u64;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn recheck_delay(&self) -> Duration {
        Duration::from_millis(self.recheck_delay_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn retry_backoff_initial(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_initial_ms)
    }

    pub fn retry_backoff_max(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_max_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.book_queue_capacity == 0 {
            return Err(ConfigError::InvalidEngineConfig(
                "book_queue_capacity must be positive".to_string(),
            ));
        }

        if self.poll_interval_ms == 0 || self.sweep_interval_ms == 0 {
            return Err(ConfigError::InvalidEngineConfig(
                "poll and sweep intervals must be positive".to_string(),
            ));
        }

        if self.retry_backoff_initial_ms == 0
            || self.retry_backoff_initial_ms > self.retry_backoff_max_ms
        {
            return Err(ConfigError::InvalidEngineConfig(format!(
                "retry backoff must satisfy 0 < initial ({}) <= max ({})",
                self.retry_backoff_initial_ms, self.retry_backoff_max_ms
            )));
        }

        Ok(())
    }
}

// ============================================================================
// Preset Configurations
// ============================================================================

impl EngineConfig {
    /// Tight intervals for tests and local demos
    pub fn fast() -> Self {
        Self {
            snapshot_depth: 10,
            book_queue_capacity: 64,
            poll_interval_ms: 20,
            recheck_delay_ms: 10,
            sweep_interval_ms: 50,
            retry_backoff_initial_ms: 10,
            retry_backoff_max_ms: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(EngineConfig::default().validate().is_ok());
        assert!(EngineConfig::fast().validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let config = EngineConfig::default()
            .with_snapshot_depth(5)
            .with_poll_interval(Duration::from_millis(250))
            .with_retry_backoff(Duration::from_millis(100), Duration::from_secs(1));

        assert_eq!(config.snapshot_depth, 5);
        assert_eq!(config.poll_interval(), Duration::from_millis(250));
        assert_eq!(config.retry_backoff_max(), Duration::from_secs(1));
    }

    #[test]
    fn test_validation() {
        let config = EngineConfig::default()
            .with_retry_backoff(Duration::from_secs(10), Duration::from_secs(1));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidEngineConfig(_))
        ));
    }

    #[test]
    fn test_json_partial_document() {
        let config = EngineConfig::from_json_str(r#"{ "snapshot_depth": 3 }"#).unwrap();
        assert_eq!(config.snapshot_depth, 3);
        assert_eq!(config.poll_interval_ms, EngineConfig::default().poll_interval_ms);

        assert!(matches!(
            EngineConfig::from_json_str(r#"{ "poll_interval_ms": 0 }"#),
            Err(ConfigError::InvalidEngineConfig(_))
        ));
        assert!(matches!(
            EngineConfig::from_json_str("not json"),
            Err(ConfigError::Malformed(_))
        ));
    }
}
