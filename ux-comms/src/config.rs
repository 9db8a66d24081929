//! Transport configuration
//!
//! Buffer sizing, backoff periods and the reactor's hibernation cap. Built
//! from defaults, with [`CommsConfig::builder`], or loaded from JSON.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::codec::{FRAME_OVERHEAD, MAX_FRAME_PAYLOAD};
use crate::error::{CommsError, Result};

/// Transport configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommsConfig {
    /// Receive buffer size when a connection is created
    pub rx_initial_size: usize,
    /// Bytes added each time the receive buffer fills up
    pub rx_growth_increment: usize,
    /// Hard ceiling; buffered data is dropped when a read would exceed it
    pub rx_max_size: usize,
    /// Connect retry delay after an in-progress connect or a lost link
    pub short_backoff_ms: u64,
    /// Connect retry delay after a refused or unreachable peer
    pub long_backoff_ms: u64,
    /// Upper bound on a single reactor wait
    pub max_hibernation_ms: u64,
    /// Pause between `block_send` retries (0 = spin)
    pub block_send_sleep_ms: u64,
    /// Readiness events fetched per wait
    pub events_capacity: usize,
}

impl Default for CommsConfig {
    fn default() -> Self {
        Self {
            rx_initial_size: 4096,
            rx_growth_increment: 4096,
            rx_max_size: 128 * 1024,
            short_backoff_ms: 100,
            long_backoff_ms: 5000,
            max_hibernation_ms: 1000,
            block_send_sleep_ms: 10,
            events_capacity: 256,
        }
    }
}

impl CommsConfig {
    /// Create a new configuration builder
    pub fn builder() -> CommsConfigBuilder {
        CommsConfigBuilder::default()
    }

    /// Parse a configuration from JSON; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: CommsConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Check that the values are usable together
    pub fn validate(&self) -> Result<()> {
        if self.rx_initial_size == 0 {
            return Err(CommsError::InvalidConfig {
                reason: "rx_initial_size must be greater than zero".to_string(),
            });
        }
        if self.rx_growth_increment == 0 {
            return Err(CommsError::InvalidConfig {
                reason: "rx_growth_increment must be greater than zero".to_string(),
            });
        }
        if self.rx_max_size < self.rx_initial_size {
            return Err(CommsError::InvalidConfig {
                reason: format!(
                    "rx_max_size ({}) is smaller than rx_initial_size ({})",
                    self.rx_max_size, self.rx_initial_size
                ),
            });
        }
        if self.rx_max_size <= FRAME_OVERHEAD {
            return Err(CommsError::InvalidConfig {
                reason: format!("rx_max_size must exceed the {FRAME_OVERHEAD}-byte frame overhead"),
            });
        }
        if self.events_capacity == 0 {
            return Err(CommsError::InvalidConfig {
                reason: "events_capacity must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// Largest payload a single frame may carry under this configuration
    pub fn max_payload(&self) -> usize {
        MAX_FRAME_PAYLOAD.min(self.rx_max_size.saturating_sub(FRAME_OVERHEAD))
    }
}

/// Builder for CommsConfig
#[derive(Debug, Default)]
pub struct CommsConfigBuilder {
    config: CommsConfig,
}

impl CommsConfigBuilder {
    /// Set the initial receive buffer size
    pub fn rx_initial_size(mut self, size: usize) -> Self {
        self.config.rx_initial_size = size;
        self
    }

    /// Set the receive buffer growth step
    pub fn rx_growth_increment(mut self, size: usize) -> Self {
        self.config.rx_growth_increment = size;
        self
    }

    /// Set the receive buffer ceiling
    pub fn rx_max_size(mut self, size: usize) -> Self {
        self.config.rx_max_size = size;
        self
    }

    /// Set the short connect backoff
    pub fn short_backoff_ms(mut self, ms: u64) -> Self {
        self.config.short_backoff_ms = ms;
        self
    }

    /// Set the long connect backoff
    pub fn long_backoff_ms(mut self, ms: u64) -> Self {
        self.config.long_backoff_ms = ms;
        self
    }

    /// Set the cap on a single reactor wait
    pub fn max_hibernation_ms(mut self, ms: u64) -> Self {
        self.config.max_hibernation_ms = ms;
        self
    }

    /// Set the pause between `block_send` retries
    pub fn block_send_sleep_ms(mut self, ms: u64) -> Self {
        self.config.block_send_sleep_ms = ms;
        self
    }

    /// Set how many readiness events are fetched per wait
    pub fn events_capacity(mut self, capacity: usize) -> Self {
        self.config.events_capacity = capacity;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<CommsConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(CommsConfig::default().validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = CommsConfig::builder()
            .rx_initial_size(64)
            .rx_growth_increment(32)
            .rx_max_size(256)
            .short_backoff_ms(5)
            .long_backoff_ms(50)
            .build()
            .unwrap();

        assert_eq!(config.rx_initial_size, 64);
        assert_eq!(config.rx_max_size, 256);
        assert_eq!(config.short_backoff_ms, 5);
        assert_eq!(config.long_backoff_ms, 50);
        assert_eq!(config.max_payload(), 256 - FRAME_OVERHEAD);
    }

    #[test]
    fn test_builder_rejects_inverted_sizes() {
        let err = CommsConfig::builder()
            .rx_initial_size(1024)
            .rx_max_size(512)
            .build()
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_CONFIG");
    }

    #[test]
    fn test_zero_growth_rejected() {
        assert!(CommsConfig::builder().rx_growth_increment(0).build().is_err());
    }

    #[test]
    fn test_json_partial_uses_defaults() {
        let config = CommsConfig::from_json_str(r#"{ "long_backoff_ms": 250 }"#).unwrap();
        assert_eq!(config.long_backoff_ms, 250);
        assert_eq!(config.rx_initial_size, CommsConfig::default().rx_initial_size);
    }

    #[test]
    fn test_json_invalid_rejected() {
        let err = CommsConfig::from_json_str(r#"{ "rx_initial_size": 0 }"#).unwrap_err();
        assert!(matches!(err, CommsError::InvalidConfig { .. }));

        let err = CommsConfig::from_json_str("not json").unwrap_err();
        assert!(matches!(err, CommsError::Json(_)));
    }

    #[test]
    fn test_max_payload_capped_by_length_field() {
        let config = CommsConfig::builder().rx_max_size(1 << 20).build().unwrap();
        assert_eq!(config.max_payload(), MAX_FRAME_PAYLOAD);
    }
}
