//! Configuration for the signaling handler

use crate::error::{Result, SignalingError};
use crate::negotiation::AddressComparison;
use serde::{Deserialize, Deserializer};
use std::path::Path;
use std::time::Duration;

/// Handler configuration
///
/// Loadable from TOML; every field has a default, so an empty document is a
/// valid configuration.
///
/// ```toml
/// reconnect_delay_secs = 10
/// address_comparison = "canonical"
/// offer_ttl_secs = 600
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SignalingConfig {
    /// Delay before a plugin that reported a non-auth error is reconnected
    #[serde(rename = "reconnect_delay_secs", deserialize_with = "whole_seconds")]
    pub reconnect_delay: Duration,
    /// Capacity of the outward event broadcast channel
    pub event_channel_capacity: usize,
    pub address_comparison: AddressComparison,
    /// Maximum age of an unclaimed offer; `None` keeps offers forever
    #[serde(rename = "offer_ttl_secs", deserialize_with = "optional_whole_seconds")]
    pub offer_ttl: Option<Duration>,
    /// How often expired offers are swept when a TTL is set
    #[serde(rename = "offer_sweep_interval_secs", deserialize_with = "whole_seconds")]
    pub offer_sweep_interval: Duration,
}

fn whole_seconds<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_secs)
}

fn optional_whole_seconds<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<Duration>, D::Error> {
    Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_secs))
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(10),
            event_channel_capacity: 1000,
            address_comparison: AddressComparison::Literal,
            offer_ttl: None,
            offer_sweep_interval: Duration::from_secs(60),
        }
    }
}

impl SignalingConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            SignalingError::config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity;
        self
    }

    pub fn with_address_comparison(mut self, comparison: AddressComparison) -> Self {
        self.address_comparison = comparison;
        self
    }

    pub fn with_offer_ttl(mut self, ttl: Duration) -> Self {
        self.offer_ttl = Some(ttl);
        self
    }

    pub fn with_offer_sweep_interval(mut self, interval: Duration) -> Self {
        self.offer_sweep_interval = interval;
        self
    }

    pub fn reconnect_delay(&self) -> Duration {
        self.reconnect_delay
    }

    pub fn offer_ttl(&self) -> Option<Duration> {
        self.offer_ttl
    }

    pub fn offer_sweep_interval(&self) -> Duration {
        self.offer_sweep_interval
    }

    pub fn validate(&self) -> Result<()> {
        if self.event_channel_capacity == 0 {
            return Err(SignalingError::config("event_channel_capacity must be greater than 0"));
        }
        if self.offer_sweep_interval.is_zero() {
            return Err(SignalingError::config("offer_sweep_interval_secs must be greater than 0"));
        }
        Ok(())
    }
}
