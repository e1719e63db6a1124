//! Gateway configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::duration_secs;

/// Default address suffix for bare recipient identifiers
pub const DEFAULT_USER_DOMAIN: &str = "s.whatsapp.net";

/// Configuration for the gateway daemon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Address to bind the HTTP server to
    pub bind_address: String,

    /// Directory holding the opaque credential files
    pub credentials_dir: PathBuf,

    /// Domain appended to bare recipient identifiers
    pub user_domain: String,

    /// Protocol sidecar connection settings
    pub bridge: BridgeConfig,

    /// Backoff configuration for reconnections
    pub reconnect: BackoffConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3001".to_string(),
            credentials_dir: super::default_config_dir().join("auth"),
            user_domain: DEFAULT_USER_DOMAIN.to_string(),
            bridge: BridgeConfig::default(),
            reconnect: BackoffConfig::default(),
        }
    }
}

/// Protocol sidecar connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Sidecar address (host:port)
    pub address: String,

    /// How long to wait for the sidecar to accept a connection
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,

    /// How long to wait for a `send_result`
    #[serde(with = "duration_secs")]
    pub send_timeout: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:3002".to_string(),
            connect_timeout: Duration::from_secs(20),
            send_timeout: Duration::from_secs(30),
        }
    }
}

/// Longest reconnect delay a configuration may ask for
pub const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Exponential backoff configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Initial delay
    #[serde(with = "duration_secs")]
    pub initial: Duration,

    /// Maximum delay
    #[serde(with = "duration_secs")]
    pub max: Duration,

    /// Multiplier for each retry
    pub multiplier: f64,

    /// Jitter factor (0.0 to 1.0)
    pub jitter: f64,

    /// Consecutive failed attempts before giving up (0 = never give up)
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(3),
            max: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: 0.0,
            max_attempts: 20,
        }
    }
}

impl BackoffConfig {
    /// Check the values are usable
    pub fn validate(&self) -> Result<(), crate::error::ConfigError> {
        use crate::error::ConfigError;

        if self.initial.is_zero() {
            return Err(ConfigError::Invalid(
                "reconnect.initial must be at least 1 second".to_string(),
            ));
        }
        if self.max < self.initial {
            return Err(ConfigError::Invalid(
                "reconnect.max must not be below reconnect.initial".to_string(),
            ));
        }
        if self.max > MAX_RECONNECT_DELAY {
            return Err(ConfigError::Invalid(format!(
                "reconnect.max must not exceed {} seconds",
                MAX_RECONNECT_DELAY.as_secs()
            )));
        }
        if !(self.multiplier.is_finite() && self.multiplier >= 1.0) {
            return Err(ConfigError::Invalid(
                "reconnect.multiplier must be at least 1.0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(ConfigError::Invalid(
                "reconnect.jitter must be between 0.0 and 1.0".to_string(),
            ));
        }
        Ok(())
    }
}
