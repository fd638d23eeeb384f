//! Configuration types for the call client

use crate::media::MediaConstraints;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Public STUN servers used when nothing else is configured
pub const DEFAULT_STUN_SERVERS: [&str; 2] = [
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
];

/// Main configuration for a call session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    /// WebSocket signaling server URL (ws:// or wss://)
    pub signaling_url: String,

    /// Base URL of the REST backend that mints rooms (http:// or https://)
    pub api_base_url: String,

    /// Bearer token for the REST backend (optional)
    pub auth_token: Option<String>,

    /// STUN server URLs (at least one required)
    pub stun_servers: Vec<String>,

    /// TURN server configurations (optional, none by default)
    pub turn_servers: Vec<TurnServerConfig>,

    /// Local media to capture when a call starts
    pub media: MediaConstraints,

    /// Reconnection policy of the signaling channel
    pub signaling: SignalingRetryPolicy,

    /// ICE-restart recovery policy of the peer link
    pub recovery: RecoveryPolicy,
}

/// TURN server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnServerConfig {
    /// TURN server URL (turn: or turns:)
    pub url: String,

    /// Username for TURN authentication
    pub username: String,

    /// Credential for TURN authentication
    pub credential: String,
}

/// One ICE server entry handed to the peer connection
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    pub username: String,
    pub credential: String,
}

/// Auto-reconnect policy of the signaling channel
///
/// The delay grows from `delay_initial_ms` by `delay_multiplier` per failed
/// attempt and is clamped to `delay_max_ms`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingRetryPolicy {
    /// Connection attempts before the channel gives up (default: 10)
    pub max_attempts: u32,
    /// Delay before the first retry in milliseconds (default: 1000ms)
    pub delay_initial_ms: u64,
    /// Upper bound of the retry delay in milliseconds (default: 5000ms)
    pub delay_max_ms: u64,
    /// Delay multiplier per failed attempt (default: 2.0)
    pub delay_multiplier: f64,
}

impl Default for SignalingRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            delay_initial_ms: 1000,
            delay_max_ms: 5000,
            delay_multiplier: 2.0,
        }
    }
}

impl SignalingRetryPolicy {
    /// Delay to wait before connection attempt `attempt` (0-indexed)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay_ms =
            (self.delay_initial_ms as f64) * self.delay_multiplier.powi(attempt.min(32) as i32);
        let delay_ms = delay_ms.min(self.delay_max_ms as f64);
        Duration::from_millis(delay_ms as u64)
    }

    /// Check if another attempt is allowed after `failures` consecutive failures
    pub fn should_retry(&self, failures: u32) -> bool {
        failures < self.max_attempts
    }
}

/// ICE-restart recovery policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryPolicy {
    /// Restart attempts before automatic recovery gives up (default: 3)
    pub max_ice_restarts: u32,
    /// Fixed delay of the restart check after a disconnect (default: 2000ms)
    pub restart_delay_ms: u64,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            max_ice_restarts: 3,
            restart_delay_ms: 2000,
        }
    }
}

impl RecoveryPolicy {
    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            signaling_url: "ws://localhost:3000".to_string(),
            api_base_url: "http://localhost:3000".to_string(),
            auth_token: None,
            stun_servers: DEFAULT_STUN_SERVERS.iter().map(|s| s.to_string()).collect(),
            turn_servers: Vec::new(),
            media: MediaConstraints::default(),
            signaling: SignalingRetryPolicy::default(),
            recovery: RecoveryPolicy::default(),
        }
    }
}

impl CallConfig {
    /// Parse a configuration from TOML; missing keys take their defaults
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: CallConfig = toml::from_str(input)
            .map_err(|e| Error::InvalidConfig(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `stun_servers` is empty or holds a non-STUN URL
    /// - a TURN entry is not a turn:/turns: URL
    /// - `signaling_url` is not a WebSocket URL
    /// - `api_base_url` is not an HTTP URL
    /// - the signaling retry policy allows no attempt or has inverted delay bounds
    /// - `signaling.delay_multiplier` is below 1.0 or NaN
    pub fn validate(&self) -> Result<()> {
        if self.stun_servers.is_empty() {
            return Err(Error::InvalidConfig(
                "At least one STUN server is required".to_string(),
            ));
        }

        if let Some(bad) = self
            .stun_servers
            .iter()
            .find(|url| !url.starts_with("stun:") && !url.starts_with("stuns:"))
        {
            return Err(Error::InvalidConfig(format!(
                "stun_servers entries must start with stun: or stuns:, got {}",
                bad
            )));
        }

        if let Some(bad) = self
            .turn_servers
            .iter()
            .find(|turn| !turn.url.starts_with("turn:") && !turn.url.starts_with("turns:"))
        {
            return Err(Error::InvalidConfig(format!(
                "turn_servers entries must start with turn: or turns:, got {}",
                bad.url
            )));
        }

        if !self.signaling_url.starts_with("ws://") && !self.signaling_url.starts_with("wss://") {
            return Err(Error::InvalidConfig(format!(
                "signaling_url must start with ws:// or wss://, got {}",
                self.signaling_url
            )));
        }

        if !self.api_base_url.starts_with("http://") && !self.api_base_url.starts_with("https://")
        {
            return Err(Error::InvalidConfig(format!(
                "api_base_url must start with http:// or https://, got {}",
                self.api_base_url
            )));
        }

        if self.signaling.max_attempts == 0 {
            return Err(Error::InvalidConfig(
                "signaling.max_attempts must be at least 1".to_string(),
            ));
        }

        if self.signaling.delay_initial_ms > self.signaling.delay_max_ms {
            return Err(Error::InvalidConfig(format!(
                "signaling.delay_initial_ms ({}) exceeds signaling.delay_max_ms ({})",
                self.signaling.delay_initial_ms, self.signaling.delay_max_ms
            )));
        }

        if self.signaling.delay_multiplier.is_nan() || self.signaling.delay_multiplier < 1.0 {
            return Err(Error::InvalidConfig(format!(
                "signaling.delay_multiplier must be at least 1.0, got {}",
                self.signaling.delay_multiplier
            )));
        }

        Ok(())
    }

    /// ICE servers for a new peer connection: every STUN URL, then every TURN entry
    pub fn ice_servers(&self) -> Vec<IceServerConfig> {
        self.stun_servers
            .iter()
            .map(|url| IceServerConfig {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .chain(self.turn_servers.iter().map(|turn| IceServerConfig {
                urls: vec![turn.url.clone()],
                username: turn.username.clone(),
                credential: turn.credential.clone(),
            }))
            .collect()
    }

    /// Set the signaling server URL
    pub fn with_signaling_url(mut self, signaling_url: &str) -> Self {
        self.signaling_url = signaling_url.to_string();
        self
    }

    /// Set the REST backend base URL
    pub fn with_api_base_url(mut self, api_base_url: &str) -> Self {
        self.api_base_url = api_base_url.to_string();
        self
    }

    /// Set the REST backend bearer token
    pub fn with_auth_token(mut self, token: &str) -> Self {
        self.auth_token = Some(token.to_string());
        self
    }

    /// Add TURN servers to this configuration
    pub fn with_turn_servers(mut self, turn_servers: Vec<TurnServerConfig>) -> Self {
        self.turn_servers = turn_servers;
        self
    }

    /// Replace the recovery policy
    pub fn with_recovery(mut self, recovery: RecoveryPolicy) -> Self {
        self.recovery = recovery;
        self
    }
}
