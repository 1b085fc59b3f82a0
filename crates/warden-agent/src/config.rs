// ============================================
// File: crates/warden-agent/src/config.rs
// ============================================
//! # Agent Configuration
//!
//! ## Creation Reason
//! Where the agent finds the control plane, its own key, the pinned
//! control-plane key, and how strict the replay window is.
//!
//! ## Configuration File Format
//! ```toml
//! [server]
//! ws_url = "wss://cp.example.com/ws/agent"
//! public_key_url = "https://cp.example.com/api/v1/public-key"
//!
//! [identity]
//! key_file = "/var/lib/warden/agent_key.json"
//! registration_token = "3f9a..."   # only for first enrollment
//!
//! [trust]
//! file = "/var/lib/warden/trusted_cp.json"
//!
//! [replay]
//! max_drift_secs = 300
//! clear_interval_secs = 600
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - `clear_interval_secs` must stay >= 2 * `max_drift_secs`, otherwise a
//!   nonce could be forgotten while its command is still fresh
//!
//! ## Last Modified
//! v0.1.0 - Initial agent configuration

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{AgentError, Result};

// ============================================
// AgentConfig
// ============================================

/// Complete agent configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Control-plane endpoints.
    #[serde(default)]
    pub server: ServerEndpointConfig,

    /// Local identity.
    #[serde(default)]
    pub identity: IdentityConfig,

    /// Pinned control-plane key.
    #[serde(default)]
    pub trust: TrustConfig,

    /// Replay protection window.
    #[serde(default)]
    pub replay: ReplayConfig,
}

impl AgentConfig {
    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    /// Returns error if the file cannot be read, parsed or validated.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let path_str = path.display().to_string();

        info!(path = %path_str, "Loading agent configuration");

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| AgentError::config_load(&path_str, e.to_string()))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| AgentError::config_load(&path_str, e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a string.
    ///
    /// # Errors
    /// Returns error if the content cannot be parsed or validated.
    pub fn from_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| AgentError::config_load("<string>", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates every section.
    ///
    /// # Errors
    /// Returns `ConfigInvalid` naming the first bad field.
    pub fn validate(&self) -> Result<()> {
        self.server.validate()?;
        self.identity.validate()?;
        self.trust.validate()?;
        self.replay.validate()?;
        Ok(())
    }
}

// ============================================
// ServerEndpointConfig
// ============================================

/// Control-plane endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerEndpointConfig {
    /// Agent WebSocket URL.
    #[serde(default = "default_ws_url")]
    pub ws_url: String,

    /// Public-key endpoint used for out-of-band pinning.
    #[serde(default = "default_public_key_url")]
    pub public_key_url: String,

    /// HTTP request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_ws_url() -> String {
    "ws://127.0.0.1:8080/ws/agent".to_string()
}

fn default_public_key_url() -> String {
    "http://127.0.0.1:8080/api/v1/public-key".to_string()
}

fn default_request_timeout() -> u64 {
    10
}

impl ServerEndpointConfig {
    fn validate(&self) -> Result<()> {
        if !(self.ws_url.starts_with("ws://") || self.ws_url.starts_with("wss://")) {
            return Err(AgentError::config_invalid(
                "server.ws_url",
                "must start with ws:// or wss://",
            ));
        }
        if !(self.public_key_url.starts_with("http://")
            || self.public_key_url.starts_with("https://"))
        {
            return Err(AgentError::config_invalid(
                "server.public_key_url",
                "must start with http:// or https://",
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(AgentError::config_invalid(
                "server.request_timeout_secs",
                "must be > 0",
            ));
        }
        Ok(())
    }

    /// HTTP request timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for ServerEndpointConfig {
    fn default() -> Self {
        Self {
            ws_url: default_ws_url(),
            public_key_url: default_public_key_url(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

// ============================================
// IdentityConfig
// ============================================

/// Agent identity storage.
#[derive(Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Path to the agent key file.
    #[serde(default = "default_identity_key_file")]
    pub key_file: String,

    /// Registration token for first-time enrollment.
    #[serde(default)]
    pub registration_token: Option<String>,
}

fn default_identity_key_file() -> String {
    "/var/lib/warden/agent_key.json".to_string()
}

impl IdentityConfig {
    fn validate(&self) -> Result<()> {
        if self.key_file.is_empty() {
            return Err(AgentError::config_invalid(
                "identity.key_file",
                "cannot be empty",
            ));
        }
        if self.registration_token.as_deref() == Some("") {
            return Err(AgentError::config_invalid(
                "identity.registration_token",
                "cannot be empty when set",
            ));
        }
        Ok(())
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            key_file: default_identity_key_file(),
            registration_token: None,
        }
    }
}

impl std::fmt::Debug for IdentityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityConfig")
            .field("key_file", &self.key_file)
            .field(
                "registration_token",
                &self.registration_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

// ============================================
// TrustConfig
// ============================================

/// Pinned control-plane key storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustConfig {
    /// Path to the trust record.
    #[serde(default = "default_trust_file")]
    pub file: String,
}

fn default_trust_file() -> String {
    "/var/lib/warden/trusted_cp.json".to_string()
}

impl TrustConfig {
    fn validate(&self) -> Result<()> {
        if self.file.is_empty() {
            return Err(AgentError::config_invalid("trust.file", "cannot be empty"));
        }
        Ok(())
    }
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            file: default_trust_file(),
        }
    }
}

// ============================================
// ReplayConfig
// ============================================

/// Replay guard window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayConfig {
    /// Maximum accepted clock drift in seconds.
    #[serde(default = "default_max_drift")]
    pub max_drift_secs: u64,

    /// Nonce generation rotation interval in seconds.
    #[serde(default = "default_clear_interval")]
    pub clear_interval_secs: u64,
}

fn default_max_drift() -> u64 {
    300
}

fn default_clear_interval() -> u64 {
    600
}

impl ReplayConfig {
    fn validate(&self) -> Result<()> {
        if self.max_drift_secs == 0 {
            return Err(AgentError::config_invalid(
                "replay.max_drift_secs",
                "must be > 0",
            ));
        }
        if self.clear_interval_secs < 2 * self.max_drift_secs {
            return Err(AgentError::config_invalid(
                "replay.clear_interval_secs",
                format!("must be >= 2 * max_drift_secs ({})", 2 * self.max_drift_secs),
            ));
        }
        Ok(())
    }

    /// Maximum accepted drift.
    #[must_use]
    pub const fn max_drift(&self) -> Duration {
        Duration::from_secs(self.max_drift_secs)
    }

    /// Nonce generation rotation interval.
    #[must_use]
    pub const fn clear_interval(&self) -> Duration {
        Duration::from_secs(self.clear_interval_secs)
    }
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            max_drift_secs: default_max_drift(),
            clear_interval_secs: default_clear_interval(),
        }
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AgentConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.replay.max_drift(), Duration::from_secs(300));
        assert_eq!(config.replay.clear_interval(), Duration::from_secs(600));
    }

    #[test]
    fn test_full_config_format() {
        let toml = r#"
            [server]
            ws_url = "wss://cp.example.com/ws/agent"
            public_key_url = "https://cp.example.com/api/v1/public-key"

            [identity]
            key_file = "/tmp/agent.json"
            registration_token = "abc123"

            [trust]
            file = "/tmp/trusted.json"

            [replay]
            max_drift_secs = 60
            clear_interval_secs = 120
        "#;

        let config = AgentConfig::from_str(toml).unwrap();
        assert_eq!(config.server.ws_url, "wss://cp.example.com/ws/agent");
        assert_eq!(config.identity.registration_token.as_deref(), Some("abc123"));
        assert_eq!(config.trust.file, "/tmp/trusted.json");
        assert_eq!(config.replay.max_drift_secs, 60);
    }

    #[test]
    fn test_clear_interval_must_cover_two_drift_windows() {
        let toml = r#"
            [replay]
            max_drift_secs = 300
            clear_interval_secs = 400
        "#;
        let err = AgentConfig::from_str(toml).unwrap_err();
        assert!(matches!(err, AgentError::ConfigInvalid { ref field, .. } if field == "replay.clear_interval_secs"));
    }

    #[test]
    fn test_rejects_non_websocket_url() {
        let toml = r#"
            [server]
            ws_url = "http://cp.example.com/ws/agent"
        "#;
        assert!(AgentConfig::from_str(toml).is_err());
    }

    #[test]
    fn test_debug_redacts_token() {
        let identity = IdentityConfig {
            key_file: "k.json".into(),
            registration_token: Some("secret-token".into()),
        };
        let debug = format!("{identity:?}");
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("REDACTED"));
    }
}
