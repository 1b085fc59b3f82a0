// ============================================
// File: crates/warden-server/src/config.rs
// ============================================
//! # Server Configuration
//!
//! ## Creation Reason
//! Loads and validates the control-plane configuration from TOML.
//!
//! ## Main Functionality
//! - `ServerConfig`: Main configuration structure
//! - One struct per section with serde defaults and `validate()`
//!
//! ## Configuration File Format
//! ```toml
//! [network]
//! listen_addr = "0.0.0.0:8080"
//! max_frame_size = 65536
//!
//! [keys]
//! key_file = "/var/lib/warden/cp_key.json"
//!
//! [directory]
//! snapshot_file = "/var/lib/warden/agents.json"
//!
//! [handshake]
//! challenge_timeout_secs = 5
//! auth_deadline_secs = 30
//!
//! [registration]
//! token_ttl_secs = 600
//!
//! [admin]
//! api_token = "change-me-to-something-long"
//!
//! [limits]
//! max_connections = 10000
//! maintenance_interval_secs = 60
//!
//! [logging]
//! level = "info"
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Every section is optional; defaults must always validate
//! - Without `admin.api_token` the admin API answers 503
//!
//! ## Last Modified
//! v0.1.0 - Initial configuration implementation

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use warden_core::protocol::DEFAULT_MAX_FRAME_SIZE;

use crate::error::{Result, ServerError};

// ============================================
// ServerConfig
// ============================================

/// Complete server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listener settings.
    #[serde(default)]
    pub network: NetworkConfig,

    /// Control-plane key storage.
    #[serde(default)]
    pub keys: KeysConfig,

    /// Agent directory persistence.
    #[serde(default)]
    pub directory: DirectoryConfig,

    /// Handshake deadlines.
    #[serde(default)]
    pub handshake: HandshakeConfig,

    /// Registration tokens.
    #[serde(default)]
    pub registration: RegistrationConfig,

    /// Admin API.
    #[serde(default)]
    pub admin: AdminConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Logging.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ServerConfig {
    /// Reads, parses and validates a TOML config file.
    ///
    /// # Errors
    /// `ConfigLoad` when the file is unreadable or not valid TOML, otherwise
    /// whatever [`Self::validate`] rejects.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = path.display().to_string();
        info!(path = %source, "Reading server config");

        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ServerError::config_load(&source, e.to_string()))?;
        let config: Self =
            toml::from_str(&raw).map_err(|e| ServerError::config_load(&source, e.to_string()))?;
        config.validate()?;

        info!(listen = %config.listen_addr(), "Server config accepted");
        Ok(config)
    }

    /// Parses and validates config held in memory.
    ///
    /// # Errors
    /// Returns error if the content cannot be parsed or validated.
    pub fn from_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| ServerError::config_load("<string>", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns `ConfigInvalid` naming the first bad field.
    pub fn validate(&self) -> Result<()> {
        self.network.validate()?;
        self.keys.validate()?;
        self.handshake.validate()?;
        self.registration.validate()?;
        self.admin.validate()?;
        self.limits.validate()?;
        Ok(())
    }

    /// Renders the config as TOML, as printed by `default-config`.
    #[must_use]
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    /// Listen address.
    #[must_use]
    pub const fn listen_addr(&self) -> SocketAddr {
        self.network.listen_addr
    }
}

// ============================================
// NetworkConfig
// ============================================

/// Listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// HTTP / WebSocket listen address.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Largest accepted inbound text frame in bytes.
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_max_frame_size() -> usize {
    DEFAULT_MAX_FRAME_SIZE
}

impl NetworkConfig {
    fn validate(&self) -> Result<()> {
        if self.max_frame_size < 1024 {
            return Err(ServerError::config_invalid(
                "network.max_frame_size",
                "must be at least 1024 bytes",
            ));
        }
        Ok(())
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            max_frame_size: default_max_frame_size(),
        }
    }
}

// ============================================
// KeysConfig
// ============================================

/// Control-plane key storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeysConfig {
    /// Path to the control-plane key file.
    #[serde(default = "default_key_file")]
    pub key_file: String,
}

fn default_key_file() -> String {
    "/var/lib/warden/cp_key.json".to_string()
}

impl KeysConfig {
    fn validate(&self) -> Result<()> {
        if self.key_file.is_empty() {
            return Err(ServerError::config_invalid("keys.key_file", "cannot be empty"));
        }
        Ok(())
    }
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            key_file: default_key_file(),
        }
    }
}

// ============================================
// DirectoryConfig
// ============================================

/// Agent directory persistence.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// JSON snapshot of enrolled agents. In-memory only when unset.
    #[serde(default)]
    pub snapshot_file: Option<String>,
}

// ============================================
// HandshakeConfig
// ============================================

/// Handshake deadlines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeConfig {
    /// Seconds allowed between CHALLENGE and RESPONSE.
    #[serde(default = "default_challenge_timeout")]
    pub challenge_timeout_secs: u64,

    /// Seconds a connection may stay unauthenticated.
    #[serde(default = "default_auth_deadline")]
    pub auth_deadline_secs: u64,
}

fn default_challenge_timeout() -> u64 {
    5
}

fn default_auth_deadline() -> u64 {
    30
}

impl HandshakeConfig {
    fn validate(&self) -> Result<()> {
        if self.challenge_timeout_secs == 0 {
            return Err(ServerError::config_invalid(
                "handshake.challenge_timeout_secs",
                "must be > 0",
            ));
        }
        if self.auth_deadline_secs < self.challenge_timeout_secs {
            return Err(ServerError::config_invalid(
                "handshake.auth_deadline_secs",
                "must be >= challenge_timeout_secs",
            ));
        }
        Ok(())
    }

    /// CHALLENGE → RESPONSE timeout.
    #[must_use]
    pub const fn challenge_timeout(&self) -> Duration {
        Duration::from_secs(self.challenge_timeout_secs)
    }

    /// Connection → Authorized deadline.
    #[must_use]
    pub const fn auth_deadline(&self) -> Duration {
        Duration::from_secs(self.auth_deadline_secs)
    }
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            challenge_timeout_secs: default_challenge_timeout(),
            auth_deadline_secs: default_auth_deadline(),
        }
    }
}

// ============================================
// RegistrationConfig
// ============================================

/// Registration tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationConfig {
    /// Token lifetime in seconds.
    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: u64,
}

fn default_token_ttl() -> u64 {
    600
}

impl RegistrationConfig {
    fn validate(&self) -> Result<()> {
        if self.token_ttl_secs == 0 {
            return Err(ServerError::config_invalid(
                "registration.token_ttl_secs",
                "must be > 0",
            ));
        }
        Ok(())
    }

    /// Token lifetime.
    #[must_use]
    pub const fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            token_ttl_secs: default_token_ttl(),
        }
    }
}

// ============================================
// AdminConfig
// ============================================

/// Minimum admin token length.
pub const MIN_ADMIN_TOKEN_LEN: usize = 16;

/// Admin API.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Bearer token for `/api/v1/admin/*` and `/ws/observer`.
    #[serde(default)]
    pub api_token: Option<String>,
}

impl AdminConfig {
    fn validate(&self) -> Result<()> {
        if let Some(token) = &self.api_token {
            if token.len() < MIN_ADMIN_TOKEN_LEN {
                return Err(ServerError::config_invalid(
                    "admin.api_token",
                    format!("must be at least {MIN_ADMIN_TOKEN_LEN} characters"),
                ));
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for AdminConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminConfig")
            .field("api_token", &self.api_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

// ============================================
// LimitsConfig
// ============================================

/// Resource limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum concurrent agent sessions.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Seconds between maintenance passes.
    #[serde(default = "default_maintenance_interval")]
    pub maintenance_interval_secs: u64,
}

fn default_max_connections() -> usize {
    10_000
}

fn default_maintenance_interval() -> u64 {
    60
}

impl LimitsConfig {
    fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(ServerError::config_invalid(
                "limits.max_connections",
                "must be > 0",
            ));
        }
        if self.maintenance_interval_secs == 0 {
            return Err(ServerError::config_invalid(
                "limits.maintenance_interval_secs",
                "must be > 0",
            ));
        }
        Ok(())
    }

    /// Maintenance interval.
    #[must_use]
    pub const fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            maintenance_interval_secs: default_maintenance_interval(),
        }
    }
}

// ============================================
// LoggingConfig
// ============================================

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
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
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.listen_addr().port(), 8080);
        assert_eq!(config.handshake.challenge_timeout(), Duration::from_secs(5));
        assert_eq!(config.registration.token_ttl(), Duration::from_secs(600));
        assert!(config.admin.api_token.is_none());
    }

    #[test]
    fn test_full_config_format() {
        let toml = r#"
            [network]
            listen_addr = "127.0.0.1:9000"

            [keys]
            key_file = "/tmp/cp.json"

            [directory]
            snapshot_file = "/tmp/agents.json"

            [handshake]
            challenge_timeout_secs = 3
            auth_deadline_secs = 20

            [registration]
            token_ttl_secs = 120

            [admin]
            api_token = "0123456789abcdef0123"

            [limits]
            max_connections = 50
            maintenance_interval_secs = 10

            [logging]
            level = "debug"
        "#;

        let config = ServerConfig::from_str(toml).unwrap();
        assert_eq!(config.listen_addr().port(), 9000);
        assert_eq!(config.keys.key_file, "/tmp/cp.json");
        assert_eq!(config.directory.snapshot_file.as_deref(), Some("/tmp/agents.json"));
        assert_eq!(config.handshake.auth_deadline_secs, 20);
        assert_eq!(config.limits.max_connections, 50);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_short_admin_token_rejected() {
        let toml = r#"
            [admin]
            api_token = "short"
        "#;
        assert!(ServerConfig::from_str(toml).is_err());
    }

    #[test]
    fn test_deadline_must_cover_challenge() {
        let toml = r#"
            [handshake]
            challenge_timeout_secs = 10
            auth_deadline_secs = 5
        "#;
        let err = ServerConfig::from_str(toml).unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_debug_redacts_admin_token() {
        let admin = AdminConfig {
            api_token: Some("super-secret-admin-token".into()),
        };
        assert!(!format!("{admin:?}").contains("super-secret"));
    }

    #[test]
    fn test_to_toml_roundtrips() {
        let config = ServerConfig::default();
        let reparsed = ServerConfig::from_str(&config.to_toml()).unwrap();
        assert_eq!(reparsed.listen_addr(), config.listen_addr());
    }
}
