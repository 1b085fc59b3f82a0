// ============================================
// File: crates/warden-agent/src/error.rs
// ============================================
//! # Agent Error Types
//!
//! ## Creation Reason
//! Errors surfaced by the agent library: configuration, local key storage,
//! control-plane trust and the handshake as seen from the agent side.
//!
//! ## ⚠️ Important Note for Next Developer
//! - Command integrity failures are NOT errors of this type: they are
//!   reported as security alerts and the session continues
//!
//! ## Last Modified
//! v0.1.0 - Initial error definitions

use thiserror::Error;

use warden_core::CoreError;

// ============================================
// Result Type Alias
// ============================================

/// Result type for agent operations.
pub type Result<T> = std::result::Result<T, AgentError>;

// ============================================
// AgentError
// ============================================

/// Agent error types.
#[derive(Error, Debug)]
pub enum AgentError {
    // ========================================
    // Configuration Errors
    // ========================================
    /// Failed to load configuration.
    #[error("Failed to load configuration from '{path}': {reason}")]
    ConfigLoad {
        /// Config file path
        path: String,
        /// Why loading failed
        reason: String,
    },

    /// Configuration value is invalid.
    #[error("Invalid configuration for '{field}': {reason}")]
    ConfigInvalid {
        /// Field name
        field: String,
        /// What's wrong
        reason: String,
    },

    // ========================================
    // Trust Errors
    // ========================================
    /// Agent has neither an enrollment nor a registration token.
    #[error("Agent is not enrolled and no registration token is configured")]
    NotEnrolled,

    /// Control-plane key offered does not match the pinned one.
    #[error("Control-plane key mismatch: pinned {pinned}, offered {offered}")]
    TrustMismatch {
        /// Fingerprint of the pinned key
        pinned: String,
        /// Fingerprint of the offered key
        offered: String,
    },

    /// Control plane rejected the handshake.
    #[error("Handshake rejected: {message}")]
    HandshakeRejected {
        /// Server-provided error text
        message: String,
    },

    // ========================================
    // Network Errors
    // ========================================
    /// HTTP request to the control plane failed.
    #[error("HTTP request failed: {reason}")]
    Http {
        /// Failure description
        reason: String,
    },

    // ========================================
    // Wrapped Errors
    // ========================================
    /// Error from the core layer.
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl AgentError {
    /// Creates a `ConfigLoad` error.
    pub fn config_load(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigLoad {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Creates a `ConfigInvalid` error.
    pub fn config_invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Creates an `Http` error.
    pub fn http(reason: impl ToString) -> Self {
        Self::Http {
            reason: reason.to_string(),
        }
    }

    /// Returns `true` if the agent cannot continue without operator action.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConfigLoad { .. }
                | Self::ConfigInvalid { .. }
                | Self::NotEnrolled
                | Self::TrustMismatch { .. }
        )
    }

    /// Returns `true` if reconnecting later might succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Http { .. } | Self::HandshakeRejected { .. })
    }
}

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        Self::http(err)
    }
}
