// ============================================
// File: crates/warden-server/src/error.rs
// ============================================
//! # Server Error Types
//!
//! ## Creation Reason
//! One error type for the control plane, usable both inside services and
//! directly as an axum handler error.
//!
//! ## HTTP Mapping
//! ```text
//! BadRequest / Core(UnsignedCommandType) ─► 400
//! Unauthorized                           ─► 401
//! AgentNotFound / AgentNotConnected      ─► 404
//! AdminDisabled / ConnectionLimit        ─► 503
//! everything else                        ─► 500
//! ```
//! Bodies are `{"error": <short text>, "detail": <Display>}`.
//!
//! ## Last Modified
//! v0.1.0 - Initial error definitions

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

use warden_common::{CommonError, NodeId};
use warden_core::CoreError;
use warden_transport::TransportError;

/// Result type for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;

/// Server error types.
#[derive(Error, Debug)]
pub enum ServerError {
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
    #[error("Invalid configuration: {field} - {reason}")]
    ConfigInvalid {
        /// Field name
        field: String,
        /// What's wrong
        reason: String,
    },

    // ========================================
    // Key Store Errors
    // ========================================
    /// Control-plane key could not be loaded, generated or persisted.
    #[error("Key store error: {reason}")]
    KeyStore {
        /// Failure description
        reason: String,
    },

    // ========================================
    // Agent / Session Errors
    // ========================================
    /// No enrolled agent with this node id.
    #[error("Agent not found: {0}")]
    AgentNotFound(NodeId),

    /// Agent has no authorized session right now.
    #[error("Agent {0} has no authorized session")]
    AgentNotConnected(NodeId),

    /// Too many concurrent connections.
    #[error("Connection limit reached: max {limit}")]
    ConnectionLimit {
        /// Configured maximum
        limit: usize,
    },

    // ========================================
    // Admin API Errors
    // ========================================
    /// Missing or wrong admin bearer token.
    #[error("Unauthorized")]
    Unauthorized,

    /// No admin token configured; admin API is off.
    #[error("Admin API disabled")]
    AdminDisabled,

    /// Request body or path is invalid.
    #[error("Bad request: {reason}")]
    BadRequest {
        /// What's wrong
        reason: String,
    },

    // ========================================
    // Lifecycle Errors
    // ========================================
    /// Server failed to start.
    #[error("Server failed to start: {reason}")]
    StartupFailed {
        /// Failure description
        reason: String,
    },

    /// Internal error.
    #[error("Internal error: {message}")]
    Internal {
        /// Failure description
        message: String,
    },

    // ========================================
    // Wrapped Errors
    // ========================================
    /// Error from the common layer.
    #[error(transparent)]
    Common(#[from] CommonError),

    /// Error from the core layer.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Error from the transport layer.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
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

    /// Creates a `KeyStore` error.
    pub fn key_store(reason: impl ToString) -> Self {
        Self::KeyStore {
            reason: reason.to_string(),
        }
    }

    /// Creates a `BadRequest` error.
    pub fn bad_request(reason: impl Into<String>) -> Self {
        Self::BadRequest {
            reason: reason.into(),
        }
    }

    /// Creates a `StartupFailed` error.
    pub fn startup_failed(reason: impl Into<String>) -> Self {
        Self::StartupFailed {
            reason: reason.into(),
        }
    }

    /// Creates an `Internal` error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` for configuration errors.
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(self, Self::ConfigLoad { .. } | Self::ConfigInvalid { .. })
    }

    /// Returns `true` if the server cannot start or keep running.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConfigLoad { .. }
                | Self::ConfigInvalid { .. }
                | Self::KeyStore { .. }
                | Self::StartupFailed { .. }
        )
    }

    /// Returns `true` if the caller may retry later.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionLimit { .. } | Self::AgentNotConnected(_)
        )
    }

    /// HTTP status and short message for this error.
    #[must_use]
    pub const fn status(&self) -> (StatusCode, &'static str) {
        match self {
            Self::BadRequest { .. } => (StatusCode::BAD_REQUEST, "bad request"),
            Self::Core(CoreError::UnsignedCommandType(_)) => {
                (StatusCode::BAD_REQUEST, "not a signed command type")
            }
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
            Self::AgentNotFound(_) => (StatusCode::NOT_FOUND, "agent not found"),
            Self::AgentNotConnected(_) => (StatusCode::NOT_FOUND, "agent not connected"),
            Self::AdminDisabled => (StatusCode::SERVICE_UNAVAILABLE, "admin api disabled"),
            Self::ConnectionLimit { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, "connection limit reached")
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal error"),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = self.status();
        let detail = if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
            message.to_string()
        } else {
            self.to_string()
        };

        let body = json!({
            "error": message,
            "detail": detail,
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ServerError::config_load("/etc/warden/server.toml", "file not found");
        assert!(err.to_string().contains("/etc/warden/server.toml"));
    }

    #[test]
    fn test_error_classification() {
        let config_err = ServerError::config_invalid("network.listen_addr", "port cannot be 0");
        assert!(config_err.is_config_error());
        assert!(config_err.is_fatal());
        assert!(ServerError::key_store("disk full").is_fatal());
        assert!(!ServerError::Unauthorized.is_fatal());
        assert!(ServerError::AgentNotConnected(NodeId::generate()).is_retryable());
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(ServerError::Unauthorized.status().0, StatusCode::UNAUTHORIZED);
        assert_eq!(ServerError::AdminDisabled.status().0, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            ServerError::Core(CoreError::UnsignedCommandType("STATUS".into()))
                .status()
                .0,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServerError::key_store("x").status().0,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_internal_detail_is_not_leaked() {
        let response = ServerError::key_store("/secret/path unreadable").into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
