// ============================================
// File: crates/warden-transport/src/error.rs
// ============================================
//! # Transport Error Types
//!
//! ## Creation Reason
//! Errors raised while moving frames between the protocol layer and a
//! live socket.
//!
//! ## ⚠️ Important Note for Next Developer
//! - A send on a closed connection is normal during shutdown races;
//!   callers log it at debug and move on
//!
//! ## Last Modified
//! v0.1.0 - Initial error definitions

use thiserror::Error;

use warden_common::ConnectionId;

// ============================================
// Result Type Alias
// ============================================

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

// ============================================
// TransportError
// ============================================

/// Transport layer error types.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The connection has been closed.
    #[error("Connection {0} is closed")]
    Closed(ConnectionId),

    /// Frame could not be queued.
    #[error("Failed to send on {conn}: {reason}")]
    SendFailed {
        /// Connection id
        conn: ConnectionId,
        /// Why send failed
        reason: String,
    },
}

impl TransportError {
    /// Creates a `SendFailed` error.
    pub fn send_failed(conn: ConnectionId, reason: impl Into<String>) -> Self {
        Self::SendFailed {
            conn,
            reason: reason.into(),
        }
    }

    /// Returns `true` if the peer is gone.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::Closed(_))
    }
}
