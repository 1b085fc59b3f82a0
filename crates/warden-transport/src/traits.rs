// ============================================
// File: crates/warden-transport/src/traits.rs
// ============================================
//! # Transport Traits
//!
//! ## Creation Reason
//! The session registry stores a handle per connection and the command
//! dispatcher pushes frames through it. Hiding the socket behind a trait
//! lets the whole handshake and dispatch path run against an in-memory
//! mock in tests.
//!
//! ## Main Functionality
//! - `Frame`: What can be pushed to a peer (text or close)
//! - `Connection`: Non-blocking, at-most-once send handle
//!
//! ## ⚠️ Important Note for Next Developer
//! - `send` must never block or await: it is called while iterating
//!   registry snapshots and from inside the per-connection task
//! - Implementations must be `Send + Sync` (shared via `Arc<dyn Connection>`)
//!
//! ## Last Modified
//! v0.1.0 - Initial trait definitions

use std::fmt;
use std::net::SocketAddr;

use warden_common::ConnectionId;

use crate::error::Result;

// ============================================
// Frame
// ============================================

/// A unit of outbound traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// JSON text frame.
    Text(String),
    /// Close the connection with a reason.
    Close {
        /// Human readable reason.
        reason: String,
    },
}

impl Frame {
    /// Returns the text payload, if any.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Close { .. } => None,
        }
    }
}

// ============================================
// Connection Trait
// ============================================

/// Handle to one live peer connection.
///
/// # Example
/// ```
/// use warden_transport::{Connection, MockConnection};
///
/// let conn = MockConnection::new();
/// conn.send_text(r#"{"type":"CHALLENGE","nonce":"ab"}"#.to_string()).unwrap();
/// conn.close("done");
/// assert!(!conn.is_open());
/// assert_eq!(conn.frames().len(), 2);
/// ```
pub trait Connection: Send + Sync + fmt::Debug {
    /// Process-local connection id.
    fn id(&self) -> ConnectionId;

    /// Remote address, when known.
    fn remote_addr(&self) -> Option<SocketAddr> {
        None
    }

    /// Queues a frame for delivery. Never blocks.
    ///
    /// # Errors
    /// Returns `Closed` if the connection is gone.
    fn send(&self, frame: Frame) -> Result<()>;

    /// Returns `true` until the connection is closed.
    fn is_open(&self) -> bool;

    /// Queues a text frame.
    ///
    /// # Errors
    /// Same as [`Connection::send`].
    fn send_text(&self, text: String) -> Result<()> {
        self.send(Frame::Text(text))
    }

    /// Requests closure. Idempotent; later sends fail with `Closed`.
    fn close(&self, reason: &str);
}
