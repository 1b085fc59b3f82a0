// ============================================
// File: crates/warden-transport/src/channel.rs
// ============================================
//! # Channel-Backed Connection
//!
//! ## Creation Reason
//! A WebSocket sink cannot be shared between tasks, so each socket gets a
//! dedicated writer task fed by an unbounded mpsc channel. The sending half
//! of that channel is the `Connection` everyone else holds.
//!
//! ## Main Logical Flow
//! ```text
//!  dispatcher / handshake ──send()──► mpsc ──► writer task ──► socket
//!                                                 │
//!                              Frame::Close ──────┘ (close frame, stop)
//! ```
//!
//! ## Last Modified
//! v0.1.0 - Initial implementation

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tracing::debug;

use warden_common::ConnectionId;

use crate::error::{Result, TransportError};
use crate::traits::{Connection, Frame};

/// `Connection` backed by an unbounded channel drained by a writer task.
#[derive(Debug)]
pub struct ChannelConnection {
    id: ConnectionId,
    remote_addr: Option<SocketAddr>,
    tx: mpsc::UnboundedSender<Frame>,
    open: AtomicBool,
}

impl ChannelConnection {
    /// Creates a connection handle and the receiver its writer task drains.
    #[must_use]
    pub fn new(remote_addr: Option<SocketAddr>) -> (Self, mpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Self {
            id: ConnectionId::next(),
            remote_addr,
            tx,
            open: AtomicBool::new(true),
        };
        (conn, rx)
    }

    /// Marks the connection closed without queuing a close frame.
    ///
    /// Used when the peer went away first.
    pub fn mark_closed(&self) {
        self.open.store(false, Ordering::Release);
    }
}

impl Connection for ChannelConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    fn send(&self, frame: Frame) -> Result<()> {
        if !self.is_open() {
            return Err(TransportError::Closed(self.id));
        }
        self.tx
            .send(frame)
            .map_err(|_| TransportError::send_failed(self.id, "writer task stopped"))
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.tx.is_closed()
    }

    fn close(&self, reason: &str) {
        if self.open.swap(false, Ordering::AcqRel) {
            debug!(conn = %self.id, reason, "Closing connection");
            // Writer may already be gone; nothing left to do then.
            let _ = self.tx.send(Frame::Close {
                reason: reason.to_string(),
            });
        }
    }
}
