// ============================================
// File: crates/warden-transport/src/mock.rs
// ============================================
//! # Mock Connection
//!
//! ## Creation Reason
//! Lets handshake, registry and dispatch tests observe exactly which frames
//! would have been written to the socket, with no network involved.
//!
//! ## Main Functionality
//! - Captures every frame in order
//! - `take_frames()` / `texts()` for assertions
//! - `set_fail_sends(true)` to simulate a broken writer
//!
//! ## ⚠️ Important Note for Next Developer
//! - Test support only; exported so downstream crates' tests can use it
//!
//! ## Last Modified
//! v0.1.0 - Initial mock implementation

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use warden_common::ConnectionId;

use crate::error::{Result, TransportError};
use crate::traits::{Connection, Frame};

/// In-memory `Connection` that records frames.
#[derive(Debug)]
pub struct MockConnection {
    id: ConnectionId,
    frames: Mutex<Vec<Frame>>,
    open: AtomicBool,
    fail_sends: AtomicBool,
}

impl Default for MockConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl MockConnection {
    /// Creates an open mock connection.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: ConnectionId::next(),
            frames: Mutex::new(Vec::new()),
            open: AtomicBool::new(true),
            fail_sends: AtomicBool::new(false),
        }
    }

    /// Snapshot of all frames sent so far.
    #[must_use]
    pub fn frames(&self) -> Vec<Frame> {
        self.frames.lock().clone()
    }

    /// Drains and returns captured frames.
    pub fn take_frames(&self) -> Vec<Frame> {
        std::mem::take(&mut *self.frames.lock())
    }

    /// Text payloads sent so far, in order.
    #[must_use]
    pub fn texts(&self) -> Vec<String> {
        self.frames
            .lock()
            .iter()
            .filter_map(|f| f.as_text().map(str::to_string))
            .collect()
    }

    /// Most recent text payload.
    #[must_use]
    pub fn last_text(&self) -> Option<String> {
        self.texts().pop()
    }

    /// Makes subsequent sends fail as if the writer had died.
    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::Relaxed);
    }
}

impl Connection for MockConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn send(&self, frame: Frame) -> Result<()> {
        if !self.is_open() {
            return Err(TransportError::Closed(self.id));
        }
        if self.fail_sends.load(Ordering::Relaxed) {
            return Err(TransportError::send_failed(self.id, "mock send failure"));
        }
        self.frames.lock().push(frame);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn close(&self, reason: &str) {
        if self.open.swap(false, Ordering::AcqRel) {
            self.frames.lock().push(Frame::Close {
                reason: reason.to_string(),
            });
        }
    }
}
