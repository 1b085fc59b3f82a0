// ============================================
// File: crates/warden-server/src/services/session.rs
// ============================================
//! # Session Registry
//!
//! ## Creation Reason
//! Tracks which connection belongs to which enrolled agent and whether that
//! connection has completed authentication. Command dispatch only ever
//! targets sessions found here with `authorized == true`.
//!
//! ## Session Lifecycle
//! ```text
//! ┌──────────┐  OpenSession(false)  ┌──────────────┐  Authorize  ┌────────────┐
//! │  (none)  │ ───────────────────► │ unauthorized │ ──────────► │ authorized │
//! └──────────┘                      └──────┬───────┘             └─────┬──────┘
//!      │        OpenSession(true)          │                           │
//!      └───────────────────────────────────┼──────────────► ───────────┤
//!                                          ▼  transport closed         ▼
//!                                    ┌──────────┐                ┌──────────┐
//!                                    │ removed  │ ◄───────────── │ removed  │
//!                                    └──────────┘                └──────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Keyed by `ConnectionId`: one connection, at most one session
//! - A reserved slot counts against capacity and guarantees the later
//!   `insert` for that connection; REGISTER reserves before spending a token
//! - The authorized flag only ever goes false → true
//! - Sessions hold the connection handle; removing the session is what
//!   stops command delivery, closing the socket alone is not enough
//!
//! ## Last Modified
//! v0.1.0 - Initial session registry

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::{DashMap, DashSet};
use serde::Serialize;
use tracing::{debug, info};

use warden_common::time::AtomicInstant;
use warden_common::{ConnectionId, NodeId, SessionId, Timestamp};
use warden_core::IdentityPublicKey;
use warden_transport::{Connection, Frame};

use crate::error::{Result, ServerError};

// ============================================
// Session
// ============================================

/// One agent connection as seen by the control plane.
pub struct Session {
    /// Session id sent to the agent.
    pub session_id: SessionId,
    /// Agent node id.
    pub node_id: NodeId,
    /// Agent key.
    pub public_key: IdentityPublicKey,
    /// Creation time.
    pub created_at: Timestamp,
    connection: Arc<dyn Connection>,
    authorized: AtomicBool,
    last_activity: AtomicInstant,
}

impl Session {
    /// Creates a session bound to `connection`.
    #[must_use]
    pub fn new(
        session_id: SessionId,
        node_id: NodeId,
        public_key: IdentityPublicKey,
        connection: Arc<dyn Connection>,
        authorized: bool,
    ) -> Self {
        Self {
            session_id,
            node_id,
            public_key,
            created_at: Timestamp::now(),
            connection,
            authorized: AtomicBool::new(authorized),
            last_activity: AtomicInstant::now(),
        }
    }

    /// Connection this session is bound to.
    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.connection.id()
    }

    /// Marks the session authorized. Returns `false` if it already was.
    pub fn authorize(&self) -> bool {
        self.authorized
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Returns `true` once the agent proved key possession.
    #[must_use]
    pub fn is_authorized(&self) -> bool {
        self.authorized.load(Ordering::Acquire)
    }

    /// Records inbound activity.
    pub fn touch(&self) {
        self.last_activity.touch();
    }

    /// Time since the last inbound frame.
    #[must_use]
    pub fn idle_time(&self) -> Duration {
        self.last_activity.elapsed()
    }

    /// Sends a text frame to the agent.
    ///
    /// # Errors
    /// Returns `Transport` if the connection is closed.
    pub fn send_text(&self, text: String) -> Result<()> {
        self.connection.send(Frame::Text(text))?;
        Ok(())
    }

    /// Closes the underlying connection.
    pub fn close(&self, reason: &str) {
        self.connection.close(reason);
    }

    /// Serializable summary.
    #[must_use]
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            session_id: self.session_id.clone(),
            node_id: self.node_id,
            connection_id: self.connection_id(),
            fingerprint: self.public_key.fingerprint(),
            authorized: self.is_authorized(),
            created_at: self.created_at,
            idle_secs: self.idle_time().as_secs(),
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.session_id)
            .field("node_id", &self.node_id)
            .field("connection", &self.connection_id())
            .field("authorized", &self.is_authorized())
            .finish_non_exhaustive()
    }
}

/// Admin-facing view of a session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    /// Session id.
    pub session_id: SessionId,
    /// Agent node id.
    pub node_id: NodeId,
    /// Connection id.
    pub connection_id: ConnectionId,
    /// Agent key fingerprint.
    pub fingerprint: String,
    /// Authorization flag.
    pub authorized: bool,
    /// Creation time.
    pub created_at: Timestamp,
    /// Seconds since the last inbound frame.
    pub idle_secs: u64,
}

// ============================================
// SessionRegistry
// ============================================

/// All live sessions, keyed by connection.
pub struct SessionRegistry {
    sessions: DashMap<ConnectionId, Arc<Session>>,
    reserved: DashSet<ConnectionId>,
    max_sessions: usize,
}

impl SessionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            reserved: DashSet::new(),
            max_sessions,
        }
    }

    fn occupied(&self) -> usize {
        self.sessions.len() + self.reserved.len()
    }

    /// Holds a slot for `conn_id` so its next `insert` cannot hit the limit.
    ///
    /// # Errors
    /// Returns `ConnectionLimit` if no slot is free.
    pub fn reserve(&self, conn_id: ConnectionId) -> Result<()> {
        if self.reserved.contains(&conn_id) || self.sessions.contains_key(&conn_id) {
            return Ok(());
        }
        if self.occupied() >= self.max_sessions {
            return Err(ServerError::ConnectionLimit {
                limit: self.max_sessions,
            });
        }
        self.reserved.insert(conn_id);
        debug!(conn = %conn_id, "Session slot reserved");
        Ok(())
    }

    /// Gives back an unused reservation.
    pub fn release(&self, conn_id: ConnectionId) {
        if self.reserved.remove(&conn_id).is_some() {
            debug!(conn = %conn_id, "Session slot released");
        }
    }

    /// Registers a session for its connection, consuming its reservation.
    ///
    /// # Errors
    /// Returns `ConnectionLimit` if the registry is full and the connection
    /// holds no reservation.
    pub fn insert(&self, session: Session) -> Result<Arc<Session>> {
        let conn_id = session.connection_id();
        let had_slot = self.reserved.remove(&conn_id).is_some();
        if !had_slot && self.occupied() >= self.max_sessions {
            return Err(ServerError::ConnectionLimit {
                limit: self.max_sessions,
            });
        }

        let session = Arc::new(session);
        self.sessions.insert(conn_id, Arc::clone(&session));

        info!(
            session_id = %session.session_id,
            node_id = %session.node_id,
            conn = %conn_id,
            authorized = session.is_authorized(),
            "Session opened"
        );
        Ok(session)
    }

    /// Session bound to `conn_id`.
    #[must_use]
    pub fn get(&self, conn_id: ConnectionId) -> Option<Arc<Session>> {
        self.sessions.get(&conn_id).map(|r| Arc::clone(r.value()))
    }

    /// Removes the session bound to `conn_id`.
    pub fn remove(&self, conn_id: ConnectionId) -> Option<Arc<Session>> {
        self.release(conn_id);
        let (_, session) = self.sessions.remove(&conn_id)?;
        info!(
            session_id = %session.session_id,
            node_id = %session.node_id,
            conn = %conn_id,
            "Session removed"
        );
        Some(session)
    }

    /// Authorized sessions of `node_id`.
    #[must_use]
    pub fn by_node(&self, node_id: NodeId) -> Vec<Arc<Session>> {
        self.sessions
            .iter()
            .filter(|r| r.node_id == node_id && r.is_authorized())
            .map(|r| Arc::clone(r.value()))
            .collect()
    }

    /// Every session of `node_id`, authorized or not.
    #[must_use]
    pub fn all_for_node(&self, node_id: NodeId) -> Vec<Arc<Session>> {
        self.sessions
            .iter()
            .filter(|r| r.node_id == node_id)
            .map(|r| Arc::clone(r.value()))
            .collect()
    }

    /// Every authorized session.
    #[must_use]
    pub fn authorized_snapshot(&self) -> Vec<Arc<Session>> {
        self.sessions
            .iter()
            .filter(|r| r.is_authorized())
            .map(|r| Arc::clone(r.value()))
            .collect()
    }

    /// Summaries of every session.
    #[must_use]
    pub fn snapshot(&self) -> Vec<SessionInfo> {
        self.sessions.iter().map(|r| r.info()).collect()
    }

    /// Number of sessions.
    #[must_use]
    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Number of authorized sessions.
    #[must_use]
    pub fn authorized_count(&self) -> usize {
        self.sessions.iter().filter(|r| r.is_authorized()).count()
    }

    /// Configured capacity.
    #[must_use]
    pub const fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    /// Returns `true` if no further session fits.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.occupied() >= self.max_sessions
    }

    /// Closes and removes every session.
    pub fn close_all(&self, reason: &str) {
        let all: Vec<_> = self.sessions.iter().map(|r| *r.key()).collect();
        for conn_id in all {
            if let Some((_, session)) = self.sessions.remove(&conn_id) {
                session.close(reason);
            }
        }
        debug!(reason, "All sessions closed");
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("count", &self.sessions.len())
            .field("reserved", &self.reserved.len())
            .field("max_sessions", &self.max_sessions)
            .finish()
    }
}

// ============================================
// Tests
// ============================================
