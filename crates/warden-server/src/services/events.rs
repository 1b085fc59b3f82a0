// ============================================
// File: crates/warden-server/src/services/events.rs
// ============================================
//! # Agent Event Bus
//!
//! Fan-out of agent lifecycle and security events to observers (the
//! `/ws/observer` endpoint). Publishing never blocks; slow observers lag
//! and lose events rather than holding up the handshake path.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use warden_common::{NodeId, Timestamp};

/// Buffered events per observer before it starts lagging.
pub const EVENT_BUFFER: usize = 256;

/// Something observers may care about.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum AgentEvent {
    /// Agent authenticated.
    #[serde(rename_all = "camelCase")]
    AgentOnline {
        /// Agent.
        node_id: NodeId,
        /// When.
        at: Timestamp,
    },
    /// Authorized agent disconnected.
    #[serde(rename_all = "camelCase")]
    AgentOffline {
        /// Agent.
        node_id: NodeId,
        /// When.
        at: Timestamp,
    },
    /// New agent enrolled through a registration token.
    #[serde(rename_all = "camelCase")]
    AgentEnrolled {
        /// Agent.
        node_id: NodeId,
        /// Agent key fingerprint.
        fingerprint: String,
    },
    /// Agent rejected a command.
    #[serde(rename_all = "camelCase")]
    SecurityAlert {
        /// Reporting agent.
        node_id: NodeId,
        /// Rejected command type.
        command_type: String,
        /// Agent-side reason code.
        reason: String,
    },
    /// Agent status report.
    #[serde(rename_all = "camelCase")]
    AgentStatus {
        /// Reporting agent.
        node_id: NodeId,
        /// Report body.
        payload: serde_json::Value,
    },
    /// Failed authentication attempt.
    #[serde(rename_all = "camelCase")]
    AuthFailure {
        /// Claimed node id, when known.
        node_id: Option<NodeId>,
        /// Reason code.
        reason: String,
    },
    /// Control-plane key rotated.
    #[serde(rename_all = "camelCase")]
    KeyRotated {
        /// New key fingerprint.
        fingerprint: String,
        /// Sessions that were sent the announcement.
        notified: usize,
    },
}

/// Broadcast channel wrapper.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AgentEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EVENT_BUFFER)
    }
}

impl EventBus {
    /// Creates a bus with `capacity` buffered events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publishes `event`. Returns the number of observers reached.
    pub fn publish(&self, event: AgentEvent) -> usize {
        trace!(?event, "Event published");
        // No subscribers is not an error.
        self.tx.send(event).unwrap_or(0)
    }

    /// New subscription.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.tx.subscribe()
    }

    /// Current observer count.
    #[must_use]
    pub fn observers(&self) -> usize {
        self.tx.receiver_count()
    }
}
