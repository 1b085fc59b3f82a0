// ============================================
// File: crates/warden-core/src/handshake.rs
// ============================================
//! # Handshake State Machine
//!
//! ## Creation Reason
//! The control plane must decide, per connection, whether an agent is who
//! it claims to be. Keeping that decision a pure function of
//! `(state, event)` makes every transition testable without sockets,
//! registries or clocks.
//!
//! ## Main Logical Flow
//! ```text
//!                    CONNECT{pubKey}
//!  Unauthenticated ─────────────────► Identifying
//!     ▲   │                              │ IdentityResolved
//!     │   │ REGISTER{token,pubKey}       ├── unknown ──► Unauthenticated (+ERROR)
//!     │   ▼                              ▼
//!     │ Enrolling                     Challenged ── Timeout ──► Rejected
//!     │   │ EnrollmentResolved           │ RESPONSE{sig}
//!     └───┤── rejected (+ERROR)          ├── invalid ──► Rejected (+ERROR, close)
//!         ▼                              ▼
//!     Authorized ◄───────────────────  Authorized
//!   (+REGISTERED)                     (+AUTHORIZED)
//! ```
//!
//! ## Design
//! The machine never performs I/O. It returns [`HandshakeEffect`]s that the
//! caller executes; answers to look-ups come back as events
//! (`IdentityResolved`, `EnrollmentResolved`). Messages that are not valid
//! for the current state produce no effects and no state change.
//!
//! ## ⚠️ Important Note for Next Developer
//! - Once `Rejected`, every further event is ignored (no retry on the same
//!   connection)
//! - REGISTER is only accepted in `Unauthenticated`
//! - Unknown key, bad token and already-enrolled key all answer the same
//!   generic error text
//!
//! ## Last Modified
//! v0.1.0 - Initial state machine

use std::fmt;

use warden_common::{NodeId, SessionId};

use crate::crypto::IdentityPublicKey;
use crate::protocol::messages::{
    AgentMessage, ServerMessage, AUTH_FAILED_MESSAGE, INVALID_SIGNATURE_MESSAGE,
};

// ============================================
// State
// ============================================

/// How an agent reached `Authorized`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPath {
    /// CONNECT → CHALLENGE → RESPONSE.
    Challenge,
    /// REGISTER with a valid token.
    Registration,
}

/// Per-connection handshake state.
#[derive(Debug, Clone, PartialEq)]
pub enum HandshakeState {
    /// Nothing proven yet.
    Unauthenticated,
    /// Waiting for the directory to resolve the claimed key.
    Identifying {
        /// Claimed agent key.
        public_key: IdentityPublicKey,
    },
    /// Challenge sent, waiting for RESPONSE.
    Challenged {
        /// Enrolled agent key.
        public_key: IdentityPublicKey,
        /// Node the key belongs to.
        node_id: NodeId,
        /// Session opened (unauthorized) for this connection.
        session_id: SessionId,
        /// Nonce the agent must sign.
        nonce: String,
    },
    /// Waiting for the directory to redeem a registration token.
    Enrolling {
        /// Key being enrolled.
        public_key: IdentityPublicKey,
    },
    /// Trusted for the lifetime of the connection.
    Authorized {
        /// Agent key.
        public_key: IdentityPublicKey,
        /// Agent node id.
        node_id: NodeId,
        /// Session id.
        session_id: SessionId,
        /// Which path led here.
        path: AuthPath,
    },
    /// Terminal failure; connection is being closed.
    Rejected,
    /// Transport went away.
    Closed,
}

impl HandshakeState {
    /// Short state name for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Identifying { .. } => "identifying",
            Self::Challenged { .. } => "challenged",
            Self::Enrolling { .. } => "enrolling",
            Self::Authorized { .. } => "authorized",
            Self::Rejected => "rejected",
            Self::Closed => "closed",
        }
    }

    /// Returns `true` once the agent has authenticated.
    #[must_use]
    pub const fn is_authorized(&self) -> bool {
        matches!(self, Self::Authorized { .. })
    }

    /// Returns `true` for states that accept no further input.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected | Self::Closed)
    }
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================
// Events
// ============================================

/// Result of redeeming a registration token.
#[derive(Debug, Clone, PartialEq)]
pub struct Enrollment {
    /// Newly assigned node id.
    pub node_id: NodeId,
    /// Session id for this connection.
    pub session_id: SessionId,
    /// Current control-plane public key, base64.
    pub cp_public_key: String,
}

/// Which deadline fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    /// No RESPONSE within the handshake timeout after CHALLENGE.
    Challenge,
    /// Connection never authorized within the authentication deadline.
    Authentication,
}

/// Inputs to the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum HandshakeEvent {
    /// Decoded frame from the agent.
    Message(AgentMessage),
    /// Directory answer to `LookupIdentity`.
    IdentityResolved {
        /// Node id if the key is enrolled.
        node_id: Option<NodeId>,
        /// Session id to use if a session is opened.
        session_id: SessionId,
        /// Fresh challenge nonce.
        nonce: String,
    },
    /// Directory answer to `Enroll`.
    EnrollmentResolved(Option<Enrollment>),
    /// A deadline fired.
    Timeout(TimeoutKind),
    /// The transport closed.
    TransportClosed,
}

// ============================================
// Effects
// ============================================

/// Work the caller must perform after a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum HandshakeEffect {
    /// Send a frame to the agent.
    Send(ServerMessage),
    /// Resolve `public_key` in the agent directory.
    LookupIdentity {
        /// Key to look up.
        public_key: IdentityPublicKey,
    },
    /// Redeem `token` for `public_key` atomically.
    Enroll {
        /// Registration token.
        token: String,
        /// Key to enroll.
        public_key: IdentityPublicKey,
    },
    /// Register an unauthorized session for this connection.
    OpenSession {
        /// Session id.
        session_id: SessionId,
        /// Node id.
        node_id: NodeId,
        /// Agent key.
        public_key: IdentityPublicKey,
        /// `true` on the registration path.
        authorized: bool,
    },
    /// Flip the session's authorized flag and announce the agent online.
    Authorize,
    /// Record an authentication failure.
    Audit {
        /// Claimed node id, when known.
        node_id: Option<NodeId>,
        /// Short reason code.
        reason: &'static str,
    },
    /// Close the connection.
    Close {
        /// Reason for logs / close frame.
        reason: &'static str,
    },
    /// Remove this connection's session from the registry.
    DropSession,
    /// Hand an authorized agent's message to the application.
    Forward(AgentMessage),
}

// ============================================
// Transition Function
// ============================================

fn auth_failed() -> HandshakeEffect {
    HandshakeEffect::Send(ServerMessage::error(AUTH_FAILED_MESSAGE))
}

/// Computes the next state and effects. Pure.
#[must_use]
pub fn transition(
    state: HandshakeState,
    event: HandshakeEvent,
) -> (HandshakeState, Vec<HandshakeEffect>) {
    use HandshakeEffect as Fx;
    use HandshakeEvent as Ev;
    use HandshakeState as St;

    match (state, event) {
        // Transport closure always wins, from any state.
        (_, Ev::TransportClosed) => (St::Closed, vec![Fx::DropSession]),

        (state, _) if state.is_terminal() => (state, Vec::new()),

        // ---- CONNECT path ----
        (St::Unauthenticated, Ev::Message(AgentMessage::Connect { pub_key })) => {
            match IdentityPublicKey::from_base64(&pub_key) {
                Ok(public_key) => (
                    St::Identifying { public_key },
                    vec![Fx::LookupIdentity { public_key }],
                ),
                Err(_) => (
                    St::Unauthenticated,
                    vec![
                        Fx::Audit { node_id: None, reason: "malformed_key" },
                        auth_failed(),
                    ],
                ),
            }
        }

        (St::Identifying { .. }, Ev::IdentityResolved { node_id: None, .. }) => (
            St::Unauthenticated,
            vec![Fx::Audit { node_id: None, reason: "unknown_key" }, auth_failed()],
        ),

        (
            St::Identifying { public_key },
            Ev::IdentityResolved {
                node_id: Some(node_id),
                session_id,
                nonce,
            },
        ) => (
            St::Challenged {
                public_key,
                node_id,
                session_id: session_id.clone(),
                nonce: nonce.clone(),
            },
            vec![
                Fx::OpenSession {
                    session_id,
                    node_id,
                    public_key,
                    authorized: false,
                },
                Fx::Send(ServerMessage::Challenge { nonce }),
            ],
        ),

        (
            St::Challenged {
                public_key,
                node_id,
                session_id,
                nonce,
            },
            Ev::Message(AgentMessage::Response { signature }),
        ) => {
            if public_key.verify_base64(nonce.as_bytes(), &signature) {
                (
                    St::Authorized {
                        public_key,
                        node_id,
                        session_id: session_id.clone(),
                        path: AuthPath::Challenge,
                    },
                    vec![
                        Fx::Authorize,
                        Fx::Send(ServerMessage::Authorized { session_id }),
                    ],
                )
            } else {
                (
                    St::Rejected,
                    vec![
                        Fx::Send(ServerMessage::error(INVALID_SIGNATURE_MESSAGE)),
                        Fx::Audit {
                            node_id: Some(node_id),
                            reason: "invalid_signature",
                        },
                        Fx::Close { reason: "invalid signature" },
                    ],
                )
            }
        }

        (St::Challenged { node_id, .. }, Ev::Timeout(TimeoutKind::Challenge)) => (
            St::Rejected,
            vec![
                Fx::Audit {
                    node_id: Some(node_id),
                    reason: "handshake_timeout",
                },
                Fx::Close { reason: "handshake timeout" },
            ],
        ),

        // ---- REGISTER path ----
        (St::Unauthenticated, Ev::Message(AgentMessage::Register { token, pub_key })) => {
            match IdentityPublicKey::from_base64(&pub_key) {
                Ok(public_key) => (
                    St::Enrolling { public_key },
                    vec![Fx::Enroll { token, public_key }],
                ),
                Err(_) => (
                    St::Unauthenticated,
                    vec![
                        Fx::Audit { node_id: None, reason: "malformed_key" },
                        auth_failed(),
                    ],
                ),
            }
        }

        (St::Enrolling { .. }, Ev::EnrollmentResolved(None)) => (
            St::Unauthenticated,
            vec![
                Fx::Audit { node_id: None, reason: "registration_rejected" },
                auth_failed(),
            ],
        ),

        (St::Enrolling { public_key }, Ev::EnrollmentResolved(Some(enrollment))) => {
            let Enrollment {
                node_id,
                session_id,
                cp_public_key,
            } = enrollment;
            (
                St::Authorized {
                    public_key,
                    node_id,
                    session_id: session_id.clone(),
                    path: AuthPath::Registration,
                },
                vec![
                    Fx::OpenSession {
                        session_id,
                        node_id,
                        public_key,
                        authorized: true,
                    },
                    Fx::Send(ServerMessage::Registered {
                        server_id: node_id,
                        cp_public_key,
                    }),
                ],
            )
        }

        // ---- Authentication deadline ----
        // Deadlines are meaningless once trusted.
        (state @ St::Authorized { .. }, Ev::Timeout(_)) => (state, Vec::new()),

        (St::Challenged { node_id, .. }, Ev::Timeout(TimeoutKind::Authentication)) => (
            St::Rejected,
            vec![
                Fx::Audit {
                    node_id: Some(node_id),
                    reason: "auth_deadline",
                },
                Fx::Close { reason: "authentication deadline" },
            ],
        ),

        (_, Ev::Timeout(TimeoutKind::Authentication)) => (
            St::Rejected,
            vec![Fx::Close { reason: "authentication deadline" }],
        ),

        // ---- Authorized traffic ----
        (
            state @ St::Authorized { .. },
            Ev::Message(msg @ (AgentMessage::Status { .. } | AgentMessage::SecurityAlert { .. })),
        ) => (state, vec![Fx::Forward(msg)]),

        // Anything else: out-of-order or unexpected, silently ignored.
        (state, _) => (state, Vec::new()),
    }
}

// ============================================
// HandshakeMachine
// ============================================

/// Owns the current state for one connection.
#[derive(Debug)]
pub struct HandshakeMachine {
    state: HandshakeState,
}

impl Default for HandshakeMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl HandshakeMachine {
    /// Creates a machine in `Unauthenticated`.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: HandshakeState::Unauthenticated,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> &HandshakeState {
        &self.state
    }

    /// Applies `event` and returns the effects to execute.
    pub fn handle(&mut self, event: HandshakeEvent) -> Vec<HandshakeEffect> {
        let state = std::mem::replace(&mut self.state, HandshakeState::Unauthenticated);
        let (next, effects) = transition(state, event);
        self.state = next;
        effects
    }
}

// ============================================
// Tests
// ============================================
