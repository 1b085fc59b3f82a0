// ============================================
// File: crates/warden-agent/src/session.rs
// ============================================
//! # Agent Protocol Session
//!
//! ## Creation Reason
//! Drives the agent side of one control-plane connection. The session is
//! transport agnostic: the caller feeds it every text frame it receives
//! and performs the [`AgentAction`]s it returns, in order.
//!
//! ## Main Functionality
//! - `start()`: first frame (CONNECT if enrolled, REGISTER with a token
//!   otherwise)
//! - `handle_frame()`: handshake replies, then the command gate
//!
//! ## Phase Flow
//! ```text
//!        start()
//!   ┌──────┴───────────────┐
//!   │ node id known        │ token configured
//!   ▼                      ▼
//! AwaitingChallenge    AwaitingRegistration
//!   │ CHALLENGE            │ REGISTERED (key pinned / matched)
//!   ▼                      │
//! AwaitingAuthorization    │
//!   │ AUTHORIZED           │
//!   ▼                      ▼
//!   └──────► Authorized ◄──┘ ── signed commands ──► ReplayGuard
//!
//!   ERROR during any handshake phase ──► Failed + Close
//! ```
//!
//! ## Command Gate
//! Every non-allowlisted frame is a signed command. Anything that fails the
//! guard is logged with its type, answered with `SECURITY_ALERT` and
//! dropped; the connection stays up.
//!
//! ## ⚠️ Important Note for Next Developer
//! - `CP_KEY_ROTATION` and `REGENERATE_IDENTITY` are handled here, not by
//!   the caller; the caller only sees their outcome
//! - Commands arriving before `Authorized` are ignored without an alert
//!
//! ## Last Modified
//! v0.1.0 - Initial agent session

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, info, warn};

use warden_common::{NodeId, SessionId};
use warden_core::{
    AgentMessage, CommandType, CoreError, IdentityPublicKey, JsonCodec, ServerFrame,
    ServerMessage, SignedCommand,
};

use crate::error::{AgentError, Result};
use crate::guard::ReplayGuard;
use crate::identity::AgentIdentity;
use crate::trust::TrustStore;

// ============================================
// AgentPhase
// ============================================

/// Where the agent is in the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentPhase {
    /// `start()` not called yet.
    Idle,
    /// CONNECT sent.
    AwaitingChallenge,
    /// RESPONSE sent.
    AwaitingAuthorization,
    /// REGISTER sent.
    AwaitingRegistration,
    /// Handshake complete.
    Authorized {
        /// Session id from AUTHORIZED; `None` on the registration path.
        session_id: Option<SessionId>,
    },
    /// Handshake failed; the connection should be closed.
    Failed,
}

impl AgentPhase {
    /// Returns `true` once commands are accepted.
    #[must_use]
    pub const fn is_authorized(&self) -> bool {
        matches!(self, Self::Authorized { .. })
    }
}

impl fmt::Display for AgentPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::AwaitingChallenge => "awaiting_challenge",
            Self::AwaitingAuthorization => "awaiting_authorization",
            Self::AwaitingRegistration => "awaiting_registration",
            Self::Authorized { .. } => "authorized",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

// ============================================
// AgentAction
// ============================================

/// Something the caller must do in response to a frame.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentAction {
    /// Send this message to the control plane.
    Send(AgentMessage),
    /// Handshake completed via CHALLENGE/RESPONSE.
    Authorized(SessionId),
    /// Enrollment completed; the agent now has a node id.
    Registered(NodeId),
    /// Run a verified privileged command.
    Execute {
        /// Verified command type.
        command_type: CommandType,
        /// Command body.
        payload: Value,
    },
    /// The pinned control-plane key was replaced.
    TrustUpdated {
        /// Fingerprint of the new key.
        fingerprint: String,
    },
    /// The agent identity was regenerated; re-enrollment is required.
    IdentityRegenerated {
        /// New agent public key, base64.
        public_key: String,
    },
    /// Unsigned STATUS push from the control plane.
    Status(Value),
    /// Handshake failed with this reason.
    Failed(String),
    /// Close the connection.
    Close,
}

// ============================================
// AgentSession
// ============================================

/// Agent side of one control-plane connection.
pub struct AgentSession {
    identity: AgentIdentity,
    trust: Arc<TrustStore>,
    guard: Arc<ReplayGuard>,
    codec: JsonCodec,
    registration_token: Option<String>,
    phase: AgentPhase,
}

impl AgentSession {
    /// Creates a session.
    ///
    /// The guard is shared so nonces survive reconnects.
    #[must_use]
    pub fn new(
        identity: AgentIdentity,
        trust: Arc<TrustStore>,
        guard: Arc<ReplayGuard>,
        registration_token: Option<String>,
    ) -> Self {
        Self {
            identity,
            trust,
            guard,
            codec: JsonCodec::default(),
            registration_token,
            phase: AgentPhase::Idle,
        }
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> &AgentPhase {
        &self.phase
    }

    /// Agent identity.
    #[must_use]
    pub const fn identity(&self) -> &AgentIdentity {
        &self.identity
    }

    /// Consumes the session, returning the identity for the next connection.
    #[must_use]
    pub fn into_identity(self) -> AgentIdentity {
        self.identity
    }

    /// Returns the first frame to send.
    ///
    /// # Errors
    /// Returns `NotEnrolled` if there is neither a node id nor a token.
    pub fn start(&mut self) -> Result<AgentMessage> {
        let pub_key = self.identity.public_key().to_base64();

        if self.trust.node_id().is_some() {
            self.phase = AgentPhase::AwaitingChallenge;
            debug!("Sending CONNECT");
            return Ok(AgentMessage::Connect { pub_key });
        }

        match &self.registration_token {
            Some(token) => {
                self.phase = AgentPhase::AwaitingRegistration;
                debug!("Sending REGISTER");
                Ok(AgentMessage::Register {
                    token: token.clone(),
                    pub_key,
                })
            }
            None => Err(AgentError::NotEnrolled),
        }
    }

    /// Encodes an outbound message as a text frame.
    ///
    /// # Errors
    /// Returns `Core` if serialization fails.
    pub fn encode(&self, message: &AgentMessage) -> Result<String> {
        Ok(self.codec.encode(message)?)
    }

    /// Processes one inbound text frame.
    pub async fn handle_frame(&mut self, text: &str) -> Vec<AgentAction> {
        match self.codec.decode_server(text) {
            Ok(ServerFrame::Control(message)) => self.handle_control(message).await,
            Ok(ServerFrame::Command(command)) => self.handle_command(command).await,
            Err(e) => {
                debug!(error = %e, "Dropping malformed control-plane frame");
                Vec::new()
            }
        }
    }

    // ========================================
    // Handshake
    // ========================================

    async fn handle_control(&mut self, message: ServerMessage) -> Vec<AgentAction> {
        match (self.phase.clone(), message) {
            (AgentPhase::AwaitingChallenge, ServerMessage::Challenge { nonce }) => {
                self.phase = AgentPhase::AwaitingAuthorization;
                vec![AgentAction::Send(AgentMessage::Response {
                    signature: self.identity.sign_challenge(&nonce),
                })]
            }

            (AgentPhase::AwaitingAuthorization, ServerMessage::Authorized { session_id }) => {
                info!(session_id = %session_id, "Authorized by control plane");
                self.phase = AgentPhase::Authorized {
                    session_id: Some(session_id.clone()),
                };
                vec![AgentAction::Authorized(session_id)]
            }

            (
                AgentPhase::AwaitingRegistration,
                ServerMessage::Registered {
                    server_id,
                    cp_public_key,
                },
            ) => self.complete_registration(server_id, &cp_public_key).await,

            (phase, ServerMessage::Error { message }) if !phase.is_authorized() => {
                warn!(phase = %phase, message = %message, "Handshake rejected");
                self.phase = AgentPhase::Failed;
                vec![AgentAction::Failed(message), AgentAction::Close]
            }

            (_, ServerMessage::Status { payload }) => vec![AgentAction::Status(payload)],

            (phase, message) => {
                debug!(phase = %phase, frame = message.type_name(), "Ignoring unexpected frame");
                Vec::new()
            }
        }
    }

    async fn complete_registration(
        &mut self,
        node_id: NodeId,
        cp_public_key: &str,
    ) -> Vec<AgentAction> {
        let outcome = match IdentityPublicKey::from_base64(cp_public_key) {
            Ok(key) => self.trust.accept_registration(node_id, key).await,
            Err(e) => Err(e.into()),
        };

        match outcome {
            Ok(()) => {
                info!(node_id = %node_id, "Registered with control plane");
                self.registration_token = None;
                self.phase = AgentPhase::Authorized { session_id: None };
                vec![AgentAction::Registered(node_id)]
            }
            Err(e) => {
                error!(error = %e, "Refusing registration result");
                self.phase = AgentPhase::Failed;
                vec![AgentAction::Failed(e.to_string()), AgentAction::Close]
            }
        }
    }

    // ========================================
    // Command Gate
    // ========================================

    async fn handle_command(&mut self, command: SignedCommand) -> Vec<AgentAction> {
        if !self.phase.is_authorized() {
            warn!(phase = %self.phase, nonce = %command.nonce, "Command before authorization");
            return vec![Self::security_alert(
                &command.command_type,
                &CoreError::PrematureCommand,
            )];
        }

        let trusted = self.trust.trusted_key();
        match self.guard.check(&command, trusted.as_ref()) {
            Ok(CommandType::CpKeyRotation) => self.apply_rotation(&command).await,
            Ok(CommandType::RegenerateIdentity) => self.apply_regeneration().await,
            Ok(command_type) => {
                info!(command_type = %command_type, nonce = %command.nonce, "Command verified");
                vec![AgentAction::Execute {
                    command_type,
                    payload: command.payload,
                }]
            }
            Err(e) => vec![Self::security_alert(&command.command_type, &e)],
        }
    }

    fn security_alert(command_type: &str, err: &CoreError) -> AgentAction {
        warn!(
            command_type = %command_type,
            reason = err.reason_code(),
            error = %err,
            "Rejected control-plane command"
        );
        AgentAction::Send(AgentMessage::SecurityAlert {
            command_type: command_type.to_string(),
            reason: err.reason_code().to_string(),
        })
    }

    async fn apply_rotation(&mut self, command: &SignedCommand) -> Vec<AgentAction> {
        let new_key = command
            .payload
            .get("newPublicKey")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::malformed("missing 'newPublicKey'"))
            .and_then(IdentityPublicKey::from_base64);

        let new_key = match new_key {
            Ok(key) => key,
            Err(e) => return vec![Self::security_alert(&command.command_type, &e)],
        };

        match self.trust.rotate(new_key).await {
            Ok(()) => vec![AgentAction::TrustUpdated {
                fingerprint: new_key.fingerprint(),
            }],
            Err(e) => {
                error!(error = %e, "Failed to persist rotated control-plane key");
                vec![AgentAction::Failed(e.to_string())]
            }
        }
    }

    async fn apply_regeneration(&mut self) -> Vec<AgentAction> {
        let regenerated = match self.identity.regenerate().await {
            Ok(key) => key,
            Err(e) => {
                error!(error = %e, "Identity regeneration failed");
                return vec![AgentAction::Failed(e.to_string())];
            }
        };

        if let Err(e) = self.trust.forget_enrollment().await {
            error!(error = %e, "Failed to clear enrollment after regeneration");
        }
        self.phase = AgentPhase::Idle;

        vec![
            AgentAction::IdentityRegenerated {
                public_key: regenerated.to_base64(),
            },
            AgentAction::Close,
        ]
    }
}

impl fmt::Debug for AgentSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentSession")
            .field("identity", &self.identity)
            .field("phase", &self.phase)
            .field("has_token", &self.registration_token.is_some())
            .finish_non_exhaustive()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;
    use warden_common::Timestamp;
    use warden_core::IdentityKeyPair;

    struct Fixture {
        _dir: TempDir,
        session: AgentSession,
        trust: Arc<TrustStore>,
        cp: IdentityKeyPair,
    }

    async fn fixture(enrolled: bool, token: Option<&str>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let identity = AgentIdentity::load_or_generate(dir.path().join("agent.json"))
            .await
            .unwrap();
        let trust = Arc::new(TrustStore::open(dir.path().join("trust.json")).await.unwrap());
        let cp = IdentityKeyPair::generate();
        if enrolled {
            trust
                .accept_registration(NodeId::generate(), cp.public_key())
                .await
                .unwrap();
        }
        let session = AgentSession::new(
            identity,
            trust.clone(),
            Arc::new(ReplayGuard::default()),
            token.map(str::to_string),
        );
        Fixture {
            _dir: dir,
            session,
            trust,
            cp,
        }
    }

    fn frame(value: &serde_json::Value) -> String {
        value.to_string()
    }

    async fn authorize(fx: &mut Fixture) {
        fx.session.start().unwrap();
        fx.session
            .handle_frame(&frame(&json!({"type": "CHALLENGE", "nonce": "ab12"})))
            .await;
        let session_id = SessionId::generate();
        let actions = fx
            .session
            .handle_frame(&frame(
                &json!({"type": "AUTHORIZED", "sessionId": session_id.to_string()}),
            ))
            .await;
        assert_eq!(actions, vec![AgentAction::Authorized(session_id)]);
    }

    #[tokio::test]
    async fn test_start_requires_enrollment_or_token() {
        let mut fx = fixture(false, None).await;
        assert!(matches!(fx.session.start(), Err(AgentError::NotEnrolled)));

        let mut fx = fixture(false, Some("tok")).await;
        assert!(matches!(
            fx.session.start().unwrap(),
            AgentMessage::Register { ref token, .. } if token == "tok"
        ));

        let mut fx = fixture(true, Some("tok")).await;
        assert!(matches!(fx.session.start().unwrap(), AgentMessage::Connect { .. }));
    }

    #[tokio::test]
    async fn test_challenge_is_signed_with_agent_key() {
        let mut fx = fixture(true, None).await;
        fx.session.start().unwrap();

        let actions = fx
            .session
            .handle_frame(&frame(&json!({"type": "CHALLENGE", "nonce": "cafebabe"})))
            .await;

        let [AgentAction::Send(AgentMessage::Response { signature })] = actions.as_slice() else {
            panic!("expected RESPONSE, got {actions:?}");
        };
        assert!(fx
            .session
            .identity()
            .public_key()
            .verify_base64(b"cafebabe", signature));
        assert_eq!(fx.session.phase(), &AgentPhase::AwaitingAuthorization);
    }

    #[tokio::test]
    async fn test_registration_pins_key() {
        let mut fx = fixture(false, Some("tok")).await;
        fx.session.start().unwrap();
        let node_id = NodeId::generate();

        let actions = fx
            .session
            .handle_frame(&frame(&json!({
                "type": "REGISTERED",
                "serverId": node_id.to_string(),
                "cpPublicKey": fx.cp.public_key().to_base64(),
            })))
            .await;

        assert_eq!(actions, vec![AgentAction::Registered(node_id)]);
        assert_eq!(fx.trust.node_id(), Some(node_id));
        assert_eq!(fx.trust.trusted_key(), Some(fx.cp.public_key()));
        assert!(fx.session.phase().is_authorized());
    }

    #[tokio::test]
    async fn test_error_during_handshake_fails() {
        let mut fx = fixture(true, None).await;
        fx.session.start().unwrap();

        let actions = fx
            .session
            .handle_frame(&frame(&json!({"type": "ERROR", "message": "Authentication failed"})))
            .await;
        assert_eq!(
            actions,
            vec![
                AgentAction::Failed("Authentication failed".into()),
                AgentAction::Close
            ]
        );
        assert_eq!(fx.session.phase(), &AgentPhase::Failed);
    }

    #[tokio::test]
    async fn test_verified_command_executes_once() {
        let mut fx = fixture(true, None).await;
        authorize(&mut fx).await;

        let cmd = SignedCommand::sign(&fx.cp, CommandType::Deploy, json!({"app": "web"}));
        let text = serde_json::to_string(&cmd).unwrap();

        let actions = fx.session.handle_frame(&text).await;
        assert_eq!(
            actions,
            vec![AgentAction::Execute {
                command_type: CommandType::Deploy,
                payload: json!({"app": "web"})
            }]
        );

        let replayed = fx.session.handle_frame(&text).await;
        assert_eq!(
            replayed,
            vec![AgentAction::Send(AgentMessage::SecurityAlert {
                command_type: "DEPLOY".into(),
                reason: "replay".into()
            })]
        );
    }

    #[tokio::test]
    async fn test_forged_and_stale_commands_raise_alerts() {
        let mut fx = fixture(true, None).await;
        authorize(&mut fx).await;

        let attacker = IdentityKeyPair::generate();
        let forged = SignedCommand::sign(&attacker, CommandType::AppAction, json!({}));
        let actions = fx
            .session
            .handle_frame(&serde_json::to_string(&forged).unwrap())
            .await;
        assert_eq!(
            actions,
            vec![AgentAction::Send(AgentMessage::SecurityAlert {
                command_type: "APP_ACTION".into(),
                reason: "invalid_signature".into()
            })]
        );

        let stale = SignedCommand::sign_with(
            &fx.cp,
            CommandType::Deploy,
            json!({}),
            Timestamp::now().minus(std::time::Duration::from_secs(600)),
            "n-old".into(),
        );
        let actions = fx
            .session
            .handle_frame(&serde_json::to_string(&stale).unwrap())
            .await;
        assert!(matches!(
            actions.as_slice(),
            [AgentAction::Send(AgentMessage::SecurityAlert { reason, .. })] if reason == "stale"
        ));
        assert!(fx.session.phase().is_authorized());
    }

    #[tokio::test]
    async fn test_unsigned_privileged_frame_is_rejected() {
        let mut fx = fixture(true, None).await;
        authorize(&mut fx).await;

        let actions = fx
            .session
            .handle_frame(r#"{"type":"DEPLOY","payload":{"app":"evil"}}"#)
            .await;
        assert_eq!(actions.len(), 1);
        assert!(matches!(
            &actions[0],
            AgentAction::Send(AgentMessage::SecurityAlert { command_type, .. }) if command_type == "DEPLOY"
        ));
    }

    #[tokio::test]
    async fn test_commands_before_authorization_raise_alert() {
        let mut fx = fixture(true, None).await;
        fx.session.start().unwrap();

        let cmd = SignedCommand::sign(&fx.cp, CommandType::Deploy, json!({}));
        let actions = fx
            .session
            .handle_frame(&serde_json::to_string(&cmd).unwrap())
            .await;
        assert_eq!(
            actions,
            vec![AgentAction::Send(AgentMessage::SecurityAlert {
                command_type: "DEPLOY".to_string(),
                reason: "not_authorized".to_string(),
            })]
        );
        assert!(!fx.session.phase().is_authorized());
    }

    #[tokio::test]
    async fn test_key_rotation_updates_trust() {
        let mut fx = fixture(true, None).await;
        authorize(&mut fx).await;

        let next = IdentityKeyPair::generate();
        let rotation = SignedCommand::sign(
            &fx.cp,
            CommandType::CpKeyRotation,
            json!({"newPublicKey": next.public_key().to_base64()}),
        );
        let actions = fx
            .session
            .handle_frame(&serde_json::to_string(&rotation).unwrap())
            .await;
        assert_eq!(
            actions,
            vec![AgentAction::TrustUpdated {
                fingerprint: next.public_key().fingerprint()
            }]
        );
        assert_eq!(fx.trust.trusted_key(), Some(next.public_key()));

        let old_signed = SignedCommand::sign(&fx.cp, CommandType::Deploy, json!({}));
        let actions = fx
            .session
            .handle_frame(&serde_json::to_string(&old_signed).unwrap())
            .await;
        assert!(matches!(
            actions.as_slice(),
            [AgentAction::Send(AgentMessage::SecurityAlert { reason, .. })] if reason == "invalid_signature"
        ));
    }

    #[tokio::test]
    async fn test_regenerate_identity() {
        let mut fx = fixture(true, None).await;
        authorize(&mut fx).await;
        let old = fx.session.identity().public_key();

        let cmd = SignedCommand::sign(&fx.cp, CommandType::RegenerateIdentity, json!({}));
        let actions = fx
            .session
            .handle_frame(&serde_json::to_string(&cmd).unwrap())
            .await;

        let new = fx.session.identity().public_key();
        assert_ne!(old, new);
        assert_eq!(
            actions,
            vec![
                AgentAction::IdentityRegenerated {
                    public_key: new.to_base64()
                },
                AgentAction::Close
            ]
        );
        assert!(fx.trust.node_id().is_none());
    }

    #[tokio::test]
    async fn test_malformed_frames_are_dropped() {
        let mut fx = fixture(true, None).await;
        authorize(&mut fx).await;
        assert!(fx.session.handle_frame("not json").await.is_empty());
        assert!(fx.session.handle_frame("[1,2]").await.is_empty());
    }
}
