// ============================================
// File: crates/warden-server/src/services/commands.rs
// ============================================
//! # Command Signing and Dispatch
//!
//! ## Creation Reason
//! Privileged commands leave the control plane only through this module,
//! so every one of them carries a fresh timestamp, a fresh nonce and a
//! signature by the current control-plane key.
//!
//! ## Main Functionality
//! - `CommandSigner`: wraps a payload in a `SignedCommand`
//! - `CommandDispatcher::dispatch()`: sign + send to a node's sessions
//! - `CommandDispatcher::rotate_and_announce()`: rotate the key, then tell
//!   every authorized agent with a message signed by the OLD key
//!
//! ## ⚠️ Important Note for Next Developer
//! - Each delivery is signed separately; nonces are never shared between
//!   sessions
//! - Rotation announcements must be signed with `KeyRotation::previous`,
//!   since agents still trust only the old key when they receive it
//! - `dispatch` holds the rotation lock shared and rotation holds it
//!   exclusively across swap + announce: no session may see a command
//!   signed by the new key before its CP_KEY_ROTATION frame
//!
//! ## Last Modified
//! v0.1.0 - Initial dispatcher

use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use warden_common::NodeId;
use warden_core::{CommandType, IdentityKeyPair, JsonCodec, SignedCommand};

use crate::error::{Result, ServerError};
use crate::services::directory::AgentDirectory;
use crate::services::events::{AgentEvent, EventBus};
use crate::services::keystore::KeyStore;
use crate::services::session::{Session, SessionRegistry};

// ============================================
// CommandSigner
// ============================================

/// Signs commands with the current control-plane key.
#[derive(Debug, Clone)]
pub struct CommandSigner {
    keys: Arc<KeyStore>,
}

impl CommandSigner {
    /// Creates a signer over `keys`.
    #[must_use]
    pub const fn new(keys: Arc<KeyStore>) -> Self {
        Self { keys }
    }

    /// Signs `payload` as `command_type`.
    ///
    /// # Errors
    /// Returns `KeyStore` if the control-plane key is unavailable.
    pub async fn sign(&self, command_type: CommandType, payload: Value) -> Result<SignedCommand> {
        let keys = self.keys.get_or_generate_keys().await?;
        Ok(SignedCommand::sign(keys.keypair(), command_type, payload))
    }
}

// ============================================
// CommandDispatcher
// ============================================

/// Result of a key rotation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RotationReport {
    /// New public key, base64.
    pub public_key: String,
    /// New key fingerprint.
    pub fingerprint: String,
    /// Sessions that were sent the announcement.
    pub notified: usize,
}

/// Sends signed commands to connected agents.
pub struct CommandDispatcher {
    signer: CommandSigner,
    keys: Arc<KeyStore>,
    directory: Arc<AgentDirectory>,
    sessions: Arc<SessionRegistry>,
    events: EventBus,
    codec: JsonCodec,
    rotation: RwLock<()>,
}

impl CommandDispatcher {
    /// Creates the dispatcher.
    #[must_use]
    pub fn new(
        keys: Arc<KeyStore>,
        directory: Arc<AgentDirectory>,
        sessions: Arc<SessionRegistry>,
        events: EventBus,
        codec: JsonCodec,
    ) -> Self {
        Self {
            signer: CommandSigner::new(Arc::clone(&keys)),
            keys,
            directory,
            sessions,
            events,
            codec,
            rotation: RwLock::new(()),
        }
    }

    /// Signer used for every dispatch.
    #[must_use]
    pub const fn signer(&self) -> &CommandSigner {
        &self.signer
    }

    /// Signs and sends a command to every authorized session of `node_id`.
    /// Returns the number of sessions it reached.
    ///
    /// # Errors
    /// - `Core(UnsignedCommandType)` if `command_type` is not privileged
    /// - `AgentNotFound` if `node_id` is not enrolled
    /// - `AgentNotConnected` if no authorized session took the command
    pub async fn dispatch(
        &self,
        node_id: NodeId,
        command_type: &str,
        payload: Value,
    ) -> Result<usize> {
        let command_type: CommandType = command_type.parse()?;

        if self.directory.get(node_id).is_none() {
            return Err(ServerError::AgentNotFound(node_id));
        }

        let _key_epoch = self.rotation.read().await;
        let targets = self.sessions.by_node(node_id);
        let mut delivered = 0;
        for session in &targets {
            let command = self.signer.sign(command_type, payload.clone()).await?;
            if self.deliver(session, &command) {
                delivered += 1;
            }
        }

        if delivered == 0 {
            return Err(ServerError::AgentNotConnected(node_id));
        }

        info!(
            node_id = %node_id,
            command_type = %command_type,
            delivered,
            "Command dispatched"
        );
        Ok(delivered)
    }

    /// Rotates the control-plane key and announces the new key to every
    /// authorized agent, signed with the key being replaced.
    ///
    /// # Errors
    /// Returns `KeyStore` if the new key cannot be persisted. Nothing is
    /// announced in that case.
    pub async fn rotate_and_announce(&self) -> Result<RotationReport> {
        let exclusive = self.rotation.write().await;
        let rotation = self.keys.rotate_keys().await?;
        let public_key = rotation.current.public_key().to_base64();

        let notified = self.announce(
            rotation.previous.keypair(),
            &json!({ "newPublicKey": public_key }),
        );
        drop(exclusive);

        let fingerprint = rotation.current.fingerprint().to_string();
        self.events.publish(AgentEvent::KeyRotated {
            fingerprint: fingerprint.clone(),
            notified,
        });

        Ok(RotationReport {
            public_key,
            fingerprint,
            notified,
        })
    }

    fn announce(&self, previous: &IdentityKeyPair, payload: &Value) -> usize {
        self.sessions
            .authorized_snapshot()
            .iter()
            .filter(|session| {
                let command =
                    SignedCommand::sign(previous, CommandType::CpKeyRotation, payload.clone());
                self.deliver(session, &command)
            })
            .count()
    }

    fn deliver(&self, session: &Session, command: &SignedCommand) -> bool {
        let text = match self.codec.encode(command) {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Failed to encode command");
                return false;
            }
        };

        match session.send_text(text) {
            Ok(()) => {
                debug!(
                    node_id = %session.node_id,
                    session_id = %session.session_id,
                    command_type = %command.command_type,
                    nonce = %command.nonce,
                    "Command sent"
                );
                true
            }
            Err(e) => {
                debug!(node_id = %session.node_id, error = %e, "Command delivery failed");
                false
            }
        }
    }
}

impl std::fmt::Debug for CommandDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandDispatcher")
            .field("sessions", &self.sessions)
            .finish_non_exhaustive()
    }
}

// ============================================
// Tests
// ============================================
