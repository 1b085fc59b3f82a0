// ============================================
// File: crates/warden-core/src/protocol/messages.rs
// ============================================
//! # Protocol Messages
//!
//! ## Creation Reason
//! Typed forms of every JSON text frame exchanged between an agent and the
//! control plane. Each frame is an object with a `type` discriminator.
//!
//! ## Message Catalogue
//! ```text
//! agent ──► control plane              control plane ──► agent
//! ─────────────────────────            ──────────────────────────
//! CONNECT        {pubKey}              CHALLENGE   {nonce}
//! RESPONSE       {signature}           AUTHORIZED  {sessionId}
//! REGISTER       {token, pubKey}       REGISTERED  {serverId, cpPublicKey}
//! STATUS         {payload}             ERROR       {message}
//! SECURITY_ALERT {commandType, reason} STATUS      {payload}
//!                                      <signed command envelope>
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Field names are camelCase on the wire; keep the explicit renames
//! - Anything the control plane sends that is not in
//!   [`UNSIGNED_SERVER_TYPES`] must arrive as a signed envelope
//!
//! ## Last Modified
//! v0.1.0 - Initial message definitions

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use warden_common::{NodeId, SessionId};

use crate::crypto::{IdentityPublicKey, SIGNATURE_ALGORITHM};
use crate::error::CoreError;

// ============================================
// Type Tags
// ============================================

/// `type` values the control plane may send without a signature.
pub const UNSIGNED_SERVER_TYPES: &[&str] = &["CHALLENGE", "AUTHORIZED", "REGISTERED", "ERROR", "STATUS"];

/// Generic error text for every identity or registration failure.
pub const AUTH_FAILED_MESSAGE: &str = "Authentication failed";

/// Error text for a RESPONSE whose signature does not verify.
pub const INVALID_SIGNATURE_MESSAGE: &str = "Invalid signature";

// ============================================
// AgentMessage
// ============================================

/// Frames sent by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentMessage {
    /// Opens the handshake for an already enrolled agent.
    Connect {
        /// Agent public key, base64.
        #[serde(rename = "pubKey")]
        pub_key: String,
    },

    /// Signature over the UTF-8 bytes of the challenge nonce.
    Response {
        /// Base64 Ed25519 signature.
        signature: String,
    },

    /// First-time enrollment using a registration token.
    Register {
        /// Single-use registration token.
        token: String,
        /// Agent public key, base64.
        #[serde(rename = "pubKey")]
        pub_key: String,
    },

    /// Unsigned status report.
    Status {
        /// Free-form status body.
        #[serde(default)]
        payload: Value,
    },

    /// Reports a command that failed integrity checks.
    SecurityAlert {
        /// `type` of the rejected command.
        #[serde(rename = "commandType")]
        command_type: String,
        /// Short reason code (`stale`, `replay`, `invalid_signature`, ...).
        reason: String,
    },
}

impl AgentMessage {
    /// Wire `type` tag of this message.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "CONNECT",
            Self::Response { .. } => "RESPONSE",
            Self::Register { .. } => "REGISTER",
            Self::Status { .. } => "STATUS",
            Self::SecurityAlert { .. } => "SECURITY_ALERT",
        }
    }
}

// ============================================
// ServerMessage
// ============================================

/// Unsigned control frames sent by the control plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMessage {
    /// Random nonce the agent must sign.
    Challenge {
        /// Hex-encoded 32 random bytes.
        nonce: String,
    },

    /// Handshake completed.
    Authorized {
        /// Newly created session id.
        #[serde(rename = "sessionId")]
        session_id: SessionId,
    },

    /// Enrollment completed.
    Registered {
        /// Node id assigned to the agent.
        #[serde(rename = "serverId")]
        server_id: NodeId,
        /// Current control-plane public key, base64.
        #[serde(rename = "cpPublicKey")]
        cp_public_key: String,
    },

    /// Generic failure text.
    Error {
        /// Human readable, deliberately vague.
        message: String,
    },

    /// Unsigned status push.
    Status {
        /// Free-form status body.
        #[serde(default)]
        payload: Value,
    },
}

impl ServerMessage {
    /// Creates an `ERROR` frame.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Wire `type` tag of this message.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Challenge { .. } => "CHALLENGE",
            Self::Authorized { .. } => "AUTHORIZED",
            Self::Registered { .. } => "REGISTERED",
            Self::Error { .. } => "ERROR",
            Self::Status { .. } => "STATUS",
        }
    }
}

// ============================================
// CommandType
// ============================================

/// Privileged command types. Every one of these is signed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandType {
    /// Deploy an application.
    Deploy,
    /// Start/stop/restart an application.
    AppAction,
    /// Discard and regenerate the agent identity.
    RegenerateIdentity,
    /// Announce a new control-plane public key.
    CpKeyRotation,
}

impl CommandType {
    /// All privileged command types.
    pub const ALL: [Self; 4] = [
        Self::Deploy,
        Self::AppAction,
        Self::RegenerateIdentity,
        Self::CpKeyRotation,
    ];

    /// Wire `type` tag.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Deploy => "DEPLOY",
            Self::AppAction => "APP_ACTION",
            Self::RegenerateIdentity => "REGENERATE_IDENTITY",
            Self::CpKeyRotation => "CP_KEY_ROTATION",
        }
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| CoreError::UnsignedCommandType(s.to_string()))
    }
}

/// Returns `true` if `type_name` may arrive from the control plane unsigned.
#[must_use]
pub fn is_unsigned_server_type(type_name: &str) -> bool {
    UNSIGNED_SERVER_TYPES.contains(&type_name)
}

// ============================================
// PublicKeyInfo
// ============================================

/// Body of `GET /api/v1/public-key`, used to seed agents out of band.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyInfo {
    /// Control-plane public key, base64.
    pub public_key: String,
    /// Always `Ed25519`.
    pub algorithm: String,
    /// Display fingerprint of `public_key`.
    pub fingerprint: String,
}

impl PublicKeyInfo {
    /// Describes `key`.
    #[must_use]
    pub fn for_key(key: &IdentityPublicKey) -> Self {
        Self {
            public_key: key.to_base64(),
            algorithm: SIGNATURE_ALGORITHM.to_string(),
            fingerprint: key.fingerprint(),
        }
    }

    /// Returns `true` if the advertised fingerprint matches the key.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.algorithm == SIGNATURE_ALGORITHM
            && IdentityPublicKey::from_base64(&self.public_key)
                .is_ok_and(|key| key.fingerprint() == self.fingerprint)
    }
}

// ============================================
// Tests
// ============================================
