// ============================================
// File: crates/warden-core/src/command.rs
// ============================================
//! # Signed Commands
//!
//! ## Creation Reason
//! Authenticating the transport is not enough: a hijacked or spoofed
//! channel could still inject instructions. Every privileged command is
//! therefore wrapped in an envelope signed with the control-plane key.
//!
//! ## Envelope
//! ```text
//! {
//!   "type":      "DEPLOY",
//!   "payload":   {...},
//!   "timestamp": 1737820800000,      // ms since epoch
//!   "nonce":     "<32 hex chars>",   // 16 random bytes
//!   "signature": "<base64 Ed25519 over canonical {type,payload,timestamp,nonce}>"
//! }
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Missing fields decode to empty defaults so a stripped envelope still
//!   reaches verification and is reported, instead of vanishing as "malformed"
//! - Changing any of the four signed fields must invalidate the signature
//!
//! ## Last Modified
//! v0.1.0 - Initial signed command envelope

use serde::{Deserialize, Serialize};
use serde_json::Value;

use warden_common::{random_nonce, Timestamp};

use crate::crypto::{IdentityKeyPair, IdentityPublicKey};
use crate::error::{CoreError, Result};
use crate::protocol::canonical::signing_input;
use crate::protocol::messages::CommandType;

/// Random bytes in a command nonce.
pub const COMMAND_NONCE_BYTES: usize = 16;

/// A privileged command with its integrity envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedCommand {
    /// Command `type` tag.
    #[serde(rename = "type")]
    pub command_type: String,
    /// Command body.
    #[serde(default)]
    pub payload: Value,
    /// Signing time, Unix milliseconds.
    #[serde(default)]
    pub timestamp: Timestamp,
    /// Single-use nonce, hex.
    #[serde(default)]
    pub nonce: String,
    /// Base64 Ed25519 signature.
    #[serde(default)]
    pub signature: String,
}

impl SignedCommand {
    /// Signs a command now with a fresh random nonce.
    #[must_use]
    pub fn sign(key: &IdentityKeyPair, command_type: CommandType, payload: Value) -> Self {
        Self::sign_with(
            key,
            command_type,
            payload,
            Timestamp::now(),
            random_nonce(COMMAND_NONCE_BYTES),
        )
    }

    /// Signs a command with an explicit timestamp and nonce.
    #[must_use]
    pub fn sign_with(
        key: &IdentityKeyPair,
        command_type: CommandType,
        payload: Value,
        timestamp: Timestamp,
        nonce: String,
    ) -> Self {
        let command_type = command_type.as_str().to_string();
        let signature =
            key.sign_base64(&signing_input(&command_type, &payload, timestamp, &nonce));
        Self {
            command_type,
            payload,
            timestamp,
            nonce,
            signature,
        }
    }

    /// Bytes covered by the signature.
    #[must_use]
    pub fn signing_input(&self) -> Vec<u8> {
        signing_input(&self.command_type, &self.payload, self.timestamp, &self.nonce)
    }

    /// Checks the signature against `key`.
    ///
    /// # Errors
    /// Returns `ForgedCommand` if the signature is missing or wrong.
    pub fn verify(&self, key: &IdentityPublicKey) -> Result<()> {
        if key.verify_base64(&self.signing_input(), &self.signature) {
            Ok(())
        } else {
            Err(CoreError::ForgedCommand)
        }
    }

    /// Parses the `type` tag as a privileged command type.
    ///
    /// # Errors
    /// Returns `UnsignedCommandType` for anything outside the privileged set.
    pub fn kind(&self) -> Result<CommandType> {
        self.command_type.parse()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn signed(key: &IdentityKeyPair) -> SignedCommand {
        SignedCommand::sign(key, CommandType::Deploy, json!({"app": "web", "ref": "main"}))
    }

    #[test]
    fn test_sign_and_verify() {
        let key = IdentityKeyPair::generate();
        let cmd = signed(&key);

        assert_eq!(cmd.command_type, "DEPLOY");
        assert_eq!(cmd.nonce.len(), COMMAND_NONCE_BYTES * 2);
        assert!(cmd.verify(&key.public_key()).is_ok());
        assert_eq!(cmd.kind().unwrap(), CommandType::Deploy);
    }

    #[test]
    fn test_any_single_field_mutation_breaks_signature() {
        let key = IdentityKeyPair::generate();
        let pk = key.public_key();
        let cmd = signed(&key);

        let mut m = cmd.clone();
        m.command_type = "APP_ACTION".into();
        assert!(m.verify(&pk).is_err());

        let mut m = cmd.clone();
        m.payload = json!({"app": "web", "ref": "evil"});
        assert!(m.verify(&pk).is_err());

        let mut m = cmd.clone();
        m.timestamp = cmd.timestamp.plus(std::time::Duration::from_millis(1));
        assert!(m.verify(&pk).is_err());

        let mut m = cmd.clone();
        m.nonce = random_nonce(COMMAND_NONCE_BYTES);
        assert!(m.verify(&pk).is_err());

        let mut m = cmd;
        m.signature = key.sign_base64(b"something else");
        assert!(m.verify(&pk).is_err());
    }

    #[test]
    fn test_verify_with_wrong_key_fails() {
        let cmd = signed(&IdentityKeyPair::generate());
        assert!(matches!(
            cmd.verify(&IdentityKeyPair::generate().public_key()),
            Err(CoreError::ForgedCommand)
        ));
    }

    #[test]
    fn test_envelope_survives_json_transport() {
        let key = IdentityKeyPair::generate();
        let cmd = signed(&key);

        let text = serde_json::to_string(&cmd).unwrap();
        let back: SignedCommand = serde_json::from_str(&text).unwrap();
        assert!(back.verify(&key.public_key()).is_ok());
    }

    #[test]
    fn test_stripped_envelope_decodes_and_fails() {
        let cmd: SignedCommand =
            serde_json::from_str(r#"{"type":"DEPLOY","payload":{"app":"x"}}"#).unwrap();
        assert!(cmd.signature.is_empty());
        assert!(cmd.verify(&IdentityKeyPair::generate().public_key()).is_err());
    }
}
