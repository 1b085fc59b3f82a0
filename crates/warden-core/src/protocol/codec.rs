// ============================================
// File: crates/warden-core/src/protocol/codec.rs
// ============================================
//! # Protocol Codec
//!
//! ## Creation Reason
//! Turns WebSocket text frames into typed messages and back, enforcing a
//! frame size limit before any JSON parsing happens.
//!
//! ## Parsing Strategy
//! 1. Reject frames above `max_frame_size`
//! 2. Parse to a JSON object and read its `type` tag
//! 3. Agent side: unsigned allowlist → `ServerMessage`, everything else →
//!    `SignedCommand` (verification decides its fate)
//!
//! ## ⚠️ Important Note for Next Developer
//! - Decode errors are `MalformedMessage`; callers drop such frames silently
//!
//! ## Last Modified
//! v0.1.0 - Initial JSON codec

use serde::Serialize;
use serde_json::Value;

use crate::command::SignedCommand;
use crate::error::{CoreError, Result};
use crate::protocol::messages::{is_unsigned_server_type, AgentMessage, ServerMessage};

/// Default maximum accepted frame size (64 KiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

// ============================================
// ServerFrame
// ============================================

/// Anything the control plane may send to an agent.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    /// Unsigned protocol message.
    Control(ServerMessage),
    /// Envelope that must pass the command gate.
    Command(SignedCommand),
}

// ============================================
// JsonCodec
// ============================================

/// JSON text-frame codec with a size limit.
#[derive(Debug, Clone, Copy)]
pub struct JsonCodec {
    max_frame_size: usize,
}

impl Default for JsonCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl JsonCodec {
    /// Creates a codec accepting frames up to `max_frame_size` bytes.
    #[must_use]
    pub const fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    /// Returns the configured frame limit.
    #[must_use]
    pub const fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    fn parse_object(&self, text: &str) -> Result<(String, Value)> {
        if text.len() > self.max_frame_size {
            return Err(CoreError::MessageTooLarge {
                size: text.len(),
                max: self.max_frame_size,
            });
        }

        let value: Value = serde_json::from_str(text)?;
        let type_name = value
            .as_object()
            .ok_or_else(|| CoreError::malformed("frame is not a JSON object"))?
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::malformed("missing 'type'"))?
            .to_string();
        Ok((type_name, value))
    }

    /// Decodes a frame received from an agent.
    ///
    /// # Errors
    /// Returns `MalformedMessage` or `MessageTooLarge`.
    pub fn decode_agent(&self, text: &str) -> Result<AgentMessage> {
        let (_, value) = self.parse_object(text)?;
        Ok(serde_json::from_value(value)?)
    }

    /// Decodes a frame received from the control plane.
    ///
    /// # Errors
    /// Returns `MalformedMessage` or `MessageTooLarge`.
    pub fn decode_server(&self, text: &str) -> Result<ServerFrame> {
        let (type_name, value) = self.parse_object(text)?;
        if is_unsigned_server_type(&type_name) {
            Ok(ServerFrame::Control(serde_json::from_value(value)?))
        } else {
            Ok(ServerFrame::Command(serde_json::from_value(value)?))
        }
    }

    /// Encodes any protocol message as a compact JSON text frame.
    ///
    /// # Errors
    /// Returns `Common(Encoding)` if serialization fails.
    pub fn encode<T: Serialize>(&self, message: &T) -> Result<String> {
        serde_json::to_string(message).map_err(|e| {
            CoreError::Common(warden_common::CommonError::encoding("protocol frame", e))
        })
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::IdentityKeyPair;
    use crate::protocol::messages::CommandType;
    use serde_json::json;

    #[test]
    fn test_decode_agent_connect() {
        let codec = JsonCodec::default();
        let msg = codec
            .decode_agent(r#"{"type":"CONNECT","pubKey":"abc"}"#)
            .unwrap();
        assert_eq!(msg, AgentMessage::Connect { pub_key: "abc".into() });
    }

    #[test]
    fn test_decode_agent_rejects_garbage() {
        let codec = JsonCodec::default();
        for bad in [
            "",
            "not json",
            "[1,2,3]",
            r#"{"pubKey":"abc"}"#,
            r#"{"type":"CONNECT"}"#,
            r#"{"type":"NOPE"}"#,
            r#"{"type":42}"#,
        ] {
            let err = codec.decode_agent(bad).unwrap_err();
            assert!(err.is_protocol_error(), "{bad:?} -> {err}");
        }
    }

    #[test]
    fn test_frame_size_limit() {
        let codec = JsonCodec::new(32);
        let big = format!(r#"{{"type":"STATUS","payload":"{}"}}"#, "x".repeat(64));
        assert!(matches!(
            codec.decode_agent(&big),
            Err(CoreError::MessageTooLarge { .. })
        ));
    }

    #[test]
    fn test_decode_server_control_vs_command() {
        let codec = JsonCodec::default();

        let frame = codec
            .decode_server(r#"{"type":"CHALLENGE","nonce":"ab"}"#)
            .unwrap();
        assert_eq!(
            frame,
            ServerFrame::Control(ServerMessage::Challenge { nonce: "ab".into() })
        );

        let key = IdentityKeyPair::generate();
        let cmd = SignedCommand::sign(&key, CommandType::AppAction, json!({"action": "restart"}));
        let text = codec.encode(&cmd).unwrap();
        match codec.decode_server(&text).unwrap() {
            ServerFrame::Command(decoded) => assert_eq!(decoded, cmd),
            other => panic!("expected command, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_server_type_is_treated_as_command() {
        let codec = JsonCodec::default();
        let frame = codec
            .decode_server(r#"{"type":"SHUTDOWN","payload":{}}"#)
            .unwrap();
        assert!(matches!(frame, ServerFrame::Command(c) if c.signature.is_empty()));
    }

    #[test]
    fn test_encode_roundtrip_agent() {
        let codec = JsonCodec::default();
        let msg = AgentMessage::Response {
            signature: "sig".into(),
        };
        let text = codec.encode(&msg).unwrap();
        assert_eq!(text, r#"{"type":"RESPONSE","signature":"sig"}"#);
        assert_eq!(codec.decode_agent(&text).unwrap(), msg);
    }
}
