// ============================================
// File: crates/warden-core/src/error.rs
// ============================================
//! # Core Error Types
//!
//! ## Creation Reason
//! Errors raised by key handling, wire decoding and signed-command checks.
//!
//! ## Error Categories
//! 1. **Crypto**: bad key material, failed verification
//! 2. **Protocol**: malformed or oversized frames, unknown message types
//! 3. **Command integrity**: stale, replayed or forged signed commands
//! 4. **Key files**: persistence of long-lived keys
//!
//! ## ⚠️ Important Note for Next Developer
//! - NEVER include key material or full nonces in messages
//! - `is_suspicious()` drives security alerting on the agent
//!
//! ## Last Modified
//! v0.1.0 - Initial error definitions

use thiserror::Error;

use warden_common::error::CommonError;

// ============================================
// Result Type Alias
// ============================================

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

// ============================================
// CoreError
// ============================================

/// Core error types for protocol and cryptographic operations.
#[derive(Error, Debug)]
pub enum CoreError {
    // ========================================
    // Cryptographic Errors
    // ========================================
    /// Key material could not be created or parsed.
    #[error("Invalid key: {context}")]
    InvalidKey {
        /// What key was being handled
        context: String,
    },

    /// Signature did not verify.
    #[error("Signature verification failed")]
    SignatureVerification,

    // ========================================
    // Protocol Errors
    // ========================================
    /// Frame could not be decoded.
    #[error("Malformed message: {reason}")]
    MalformedMessage {
        /// What's wrong with the message
        reason: String,
    },

    /// Frame exceeds the configured size limit.
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge {
        /// Actual size
        size: usize,
        /// Maximum allowed
        max: usize,
    },

    /// Command type is not one the control plane signs.
    #[error("Command type '{0}' is not a signed command")]
    UnsignedCommandType(String),

    // ========================================
    // Command Integrity Errors
    // ========================================
    /// Command timestamp is outside the allowed drift window.
    #[error("Stale command: drift {drift_ms}ms exceeds {max_drift_ms}ms")]
    StaleCommand {
        /// Observed drift in milliseconds
        drift_ms: u64,
        /// Allowed drift in milliseconds
        max_drift_ms: u64,
    },

    /// Command nonce was already consumed.
    #[error("Replay detected: nonce already used")]
    ReplayDetected,

    /// Command signature is missing or invalid.
    #[error("Forged command: signature does not verify")]
    ForgedCommand,

    /// No trusted control-plane key is available to verify against.
    #[error("No trusted control-plane key")]
    NoTrustedKey,

    /// Command arrived before the session was authorized.
    #[error("Command received before authorization")]
    PrematureCommand,

    // ========================================
    // Key File Errors
    // ========================================
    /// Key file could not be read, parsed or written.
    #[error("Key file error at '{path}': {reason}")]
    KeyFile {
        /// Path of the key file
        path: String,
        /// What went wrong
        reason: String,
    },

    // ========================================
    // Wrapped Errors
    // ========================================
    /// Error from the common layer.
    #[error(transparent)]
    Common(#[from] CommonError),
}

impl CoreError {
    // ========================================
    // Convenience Constructors
    // ========================================

    /// Creates an `InvalidKey` error.
    pub fn invalid_key(context: impl Into<String>) -> Self {
        Self::InvalidKey {
            context: context.into(),
        }
    }

    /// Creates a `MalformedMessage` error.
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedMessage {
            reason: reason.into(),
        }
    }

    /// Creates a `KeyFile` error.
    pub fn key_file(path: impl Into<String>, reason: impl ToString) -> Self {
        Self::KeyFile {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Short machine-friendly reason, used in `SECURITY_ALERT` frames.
    #[must_use]
    pub const fn reason_code(&self) -> &'static str {
        match self {
            Self::StaleCommand { .. } => "stale",
            Self::ReplayDetected => "replay",
            Self::ForgedCommand | Self::SignatureVerification => "invalid_signature",
            Self::NoTrustedKey => "no_trusted_key",
            Self::PrematureCommand => "not_authorized",
            Self::UnsignedCommandType(_) => "unsigned_type",
            Self::MalformedMessage { .. } | Self::MessageTooLarge { .. } => "malformed",
            Self::InvalidKey { .. } | Self::KeyFile { .. } | Self::Common(_) => "internal",
        }
    }

    // ========================================
    // Error Classification
    // ========================================

    /// Returns `true` if this is a cryptographic error.
    #[must_use]
    pub const fn is_crypto_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidKey { .. } | Self::SignatureVerification | Self::ForgedCommand
        )
    }

    /// Returns `true` if this is a protocol error.
    #[must_use]
    pub const fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Self::MalformedMessage { .. } | Self::MessageTooLarge { .. } | Self::UnsignedCommandType(_)
        )
    }

    /// Returns `true` if this error might indicate an attack.
    ///
    /// The agent reports these to the control plane as security alerts.
    #[must_use]
    pub const fn is_suspicious(&self) -> bool {
        matches!(
            self,
            Self::SignatureVerification
                | Self::ForgedCommand
                | Self::ReplayDetected
                | Self::StaleCommand { .. }
                | Self::PrematureCommand
        )
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::malformed(err.to_string())
    }
}

// ============================================
// Tests
// ============================================
