// ============================================
// File: crates/warden-common/src/error.rs
// ============================================
//! # Common Error Types
//!
//! ## Creation Reason
//! Base error type wrapped by every other Warden crate, so validation and
//! decoding failures read the same whichever layer produced them.
//!
//! ## Main Functionality
//! - `CommonError`: Base error enum
//! - `Result<T>`: Alias using `CommonError`
//!
//! ## ⚠️ Important Note for Next Developer
//! - Never put key material, tokens or nonces into error messages
//!
//! ## Last Modified
//! v0.1.0 - Initial error definitions

use std::fmt;
use thiserror::Error;

// ============================================
// Result Type Alias
// ============================================

/// Common result type for operations that may fail.
pub type Result<T> = std::result::Result<T, CommonError>;

// ============================================
// CommonError
// ============================================

/// Common error types shared across Warden crates.
///
/// # Example
/// ```
/// use warden_common::error::{CommonError, Result};
///
/// fn require_token(token: &str) -> Result<()> {
///     if token.is_empty() {
///         return Err(CommonError::invalid_input("token", "cannot be empty"));
///     }
///     Ok(())
/// }
/// ```
#[derive(Error, Debug)]
pub enum CommonError {
    /// A field failed validation (bad id, empty token, ...).
    #[error("invalid {field}: {reason}")]
    InvalidInput {
        /// Wire or config name of the field
        field: String,
        /// What is wrong with it
        reason: String,
    },

    /// Decoded bytes have the wrong size.
    #[error("expected {expected} bytes, got {actual}")]
    InvalidLength {
        /// Required length
        expected: usize,
        /// Length received
        actual: usize,
    },

    /// A value could not be serialized for the wire or for disk.
    #[error("cannot encode {context}: {details}")]
    Encoding {
        /// What was being encoded
        context: String,
        /// Serializer message
        details: String,
    },

    /// Base64 or JSON input could not be decoded.
    #[error("cannot decode {context}: {details}")]
    Decoding {
        /// What was being decoded
        context: String,
        /// Decoder message
        details: String,
    },
}

impl CommonError {
    /// Creates an `InvalidInput` error.
    pub fn invalid_input(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Creates an `InvalidLength` error.
    #[must_use]
    pub const fn invalid_length(expected: usize, actual: usize) -> Self {
        Self::InvalidLength { expected, actual }
    }

    /// Creates a `Decoding` error.
    pub fn decoding(context: impl Into<String>, details: impl fmt::Display) -> Self {
        Self::Decoding {
            context: context.into(),
            details: details.to_string(),
        }
    }

    /// Creates an `Encoding` error.
    pub fn encoding(context: impl Into<String>, details: impl fmt::Display) -> Self {
        Self::Encoding {
            context: context.into(),
            details: details.to_string(),
        }
    }

    /// Returns `true` if the peer sent something malformed.
    #[must_use]
    pub const fn is_malformed_input(&self) -> bool {
        matches!(
            self,
            Self::InvalidInput { .. } | Self::InvalidLength { .. } | Self::Decoding { .. }
        )
    }
}

// ============================================
// Error Conversions
// ============================================

impl From<base64::DecodeError> for CommonError {
    fn from(err: base64::DecodeError) -> Self {
        Self::decoding("base64 decode", err)
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CommonError::invalid_input("pubKey", "must be 32 bytes");
        assert_eq!(err.to_string(), "invalid pubKey: must be 32 bytes");
        assert!(err.is_malformed_input());
    }

    #[test]
    fn test_length_error() {
        let err = CommonError::invalid_length(32, 31);
        assert_eq!(err.to_string(), "expected 32 bytes, got 31");
        assert!(err.is_malformed_input());
    }

    #[test]
    fn test_base64_error_conversion() {
        use base64::{engine::general_purpose::STANDARD, Engine};

        let err: CommonError = STANDARD.decode("not base64!").unwrap_err().into();
        assert!(matches!(err, CommonError::Decoding { .. }));
        assert!(err.is_malformed_input());
        assert!(!CommonError::encoding("frame", "boom").is_malformed_input());
    }
}
