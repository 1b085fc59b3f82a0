// ============================================
// File: crates/warden-core/src/crypto/mod.rs
// ============================================
//! # Cryptography Module
//!
//! ## Creation Reason
//! Single place for every signature operation in the trust protocol, built
//! on the audited `ed25519-dalek` and `sha2` implementations.
//!
//! ## Main Functionality
//! - [`keys`]: `IdentityKeyPair` / `IdentityPublicKey`
//! - [`keyfile`]: On-disk JSON key format with owner-only permissions
//! - [`fingerprint`]: Short human-comparable key digest
//! - [`verify_signature`]: Base64-in, `bool`-out verification helper
//!
//! ## Where Signatures Are Used
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Handshake                                                  │
//! │    agent signs UTF-8 bytes of CHALLENGE.nonce               │
//! │    control plane verifies with the enrolled agent key       │
//! │                                                             │
//! │  Commands                                                   │
//! │    control plane signs canonical {type,payload,ts,nonce}    │
//! │    agent verifies with its cached control-plane key         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Ed25519 signs the message directly; do NOT pre-hash
//! - NEVER roll your own crypto
//!
//! ## Last Modified
//! v0.1.0 - Initial crypto implementation

pub mod keyfile;
pub mod keys;

use sha2::{Digest, Sha256};

pub use keyfile::KeyFile;
pub use keys::{IdentityKeyPair, IdentityPublicKey};

// ============================================
// Constants
// ============================================

/// Size of an Ed25519 public key in bytes.
pub const ED25519_PUBLIC_KEY_SIZE: usize = 32;

/// Size of an Ed25519 secret seed in bytes.
pub const ED25519_SECRET_KEY_SIZE: usize = 32;

/// Size of an Ed25519 signature in bytes.
pub const ED25519_SIGNATURE_SIZE: usize = 64;

/// Number of digest bytes shown in a fingerprint.
pub const FINGERPRINT_BYTES: usize = 8;

/// Algorithm name advertised on the public-key endpoint.
pub const SIGNATURE_ALGORITHM: &str = "Ed25519";

// ============================================
// Helpers
// ============================================

/// Computes the display fingerprint of a raw public key.
///
/// SHA-256 of the key bytes, first 8 bytes as lowercase hex, grouped in
/// four colon-separated pairs of bytes. Stable for a given key.
///
/// # Example
/// ```
/// use warden_core::crypto::fingerprint;
///
/// let fp = fingerprint(&[0u8; 32]);
/// assert_eq!(fp.len(), 19);
/// assert_eq!(fp.matches(':').count(), 3);
/// ```
#[must_use]
pub fn fingerprint(public_key: &[u8]) -> String {
    let digest = Sha256::digest(public_key);
    digest[..FINGERPRINT_BYTES]
        .chunks(2)
        .map(hex::encode)
        .collect::<Vec<_>>()
        .join(":")
}

/// Verifies a base64 signature with a base64 public key.
///
/// Returns `false` for any malformed input; never panics.
#[must_use]
pub fn verify_signature(public_key: &str, message: &[u8], signature: &str) -> bool {
    IdentityPublicKey::from_base64(public_key)
        .map(|key| key.verify_base64(message, signature))
        .unwrap_or(false)
}
