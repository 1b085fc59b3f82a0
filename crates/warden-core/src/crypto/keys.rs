// ============================================
// File: crates/warden-core/src/crypto/keys.rs
// ============================================
//! # Cryptographic Key Types
//!
//! ## Creation Reason
//! Both the control plane and every agent hold a long-lived Ed25519
//! identity. This module wraps `ed25519-dalek` so the rest of the code
//! only deals in base64 strings at the edges and typed keys inside.
//!
//! ## Main Functionality
//! - `IdentityKeyPair`: Signing half (control plane key, agent identity)
//! - `IdentityPublicKey`: Verifying half with base64 serde and fingerprint
//!
//! ## Key Lifecycle
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │  Control-plane keypair                                     │
//! │  ├─ Generated on first start, persisted 0600               │
//! │  ├─ Signs every privileged command                         │
//! │  └─ Rotated by replacing the whole pair                    │
//! │                                                            │
//! │  Agent identity keypair                                    │
//! │  ├─ Generated on the agent host, never leaves it           │
//! │  ├─ Public half enrolled once via registration token       │
//! │  └─ Signs handshake challenges                             │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Private keys are never logged; `Debug` prints a public-key prefix only
//! - `verify_base64` swallows every decoding failure into `false`
//!
//! ## Last Modified
//! v0.1.0 - Initial key type definitions

use std::fmt;
use std::hash::{Hash, Hasher};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use super::{fingerprint, ED25519_PUBLIC_KEY_SIZE, ED25519_SECRET_KEY_SIZE, ED25519_SIGNATURE_SIZE};
use crate::error::{CoreError, Result};

// ============================================
// IdentityKeyPair (Ed25519)
// ============================================

/// Long-term Ed25519 key pair.
///
/// # Example
/// ```
/// use warden_core::crypto::IdentityKeyPair;
///
/// let identity = IdentityKeyPair::generate();
/// let signature = identity.sign_base64(b"nonce");
/// assert!(identity.public_key().verify_base64(b"nonce", &signature));
/// ```
#[derive(Clone)]
pub struct IdentityKeyPair {
    signing_key: SigningKey,
}

impl IdentityKeyPair {
    /// Generates a new key pair from the operating system RNG.
    #[must_use]
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Creates a key pair from a 32-byte Ed25519 seed.
    ///
    /// # Errors
    /// Returns `InvalidKey` if the slice is not 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut seed: [u8; ED25519_SECRET_KEY_SIZE] = bytes.try_into().map_err(|_| {
            CoreError::invalid_key(format!(
                "Ed25519 seed must be {ED25519_SECRET_KEY_SIZE} bytes, got {}",
                bytes.len()
            ))
        })?;
        let signing_key = SigningKey::from_bytes(&seed);
        seed.zeroize();
        Ok(Self { signing_key })
    }

    /// Returns the public half.
    #[must_use]
    pub fn public_key(&self) -> IdentityPublicKey {
        IdentityPublicKey(self.signing_key.verifying_key())
    }

    /// Signs raw bytes, no pre-hashing.
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> [u8; ED25519_SIGNATURE_SIZE] {
        self.signing_key.sign(message).to_bytes()
    }

    /// Signs raw bytes and returns the signature as standard base64.
    #[must_use]
    pub fn sign_base64(&self, message: &[u8]) -> String {
        BASE64.encode(self.sign(message))
    }

    /// Exports the 32-byte seed for persistence.
    ///
    /// Callers must zeroize the returned bytes once written.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; ED25519_SECRET_KEY_SIZE] {
        self.signing_key.to_bytes()
    }
}

impl fmt::Debug for IdentityKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityKeyPair")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

// ============================================
// IdentityPublicKey
// ============================================

/// Public half of an Ed25519 identity. Safe to share.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct IdentityPublicKey(VerifyingKey);

impl IdentityPublicKey {
    /// Creates a public key from 32 raw bytes.
    ///
    /// # Errors
    /// Returns `InvalidKey` if the bytes are not a valid curve point.
    pub fn from_bytes(bytes: &[u8; ED25519_PUBLIC_KEY_SIZE]) -> Result<Self> {
        VerifyingKey::from_bytes(bytes)
            .map(Self)
            .map_err(|_| CoreError::invalid_key("invalid Ed25519 public key"))
    }

    /// Parses a standard-base64 public key as carried in `pubKey` fields.
    ///
    /// # Errors
    /// Returns `InvalidKey` on bad base64, wrong length or invalid point.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|_| CoreError::invalid_key("public key is not valid base64"))?;
        let raw: [u8; ED25519_PUBLIC_KEY_SIZE] = bytes.as_slice().try_into().map_err(|_| {
            CoreError::invalid_key(format!(
                "public key must be {ED25519_PUBLIC_KEY_SIZE} bytes, got {}",
                bytes.len()
            ))
        })?;
        Self::from_bytes(&raw)
    }

    /// Returns the raw public key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; ED25519_PUBLIC_KEY_SIZE] {
        self.0.as_bytes()
    }

    /// Returns the standard-base64 form.
    #[must_use]
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0.as_bytes())
    }

    /// Returns the short display fingerprint (`a1b2:c3d4:e5f6:0718`).
    #[must_use]
    pub fn fingerprint(&self) -> String {
        fingerprint(self.as_bytes())
    }

    /// Verifies a signature over raw bytes.
    ///
    /// # Errors
    /// Returns `SignatureVerification` if the signature does not match.
    pub fn verify(&self, message: &[u8], signature: &[u8; ED25519_SIGNATURE_SIZE]) -> Result<()> {
        let sig = Signature::from_bytes(signature);
        self.0
            .verify_strict(message, &sig)
            .map_err(|_| CoreError::SignatureVerification)
    }

    /// Verifies a base64 signature over raw bytes.
    ///
    /// Any malformed input (bad base64, wrong length) yields `false`.
    #[must_use]
    pub fn verify_base64(&self, message: &[u8], signature: &str) -> bool {
        let Ok(bytes) = BASE64.decode(signature.trim()) else {
            return false;
        };
        let Ok(raw) = <[u8; ED25519_SIGNATURE_SIZE]>::try_from(bytes.as_slice()) else {
            return false;
        };
        self.verify(message, &raw).is_ok()
    }
}

impl Hash for IdentityPublicKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_bytes().hash(state);
    }
}

impl fmt::Debug for IdentityPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.0.as_bytes();
        write!(
            f,
            "IdentityPublicKey({:02x}{:02x}{:02x}{:02x}...)",
            bytes[0], bytes[1], bytes[2], bytes[3]
        )
    }
}

impl fmt::Display for IdentityPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_base64())
    }
}

impl std::str::FromStr for IdentityPublicKey {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_base64(s)
    }
}

impl Serialize for IdentityPublicKey {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for IdentityPublicKey {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_base64(&s).map_err(serde::de::Error::custom)
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify() {
        let identity = IdentityKeyPair::generate();
        let signature = identity.sign(b"hello");

        assert!(identity.public_key().verify(b"hello", &signature).is_ok());
        assert!(identity.public_key().verify(b"hellp", &signature).is_err());
    }

    #[test]
    fn test_verify_with_other_key_fails() {
        let a = IdentityKeyPair::generate();
        let b = IdentityKeyPair::generate();
        let signature = a.sign_base64(b"nonce");

        assert!(!b.public_key().verify_base64(b"nonce", &signature));
    }

    #[test]
    fn test_verify_base64_never_panics_on_garbage() {
        let key = IdentityKeyPair::generate().public_key();

        assert!(!key.verify_base64(b"m", ""));
        assert!(!key.verify_base64(b"m", "!!!not base64!!!"));
        assert!(!key.verify_base64(b"m", &BASE64.encode([0u8; 10])));
        assert!(!key.verify_base64(b"m", &BASE64.encode([0u8; 64])));
        assert!(!key.verify_base64(b"m", &BASE64.encode([0xffu8; 64])));
    }

    #[test]
    fn test_seed_roundtrip() {
        let original = IdentityKeyPair::generate();
        let restored = IdentityKeyPair::from_bytes(&original.to_bytes()).unwrap();
        assert_eq!(original.public_key(), restored.public_key());

        assert!(IdentityKeyPair::from_bytes(&[0u8; 31]).is_err());
    }

    #[test]
    fn test_public_key_base64_parsing() {
        let key = IdentityKeyPair::generate().public_key();
        let parsed = IdentityPublicKey::from_base64(&key.to_base64()).unwrap();
        assert_eq!(key, parsed);

        assert!(IdentityPublicKey::from_base64("short").is_err());
        assert!(IdentityPublicKey::from_base64(&BASE64.encode([1u8; 16])).is_err());
    }

    #[test]
    fn test_public_key_serde_is_base64_string() {
        let key = IdentityKeyPair::generate().public_key();
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, format!("\"{}\"", key.to_base64()));
    }

    #[test]
    fn test_debug_does_not_leak_secret() {
        let identity = IdentityKeyPair::generate();
        let debug = format!("{identity:?}");
        assert!(!debug.contains(&BASE64.encode(identity.to_bytes())));
        assert!(!debug.contains(&hex::encode(identity.to_bytes())));
    }
}
