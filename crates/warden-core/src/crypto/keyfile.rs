// ============================================
// File: crates/warden-core/src/crypto/keyfile.rs
// ============================================
//! # Key File Persistence
//!
//! ## Creation Reason
//! The control-plane keypair and each agent identity must survive restarts
//! and must never be readable by other users on the host.
//!
//! ## File Format
//! ```json
//! {
//!   "version": "1.0",
//!   "key_type": "ed25519",
//!   "public_key": "<base64>",
//!   "private_key": "<base64 seed>",
//!   "created_at": 1737820800000
//! }
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Writes go to `<path>.tmp` (0600) and are renamed over the target, so a
//!   crash mid-write leaves either the old file or the new one
//! - `load` cross-checks the stored public key against the seed
//!
//! ## Last Modified
//! v0.1.0 - Initial key file format

use std::path::Path;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use tracing::debug;
use zeroize::Zeroize;

use warden_common::Timestamp;

use super::IdentityKeyPair;
use crate::error::{CoreError, Result};

/// Current key file version.
pub const KEY_FILE_VERSION: &str = "1.0";

/// Key type tag written to every key file.
pub const KEY_TYPE_ED25519: &str = "ed25519";

/// On-disk representation of an Ed25519 keypair.
#[derive(Clone, Serialize, Deserialize)]
pub struct KeyFile {
    /// Format version.
    pub version: String,
    /// Always `ed25519`.
    pub key_type: String,
    /// Base64 public key.
    pub public_key: String,
    /// Base64 32-byte seed.
    pub private_key: String,
    /// Creation time, Unix milliseconds.
    pub created_at: Timestamp,
}

impl KeyFile {
    /// Builds a key file record for `identity`.
    #[must_use]
    pub fn from_identity(identity: &IdentityKeyPair, created_at: Timestamp) -> Self {
        let mut seed = identity.to_bytes();
        let private_key = BASE64.encode(seed);
        seed.zeroize();
        Self {
            version: KEY_FILE_VERSION.to_string(),
            key_type: KEY_TYPE_ED25519.to_string(),
            public_key: identity.public_key().to_base64(),
            private_key,
            created_at,
        }
    }

    /// Reconstructs the keypair, checking the stored public key matches.
    ///
    /// # Errors
    /// Returns `InvalidKey` for a wrong key type, bad seed or mismatch.
    pub fn to_identity(&self) -> Result<IdentityKeyPair> {
        if self.key_type != KEY_TYPE_ED25519 {
            return Err(CoreError::invalid_key(format!(
                "unsupported key type '{}'",
                self.key_type
            )));
        }

        let mut seed = BASE64
            .decode(&self.private_key)
            .map_err(|_| CoreError::invalid_key("private key is not valid base64"))?;
        let identity = IdentityKeyPair::from_bytes(&seed);
        seed.zeroize();
        let identity = identity?;

        if identity.public_key().to_base64() != self.public_key {
            return Err(CoreError::invalid_key(
                "stored public key does not match private key",
            ));
        }
        Ok(identity)
    }

    /// Loads a key file.
    ///
    /// # Errors
    /// Returns `KeyFile` on I/O or JSON errors, `InvalidKey` on bad content.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let shown = path.display().to_string();

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| CoreError::key_file(&shown, e))?;
        let file: Self =
            serde_json::from_str(&content).map_err(|e| CoreError::key_file(&shown, e))?;
        file.to_identity()?;
        Ok(file)
    }

    /// Atomically writes the key file with owner-only permissions.
    ///
    /// # Errors
    /// Returns `KeyFile` if any filesystem step fails.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let shown = path.display().to_string();
        let err = |e: std::io::Error| CoreError::key_file(&shown, e);

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(err)?;
        }

        let content =
            serde_json::to_string_pretty(self).map_err(|e| CoreError::key_file(&shown, e))?;

        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = std::path::PathBuf::from(tmp);

        tokio::fs::write(&tmp, content).await.map_err(err)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            tokio::fs::set_permissions(&tmp, perms).await.map_err(err)?;
        }

        tokio::fs::rename(&tmp, path).await.map_err(err)?;
        debug!(path = %shown, "Key file written");
        Ok(())
    }
}

impl std::fmt::Debug for KeyFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyFile")
            .field("version", &self.version)
            .field("key_type", &self.key_type)
            .field("public_key", &self.public_key)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

impl Drop for KeyFile {
    fn drop(&mut self) {
        self.private_key.zeroize();
    }
}

// ============================================
// Tests
// ============================================
