// ============================================
// File: crates/warden-server/src/services/keystore.rs
// ============================================
//! # Control-Plane Key Store
//!
//! ## Creation Reason
//! Owns the control-plane Ed25519 keypair: lazy creation on first use,
//! persistence, and rotation.
//!
//! ## Main Functionality
//! - `get_or_generate_keys()`: idempotent, load-or-create, cached
//! - `rotate_keys()`: new pair, persisted before the in-memory swap
//! - `current()`: lock-free-ish read of the cached keys
//!
//! ## Concurrency
//! ```text
//!   readers ──► RwLock<Option<Arc<ControlPlaneKeys>>>  (clone the Arc, release)
//!   writers ──► tokio Mutex<()> ──► disk ──► swap Arc
//! ```
//! Generation and rotation are serialized by the async mutex so concurrent
//! callers all observe a single generation. Readers never wait on disk I/O.
//!
//! ## ⚠️ Important Note for Next Developer
//! - Rotation writes the new key file (temp + rename) BEFORE swapping the
//!   cache; a failed write leaves the previous key fully in effect
//! - Callers that need the previous key (rotation announcement) must use
//!   the `KeyRotation` returned here, not `current()`
//!
//! ## Last Modified
//! v0.1.0 - Initial key store

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, info};

use warden_common::Timestamp;
use warden_core::{IdentityKeyPair, IdentityPublicKey, KeyFile};

use crate::error::{Result, ServerError};

// ============================================
// ControlPlaneKeys
// ============================================

/// One generation of the control-plane keypair.
pub struct ControlPlaneKeys {
    keypair: IdentityKeyPair,
    public_key: IdentityPublicKey,
    fingerprint: String,
    created_at: Timestamp,
}

impl ControlPlaneKeys {
    fn new(keypair: IdentityKeyPair, created_at: Timestamp) -> Self {
        let public_key = keypair.public_key();
        Self {
            fingerprint: public_key.fingerprint(),
            keypair,
            public_key,
            created_at,
        }
    }

    /// Signing key.
    #[must_use]
    pub const fn keypair(&self) -> &IdentityKeyPair {
        &self.keypair
    }

    /// Public key.
    #[must_use]
    pub const fn public_key(&self) -> &IdentityPublicKey {
        &self.public_key
    }

    /// Display fingerprint of the public key.
    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// When this generation was created.
    #[must_use]
    pub const fn created_at(&self) -> Timestamp {
        self.created_at
    }
}

impl std::fmt::Debug for ControlPlaneKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlPlaneKeys")
            .field("fingerprint", &self.fingerprint)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// Outcome of a rotation.
#[derive(Debug, Clone)]
pub struct KeyRotation {
    /// Generation that was replaced.
    pub previous: Arc<ControlPlaneKeys>,
    /// Generation now in effect.
    pub current: Arc<ControlPlaneKeys>,
}

// ============================================
// KeyStore
// ============================================

/// Persistent, rotatable control-plane keypair.
pub struct KeyStore {
    path: PathBuf,
    current: RwLock<Option<Arc<ControlPlaneKeys>>>,
    generation: Mutex<()>,
}

impl KeyStore {
    /// Creates a store backed by `path`. Nothing is read until first use.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            current: RwLock::new(None),
            generation: Mutex::new(()),
        }
    }

    /// Key file location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Cached keys, if already loaded.
    #[must_use]
    pub fn current(&self) -> Option<Arc<ControlPlaneKeys>> {
        self.current.read().clone()
    }

    /// Returns the keys, loading them from disk or generating them once.
    ///
    /// # Errors
    /// Returns `KeyStore` if the file is unreadable or a new key cannot be
    /// persisted.
    pub async fn get_or_generate_keys(&self) -> Result<Arc<ControlPlaneKeys>> {
        if let Some(keys) = self.current() {
            return Ok(keys);
        }

        let _guard = self.generation.lock().await;
        self.load_or_create_locked().await
    }

    /// Replaces the keypair.
    ///
    /// # Errors
    /// Returns `KeyStore` if the new key cannot be persisted; the previous
    /// key stays active in that case.
    pub async fn rotate_keys(&self) -> Result<KeyRotation> {
        let _guard = self.generation.lock().await;
        let previous = self.load_or_create_locked().await?;

        let created_at = Timestamp::now();
        let keypair = IdentityKeyPair::generate();
        self.persist(&keypair, created_at).await?;

        let current = Arc::new(ControlPlaneKeys::new(keypair, created_at));
        *self.current.write() = Some(Arc::clone(&current));

        info!(
            previous = %previous.fingerprint(),
            current = %current.fingerprint(),
            "Control-plane key rotated"
        );

        Ok(KeyRotation { previous, current })
    }

    /// Display fingerprint for any public key.
    #[must_use]
    pub fn fingerprint(public_key: &IdentityPublicKey) -> String {
        public_key.fingerprint()
    }

    async fn load_or_create_locked(&self) -> Result<Arc<ControlPlaneKeys>> {
        if let Some(keys) = self.current() {
            return Ok(keys);
        }

        let exists = tokio::fs::try_exists(&self.path)
            .await
            .map_err(ServerError::key_store)?;

        let keys = if exists {
            let file = KeyFile::load(&self.path)
                .await
                .map_err(ServerError::key_store)?;
            let keypair = file.to_identity().map_err(ServerError::key_store)?;
            let keys = ControlPlaneKeys::new(keypair, file.created_at);
            info!(
                path = %self.path.display(),
                fingerprint = %keys.fingerprint(),
                "Loaded control-plane key"
            );
            keys
        } else {
            let created_at = Timestamp::now();
            let keypair = IdentityKeyPair::generate();
            self.persist(&keypair, created_at).await?;
            let keys = ControlPlaneKeys::new(keypair, created_at);
            info!(
                path = %self.path.display(),
                fingerprint = %keys.fingerprint(),
                "Generated control-plane key"
            );
            keys
        };

        let keys = Arc::new(keys);
        *self.current.write() = Some(Arc::clone(&keys));
        Ok(keys)
    }

    async fn persist(&self, keypair: &IdentityKeyPair, created_at: Timestamp) -> Result<()> {
        KeyFile::from_identity(keypair, created_at)
            .save(&self.path)
            .await
            .map_err(ServerError::key_store)?;
        debug!(path = %self.path.display(), "Control-plane key persisted");
        Ok(())
    }
}

impl std::fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyStore")
            .field("path", &self.path)
            .field("loaded", &self.current.read().is_some())
            .finish()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_generate_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::new(dir.path().join("cp.json"));

        let a = store.get_or_generate_keys().await.unwrap();
        let b = store.get_or_generate_keys().await.unwrap();
        assert_eq!(a.public_key(), b.public_key());

        let reopened = KeyStore::new(dir.path().join("cp.json"));
        let c = reopened.get_or_generate_keys().await.unwrap();
        assert_eq!(a.public_key(), c.public_key());
    }

    #[tokio::test]
    async fn test_concurrent_callers_see_one_generation() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(KeyStore::new(dir.path().join("cp.json")));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                *store.get_or_generate_keys().await.unwrap().public_key()
            }));
        }

        let mut keys = Vec::new();
        for handle in handles {
            keys.push(handle.await.unwrap());
        }
        assert!(keys.windows(2).all(|w| w[0] == w[1]));
    }

    #[tokio::test]
    async fn test_rotation_swaps_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cp.json");
        let store = KeyStore::new(&path);

        let before = store.get_or_generate_keys().await.unwrap();
        let rotation = store.rotate_keys().await.unwrap();

        assert_eq!(rotation.previous.public_key(), before.public_key());
        assert_ne!(rotation.current.public_key(), before.public_key());
        assert_eq!(
            store.current().unwrap().public_key(),
            rotation.current.public_key()
        );

        let reopened = KeyStore::new(&path);
        let loaded = reopened.get_or_generate_keys().await.unwrap();
        assert_eq!(loaded.public_key(), rotation.current.public_key());
    }

    #[tokio::test]
    async fn test_rotation_signatures() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::new(dir.path().join("cp.json"));

        let old = store.get_or_generate_keys().await.unwrap();
        let historic = old.keypair().sign(b"before rotation");

        let rotation = store.rotate_keys().await.unwrap();
        let fresh = rotation.current.keypair().sign(b"after rotation");

        assert!(old.public_key().verify(b"before rotation", &historic).is_ok());
        assert!(old.public_key().verify(b"after rotation", &fresh).is_err());
        assert!(rotation
            .current
            .public_key()
            .verify(b"after rotation", &fresh)
            .is_ok());
    }

    #[tokio::test]
    async fn test_failed_persist_keeps_previous_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cp.json");
        let store = KeyStore::new(&path);
        let before = store.get_or_generate_keys().await.unwrap();

        // A directory where the temp file should go makes the write fail.
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        std::fs::create_dir(std::path::PathBuf::from(tmp)).unwrap();

        assert!(store.rotate_keys().await.is_err());
        assert_eq!(store.current().unwrap().public_key(), before.public_key());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cp.json");
        std::fs::write(&path, "{}").unwrap();

        let err = KeyStore::new(&path).get_or_generate_keys().await.unwrap_err();
        assert!(err.is_fatal());
    }
}
