// ============================================
// File: crates/warden-agent/src/trust.rs
// ============================================
//! # Trusted Control-Plane Key
//!
//! ## Creation Reason
//! The agent only obeys commands signed by the control-plane key it has
//! pinned. This module holds that key, the node id assigned at enrollment,
//! and persists both.
//!
//! ## Trust Lifecycle
//! ```text
//!  out-of-band fetch ──► pin()                 (optional, before enrolling)
//!  REGISTERED        ──► accept_registration() (pins if nothing pinned yet,
//!                                               must match otherwise)
//!  CP_KEY_ROTATION   ──► rotate()              (only after the rotation
//!                                               command verified under the
//!                                               currently pinned key)
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - The file is rewritten via temp file + rename, so a crash mid-write
//!   leaves the previous key in place
//!
//! ## Last Modified
//! v0.1.0 - Initial trust store

use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use warden_common::{NodeId, Timestamp};
use warden_core::{CoreError, IdentityPublicKey};

use crate::error::{AgentError, Result};

// ============================================
// TrustRecord
// ============================================

/// On-disk trust state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustRecord {
    /// Pinned control-plane key, base64.
    pub public_key: String,
    /// Fingerprint of `public_key`.
    pub fingerprint: String,
    /// Node id assigned by the control plane, once enrolled.
    #[serde(default)]
    pub node_id: Option<NodeId>,
    /// Last modification.
    pub updated_at: Timestamp,
}

impl TrustRecord {
    fn new(key: &IdentityPublicKey, node_id: Option<NodeId>) -> Self {
        Self {
            public_key: key.to_base64(),
            fingerprint: key.fingerprint(),
            node_id,
            updated_at: Timestamp::now(),
        }
    }
}

// ============================================
// TrustStore
// ============================================

/// Pinned control-plane key and enrollment state.
#[derive(Debug)]
pub struct TrustStore {
    path: PathBuf,
    key: RwLock<Option<IdentityPublicKey>>,
    record: RwLock<Option<TrustRecord>>,
}

impl TrustStore {
    /// Opens the trust file at `path`; a missing file means nothing is pinned.
    ///
    /// # Errors
    /// Returns `Core(KeyFile)` if the file exists but is unreadable or holds
    /// an invalid key.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let shown = path.display().to_string();

        let exists = tokio::fs::try_exists(&path)
            .await
            .map_err(|e| CoreError::key_file(&shown, e))?;
        if !exists {
            debug!(path = %shown, "No trusted control-plane key yet");
            return Ok(Self::empty(path));
        }

        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| CoreError::key_file(&shown, e))?;
        let record: TrustRecord =
            serde_json::from_str(&content).map_err(|e| CoreError::key_file(&shown, e))?;
        let key = IdentityPublicKey::from_base64(&record.public_key)?;

        info!(
            path = %shown,
            fingerprint = %record.fingerprint,
            enrolled = record.node_id.is_some(),
            "Loaded trusted control-plane key"
        );

        Ok(Self {
            path,
            key: RwLock::new(Some(key)),
            record: RwLock::new(Some(record)),
        })
    }

    /// Creates a store with nothing pinned.
    #[must_use]
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            key: RwLock::new(None),
            record: RwLock::new(None),
        }
    }

    /// Currently pinned control-plane key.
    #[must_use]
    pub fn trusted_key(&self) -> Option<IdentityPublicKey> {
        *self.key.read()
    }

    /// Node id assigned at enrollment.
    #[must_use]
    pub fn node_id(&self) -> Option<NodeId> {
        self.record.read().as_ref().and_then(|r| r.node_id)
    }

    /// Snapshot of the persisted record.
    #[must_use]
    pub fn record(&self) -> Option<TrustRecord> {
        self.record.read().clone()
    }

    /// Pins `key` obtained out of band, keeping any node id.
    ///
    /// # Errors
    /// Returns `Core(KeyFile)` if the record cannot be persisted.
    pub async fn pin(&self, key: IdentityPublicKey) -> Result<()> {
        info!(fingerprint = %key.fingerprint(), "Pinning control-plane key");
        self.replace(key, self.node_id()).await
    }

    /// Records a successful enrollment.
    ///
    /// # Errors
    /// Returns `TrustMismatch` if a different key is already pinned, or
    /// `Core(KeyFile)` if the record cannot be persisted.
    pub async fn accept_registration(
        &self,
        node_id: NodeId,
        cp_key: IdentityPublicKey,
    ) -> Result<()> {
        if let Some(pinned) = self.trusted_key() {
            if pinned != cp_key {
                warn!(
                    pinned = %pinned.fingerprint(),
                    offered = %cp_key.fingerprint(),
                    "REGISTERED carried an unexpected control-plane key"
                );
                return Err(AgentError::TrustMismatch {
                    pinned: pinned.fingerprint(),
                    offered: cp_key.fingerprint(),
                });
            }
        }

        info!(node_id = %node_id, fingerprint = %cp_key.fingerprint(), "Enrollment recorded");
        self.replace(cp_key, Some(node_id)).await
    }

    /// Replaces the pinned key after a verified rotation.
    ///
    /// # Errors
    /// Returns `Core(KeyFile)` if the record cannot be persisted.
    pub async fn rotate(&self, new_key: IdentityPublicKey) -> Result<()> {
        let old = self.trusted_key().map(|k| k.fingerprint()).unwrap_or_default();
        info!(old = %old, new = %new_key.fingerprint(), "Control-plane key rotated");
        self.replace(new_key, self.node_id()).await
    }

    /// Drops the node id, e.g. after the agent regenerated its identity.
    ///
    /// # Errors
    /// Returns `Core(KeyFile)` if the record cannot be persisted.
    pub async fn forget_enrollment(&self) -> Result<()> {
        match self.trusted_key() {
            Some(key) => self.replace(key, None).await,
            None => Ok(()),
        }
    }

    async fn replace(&self, key: IdentityPublicKey, node_id: Option<NodeId>) -> Result<()> {
        let record = TrustRecord::new(&key, node_id);
        self.persist(&record).await?;
        *self.key.write() = Some(key);
        *self.record.write() = Some(record);
        Ok(())
    }

    async fn persist(&self, record: &TrustRecord) -> Result<()> {
        let shown = self.path.display().to_string();
        let err = |e: std::io::Error| CoreError::key_file(&shown, e);

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(err)?;
        }

        let content = serde_json::to_string_pretty(record)
            .map_err(|e| CoreError::key_file(&shown, e))?;

        let mut tmp = self.path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, content).await.map_err(err)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))
                .await
                .map_err(err)?;
        }

        tokio::fs::rename(&tmp, &self.path).await.map_err(err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::IdentityKeyPair;

    #[tokio::test]
    async fn test_missing_file_means_untrusted() {
        let dir = tempfile::tempdir().unwrap();
        let store = TrustStore::open(dir.path().join("trust.json")).await.unwrap();
        assert!(store.trusted_key().is_none());
        assert!(store.node_id().is_none());
    }

    #[tokio::test]
    async fn test_registration_pins_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trust.json");
        let cp = IdentityKeyPair::generate().public_key();
        let node_id = NodeId::generate();

        let store = TrustStore::open(&path).await.unwrap();
        store.accept_registration(node_id, cp).await.unwrap();

        let reopened = TrustStore::open(&path).await.unwrap();
        assert_eq!(reopened.trusted_key(), Some(cp));
        assert_eq!(reopened.node_id(), Some(node_id));
        assert_eq!(reopened.record().unwrap().fingerprint, cp.fingerprint());
    }

    #[tokio::test]
    async fn test_registration_with_different_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = TrustStore::open(dir.path().join("trust.json")).await.unwrap();
        let pinned = IdentityKeyPair::generate().public_key();
        let other = IdentityKeyPair::generate().public_key();

        store.pin(pinned).await.unwrap();
        let err = store
            .accept_registration(NodeId::generate(), other)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::TrustMismatch { .. }));
        assert_eq!(store.trusted_key(), Some(pinned));
        assert!(store.node_id().is_none());
    }

    #[tokio::test]
    async fn test_rotation_keeps_node_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trust.json");
        let store = TrustStore::open(&path).await.unwrap();
        let node_id = NodeId::generate();
        let old = IdentityKeyPair::generate().public_key();
        let new = IdentityKeyPair::generate().public_key();

        store.accept_registration(node_id, old).await.unwrap();
        store.rotate(new).await.unwrap();

        let reopened = TrustStore::open(&path).await.unwrap();
        assert_eq!(reopened.trusted_key(), Some(new));
        assert_eq!(reopened.node_id(), Some(node_id));
    }

    #[tokio::test]
    async fn test_forget_enrollment() {
        let dir = tempfile::tempdir().unwrap();
        let store = TrustStore::open(dir.path().join("trust.json")).await.unwrap();
        let cp = IdentityKeyPair::generate().public_key();

        store.accept_registration(NodeId::generate(), cp).await.unwrap();
        store.forget_enrollment().await.unwrap();
        assert!(store.node_id().is_none());
        assert_eq!(store.trusted_key(), Some(cp));
    }
}
