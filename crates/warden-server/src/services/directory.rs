// ============================================
// File: crates/warden-server/src/services/directory.rs
// ============================================
//! # Agent Directory
//!
//! ## Creation Reason
//! Maps enrolled agent public keys to node ids and holds the outstanding
//! single-use registration tokens.
//!
//! ## Main Functionality
//! - `lookup()`: key → node id for the CONNECT path
//! - `issue_token()`: operator-issued enrollment token with TTL
//! - `enroll()`: atomic token redemption for the REGISTER path
//! - `load()` / `persist()`: optional JSON snapshot of enrolled agents
//!
//! ## ⚠️ Important Note for Next Developer
//! - Token check, key check, token consumption and insert happen under a
//!   single lock; two REGISTERs racing on one token yield one enrollment
//! - A REGISTER for an already-enrolled key does NOT consume the token
//! - Tokens are never persisted; a restart invalidates them
//!
//! ## Last Modified
//! v0.1.0 - Initial directory

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use warden_common::{random_nonce, NodeId, Timestamp};
use warden_core::IdentityPublicKey;

use crate::error::{Result, ServerError};

/// Random bytes in a registration token.
const TOKEN_BYTES: usize = 32;

// ============================================
// Records
// ============================================

/// One enrolled agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRecord {
    /// Assigned node id.
    pub node_id: NodeId,
    /// Enrolled agent key.
    pub public_key: IdentityPublicKey,
    /// Enrollment time.
    pub enrolled_at: Timestamp,
}

/// Freshly issued registration token.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationToken {
    /// Token value to hand to the agent operator.
    pub token: String,
    /// Expiry time.
    pub expires_at: Timestamp,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    agents: Vec<AgentRecord>,
}

#[derive(Default)]
struct DirectoryState {
    by_key: HashMap<IdentityPublicKey, AgentRecord>,
    tokens: HashMap<String, Timestamp>,
}

// ============================================
// AgentDirectory
// ============================================

/// In-memory directory of enrolled agents.
pub struct AgentDirectory {
    state: Mutex<DirectoryState>,
    token_ttl: Duration,
    snapshot: Option<PathBuf>,
}

impl AgentDirectory {
    /// Creates an empty directory without persistence.
    #[must_use]
    pub fn new(token_ttl: Duration) -> Self {
        Self {
            state: Mutex::new(DirectoryState::default()),
            token_ttl,
            snapshot: None,
        }
    }

    /// Creates a directory backed by `snapshot`, loading it if it exists.
    ///
    /// # Errors
    /// Returns `Io` or `Internal` if an existing snapshot cannot be read.
    pub async fn load(token_ttl: Duration, snapshot: Option<PathBuf>) -> Result<Self> {
        let mut directory = Self::new(token_ttl);
        let Some(path) = snapshot else {
            return Ok(directory);
        };

        if tokio::fs::try_exists(&path).await? {
            let content = tokio::fs::read_to_string(&path).await?;
            let parsed: Snapshot = serde_json::from_str(&content).map_err(|e| {
                ServerError::internal(format!("directory snapshot {}: {e}", path.display()))
            })?;

            let mut state = directory.state.lock();
            for record in parsed.agents {
                state.by_key.insert(record.public_key, record);
            }
            info!(
                path = %path.display(),
                agents = state.by_key.len(),
                "Agent directory loaded"
            );
        }

        directory.snapshot = Some(path);
        Ok(directory)
    }

    /// Node id enrolled for `public_key`.
    #[must_use]
    pub fn lookup(&self, public_key: &IdentityPublicKey) -> Option<NodeId> {
        self.state.lock().by_key.get(public_key).map(|r| r.node_id)
    }

    /// Record for `node_id`.
    #[must_use]
    pub fn get(&self, node_id: NodeId) -> Option<AgentRecord> {
        self.state
            .lock()
            .by_key
            .values()
            .find(|r| r.node_id == node_id)
            .cloned()
    }

    /// Issues a new single-use registration token.
    #[must_use]
    pub fn issue_token(&self, now: Timestamp) -> RegistrationToken {
        let token = random_nonce(TOKEN_BYTES);
        let expires_at = now.plus(self.token_ttl);
        self.state.lock().tokens.insert(token.clone(), expires_at);
        debug!(expires_at = %expires_at.as_millis(), "Registration token issued");
        RegistrationToken { token, expires_at }
    }

    /// Redeems `token` for `public_key`.
    ///
    /// Returns `None` if the token is unknown, expired or already used, or if
    /// the key is already enrolled.
    pub fn enroll(
        &self,
        token: &str,
        public_key: IdentityPublicKey,
        now: Timestamp,
    ) -> Option<AgentRecord> {
        let mut state = self.state.lock();

        match state.tokens.get(token) {
            Some(expires_at) if *expires_at > now => {}
            Some(_) => {
                state.tokens.remove(token);
                debug!("Expired registration token presented");
                return None;
            }
            None => return None,
        }

        if state.by_key.contains_key(&public_key) {
            warn!(
                fingerprint = %public_key.fingerprint(),
                "Registration for already enrolled key"
            );
            return None;
        }

        state.tokens.remove(token);
        let record = AgentRecord {
            node_id: NodeId::generate(),
            public_key,
            enrolled_at: now,
        };
        state.by_key.insert(public_key, record.clone());

        info!(
            node_id = %record.node_id,
            fingerprint = %public_key.fingerprint(),
            "Agent enrolled"
        );
        Some(record)
    }

    /// Removes the agent with `node_id`.
    pub fn delete(&self, node_id: NodeId) -> Option<AgentRecord> {
        let mut state = self.state.lock();
        let key = state
            .by_key
            .iter()
            .find(|(_, r)| r.node_id == node_id)
            .map(|(k, _)| *k)?;
        let removed = state.by_key.remove(&key);
        if removed.is_some() {
            info!(node_id = %node_id, "Agent removed from directory");
        }
        removed
    }

    /// Drops expired tokens. Returns how many were removed.
    pub fn purge_expired(&self, now: Timestamp) -> usize {
        let mut state = self.state.lock();
        let before = state.tokens.len();
        state.tokens.retain(|_, expires_at| *expires_at > now);
        before - state.tokens.len()
    }

    /// All enrolled agents.
    #[must_use]
    pub fn agents(&self) -> Vec<AgentRecord> {
        self.state.lock().by_key.values().cloned().collect()
    }

    /// Number of enrolled agents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().by_key.len()
    }

    /// Returns `true` if nobody is enrolled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of outstanding tokens.
    #[must_use]
    pub fn pending_tokens(&self) -> usize {
        self.state.lock().tokens.len()
    }

    /// Writes the snapshot, if one is configured.
    ///
    /// # Errors
    /// Returns `Io` or `Internal` if the snapshot cannot be written.
    pub async fn persist(&self) -> Result<()> {
        let Some(path) = &self.snapshot else {
            return Ok(());
        };

        let snapshot = Snapshot {
            agents: self.agents(),
        };
        let content = serde_json::to_string_pretty(&snapshot)
            .map_err(|e| ServerError::internal(format!("directory snapshot: {e}")))?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, path).await?;

        debug!(path = %path.display(), agents = snapshot.agents.len(), "Directory persisted");
        Ok(())
    }
}

impl std::fmt::Debug for AgentDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("AgentDirectory")
            .field("agents", &state.by_key.len())
            .field("tokens", &state.tokens.len())
            .field("snapshot", &self.snapshot)
            .finish()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use warden_core::IdentityKeyPair;

    fn key() -> IdentityPublicKey {
        IdentityKeyPair::generate().public_key()
    }

    fn directory() -> AgentDirectory {
        AgentDirectory::new(Duration::from_secs(600))
    }

    #[test]
    fn test_token_is_single_use() {
        let dir = directory();
        let now = Timestamp::now();
        let token = dir.issue_token(now);

        let record = dir.enroll(&token.token, key(), now).unwrap();
        assert_eq!(dir.lookup(&record.public_key), Some(record.node_id));
        assert!(dir.enroll(&token.token, key(), now).is_none());
    }

    #[test]
    fn test_expired_token_rejected() {
        let dir = directory();
        let now = Timestamp::now();
        let token = dir.issue_token(now);

        let later = now.plus(Duration::from_secs(601));
        assert!(dir.enroll(&token.token, key(), later).is_none());
        assert_eq!(dir.pending_tokens(), 0);
    }

    #[test]
    fn test_unknown_token_rejected() {
        let dir = directory();
        assert!(dir.enroll("nope", key(), Timestamp::now()).is_none());
        assert!(dir.is_empty());
    }

    #[test]
    fn test_enrolled_key_does_not_consume_token() {
        let dir = directory();
        let now = Timestamp::now();
        let pk = key();
        let first = dir.issue_token(now);
        dir.enroll(&first.token, pk, now).unwrap();

        let second = dir.issue_token(now);
        assert!(dir.enroll(&second.token, pk, now).is_none());
        assert!(dir.enroll(&second.token, key(), now).is_some());
    }

    #[test]
    fn test_concurrent_redemption_enrolls_once() {
        let dir = Arc::new(directory());
        let now = Timestamp::now();
        let token = dir.issue_token(now).token;

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let dir = Arc::clone(&dir);
                let token = token.clone();
                std::thread::spawn(move || dir.enroll(&token, key(), now).is_some())
            })
            .collect();

        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(wins, 1);
        assert_eq!(dir.len(), 1);
    }

    #[test]
    fn test_delete_and_purge() {
        let dir = directory();
        let now = Timestamp::now();
        let token = dir.issue_token(now);
        let record = dir.enroll(&token.token, key(), now).unwrap();

        assert!(dir.delete(record.node_id).is_some());
        assert!(dir.lookup(&record.public_key).is_none());
        assert!(dir.delete(record.node_id).is_none());

        let _ = dir.issue_token(now);
        let _ = dir.issue_token(now.plus(Duration::from_secs(1200)));
        assert_eq!(dir.purge_expired(now.plus(Duration::from_secs(700))), 1);
        assert_eq!(dir.pending_tokens(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("agents.json");

        let dir = AgentDirectory::load(Duration::from_secs(60), Some(path.clone()))
            .await
            .unwrap();
        let now = Timestamp::now();
        let token = dir.issue_token(now);
        let record = dir.enroll(&token.token, key(), now).unwrap();
        dir.persist().await.unwrap();

        let reloaded = AgentDirectory::load(Duration::from_secs(60), Some(path))
            .await
            .unwrap();
        assert_eq!(reloaded.get(record.node_id), Some(record));
        assert_eq!(reloaded.pending_tokens(), 0);
    }
}
