// ============================================
// File: crates/warden-agent/src/identity.rs
// ============================================
//! # Agent Identity
//!
//! ## Creation Reason
//! Each agent owns one long-lived Ed25519 keypair that never leaves the host.
//! The public half is what the control plane knows the agent by.
//!
//! ## Main Functionality
//! - `AgentIdentity::load_or_generate`: first start creates the key file
//! - `sign_challenge`: proves possession during the handshake
//! - `regenerate`: replaces the key on a verified `REGENERATE_IDENTITY`
//!
//! ## ⚠️ Important Note for Next Developer
//! - After `regenerate` the control plane no longer recognises the agent;
//!   it has to enroll again with a fresh registration token
//!
//! ## Last Modified
//! v0.1.0 - Initial agent identity

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use warden_common::Timestamp;
use warden_core::{CoreError, IdentityKeyPair, IdentityPublicKey, KeyFile};

use crate::error::Result;

/// The agent's own keypair plus where it is stored.
pub struct AgentIdentity {
    keypair: IdentityKeyPair,
    path: PathBuf,
}

impl AgentIdentity {
    /// Loads the key file at `path`, or generates and saves a new key.
    ///
    /// # Errors
    /// Returns `Core(KeyFile)` if the file exists but is unreadable, or if
    /// a new key cannot be written.
    pub async fn load_or_generate(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let shown = path.display().to_string();

        let exists = tokio::fs::try_exists(&path)
            .await
            .map_err(|e| CoreError::key_file(&shown, e))?;

        let keypair = if exists {
            let keypair = KeyFile::load(&path).await?.to_identity()?;
            info!(
                path = %shown,
                fingerprint = %keypair.public_key().fingerprint(),
                "Loaded agent identity"
            );
            keypair
        } else {
            let keypair = IdentityKeyPair::generate();
            KeyFile::from_identity(&keypair, Timestamp::now())
                .save(&path)
                .await?;
            info!(
                path = %shown,
                fingerprint = %keypair.public_key().fingerprint(),
                "Generated new agent identity"
            );
            keypair
        };

        Ok(Self { keypair, path })
    }

    /// Wraps an in-memory keypair.
    #[must_use]
    pub fn from_keypair(keypair: IdentityKeyPair, path: impl Into<PathBuf>) -> Self {
        Self {
            keypair,
            path: path.into(),
        }
    }

    /// Public key the control plane knows this agent by.
    #[must_use]
    pub fn public_key(&self) -> IdentityPublicKey {
        self.keypair.public_key()
    }

    /// Signs the UTF-8 bytes of a challenge nonce, base64 encoded.
    #[must_use]
    pub fn sign_challenge(&self, nonce: &str) -> String {
        self.keypair.sign_base64(nonce.as_bytes())
    }

    /// Replaces the keypair and persists the new one.
    ///
    /// # Errors
    /// Returns `Core(KeyFile)` if the new key cannot be written; the old
    /// key stays in effect in that case.
    pub async fn regenerate(&mut self) -> Result<IdentityPublicKey> {
        let keypair = IdentityKeyPair::generate();
        KeyFile::from_identity(&keypair, Timestamp::now())
            .save(&self.path)
            .await?;

        warn!(
            old = %self.keypair.public_key().fingerprint(),
            new = %keypair.public_key().fingerprint(),
            "Agent identity regenerated; re-enrollment required"
        );
        self.keypair = keypair;
        Ok(self.keypair.public_key())
    }

    /// Key file location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for AgentIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentIdentity")
            .field("public_key", &self.keypair.public_key())
            .field("path", &self.path)
            .finish()
    }
}
