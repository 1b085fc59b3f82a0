// ============================================
// File: crates/warden-agent/src/guard.rs
// ============================================
//! # Replay Guard
//!
//! ## Creation Reason
//! A valid signature only proves the control plane produced a command at
//! some point. The guard adds freshness: a command is accepted once, and
//! only close to the time it was signed.
//!
//! ## Check Order
//! ```text
//!   1. |now - timestamp| <= max_drift   else Stale
//!   2. nonce not seen                   else Replay
//!   3. trusted key present              else NoTrustedKey
//!   4. signature verifies               else Forged
//!   5. type is a privileged command     else UnsignedType
//!   ── accept: remember nonce
//! ```
//!
//! ## Nonce Generations
//! ```text
//!   t0 ─────────── t0+I ─────────── t0+2I ──────────►
//!   [ current  ]   [ current  ]     [ current  ]
//!                  [ previous ]     [ previous ]
//! ```
//! Every `clear_interval` (I) the current set becomes the previous set and
//! the old previous set is dropped. A nonce is therefore remembered for at
//! least I, and config enforces I >= 2 * max_drift so nothing is forgotten
//! while its command is still fresh.
//!
//! ## ⚠️ Important Note for Next Developer
//! - A rejected command must NOT record its nonce, otherwise a forged frame
//!   could burn the nonce of a legitimate one
//! - The nonce set is process-local; a restarted agent relies on the drift
//!   window alone until it has seen traffic again
//!
//! ## Last Modified
//! v0.1.0 - Initial replay guard

use std::collections::HashSet;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use warden_common::Timestamp;
use warden_core::{CommandType, CoreError, IdentityPublicKey, SignedCommand};

use crate::config::ReplayConfig;

// ============================================
// NonceGenerations
// ============================================

#[derive(Debug, Default)]
struct NonceGenerations {
    current: HashSet<String>,
    previous: HashSet<String>,
    rotated_at: Option<Timestamp>,
}

impl NonceGenerations {
    fn rotate_if_due(&mut self, now: Timestamp, interval: Duration) {
        let Some(rotated_at) = self.rotated_at else {
            self.rotated_at = Some(now);
            return;
        };

        let elapsed = now.distance(rotated_at);
        if now < rotated_at || elapsed < interval {
            return;
        }

        if elapsed >= interval * 2 {
            self.previous.clear();
            self.current.clear();
        } else {
            self.previous = std::mem::take(&mut self.current);
        }
        self.rotated_at = Some(now);
        debug!(remembered = self.previous.len(), "Nonce generation rotated");
    }

    fn contains(&self, nonce: &str) -> bool {
        self.current.contains(nonce) || self.previous.contains(nonce)
    }
}

// ============================================
// ReplayGuard
// ============================================

/// Freshness and authenticity gate for signed commands.
#[derive(Debug)]
pub struct ReplayGuard {
    max_drift: Duration,
    clear_interval: Duration,
    nonces: Mutex<NonceGenerations>,
}

impl ReplayGuard {
    /// Creates a guard with explicit limits.
    #[must_use]
    pub fn new(max_drift: Duration, clear_interval: Duration) -> Self {
        Self {
            max_drift,
            clear_interval,
            nonces: Mutex::new(NonceGenerations::default()),
        }
    }

    /// Creates a guard from the `[replay]` config section.
    #[must_use]
    pub fn from_config(config: &ReplayConfig) -> Self {
        Self::new(config.max_drift(), config.clear_interval())
    }

    /// Checks `command` against the current wall clock.
    ///
    /// # Errors
    /// See [`ReplayGuard::check_at`].
    pub fn check(
        &self,
        command: &SignedCommand,
        key: Option<&IdentityPublicKey>,
    ) -> Result<CommandType, CoreError> {
        self.check_at(command, key, Timestamp::now())
    }

    /// Checks `command` as of `now` and records its nonce on success.
    ///
    /// # Errors
    /// - `StaleCommand` if the timestamp is outside the drift window
    /// - `ReplayDetected` if the nonce was already accepted
    /// - `NoTrustedKey` if `key` is `None`
    /// - `ForgedCommand` if the signature does not verify
    /// - `UnsignedCommandType` if the type is not a privileged command
    pub fn check_at(
        &self,
        command: &SignedCommand,
        key: Option<&IdentityPublicKey>,
        now: Timestamp,
    ) -> Result<CommandType, CoreError> {
        if !command.timestamp.is_within(now, self.max_drift) {
            return Err(CoreError::StaleCommand {
                drift_ms: u64::try_from(command.timestamp.distance(now).as_millis())
                    .unwrap_or(u64::MAX),
                max_drift_ms: u64::try_from(self.max_drift.as_millis()).unwrap_or(u64::MAX),
            });
        }

        let mut nonces = self.nonces.lock();
        nonces.rotate_if_due(now, self.clear_interval);

        if command.nonce.is_empty() || nonces.contains(&command.nonce) {
            return Err(CoreError::ReplayDetected);
        }

        let key = key.ok_or(CoreError::NoTrustedKey)?;
        command.verify(key)?;
        let kind = command.kind()?;

        nonces.current.insert(command.nonce.clone());
        Ok(kind)
    }

    /// Number of nonces currently remembered.
    #[must_use]
    pub fn remembered(&self) -> usize {
        let nonces = self.nonces.lock();
        nonces.current.len() + nonces.previous.len()
    }

    /// Configured drift window.
    #[must_use]
    pub const fn max_drift(&self) -> Duration {
        self.max_drift
    }
}

impl Default for ReplayGuard {
    fn default() -> Self {
        Self::from_config(&ReplayConfig::default())
    }
}

// ============================================
// Tests
// ============================================
