// ============================================
// File: crates/warden-agent/src/lib.rs
// ============================================
//! # Warden Agent - Agent-Side Trust Library
//!
//! ## Creation Reason
//! Everything an agent needs to authenticate to the control plane and to
//! decide whether a command really came from it.
//!
//! ## Main Functionality
//! - [`identity`]: agent Ed25519 keypair on disk
//! - [`trust`]: pinned control-plane key and node id
//! - [`guard`]: replay / staleness / signature gate
//! - [`session`]: client-side protocol session
//! - [`client`]: out-of-band public-key fetch
//! - [`config`]: TOML configuration
//!
//! ## Usage
//! ```text
//! let identity = AgentIdentity::load_or_generate(&cfg.identity.key_file).await?;
//! let trust    = Arc::new(TrustStore::open(&cfg.trust.file).await?);
//! let guard    = Arc::new(ReplayGuard::from_config(&cfg.replay));
//! let mut s    = AgentSession::new(identity, trust, guard, token);
//!
//! ws.send(s.encode(&s.start()?)?);
//! while let Some(text) = ws.next() {
//!     for action in s.handle_frame(&text).await { /* send / execute / close */ }
//! }
//! ```
//!
//! ## Architecture Position
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │   warden-agent ◄── You are here               │
//! │        │                                      │
//! │        ▼                                      │
//! │   warden-core ──► warden-common               │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - The WebSocket itself is owned by the embedding agent binary
//!
//! ## Last Modified
//! v0.1.0 - Initial implementation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod config;
pub mod error;
pub mod guard;
pub mod identity;
pub mod session;
pub mod trust;

pub use client::ControlPlaneClient;
pub use config::AgentConfig;
pub use error::{AgentError, Result};
pub use guard::ReplayGuard;
pub use identity::AgentIdentity;
pub use session::{AgentAction, AgentPhase, AgentSession};
pub use trust::{TrustRecord, TrustStore};
