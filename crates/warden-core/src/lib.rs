// ============================================
// File: crates/warden-core/src/lib.rs
// ============================================
//! # Warden Core - Trust Protocol & Cryptography Library
//!
//! ## Creation Reason
//! Everything both ends of the agent channel must agree on bit-for-bit:
//! key formats, signature rules, frame layouts, the canonical command
//! encoding and the handshake rules.
//!
//! ## Main Functionality
//!
//! ### Crypto ([`crypto`])
//! - `IdentityKeyPair` / `IdentityPublicKey` (Ed25519)
//! - Key fingerprints and JSON key files
//!
//! ### Protocol ([`protocol`])
//! - `AgentMessage`, `ServerMessage`, `CommandType`
//! - `JsonCodec` with frame size limit
//! - Canonical signing input
//!
//! ### Commands ([`command`])
//! - `SignedCommand` sign / verify
//!
//! ### Handshake ([`handshake`])
//! - Pure `(state, event) -> (state, effects)` machine
//!
//! ## Architecture Position
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │      warden-server              warden-agent          │
//! │           │                          │                │
//! │           ▼                          ▼                │
//! │       warden-core  ◄── You are here                   │
//! │           │                                           │
//! │           ▼                                           │
//! │     warden-common                                     │
//! └───────────────────────────────────────────────────────┘
//! ```
//!
//! ## Security Guarantees
//! - **Authenticity**: agents prove key possession by signing a fresh nonce
//! - **Integrity**: privileged commands carry a control-plane signature
//! - **Freshness**: commands carry timestamp + nonce for replay checks
//!
//! ## ⚠️ Important Note for Next Developer
//! - NEVER implement custom crypto primitives
//! - Wire changes break deployed agents
//!
//! ## Last Modified
//! v0.1.0 - Initial implementation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod command;
pub mod crypto;
pub mod error;
pub mod handshake;
pub mod protocol;

// Re-export commonly used items
pub use command::SignedCommand;
pub use crypto::{fingerprint, verify_signature, IdentityKeyPair, IdentityPublicKey, KeyFile};
pub use error::{CoreError, Result};
pub use handshake::{
    AuthPath, Enrollment, HandshakeEffect, HandshakeEvent, HandshakeMachine, HandshakeState,
    TimeoutKind,
};
pub use protocol::{AgentMessage, CommandType, JsonCodec, PublicKeyInfo, ServerFrame, ServerMessage};
