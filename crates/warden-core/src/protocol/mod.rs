// ============================================
// File: crates/warden-core/src/protocol/mod.rs
// ============================================
//! # Protocol Module
//!
//! ## Creation Reason
//! Defines the JSON wire protocol spoken over the agent WebSocket.
//!
//! ### Submodules
//! - [`messages`]: Typed frames and command type tags
//! - [`codec`]: Size-limited JSON decode/encode
//! - [`canonical`]: Deterministic signing input for commands
//!
//! ## Protocol Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Known agent (CONNECT path)                  │
//! │  Agent ── CONNECT{pubKey} ─────────────────────► CP         │
//! │  Agent ◄───────────────────── CHALLENGE{nonce} ─ CP         │
//! │  Agent ── RESPONSE{sig(nonce)} ────────────────► CP         │
//! │  Agent ◄─────────────────── AUTHORIZED{sessionId} CP        │
//! ├─────────────────────────────────────────────────────────────┤
//! │                 New agent (REGISTER path)                   │
//! │  Agent ── REGISTER{token, pubKey} ─────────────► CP         │
//! │  Agent ◄──────── REGISTERED{serverId, cpPublicKey} CP       │
//! ├─────────────────────────────────────────────────────────────┤
//! │                 Authorized                                  │
//! │  Agent ◄══════ signed commands (DEPLOY, ...) ══════ CP      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Type tags and camelCase field names are shared with deployed agents
//!
//! ## Last Modified
//! v0.1.0 - Initial protocol definitions

pub mod canonical;
pub mod codec;
pub mod messages;

pub use canonical::{canonicalize, signing_input};
pub use codec::{JsonCodec, ServerFrame, DEFAULT_MAX_FRAME_SIZE};
pub use messages::{
    is_unsigned_server_type, AgentMessage, CommandType, PublicKeyInfo, ServerMessage, AUTH_FAILED_MESSAGE,
    INVALID_SIGNATURE_MESSAGE,
};
