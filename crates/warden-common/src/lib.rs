// ============================================
// File: crates/warden-common/src/lib.rs
// ============================================
//! # Warden Common - Shared Foundation Library
//!
//! ## Creation Reason
//! Holds the identifiers, clocks and base error type that both sides of the
//! agent trust protocol (control plane and agent) need to agree on.
//!
//! ## Main Functionality
//! - [`types`]: Identifiers (`SessionId`, `NodeId`, `ConnectionId`) and random nonces
//! - [`time`]: Millisecond timestamps and atomic instants
//! - [`error`]: Common error type and result alias
//!
//! ## Architecture Position
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │      warden-server              warden-agent          │
//! │           │                          │                │
//! │     ┌─────┴──────────┐               │                │
//! │     ▼                ▼               ▼                │
//! │ warden-transport   warden-core ◄─────┘                │
//! │     │                │                                │
//! │     └───────┬────────┘                                │
//! │             ▼                                         │
//! │       warden-common  ◄── You are here                 │
//! └───────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Leaf crate: no internal dependencies
//! - Wire-visible formats (`NodeId` string, `SessionId` base64, ms timestamps)
//!   are shared with deployed agents; do not change them casually
//!
//! ## Last Modified
//! v0.1.0 - Initial implementation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod time;
pub mod types;

// Re-export commonly used items at crate root
pub use error::{CommonError, Result};
pub use time::Timestamp;
pub use types::{random_nonce, ConnectionId, NodeId, SessionId};
