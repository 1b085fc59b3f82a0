// ============================================
// File: crates/warden-transport/src/lib.rs
// ============================================
//! # Warden Transport - Connection Handles
//!
//! ## Creation Reason
//! Decouples the trust protocol from the socket implementation. The server
//! wires axum WebSockets into [`ChannelConnection`]s; tests use
//! [`MockConnection`].
//!
//! ## Main Functionality
//! - [`traits`]: `Connection` trait and `Frame`
//! - [`channel`]: mpsc-backed handle drained by a socket writer task
//! - [`mock`]: Recording handle for tests
//! - [`error`]: `TransportError`
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │               warden-server                         │
//! │                    │                                │
//! │         ┌──────────┴──────────┐                     │
//! │         ▼                     ▼                     │
//! │   warden-core        warden-transport ◄── here      │
//! │         │                     │                     │
//! │         └──────────┬──────────┘                     │
//! │                    ▼                                │
//! │             warden-common                           │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Sends are fire-and-forget and at-most-once; there is no redelivery
//!
//! ## Last Modified
//! v0.1.0 - Initial implementation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod channel;
pub mod error;
pub mod mock;
pub mod traits;

pub use channel::ChannelConnection;
pub use error::{Result, TransportError};
pub use mock::MockConnection;
pub use traits::{Connection, Frame};
