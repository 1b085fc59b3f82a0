// ============================================
// File: crates/warden-server/src/lib.rs
// ============================================
//! # Warden Server Library
//!
//! ## Creation Reason
//! The control plane of the Warden zero-trust agent protocol: it decides
//! which agents are who they claim to be, and it is the only party able to
//! issue privileged commands to them.
//!
//! ## Main Functionality
//!
//! ### Modules
//! - [`config`]: Server configuration management
//! - [`server`]: Lifecycle and route table
//! - [`services`]: Business logic services
//!   - [`services::keystore`]: Control-plane key and rotation
//!   - [`services::directory`]: Enrolled agents, registration tokens
//!   - [`services::session`]: Session registry
//!   - [`services::handshake`]: Handshake effect execution
//!   - [`services::commands`]: Signed command dispatch
//!   - [`services::events`]: Observer events
//! - [`handlers`]: HTTP and WebSocket endpoints
//! - [`error`]: Server-specific error types
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Warden Server                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  ┌─────────────┐     ┌─────────────┐     ┌─────────────────┐    │
//! │  │   Config    │────►│   Server    │────►│    Handlers     │    │
//! │  │             │     │ Orchestrator│     │  HTTP · WS      │    │
//! │  └─────────────┘     └──────┬──────┘     └────────┬────────┘    │
//! │                             │                     │             │
//! │         ┌───────────────────┼─────────────────────┘             │
//! │         ▼                   ▼                   ▼               │
//! │  ┌─────────────┐     ┌─────────────┐     ┌─────────────┐        │
//! │  │  KeyStore   │     │  Handshake  │     │  Command    │        │
//! │  │  Directory  │     │  Service    │     │  Dispatcher │        │
//! │  └─────────────┘     └─────────────┘     └─────────────┘        │
//! │                                                                 │
//! ├─────────────────────────────────────────────────────────────────┤
//! │        warden-core (protocol, crypto, state machine)            │
//! │        warden-transport (Connection trait, channel, mock)       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Configuration changes require restart (no hot-reload)
//! - Registration tokens live in memory only
//! - Agents offline during a key rotation must be re-pinned out of band
//!
//! ## Last Modified
//! v0.1.0 - Initial server library

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod handlers;
pub mod server;
pub mod services;

// Re-export primary types
pub use config::ServerConfig;
pub use error::{Result, ServerError};
pub use handlers::{AppState, SharedState};
pub use server::{router, Server};
