// ============================================
// File: crates/warden-server/src/services/mod.rs
// ============================================
//! # Server Services
//!
//! ## Creation Reason
//! Business logic of the control plane, kept apart from HTTP and WebSocket
//! plumbing so every piece can be tested with in-memory connections.
//!
//! ## Main Functionality
//!
//! ### Submodules
//! - [`keystore`]: control-plane keypair, persistence, rotation
//! - [`directory`]: enrolled agents and registration tokens
//! - [`session`]: live sessions keyed by connection
//! - [`handshake`]: executes handshake state-machine effects
//! - [`commands`]: signed command dispatch and rotation announcements
//! - [`events`]: broadcast of agent events to observers
//!
//! ## Service Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Service Layer                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌──────────────────┐   ┌─────────────────────────────────┐ │
//! │  │ HandshakeService │──►│  SessionRegistry                │ │
//! │  │                  │   │  - ConnectionId → Session       │ │
//! │  │  - lookup/enroll │   │  - authorized flag              │ │
//! │  └────────┬─────────┘   └──────────────▲──────────────────┘ │
//! │           │                            │                    │
//! │  ┌────────▼─────────┐   ┌──────────────┴──────────────────┐ │
//! │  │  AgentDirectory  │◄──│  CommandDispatcher              │ │
//! │  │                  │   │  - sign per session (KeyStore)  │ │
//! │  └──────────────────┘   └─────────────────────────────────┘ │
//! │                                                             │
//! │            everything ──► EventBus ──► observers            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Services are shared as `Arc`s; none of them holds a lock across an
//!   `.await` except the key store's generation mutex
//!
//! ## Last Modified
//! v0.1.0 - Initial services structure

pub mod commands;
pub mod directory;
pub mod events;
pub mod handshake;
pub mod keystore;
pub mod session;

// Re-export primary types
pub use commands::{CommandDispatcher, CommandSigner, RotationReport};
pub use directory::{AgentDirectory, AgentRecord, RegistrationToken};
pub use events::{AgentEvent, EventBus};
pub use handshake::{AgentConnection, HandshakeService};
pub use keystore::{ControlPlaneKeys, KeyRotation, KeyStore};
pub use session::{Session, SessionInfo, SessionRegistry};
