// ============================================
// File: crates/warden-server/src/handlers/mod.rs
// ============================================
//! # Request Handlers
//!
//! ## Creation Reason
//! Thin axum adapters between HTTP / WebSocket requests and the service
//! layer. No protocol decisions are made here.
//!
//! ## Main Functionality
//!
//! ### Submodules
//! - [`http`]: health, public key, admin API
//! - [`ws`]: agent WebSocket and observer event stream
//!
//! ## Handler Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Handlers                               │
//! ├─────────────────────────────────────────────────────────────┤
//! │  GET  /health                    ─► http::health            │
//! │  GET  /api/v1/public-key         ─► http::public_key        │
//! │  *    /api/v1/admin/...          ─► http::* (bearer token)  │
//! │  GET  /ws/agent                  ─► ws::agent_ws            │
//! │  GET  /ws/observer               ─► ws::observer_ws (token) │
//! │                                                             │
//! │              all share Arc<AppState>                        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Admin endpoints answer 503 when no admin token is configured
//!
//! ## Last Modified
//! v0.1.0 - Initial handlers

pub mod http;
pub mod ws;

use std::sync::Arc;

use tokio::sync::broadcast;

use warden_core::JsonCodec;

use crate::config::ServerConfig;
use crate::services::{
    AgentDirectory, CommandDispatcher, EventBus, HandshakeService, KeyStore, SessionRegistry,
};

/// Shared state behind every handler.
#[derive(Debug)]
pub struct AppState {
    /// Loaded configuration.
    pub config: ServerConfig,
    /// Control-plane keys.
    pub keys: Arc<KeyStore>,
    /// Enrolled agents and tokens.
    pub directory: Arc<AgentDirectory>,
    /// Live sessions.
    pub sessions: Arc<SessionRegistry>,
    /// Handshake driver.
    pub handshake: HandshakeService,
    /// Signed command sender.
    pub dispatcher: CommandDispatcher,
    /// Observer fan-out.
    pub events: EventBus,
    /// Fires once on shutdown; WebSocket loops select on it.
    pub shutdown: broadcast::Sender<()>,
}

impl AppState {
    /// Wires the services together.
    #[must_use]
    pub fn new(
        config: ServerConfig,
        keys: Arc<KeyStore>,
        directory: Arc<AgentDirectory>,
        shutdown: broadcast::Sender<()>,
    ) -> Self {
        let sessions = Arc::new(SessionRegistry::new(config.limits.max_connections));
        let events = EventBus::default();

        let handshake = HandshakeService::new(
            Arc::clone(&keys),
            Arc::clone(&directory),
            Arc::clone(&sessions),
            events.clone(),
            &config,
        );
        let dispatcher = CommandDispatcher::new(
            Arc::clone(&keys),
            Arc::clone(&directory),
            Arc::clone(&sessions),
            events.clone(),
            JsonCodec::new(config.network.max_frame_size),
        );

        Self {
            config,
            keys,
            directory,
            sessions,
            handshake,
            dispatcher,
            events,
            shutdown,
        }
    }
}

/// Handle type used by axum.
pub type SharedState = Arc<AppState>;
