// ============================================
// File: crates/warden-server/src/server.rs
// ============================================
//! # Server Orchestrator
//!
//! ## Creation Reason
//! Wires configuration, key store, directory and services into one axum
//! application and manages its lifecycle.
//!
//! ## Main Functionality
//! - `Server`: lifecycle (start, maintenance, graceful shutdown)
//! - `router()`: the full route table, exported for tests
//!
//! ## Server Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Server                              │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌────────────────────────┐      ┌───────────────────────┐  │
//! │  │ axum::serve            │      │ Maintenance Task      │  │
//! │  │  /health, /api/v1/...  │      │  purge expired tokens │  │
//! │  │  /ws/agent ─► per-conn │      │  log counters         │  │
//! │  │  /ws/observer          │      │                       │  │
//! │  └───────────┬────────────┘      └───────────┬───────────┘  │
//! │              │                               │              │
//! │              ▼                               ▼              │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                 AppState (Arc)                      │    │
//! │  │  KeyStore · AgentDirectory · SessionRegistry        │    │
//! │  │  HandshakeService · CommandDispatcher · EventBus    │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - The control-plane key is loaded (or created) before binding; a broken
//!   key file stops startup
//! - Shutdown: stop accepting, signal WebSocket loops, wait for tasks,
//!   then persist the directory
//!
//! ## Last Modified
//! v0.1.0 - Initial server implementation

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::routing::{delete, get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use warden_common::Timestamp;

use crate::config::ServerConfig;
use crate::error::{Result, ServerError};
use crate::handlers::{http, ws, AppState, SharedState};
use crate::services::{AgentDirectory, KeyStore};

/// How long each background task gets to stop.
const TASK_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================
// Router
// ============================================

/// Builds the route table (exported for testing).
pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(http::health))
        .route("/api/v1/public-key", get(http::public_key))
        .route("/api/v1/admin/tokens", post(http::issue_token))
        .route("/api/v1/admin/keys/rotate", post(http::rotate_key))
        .route("/api/v1/admin/sessions", get(http::list_sessions))
        .route("/api/v1/admin/agents", get(http::list_agents))
        .route("/api/v1/admin/agents/{node_id}", delete(http::delete_agent))
        .route(
            "/api/v1/admin/agents/{node_id}/commands",
            post(http::send_command),
        )
        .route("/ws/agent", get(ws::agent_ws))
        .route("/ws/observer", get(ws::observer_ws))
        .with_state(state)
}

// ============================================
// Server
// ============================================

/// Warden control-plane server.
///
/// # Lifecycle
/// 1. Create with `Server::new(config)`
/// 2. Start with `server.run().await`
/// 3. Shutdown via Ctrl+C or `server.shutdown()`
pub struct Server {
    config: ServerConfig,
    shutdown: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Server {
    /// Creates a new server instance.
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
        }
    }

    /// Loads keys and the directory and wires the services.
    ///
    /// # Errors
    /// Returns `KeyStore` if the control-plane key is unusable, or an I/O
    /// error if the directory snapshot cannot be read.
    pub async fn build_state(&self) -> Result<SharedState> {
        let keys = Arc::new(KeyStore::new(&self.config.keys.key_file));
        let cp = keys.get_or_generate_keys().await?;
        info!(fingerprint = %cp.fingerprint(), "Control-plane key ready");

        let directory = AgentDirectory::load(
            self.config.registration.token_ttl(),
            self.config.directory.snapshot_file.as_ref().map(PathBuf::from),
        )
        .await?;
        info!(agents = directory.len(), "Agent directory ready");

        Ok(Arc::new(AppState::new(
            self.config.clone(),
            keys,
            Arc::new(directory),
            self.shutdown_tx.clone(),
        )))
    }

    /// Binds the configured address and runs until shutdown.
    ///
    /// # Errors
    /// Returns error if the server fails to start.
    pub async fn run(&self) -> Result<()> {
        info!("Starting Warden server v{}", env!("CARGO_PKG_VERSION"));

        let addr = self.config.listen_addr();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::startup_failed(format!("bind {addr} failed: {e}")))?;

        self.serve(listener).await
    }

    /// Runs on an already bound listener until shutdown.
    ///
    /// # Errors
    /// Returns error if state cannot be built or the listener fails.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let state = self.build_state().await?;
        let local = listener.local_addr()?;

        let mut tasks = Vec::new();
        tasks.push(("maintenance", self.spawn_maintenance_task(Arc::clone(&state))));

        info!(addr = %local, "Server started successfully");

        let signal =
            Self::shutdown_signal(self.shutdown_tx.clone(), self.shutdown_tx.subscribe());
        axum::serve(listener, router(Arc::clone(&state)))
            .with_graceful_shutdown(signal)
            .await?;

        info!("Shutting down server...");
        self.shutdown();

        for (name, task) in tasks {
            match tokio::time::timeout(TASK_SHUTDOWN_TIMEOUT, task).await {
                Ok(Ok(())) => debug!("Task '{}' completed", name),
                Ok(Err(e)) => warn!("Task '{}' failed: {}", name, e),
                Err(_) => warn!("Task '{}' timed out during shutdown", name),
            }
        }

        state.sessions.close_all("server shutting down");
        if let Err(e) = state.directory.persist().await {
            warn!(error = %e, "Failed to persist agent directory on shutdown");
        }

        info!("Server shutdown complete");
        Ok(())
    }

    /// Spawns the periodic maintenance task.
    fn spawn_maintenance_task(&self, state: SharedState) -> JoinHandle<()> {
        let shutdown = Arc::clone(&self.shutdown);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let interval = self.config.limits.maintenance_interval();

        tokio::spawn(async move {
            let mut interval_timer = tokio::time::interval(interval);

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!("Maintenance task received shutdown signal");
                        break;
                    }
                    _ = interval_timer.tick() => {
                        if shutdown.load(Ordering::SeqCst) {
                            break;
                        }

                        let purged = state.directory.purge_expired(Timestamp::now());
                        debug!(
                            purged_tokens = purged,
                            pending_tokens = state.directory.pending_tokens(),
                            agents = state.directory.len(),
                            sessions = state.sessions.count(),
                            authorized = state.sessions.authorized_count(),
                            observers = state.events.observers(),
                            "Maintenance cycle complete"
                        );
                    }
                }
            }

            debug!("Maintenance task exiting");
        })
    }

    /// Resolves on Ctrl+C or a programmatic shutdown, then tells every
    /// WebSocket loop to stop.
    async fn shutdown_signal(
        shutdown_tx: broadcast::Sender<()>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        };

        tokio::select! {
            () = ctrl_c => info!("Received shutdown signal"),
            _ = shutdown_rx.recv() => info!("Shutdown requested"),
        }

        let _ = shutdown_tx.send(());
    }

    /// Triggers server shutdown programmatically.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(());
    }

    /// Returns `true` once shutdown started.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Loaded configuration.
    #[must_use]
    pub const fn config(&self) -> &ServerConfig {
        &self.config
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("listen_addr", &self.config.network.listen_addr)
            .field("key_file", &self.config.keys.key_file)
            .finish()
    }
}
