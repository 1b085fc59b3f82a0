// ============================================
// File: crates/warden-server/src/handlers/ws.rs
// ============================================
//! # WebSocket Endpoints
//!
//! ## Creation Reason
//! Bridges axum WebSockets to the transport-agnostic `Connection` trait and
//! runs the per-connection read loop with handshake deadlines.
//!
//! ## Connection Task Layout
//! ```text
//!           ┌──────────── socket.split() ────────────┐
//!           ▼                                        ▼
//!   read loop (this task)                     writer task
//!   select! {                                 while frame = rx.recv()
//!     frame   ─► HandshakeService               Text  ─► Message::Text
//!     deadline ─► handle_timeout                Close ─► close frame, stop
//!     shutdown ─► close                       }
//!   }                                               ▲
//!           │                                       │
//!           └── ChannelConnection (Arc) ── mpsc ────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - `handle_closed()` MUST run on every exit path so the session is dropped
//! - Binary frames are ignored; the protocol is JSON text only
//!
//! ## Last Modified
//! v0.1.0 - Initial WebSocket endpoints

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use warden_transport::{ChannelConnection, Connection, Frame};

use crate::error::ServerError;
use crate::handlers::http::require_admin;
use crate::handlers::SharedState;

/// Close code sent with server-initiated closes (policy violation).
const CLOSE_POLICY: u16 = 1008;

/// WebSocket close reasons are limited to 123 bytes.
const MAX_CLOSE_REASON: usize = 123;

/// How long the writer gets to flush after the read loop ends.
const WRITER_DRAIN: Duration = Duration::from_secs(2);

// ============================================
// Agent Endpoint
// ============================================

/// `GET /ws/agent`.
pub async fn agent_ws(State(state): State<SharedState>, ws: WebSocketUpgrade) -> Response {
    if state.sessions.is_full() {
        return ServerError::ConnectionLimit {
            limit: state.sessions.max_sessions(),
        }
        .into_response();
    }

    ws.max_message_size(state.config.network.max_frame_size)
        .on_upgrade(move |socket| handle_agent(socket, state))
}

async fn handle_agent(socket: WebSocket, state: SharedState) {
    let (sink, mut stream) = socket.split();
    let (conn, rx) = ChannelConnection::new(None);
    let conn = Arc::new(conn);
    let writer = tokio::spawn(write_frames(sink, rx));

    let mut agent = state
        .handshake
        .accept(Arc::clone(&conn) as Arc<dyn Connection>);
    let mut shutdown_rx = state.shutdown.subscribe();

    loop {
        let deadline = agent.next_deadline();
        let sleep = async {
            match deadline {
                Some((at, _)) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    state.handshake.handle_text(&mut agent, text.as_str()).await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(conn = %conn.id(), error = %e, "WebSocket read error");
                    break;
                }
            },
            () = sleep => {
                if let Some((_, kind)) = deadline {
                    state.handshake.handle_timeout(&mut agent, kind).await;
                }
            }
            _ = shutdown_rx.recv() => {
                conn.close("server shutting down");
                break;
            }
        }

        if agent.is_finished() {
            break;
        }
    }

    state.handshake.handle_closed(&mut agent).await;
    conn.mark_closed();
    drop(agent);
    drop(conn);

    if tokio::time::timeout(WRITER_DRAIN, writer).await.is_err() {
        debug!("Writer task did not finish in time");
    }
}

async fn write_frames(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Frame>,
) {
    while let Some(frame) = rx.recv().await {
        match frame {
            Frame::Text(text) => {
                if sink.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            Frame::Close { reason } => {
                let reason: String = reason.chars().take(MAX_CLOSE_REASON).collect();
                let close = CloseFrame {
                    code: CLOSE_POLICY,
                    reason: reason.into(),
                };
                let _ = sink.send(Message::Close(Some(close))).await;
                break;
            }
        }
    }
    let _ = sink.close().await;
}

// ============================================
// Observer Endpoint
// ============================================

/// `GET /ws/observer`: admin-only JSON event stream.
pub async fn observer_ws(
    State(state): State<SharedState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    if let Err(e) = require_admin(&state, &headers) {
        return e.into_response();
    }
    ws.on_upgrade(move |socket| handle_observer(socket, state))
}

async fn handle_observer(mut socket: WebSocket, state: SharedState) {
    let mut events = state.events.subscribe();
    let mut shutdown_rx = state.shutdown.subscribe();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(_) => continue,
                    };
                    if socket.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    warn!(skipped = n, "Observer lagging");
                    let notice = json!({ "event": "lagged", "skipped": n }).to_string();
                    if socket.send(Message::Text(notice.into())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            _ = shutdown_rx.recv() => break,
        }
    }

    let _ = socket.send(Message::Close(None)).await;
}
