// ============================================
// File: crates/warden-server/src/handlers/http.rs
// ============================================
//! # HTTP Endpoints
//!
//! ## Main Functionality
//! - `GET /health`
//! - `GET /api/v1/public-key`: out-of-band key pinning for agents
//! - `POST /api/v1/admin/tokens`: issue a registration token
//! - `POST /api/v1/admin/keys/rotate`: rotate + announce
//! - `GET /api/v1/admin/sessions`, `GET /api/v1/admin/agents`
//! - `POST /api/v1/admin/agents/{node_id}/commands`: signed dispatch
//! - `DELETE /api/v1/admin/agents/{node_id}`: revoke an agent
//!
//! ## ⚠️ Important Note for Next Developer
//! - The admin token comparison is constant-time; keep it that way
//!
//! ## Last Modified
//! v0.1.0 - Initial endpoints

use axum::extract::{Path, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use subtle::ConstantTimeEq;
use tracing::{info, warn};

use warden_common::{NodeId, Timestamp};
use warden_core::PublicKeyInfo;

use crate::error::{Result, ServerError};
use crate::handlers::SharedState;
use crate::services::{AgentRecord, RegistrationToken, RotationReport, SessionInfo};

// ============================================
// Admin Authentication
// ============================================

/// Checks the `Authorization: Bearer <token>` header.
///
/// # Errors
/// - `AdminDisabled` if no admin token is configured
/// - `Unauthorized` if the header is missing or wrong
pub fn require_admin(state: &SharedState, headers: &HeaderMap) -> Result<()> {
    let Some(expected) = state.config.admin.api_token.as_deref() else {
        return Err(ServerError::AdminDisabled);
    };

    let presented = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(ServerError::Unauthorized)?;

    if bool::from(presented.as_bytes().ct_eq(expected.as_bytes())) {
        Ok(())
    } else {
        warn!("Rejected admin request with wrong token");
        Err(ServerError::Unauthorized)
    }
}

fn parse_node_id(raw: &str) -> Result<NodeId> {
    raw.parse()
        .map_err(|e: warden_common::CommonError| ServerError::bad_request(e.to_string()))
}

// ============================================
// Public Endpoints
// ============================================

/// Liveness plus a few counters.
pub async fn health(State(state): State<SharedState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "warden-server",
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": state.sessions.count(),
        "agents": state.directory.len(),
    }))
}

/// Current control-plane public key.
///
/// # Errors
/// Returns 500 if the key store is unusable.
pub async fn public_key(State(state): State<SharedState>) -> Result<Json<PublicKeyInfo>> {
    let keys = state.keys.get_or_generate_keys().await?;
    Ok(Json(PublicKeyInfo::for_key(keys.public_key())))
}

// ============================================
// Admin Endpoints
// ============================================

/// Issues a registration token.
///
/// # Errors
/// Admin authentication errors.
pub async fn issue_token(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<(StatusCode, Json<RegistrationToken>)> {
    require_admin(&state, &headers)?;
    let token = state.directory.issue_token(Timestamp::now());
    info!(expires_at = %token.expires_at, "Registration token issued");
    Ok((StatusCode::CREATED, Json(token)))
}

/// Rotates the control-plane key and announces it.
///
/// # Errors
/// Admin authentication errors, or 500 if the new key cannot be persisted.
pub async fn rotate_key(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Json<RotationReport>> {
    require_admin(&state, &headers)?;
    let report = state.dispatcher.rotate_and_announce().await?;
    Ok(Json(report))
}

/// Lists live sessions.
///
/// # Errors
/// Admin authentication errors.
pub async fn list_sessions(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Json<Vec<SessionInfo>>> {
    require_admin(&state, &headers)?;
    Ok(Json(state.sessions.snapshot()))
}

/// Lists enrolled agents.
///
/// # Errors
/// Admin authentication errors.
pub async fn list_agents(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Json<Vec<AgentRecord>>> {
    require_admin(&state, &headers)?;
    Ok(Json(state.directory.agents()))
}

/// Body of a command request.
#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    /// Privileged command type.
    #[serde(rename = "type")]
    pub command_type: String,
    /// Command body.
    #[serde(default)]
    pub payload: Value,
}

/// Signs and sends a command to an agent.
///
/// # Errors
/// 400 for a bad node id or unsigned type, 404 if the agent is unknown or
/// offline.
pub async fn send_command(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(node_id): Path<String>,
    Json(request): Json<CommandRequest>,
) -> Result<Json<Value>> {
    require_admin(&state, &headers)?;
    let node_id = parse_node_id(&node_id)?;

    let delivered = state
        .dispatcher
        .dispatch(node_id, &request.command_type, request.payload)
        .await?;

    Ok(Json(json!({ "delivered": delivered })))
}

/// Removes an agent and drops its sessions.
///
/// # Errors
/// 400 for a bad node id, 404 if the agent is unknown.
pub async fn delete_agent(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(node_id): Path<String>,
) -> Result<StatusCode> {
    require_admin(&state, &headers)?;
    let node_id = parse_node_id(&node_id)?;

    state
        .directory
        .delete(node_id)
        .ok_or(ServerError::AgentNotFound(node_id))?;

    for session in state.sessions.all_for_node(node_id) {
        session.close("agent revoked");
    }
    state.directory.persist().await?;

    info!(node_id = %node_id, "Agent revoked");
    Ok(StatusCode::NO_CONTENT)
}
