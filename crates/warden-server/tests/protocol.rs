// ============================================
// File: crates/warden-server/tests/protocol.rs
// ============================================
//! End-to-end protocol tests.
//!
//! A real `AgentSession` talks to the real `HandshakeService` and
//! `CommandDispatcher` over an in-memory `MockConnection`, so every frame
//! goes through the same JSON codec as on the wire.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::broadcast;

use warden_agent::{AgentAction, AgentIdentity, AgentSession, ReplayGuard, TrustStore};
use warden_common::{random_nonce, Timestamp};
use warden_core::{CommandType, IdentityKeyPair, SignedCommand};
use warden_server::services::{AgentConnection, AgentEvent};
use warden_server::{Server, ServerConfig, SharedState};
use warden_transport::{Connection, Frame, MockConnection};

// ============================================
// Harness
// ============================================

struct Harness {
    dir: tempfile::TempDir,
    state: SharedState,
    guard: Arc<ReplayGuard>,
    trust: Arc<TrustStore>,
}

impl Harness {
    async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ServerConfig::default();
        config.keys.key_file = dir.path().join("cp.json").display().to_string();

        let state = Server::new(config).build_state().await.unwrap();
        let trust = Arc::new(TrustStore::empty(dir.path().join("trust.json")));
        let guard = Arc::new(ReplayGuard::new(
            Duration::from_secs(300),
            Duration::from_secs(600),
        ));

        Self {
            dir,
            state,
            guard,
            trust,
        }
    }

    /// Agent with a fresh identity sharing this harness' trust and guard.
    fn agent(&self, token: Option<String>) -> AgentSession {
        let identity = AgentIdentity::from_keypair(
            IdentityKeyPair::generate(),
            self.dir.path().join("agent.json"),
        );
        self.agent_with(identity, token)
    }

    fn agent_with(&self, identity: AgentIdentity, token: Option<String>) -> AgentSession {
        AgentSession::new(
            identity,
            Arc::clone(&self.trust),
            Arc::clone(&self.guard),
            token,
        )
    }

    fn open(&self) -> Link {
        let conn = Arc::new(MockConnection::new());
        let server = self
            .state
            .handshake
            .accept(Arc::clone(&conn) as Arc<dyn Connection>);
        Link { conn, server }
    }

    async fn cp_key(&self) -> IdentityKeyPair {
        let keys = self.state.keys.get_or_generate_keys().await.unwrap();
        keys.keypair().clone()
    }
}

struct Link {
    conn: Arc<MockConnection>,
    server: AgentConnection,
}

impl Link {
    /// Sends the agent's opening frame and runs the exchange to quiescence.
    async fn handshake(
        &mut self,
        state: &SharedState,
        agent: &mut AgentSession,
    ) -> Vec<AgentAction> {
        let first = agent.start().unwrap();
        let text = agent.encode(&first).unwrap();
        state.handshake.handle_text(&mut self.server, &text).await;
        self.pump(state, agent).await
    }

    /// Delivers queued server frames to the agent and agent replies to the
    /// server until neither side has anything left to say.
    async fn pump(
        &mut self,
        state: &SharedState,
        agent: &mut AgentSession,
    ) -> Vec<AgentAction> {
        let mut actions = Vec::new();
        loop {
            let frames = self.conn.take_frames();
            if frames.is_empty() {
                return actions;
            }
            for frame in frames {
                let Frame::Text(text) = frame else { continue };
                for action in agent.handle_frame(&text).await {
                    if let AgentAction::Send(message) = &action {
                        let reply = agent.encode(message).unwrap();
                        state.handshake.handle_text(&mut self.server, &reply).await;
                    }
                    actions.push(action);
                }
            }
        }
    }

    async fn deliver(
        &mut self,
        state: &SharedState,
        agent: &mut AgentSession,
        text: &str,
    ) -> Vec<AgentAction> {
        let mut actions = Vec::new();
        for action in agent.handle_frame(text).await {
            if let AgentAction::Send(message) = &action {
                let reply = agent.encode(message).unwrap();
                state.handshake.handle_text(&mut self.server, &reply).await;
            }
            actions.push(action);
        }
        actions
    }

    async fn close(mut self, state: &SharedState) {
        state.handshake.handle_closed(&mut self.server).await;
    }
}

fn drain(rx: &mut broadcast::Receiver<AgentEvent>) -> Vec<AgentEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn alert_reason(actions: &[AgentAction]) -> Option<String> {
    actions.iter().find_map(|a| match a {
        AgentAction::Send(warden_core::AgentMessage::SecurityAlert { reason, .. }) => {
            Some(reason.clone())
        }
        _ => None,
    })
}

/// Registers a new agent and returns its node id plus its identity.
async fn register(h: &Harness) -> (warden_common::NodeId, AgentIdentity) {
    let token = h.state.directory.issue_token(Timestamp::now());
    let mut agent = h.agent(Some(token.token));
    let mut link = h.open();

    let actions = link.handshake(&h.state, &mut agent).await;
    let node_id = actions
        .iter()
        .find_map(|a| match a {
            AgentAction::Registered(id) => Some(*id),
            _ => None,
        })
        .expect("registration should succeed");

    link.close(&h.state).await;
    (node_id, agent.into_identity())
}

// ============================================
// Scenarios
// ============================================

#[tokio::test]
async fn test_register_connect_command_replay_rotate() {
    let h = Harness::new().await;
    let mut events = h.state.events.subscribe();

    // Register with a token; the pinned key comes from REGISTERED.
    let (node_id, identity) = register(&h).await;
    assert_eq!(h.trust.node_id(), Some(node_id));
    let cp = h.state.keys.current().unwrap();
    assert_eq!(h.trust.trusted_key(), Some(*cp.public_key()));
    assert_eq!(h.state.sessions.count(), 0);

    // Reconnect with CONNECT and answer the challenge.
    let mut agent = h.agent_with(identity, None);
    let mut link = h.open();
    let actions = link.handshake(&h.state, &mut agent).await;
    assert!(actions.iter().any(|a| matches!(a, AgentAction::Authorized(_))));
    assert!(agent.phase().is_authorized());
    assert_eq!(h.state.sessions.by_node(node_id).len(), 1);

    // A signed DEPLOY is verified and executed.
    let delivered = h
        .state
        .dispatcher
        .dispatch(node_id, "DEPLOY", json!({ "app": "web", "version": "1.2.0" }))
        .await
        .unwrap();
    assert_eq!(delivered, 1);

    let deploy_text = link.conn.texts().last().cloned().unwrap();
    let actions = link.pump(&h.state, &mut agent).await;
    assert!(actions.iter().any(|a| matches!(
        a,
        AgentAction::Execute { command_type: CommandType::Deploy, payload }
            if payload["app"] == "web"
    )));

    // The same frame again is a replay.
    let actions = link.deliver(&h.state, &mut agent, &deploy_text).await;
    assert_eq!(alert_reason(&actions).as_deref(), Some("replay"));
    assert!(!actions.iter().any(|a| matches!(a, AgentAction::Execute { .. })));

    // Rotation is announced under the old key, then the new key takes over.
    let old = *cp.public_key();
    let report = h.state.dispatcher.rotate_and_announce().await.unwrap();
    assert_eq!(report.notified, 1);

    let actions = link.pump(&h.state, &mut agent).await;
    assert!(actions.iter().any(|a| matches!(
        a,
        AgentAction::TrustUpdated { fingerprint } if *fingerprint == report.fingerprint
    )));
    let pinned = h.trust.trusted_key().unwrap();
    assert_ne!(pinned, old);
    assert_eq!(pinned.to_base64(), report.public_key);

    h.state
        .dispatcher
        .dispatch(node_id, "APP_ACTION", json!({ "app": "web", "action": "restart" }))
        .await
        .unwrap();
    let actions = link.pump(&h.state, &mut agent).await;
    assert!(actions.iter().any(|a| matches!(
        a,
        AgentAction::Execute { command_type: CommandType::AppAction, .. }
    )));

    link.close(&h.state).await;
    assert_eq!(h.state.sessions.count(), 0);

    let seen = drain(&mut events);
    assert!(seen.iter().any(|e| matches!(e, AgentEvent::AgentEnrolled { .. })));
    assert!(seen.iter().any(|e| matches!(
        e,
        AgentEvent::SecurityAlert { reason, command_type, .. }
            if reason == "replay" && command_type == "DEPLOY"
    )));
    assert!(seen.iter().any(|e| matches!(e, AgentEvent::KeyRotated { notified: 1, .. })));
    assert!(seen.iter().any(|e| matches!(e, AgentEvent::AgentOffline { .. })));
}

#[tokio::test]
async fn test_tampered_payload_is_rejected() {
    let h = Harness::new().await;
    let (node_id, identity) = register(&h).await;
    let mut agent = h.agent_with(identity, None);
    let mut link = h.open();
    link.handshake(&h.state, &mut agent).await;

    h.state
        .dispatcher
        .dispatch(node_id, "DEPLOY", json!({ "app": "web" }))
        .await
        .unwrap();
    let original = link.conn.take_frames();
    let text = original.iter().find_map(Frame::as_text).unwrap();

    let mut command: SignedCommand = serde_json::from_str(text).unwrap();
    command.payload = json!({ "app": "miner" });
    let tampered = serde_json::to_string(&command).unwrap();

    let actions = link.deliver(&h.state, &mut agent, &tampered).await;
    assert_eq!(alert_reason(&actions).as_deref(), Some("invalid_signature"));
    assert!(!actions.iter().any(|a| matches!(a, AgentAction::Execute { .. })));
}

#[tokio::test]
async fn test_stale_and_foreign_commands_are_rejected() {
    let h = Harness::new().await;
    let (_, identity) = register(&h).await;
    let mut agent = h.agent_with(identity, None);
    let mut link = h.open();
    link.handshake(&h.state, &mut agent).await;

    let cp = h.cp_key().await;
    let stale = SignedCommand::sign_with(
        &cp,
        CommandType::Deploy,
        json!({}),
        Timestamp::now().minus(Duration::from_secs(600)),
        random_nonce(16),
    );
    let actions = link
        .deliver(&h.state, &mut agent, &serde_json::to_string(&stale).unwrap())
        .await;
    assert_eq!(alert_reason(&actions).as_deref(), Some("stale"));

    let impostor = IdentityKeyPair::generate();
    let foreign = SignedCommand::sign(&impostor, CommandType::Deploy, json!({}));
    let actions = link
        .deliver(&h.state, &mut agent, &serde_json::to_string(&foreign).unwrap())
        .await;
    assert_eq!(alert_reason(&actions).as_deref(), Some("invalid_signature"));
}

#[tokio::test]
async fn test_unsigned_command_frame_is_ignored() {
    let h = Harness::new().await;
    let (_, identity) = register(&h).await;
    let mut agent = h.agent_with(identity, None);
    let mut link = h.open();
    link.handshake(&h.state, &mut agent).await;

    let bare = json!({ "type": "DEPLOY", "payload": { "app": "web" } }).to_string();
    let actions = link.deliver(&h.state, &mut agent, &bare).await;
    assert!(!actions.iter().any(|a| matches!(a, AgentAction::Execute { .. })));
}

#[tokio::test]
async fn test_regenerated_identity_needs_new_enrollment() {
    let h = Harness::new().await;
    let (node_id, identity) = register(&h).await;
    let mut agent = h.agent_with(identity, None);
    let mut link = h.open();
    link.handshake(&h.state, &mut agent).await;

    h.state
        .dispatcher
        .dispatch(node_id, "REGENERATE_IDENTITY", json!({}))
        .await
        .unwrap();
    let actions = link.pump(&h.state, &mut agent).await;
    assert!(actions
        .iter()
        .any(|a| matches!(a, AgentAction::IdentityRegenerated { .. })));
    assert!(actions.iter().any(|a| matches!(a, AgentAction::Close)));
    assert!(h.trust.node_id().is_none());
    link.close(&h.state).await;

    // Without a token the agent cannot even start.
    let identity = agent.into_identity();
    let mut agent = h.agent_with(identity, None);
    assert!(agent.start().is_err());

    // The new key is unknown to the directory.
    let fresh = h.state.directory.issue_token(Timestamp::now());
    let identity = agent.into_identity();
    let mut agent = h.agent_with(identity, Some(fresh.token));
    let mut link = h.open();
    let actions = link.handshake(&h.state, &mut agent).await;
    let new_node = actions.iter().find_map(|a| match a {
        AgentAction::Registered(id) => Some(*id),
        _ => None,
    });
    assert!(new_node.is_some());
    assert_ne!(new_node, Some(node_id));
}

#[tokio::test]
async fn test_registration_token_is_single_use() {
    let h = Harness::new().await;
    let token = h.state.directory.issue_token(Timestamp::now());

    let mut first = h.agent(Some(token.token.clone()));
    let mut link = h.open();
    let actions = link.handshake(&h.state, &mut first).await;
    assert!(actions.iter().any(|a| matches!(a, AgentAction::Registered(_))));
    link.close(&h.state).await;

    let other_trust = Arc::new(TrustStore::empty(h.dir.path().join("other.json")));
    let mut second = AgentSession::new(
        AgentIdentity::from_keypair(IdentityKeyPair::generate(), h.dir.path().join("b.json")),
        other_trust,
        Arc::clone(&h.guard),
        Some(token.token),
    );
    let mut link = h.open();
    let actions = link.handshake(&h.state, &mut second).await;
    assert!(actions
        .iter()
        .any(|a| matches!(a, AgentAction::Failed(msg) if msg == "Authentication failed")));
    assert!(!second.phase().is_authorized());
    assert_eq!(h.state.directory.len(), 1);
}

#[tokio::test]
async fn test_revoked_agent_cannot_reconnect() {
    let h = Harness::new().await;
    let (node_id, identity) = register(&h).await;
    assert!(h.state.directory.delete(node_id).is_some());

    let mut agent = h.agent_with(identity, None);
    let mut link = h.open();
    let actions = link.handshake(&h.state, &mut agent).await;

    assert!(actions.iter().any(|a| matches!(a, AgentAction::Failed(_))));
    assert_eq!(h.state.sessions.count(), 0);
}

#[tokio::test]
async fn test_command_reaches_every_session_of_a_node() {
    let h = Harness::new().await;
    let key = IdentityKeyPair::generate();
    let token = h.state.directory.issue_token(Timestamp::now());
    let record = h
        .state
        .directory
        .enroll(&token.token, key.public_key(), Timestamp::now())
        .unwrap();
    let node_id = record.node_id;
    let cp = h.cp_key().await;
    h.trust
        .accept_registration(node_id, cp.public_key())
        .await
        .unwrap();

    let mut first = h.agent_with(
        AgentIdentity::from_keypair(key.clone(), h.dir.path().join("a1.json")),
        None,
    );
    let mut second = h.agent_with(
        AgentIdentity::from_keypair(key, h.dir.path().join("a2.json")),
        None,
    );
    let mut link_a = h.open();
    let mut link_b = h.open();
    link_a.handshake(&h.state, &mut first).await;
    link_b.handshake(&h.state, &mut second).await;
    assert_eq!(h.state.sessions.by_node(node_id).len(), 2);

    let delivered = h
        .state
        .dispatcher
        .dispatch(node_id, "DEPLOY", json!({ "app": "web" }))
        .await
        .unwrap();
    assert_eq!(delivered, 2);

    let a: SignedCommand = serde_json::from_str(&link_a.conn.last_text().unwrap()).unwrap();
    let b: SignedCommand = serde_json::from_str(&link_b.conn.last_text().unwrap()).unwrap();
    assert_ne!(a.nonce, b.nonce);

    // Both agents share one replay guard.
    let ran_a = link_a.pump(&h.state, &mut first).await;
    let ran_b = link_b.pump(&h.state, &mut second).await;
    assert!(ran_a.iter().any(|x| matches!(x, AgentAction::Execute { .. })));
    assert!(ran_b.iter().any(|x| matches!(x, AgentAction::Execute { .. })));
}
