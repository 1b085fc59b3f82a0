// ============================================
// File: crates/warden-agent/src/client.rs
// ============================================
//! # Control-Plane HTTP Client
//!
//! ## Creation Reason
//! Lets an operator pin the control-plane key out of band, before the agent
//! ever opens the WebSocket, instead of trusting whatever REGISTERED says.
//!
//! ## ⚠️ Important Note for Next Developer
//! - Only use this over HTTPS in production; over plain HTTP it is no
//!   stronger than trust-on-first-use
//!
//! ## Last Modified
//! v0.1.0 - Initial public-key fetch

use std::time::Duration;

use reqwest::Client;
use tracing::{debug, info};

use warden_core::{IdentityPublicKey, PublicKeyInfo};

use crate::config::ServerEndpointConfig;
use crate::error::{AgentError, Result};
use crate::trust::TrustStore;

/// Minimal client for the control plane's public HTTP API.
#[derive(Debug, Clone)]
pub struct ControlPlaneClient {
    http: Client,
    public_key_url: String,
}

impl ControlPlaneClient {
    /// Creates a client for the given endpoint.
    ///
    /// # Errors
    /// Returns `Http` if the HTTP client cannot be built.
    pub fn new(public_key_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            public_key_url: public_key_url.into(),
        })
    }

    /// Creates a client from the `[server]` config section.
    ///
    /// # Errors
    /// Returns `Http` if the HTTP client cannot be built.
    pub fn from_config(config: &ServerEndpointConfig) -> Result<Self> {
        Self::new(config.public_key_url.clone(), config.request_timeout())
    }

    /// Fetches and sanity-checks the advertised control-plane key.
    ///
    /// # Errors
    /// Returns `Http` on transport errors, non-2xx status, or an answer whose
    /// fingerprint does not match its key.
    pub async fn fetch_public_key(&self) -> Result<IdentityPublicKey> {
        debug!(url = %self.public_key_url, "Fetching control-plane public key");

        let response = self.http.get(&self.public_key_url).send().await?;
        if !response.status().is_success() {
            return Err(AgentError::http(format!("status {}", response.status())));
        }

        let info: PublicKeyInfo = response.json().await?;
        if !info.is_consistent() {
            return Err(AgentError::http(
                "public-key response fingerprint does not match key",
            ));
        }

        Ok(IdentityPublicKey::from_base64(&info.public_key)?)
    }

    /// Fetches the key and pins it in `trust`.
    ///
    /// # Errors
    /// See [`ControlPlaneClient::fetch_public_key`] and [`TrustStore::pin`].
    pub async fn pin_public_key(&self, trust: &TrustStore) -> Result<IdentityPublicKey> {
        let key = self.fetch_public_key().await?;
        trust.pin(key).await?;
        info!(fingerprint = %key.fingerprint(), "Control-plane key pinned from HTTP");
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::get, Json, Router};
    use warden_core::IdentityKeyPair;

    async fn serve(info: PublicKeyInfo) -> String {
        let app = Router::new().route(
            "/api/v1/public-key",
            get(move || {
                let info = info.clone();
                async move { Json(info) }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/api/v1/public-key")
    }

    #[tokio::test]
    async fn test_fetch_and_pin() {
        let cp = IdentityKeyPair::generate().public_key();
        let url = serve(PublicKeyInfo::for_key(&cp)).await;
        let client = ControlPlaneClient::new(url, Duration::from_secs(5)).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let trust = TrustStore::open(dir.path().join("trust.json")).await.unwrap();

        let pinned = client.pin_public_key(&trust).await.unwrap();
        assert_eq!(pinned, cp);
        assert_eq!(trust.trusted_key(), Some(cp));
    }

    #[tokio::test]
    async fn test_inconsistent_fingerprint_rejected() {
        let cp = IdentityKeyPair::generate().public_key();
        let mut info = PublicKeyInfo::for_key(&cp);
        info.fingerprint = "0000:0000:0000:0000".into();
        let url = serve(info).await;

        let client = ControlPlaneClient::new(url, Duration::from_secs(5)).unwrap();
        assert!(matches!(
            client.fetch_public_key().await,
            Err(AgentError::Http { .. })
        ));
    }

    #[tokio::test]
    async fn test_unreachable_server() {
        let client =
            ControlPlaneClient::new("http://127.0.0.1:1/api/v1/public-key", Duration::from_secs(2))
                .unwrap();
        let err = client.fetch_public_key().await.unwrap_err();
        assert!(err.is_retryable());
    }
}
