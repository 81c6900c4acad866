//! Session verification.
//!
//! After the key exchange the proxy asks the session server whether the
//! player really joined with the session hash we computed:
//!
//! ```text
//! GET {session_server}?username=<name>&serverId=<hash>[&ip=<client ip>]
//! 200 {"id": "<uuid, no dashes>", "name": "...", "properties": [...]}
//! ```
//!
//! Anything other than 200 means the client did not authenticate.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::AuthError;

/// A profile property (skin textures and the like).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileProperty {
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

/// Body of a successful `hasJoined` response.
#[derive(Debug, Clone, Deserialize)]
pub struct GameProfile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub properties: Vec<ProfileProperty>,
}

/// Identity confirmed by the session server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    pub uuid: Uuid,
    pub name: String,
    pub properties: Vec<ProfileProperty>,
}

impl TryFrom<GameProfile> for VerifiedIdentity {
    type Error = AuthError;

    fn try_from(profile: GameProfile) -> Result<Self, Self::Error> {
        let uuid = Uuid::parse_str(&profile.id)
            .map_err(|e| AuthError::MalformedProfile(format!("invalid id {:?}: {e}", profile.id)))?;
        Ok(Self {
            uuid,
            name: profile.name,
            properties: profile.properties,
        })
    }
}

/// Session verification interface.
#[async_trait]
pub trait SessionVerifier: Send + Sync {
    /// Confirm that `username` joined with `server_hash`.
    async fn has_joined(
        &self,
        username: &str,
        server_hash: &str,
        client_ip: Option<IpAddr>,
    ) -> Result<VerifiedIdentity, AuthError>;
}

/// HTTPS client for the session server.
#[derive(Debug, Clone)]
pub struct SessionServerClient {
    http: reqwest::Client,
    url: String,
}

impl SessionServerClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl SessionVerifier for SessionServerClient {
    async fn has_joined(
        &self,
        username: &str,
        server_hash: &str,
        client_ip: Option<IpAddr>,
    ) -> Result<VerifiedIdentity, AuthError> {
        let mut request = self
            .http
            .get(&self.url)
            .query(&[("username", username), ("serverId", server_hash)]);
        if let Some(ip) = client_ip {
            request = request.query(&[("ip", ip.to_string())]);
        }

        let response = request.send().await.map_err(AuthError::Transport)?;
        let status = response.status();
        if status != StatusCode::OK {
            debug!(username = %username, status = status.as_u16(), "Session server rejected login");
            return Err(AuthError::Rejected {
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(AuthError::Transport)?;
        let profile: GameProfile = serde_json::from_slice(&body)
            .map_err(|e| AuthError::MalformedProfile(e.to_string()))?;
        VerifiedIdentity::try_from(profile)
    }
}
