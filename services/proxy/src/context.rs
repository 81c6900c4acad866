//! State shared by every session.

use std::sync::Arc;
use std::time::Duration;

use crate::auth::SessionVerifier;
use crate::keys::ServerKey;
use crate::proxy::{ProxyStats, Registry};

/// Values served in the status response.
#[derive(Debug, Clone)]
pub struct StatusSettings {
    pub max_players: u32,
    pub description: String,
    /// `data:image/png;base64,...`
    pub favicon: Option<String>,
}

impl Default for StatusSettings {
    fn default() -> Self {
        Self {
            max_players: 100,
            description: "A lodestone proxy".to_string(),
            favicon: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct KeepaliveSettings {
    /// Time between keepalive checks.
    pub interval: Duration,
    /// Silence after which the client is dropped.
    pub timeout: Duration,
}

impl Default for KeepaliveSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(20),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProxySettings {
    pub server_id: String,
    pub status: StatusSettings,
    pub keepalive: KeepaliveSettings,
    /// Bound on the handshake, status and login phases together.
    pub login_timeout: Duration,
    pub backend_connect_timeout: Duration,
    pub prevent_proxy_connections: bool,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            server_id: String::new(),
            status: StatusSettings::default(),
            keepalive: KeepaliveSettings::default(),
            login_timeout: Duration::from_secs(30),
            backend_connect_timeout: Duration::from_secs(2),
            prevent_proxy_connections: false,
        }
    }
}

/// Everything a session handler needs, passed by reference-counted handle
/// rather than kept in globals.
#[derive(Clone)]
pub struct ProxyContext {
    pub registry: Arc<Registry>,
    pub server_key: Arc<ServerKey>,
    pub verifier: Arc<dyn SessionVerifier>,
    pub settings: Arc<ProxySettings>,
    pub stats: Arc<ProxyStats>,
}

impl ProxyContext {
    pub fn new(
        registry: Arc<Registry>,
        server_key: Arc<ServerKey>,
        verifier: Arc<dyn SessionVerifier>,
        settings: ProxySettings,
    ) -> Self {
        Self {
            registry,
            server_key,
            verifier,
            settings: Arc::new(settings),
            stats: Arc::new(ProxyStats::default()),
        }
    }
}
