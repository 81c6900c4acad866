//! Proxy configuration.
//!
//! Loaded once at startup from a TOML file, with a handful of `LODESTONE_*`
//! environment overrides applied on top. There is no reload.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, ensure, Context, Result};
use base64::Engine;
use serde::Deserialize;

use crate::context::{KeepaliveSettings, ProxySettings, StatusSettings};
use crate::proxy::{BackendGroup, SelectionAlgorithm};

/// Default session server endpoint.
pub const DEFAULT_SESSION_SERVER: &str =
    "https://sessionserver.mojang.com/session/minecraft/hasJoined";

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub listener: ListenerSection,

    #[serde(default)]
    pub status: StatusSection,

    #[serde(default)]
    pub auth: AuthSection,

    #[serde(default)]
    pub keepalive: KeepaliveSection,

    #[serde(default)]
    pub backend: BackendSection,

    #[serde(default)]
    pub log: LogSection,

    /// Backend groups, keyed by the domains they serve.
    #[serde(default)]
    pub backends: Vec<BackendGroupConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ListenerSection {
    /// Address to accept client connections on.
    pub bind: SocketAddr,
    /// Deadline for a client to get from connect to play.
    pub login_timeout_ms: u64,
}

impl Default for ListenerSection {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 25565)),
            login_timeout_ms: 30000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StatusSection {
    pub max_players: u32,
    pub description: String,
    /// Path to a 64x64 PNG, relative to the config file.
    pub favicon: Option<PathBuf>,
}

impl Default for StatusSection {
    fn default() -> Self {
        Self {
            max_players: 100,
            description: "A lodestone proxy".to_string(),
            favicon: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthSection {
    /// `hasJoined` endpoint of the session server.
    pub session_server: String,
    /// Server id sent in the encryption request. Empty for modern clients.
    pub server_id: String,
    pub timeout_ms: u64,
    /// Forward the client IP to the session server.
    pub prevent_proxy_connections: bool,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            session_server: DEFAULT_SESSION_SERVER.to_string(),
            server_id: String::new(),
            timeout_ms: 5000,
            prevent_proxy_connections: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KeepaliveSection {
    pub interval_ms: u64,
    pub timeout_ms: u64,
}

impl Default for KeepaliveSection {
    fn default() -> Self {
        Self {
            interval_ms: 5000,
            timeout_ms: 20000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendSection {
    pub connect_timeout_ms: u64,
}

impl Default for BackendSection {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Text,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}

/// One `[[backends]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendGroupConfig {
    pub domains: Vec<String>,
    pub targets: Vec<String>,
    #[serde(default)]
    pub algorithm: SelectionAlgorithm,
}

impl Config {
    /// Read, override from the environment, and validate.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config = Self::from_toml(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).context("Invalid TOML")
    }

    /// Apply `LODESTONE_*` overrides. `lookup` is `std::env::var` outside tests.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bind) = lookup("LODESTONE_BIND") {
            self.listener.bind = bind
                .parse()
                .context("LODESTONE_BIND must be a socket address (example: 0.0.0.0:25565).")?;
        }
        if let Some(level) = lookup("LODESTONE_LOG_LEVEL") {
            self.log.level = level;
        }
        if let Some(url) = lookup("LODESTONE_SESSION_SERVER") {
            self.auth.session_server = url;
        }
        Ok(())
    }

    /// Reject configurations the proxy cannot serve.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            !self.backends.is_empty(),
            "At least one [[backends]] group is required."
        );

        for (index, group) in self.backends.iter().enumerate() {
            ensure!(
                !group.domains.is_empty(),
                "Backend group #{index} has no domains."
            );
            ensure!(
                !group.targets.is_empty(),
                "Backend group #{index} has no targets."
            );
            for target in &group.targets {
                validate_target(target)
                    .with_context(|| format!("Backend group #{index} has an invalid target."))?;
            }
            for domain in &group.domains {
                let key = crate::proxy::normalize_domain(domain);
                if key.is_empty() {
                    bail!("Backend group #{index} has an empty domain.");
                }
            }
        }

        ensure!(
            self.listener.login_timeout_ms > 0,
            "listener.login_timeout_ms must be greater than zero."
        );
        ensure!(
            self.keepalive.interval_ms > 0,
            "keepalive.interval_ms must be greater than zero."
        );
        ensure!(
            self.keepalive.timeout_ms >= self.keepalive.interval_ms,
            "keepalive.timeout_ms must not be shorter than keepalive.interval_ms."
        );
        Ok(())
    }

    /// Build the backend groups in file order.
    pub fn backend_groups(&self) -> Vec<BackendGroup> {
        self.backends
            .iter()
            .map(|group| {
                BackendGroup::new(
                    group.domains.clone(),
                    group.targets.clone(),
                    group.algorithm,
                )
            })
            .collect()
    }

    /// Runtime settings shared by every session.
    pub fn settings(&self, favicon: Option<String>) -> ProxySettings {
        ProxySettings {
            server_id: self.auth.server_id.clone(),
            status: StatusSettings {
                max_players: self.status.max_players,
                description: self.status.description.clone(),
                favicon,
            },
            keepalive: KeepaliveSettings {
                interval: Duration::from_millis(self.keepalive.interval_ms),
                timeout: Duration::from_millis(self.keepalive.timeout_ms),
            },
            login_timeout: Duration::from_millis(self.listener.login_timeout_ms),
            backend_connect_timeout: Duration::from_millis(self.backend.connect_timeout_ms),
            prevent_proxy_connections: self.auth.prevent_proxy_connections,
        }
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_millis(self.auth.timeout_ms)
    }

    /// Read the favicon, if configured, as a `data:` URI.
    ///
    /// Relative paths resolve against `base_dir` (the config file's directory).
    pub fn load_favicon(&self, base_dir: &Path) -> Result<Option<String>> {
        let Some(path) = &self.status.favicon else {
            return Ok(None);
        };
        let path = base_dir.join(path);
        let png = std::fs::read(&path)
            .with_context(|| format!("Failed to read favicon {}", path.display()))?;
        Ok(Some(favicon_data_uri(&png)))
    }
}

/// Encode PNG bytes the way the status response expects them.
pub fn favicon_data_uri(png: &[u8]) -> String {
    format!(
        "data:image/png;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(png)
    )
}

fn validate_target(target: &str) -> Result<()> {
    let Some((host, port)) = target.rsplit_once(':') else {
        bail!("Target {target:?} must be host:port.");
    };
    ensure!(!host.is_empty(), "Target {target:?} has an empty host.");
    port.parse::<u16>()
        .with_context(|| format!("Target {target:?} has a non-numeric port."))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
        [listener]
        bind = "127.0.0.1:25577"

        [status]
        max_players = 20
        description = "hello"

        [auth]
        session_server = "http://127.0.0.1:9000/hasJoined"
        timeout_ms = 1500

        [keepalive]
        interval_ms = 1000
        timeout_ms = 4000

        [log]
        level = "debug"
        format = "text"

        [[backends]]
        domains = ["a.example", "Play.A.Example."]
        targets = ["10.0.0.1:25565", "10.0.0.2:25565"]
        algorithm = "round-robin"

        [[backends]]
        domains = ["b.example"]
        targets = ["backend-b:25565"]
        algorithm = "random"
    "#;

    #[test]
    fn test_parse_full_config() {
        let config = Config::from_toml(FULL).unwrap();
        config.validate().unwrap();

        assert_eq!(config.listener.bind, "127.0.0.1:25577".parse().unwrap());
        assert_eq!(config.status.max_players, 20);
        assert_eq!(config.auth.server_id, "");
        assert_eq!(config.auth_timeout(), Duration::from_millis(1500));
        assert_eq!(config.log.format, LogFormat::Text);
        assert_eq!(config.backends.len(), 2);
        assert_eq!(config.backends[0].algorithm, SelectionAlgorithm::RoundRobin);
        assert_eq!(config.backends[1].algorithm, SelectionAlgorithm::Random);

        let settings = config.settings(None);
        assert_eq!(settings.keepalive.interval, Duration::from_secs(1));
        assert_eq!(settings.keepalive.timeout, Duration::from_secs(4));
        assert_eq!(settings.backend_connect_timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_toml(
            r#"
            [[backends]]
            domains = ["a.example"]
            targets = ["127.0.0.1:25566"]
            "#,
        )
        .unwrap();
        config.validate().unwrap();

        assert_eq!(config.listener.bind.port(), 25565);
        assert_eq!(config.settings(None).login_timeout, Duration::from_secs(30));
        assert_eq!(config.auth.session_server, DEFAULT_SESSION_SERVER);
        assert_eq!(config.keepalive.interval_ms, 5000);
        assert_eq!(config.keepalive.timeout_ms, 20000);
        assert_eq!(config.log.format, LogFormat::Json);
        assert_eq!(config.backends[0].algorithm, SelectionAlgorithm::RoundRobin);
    }

    #[test]
    fn test_rejects_unknown_algorithm() {
        let result = Config::from_toml(
            r#"
            [[backends]]
            domains = ["a.example"]
            targets = ["127.0.0.1:25566"]
            algorithm = "least-connections"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_validation_failures() {
        assert!(Config::default().validate().is_err());

        let no_targets = Config::from_toml(
            r#"
            [[backends]]
            domains = ["a.example"]
            targets = []
            "#,
        )
        .unwrap();
        assert!(no_targets.validate().is_err());

        let bad_port = Config::from_toml(
            r#"
            [[backends]]
            domains = ["a.example"]
            targets = ["10.0.0.1:minecraft"]
            "#,
        )
        .unwrap();
        assert!(bad_port.validate().is_err());

        let no_port = Config::from_toml(
            r#"
            [[backends]]
            domains = ["a.example"]
            targets = ["10.0.0.1"]
            "#,
        )
        .unwrap();
        assert!(no_port.validate().is_err());

        let no_login_timeout = Config::from_toml(
            r#"
            [listener]
            login_timeout_ms = 0

            [[backends]]
            domains = ["a.example"]
            targets = ["10.0.0.1:25565"]
            "#,
        )
        .unwrap();
        assert!(no_login_timeout.validate().is_err());
    }

    #[tokio::test]
    async fn test_duplicate_domains_are_left_to_the_registry() {
        let config = Config::from_toml(
            r#"
            [[backends]]
            domains = ["a.example"]
            targets = ["10.0.0.1:25565"]

            [[backends]]
            domains = ["A.EXAMPLE"]
            targets = ["10.0.0.2:25565"]
            "#,
        )
        .unwrap();
        config.validate().unwrap();

        let registry = crate::proxy::Registry::new();
        let mut shadowed = Vec::new();
        for group in config.backend_groups() {
            shadowed.extend(registry.add_backend_group(group).await);
        }
        assert_eq!(shadowed, ["a.example"]);
        let group = registry.resolve_group("a.example").await.unwrap();
        assert_eq!(group.targets(), ["10.0.0.1:25565"]);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::from_toml(FULL).unwrap();
        config
            .apply_overrides(|key| match key {
                "LODESTONE_BIND" => Some("0.0.0.0:30000".to_string()),
                "LODESTONE_SESSION_SERVER" => Some("http://auth.test/hasJoined".to_string()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.listener.bind.port(), 30000);
        assert_eq!(config.auth.session_server, "http://auth.test/hasJoined");
        assert_eq!(config.log.level, "debug");

        let err = config
            .apply_overrides(|key| (key == "LODESTONE_BIND").then(|| "nonsense".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("LODESTONE_BIND"));
    }

    #[test]
    fn test_example_config_is_valid() {
        let config = Config::from_toml(include_str!("../lodestone.example.toml")).unwrap();
        config.validate().unwrap();
        assert_eq!(config.backend_groups().len(), 2);
    }

    #[test]
    fn test_favicon_data_uri() {
        assert_eq!(
            favicon_data_uri(&[0x89, b'P', b'N', b'G']),
            "data:image/png;base64,iVBORw=="
        );
    }
}
