//! Lodestone proxy
//!
//! Accepts Minecraft clients, authenticates them against the session
//! server, and relays each player to a backend chosen by the domain they
//! connected with.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use lodestone_proxy::config::{Config, LogFormat};
use lodestone_proxy::{Listener, ProxyContext, Registry, ServerKey, SessionServerClient};

#[derive(Debug, Parser)]
#[command(name = "lodestone", version, about)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, env = "LODESTONE_CONFIG", default_value = "lodestone.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load(&args.config)?;

    init_tracing(&config);

    info!("Starting lodestone proxy");
    info!(
        bind_addr = %config.listener.bind,
        backend_groups = config.backends.len(),
        session_server = %config.auth.session_server,
        "Configuration loaded"
    );

    let base_dir = args.config.parent().unwrap_or_else(|| Path::new("."));
    let favicon = config.load_favicon(base_dir)?;

    let registry = Arc::new(Registry::new());
    for group in config.backend_groups() {
        for domain in registry.add_backend_group(group).await {
            warn!(domain = %domain, "Domain already served by an earlier backend group, ignoring");
        }
    }

    let server_key = ServerKey::generate().context("Failed to generate RSA key pair")?;
    let verifier = SessionServerClient::new(&config.auth.session_server, config.auth_timeout())
        .context("Failed to build session server client")?;

    let ctx = ProxyContext::new(
        registry,
        Arc::new(server_key),
        Arc::new(verifier),
        config.settings(favicon),
    );

    let listener = Listener::bind(config.listener.bind, ctx)
        .await
        .with_context(|| format!("Failed to bind {}", config.listener.bind))?;
    let listener = Arc::new(listener);

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received");
                signal_token.cancel();
            }
            Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
        }
    });

    listener.run(shutdown).await?;
    info!("Proxy stopped");
    Ok(())
}

fn init_tracing(config: &Config) {
    // Prefer RUST_LOG, fall back to the configured level.
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log.level.clone().into());
    let registry = tracing_subscriber::registry().with(filter);
    match config.log.format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}
