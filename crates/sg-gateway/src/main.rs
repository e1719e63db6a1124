//! Session gateway daemon
//!
//! Keeps one messaging-platform session alive and exposes it over HTTP.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sg_core::config::{self, GatewayConfig};
use sg_core::FileCredentialStore;
use sg_gateway::pairing::QrSvgRenderer;
use sg_gateway::transport::BridgeTransport;
use sg_gateway::{http, GatewayState};

#[derive(Parser)]
#[command(name = "sg-gateway")]
#[command(about = "Persistent messaging session gateway")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "SG_CONFIG")]
    config: Option<PathBuf>,

    /// HTTP bind address (overrides config)
    #[arg(short, long, env = "SG_BIND")]
    bind: Option<String>,

    /// Bridge sidecar address (overrides config)
    #[arg(long, env = "SG_BRIDGE")]
    bridge: Option<String>,

    /// Credential directory (overrides config)
    #[arg(long, env = "SG_CREDENTIALS_DIR")]
    credentials_dir: Option<PathBuf>,

    /// Run in foreground with verbose output
    #[arg(short, long)]
    foreground: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Write the effective configuration to the config path and exit
    #[arg(long)]
    init_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.foreground { "debug" } else { &args.log_level };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Session gateway starting...");

    let config = load_config(&args)?;

    if args.init_config {
        let path = args.config.clone().unwrap_or_else(config::default_config_path);
        config::save_config(&path, &config)
            .with_context(|| format!("Failed to write config to {:?}", path))?;
        tracing::info!("Wrote configuration to {:?}", path);
        return Ok(());
    }

    config
        .reconnect
        .validate()
        .context("Invalid reconnect settings")?;

    tracing::info!(
        "Bridge at {}, credentials in {:?}",
        config.bridge.address,
        config.credentials_dir
    );

    let transport = Arc::new(BridgeTransport::new(config.bridge.clone()));
    let store = Arc::new(FileCredentialStore::new(config.credentials_dir.clone()));
    let renderer = Arc::new(QrSvgRenderer::default());

    let listener = TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("Failed to bind HTTP server to {}", config.bind_address))?;

    let (state, supervisor) = GatewayState::build(config, transport, store, renderer);

    // Create cancellation token for graceful shutdown
    let cancel = CancellationToken::new();

    // Setup signal handlers
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install signal handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
        }

        cancel_clone.cancel();
    });

    let mut supervisor_task = tokio::spawn(supervisor.run());
    let server_task = tokio::spawn(http::serve(listener, Arc::clone(&state), cancel.clone()));

    let fatal = tokio::select! {
        _ = cancel.cancelled() => None,
        result = &mut supervisor_task => Some(result),
    };

    let outcome = match fatal {
        None => {
            if let Err(e) = state.supervisor.shutdown().await {
                tracing::warn!("Supervisor already stopped: {}", e);
            }
            match supervisor_task.await {
                Ok(result) => result.context("Connection supervisor failed"),
                Err(e) => Err(e).context("Connection supervisor panicked"),
            }
        }
        Some(result) => {
            cancel.cancel();
            let result = match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e).context("Connection supervisor failed"),
                Err(e) => Err(e).context("Connection supervisor panicked"),
            };
            if let Err(e) = &result {
                tracing::error!("{:#}", e);
            }
            result
        }
    };

    match server_task.await {
        Ok(Err(e)) => tracing::error!("{:#}", e),
        Err(e) => tracing::error!("HTTP server task failed: {}", e),
        Ok(Ok(())) => {}
    }

    tracing::info!("Session gateway shutdown complete");
    outcome
}

/// Load the config file and apply command line overrides
fn load_config(args: &Args) -> Result<GatewayConfig> {
    let mut config = if let Some(config_path) = &args.config {
        if args.init_config && !config_path.exists() {
            GatewayConfig::default()
        } else {
            config::load_config(config_path)
                .with_context(|| format!("Failed to load config from {:?}", config_path))?
        }
    } else {
        let default_path = config::default_config_path();
        if default_path.exists() {
            config::load_config(&default_path).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config from {:?}: {}", default_path, e);
                GatewayConfig::default()
            })
        } else {
            tracing::info!("Using default configuration");
            GatewayConfig::default()
        }
    };

    if let Some(bind) = &args.bind {
        config.bind_address = bind.clone();
    }
    if let Some(bridge) = &args.bridge {
        config.bridge.address = bridge.clone();
    }
    if let Some(dir) = &args.credentials_dir {
        config.credentials_dir = dir.clone();
    }
    Ok(config)
}
