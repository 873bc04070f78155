//! tailterm server
//!
//! Serves the web terminal frontend and the `/ts` setup socket. Each browser
//! session gets its own ephemeral tailnet peer.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tt_core::config::{self, DEFAULT_DEV_URL, DEFAULT_WEB_DIR};
use tt_core::mesh::TailscaledProvider;
use tt_core::{ServerConfig, SessionTuning};
use tt_server::dev::spawn_dev_server;
use tt_server::{router, AppState, RusshDialer, SessionOrchestrator};

#[derive(Parser)]
#[command(name = "tailterm")]
#[command(about = "Browser terminals over ephemeral tailnet peers")]
#[command(version)]
struct Args {
    /// Public HTTP bind address (`host:port` or `:port`)
    #[arg(long, env = "TS_TERM_ADDR", default_value = ":3000")]
    addr: String,

    /// Control-plane URL for ephemeral peers (vendor default when empty)
    #[arg(long, env = "TS_CONTROL_URL")]
    control_url: Option<String>,

    /// OpenSSH known_hosts file (default: ~/.ssh/known_hosts)
    #[arg(long, env = "TS_TERM_KNOWN_HOSTS")]
    known_hosts: Option<PathBuf>,

    /// Directory holding the built frontend
    #[arg(long, env = "TS_TERM_WEB_DIR", default_value = DEFAULT_WEB_DIR)]
    web_dir: PathBuf,

    /// Development mode: run and proxy the frontend dev server, accept any origin
    #[arg(long)]
    dev: bool,

    /// Frontend dev server URL
    #[arg(long, default_value = DEFAULT_DEV_URL)]
    dev_url: String,

    /// tailscaled binary
    #[arg(long, default_value = "tailscaled")]
    tailscaled: PathBuf,

    /// tailscale CLI binary
    #[arg(long, default_value = "tailscale")]
    tailscale: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine
    dotenvy::dotenv().ok();

    let args = Args::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| args.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("tailterm starting...");

    let config = Arc::new(build_config(args)?);
    if config.dev {
        tracing::warn!("Development mode: origin checks are disabled");
    }

    // Held for the life of the server; dropping it stops the dev server
    let _dev_server = if config.dev {
        Some(spawn_dev_server(web_root(&config.web_dir)).await?)
    } else {
        None
    };

    let provider = Arc::new(TailscaledProvider::new(
        config.tailscaled_bin.clone(),
        config.tailscale_bin.clone(),
    ));
    let orchestrator = Arc::new(SessionOrchestrator::new(
        Arc::clone(&config),
        provider,
        Arc::new(RusshDialer::new()),
    ));

    let app = router(AppState::new(Arc::clone(&config), orchestrator));

    let cancel = CancellationToken::new();
    tokio::spawn(wait_for_signal(cancel.clone()));

    let listener = TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_address))?;
    tracing::info!("Listening on {}", config.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .context("HTTP server failed")?;

    tracing::info!("tailterm shutdown complete");
    Ok(())
}

fn build_config(args: Args) -> Result<ServerConfig> {
    let known_hosts_path = match args.known_hosts {
        Some(path) => path,
        None => config::default_known_hosts_path()?,
    };

    Ok(ServerConfig {
        bind_address: config::normalize_bind_address(&args.addr)?,
        control_url: args.control_url.filter(|url| !url.trim().is_empty()),
        known_hosts_path,
        web_dir: args.web_dir,
        dev: args.dev,
        dev_url: args.dev_url,
        tailscaled_bin: args.tailscaled,
        tailscale_bin: args.tailscale,
        tuning: SessionTuning::default(),
    })
}

/// Frontend project root: the parent of the build output directory
fn web_root(web_dir: &Path) -> &Path {
    web_dir
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."))
}

async fn wait_for_signal(cancel: CancellationToken) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
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

    cancel.cancel();
}
