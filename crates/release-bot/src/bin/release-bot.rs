//! Release bot service binary.
//!
//! Receives GitHub webhooks and keeps release boards and stage labels in sync.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use release_bot::server::{self, AppState};
use release_bot::{Config, Dispatcher, Engine, GitHubTracker};

/// Release bot - sync GitHub labels with release board columns.
#[derive(Parser)]
#[command(name = "release-bot")]
#[command(about = "Sync GitHub stage labels with release project boards")]
struct Cli {
    /// Port to bind to (or set `RELEASE_BOT_PORT`).
    #[arg(long)]
    port: Option<u16>,

    /// Toggle debug logging (or set `RELEASE_BOT_DEBUG`).
    #[arg(long, default_value = "false")]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::from_env().with_debug(cli.debug);
    if let Some(port) = cli.port {
        config = config.with_port(port);
    }

    let default_level = if config.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("release_bot={default_level},info"))),
        )
        .init();

    info!("Starting release-bot...");

    let token = config
        .github_token
        .clone()
        .context("RELEASE_BOT_GITHUB_TOKEN is not set")?;
    if config.webhook_secret.is_none() {
        warn!("RELEASE_BOT_WEBHOOK_SECRET is not set - webhook signatures will not be verified");
    }

    let tracker = GitHubTracker::with_base_url(&token, &config.github_api_url)
        .context("Failed to create GitHub client")?;
    info!(api = %config.github_api_url, "GitHub client configured");

    let (dispatcher, dispatch_loop) =
        Dispatcher::start(Engine::new(Arc::new(tracker)), config.dispatch);

    let app = server::build_router(AppState {
        dispatcher,
        webhook_secret: config.webhook_secret.clone(),
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(port = config.port, "release-bot listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // The router held the last dispatcher handle; let the queue drain.
    dispatch_loop.await.context("Dispatcher task failed")?;
    info!("release-bot stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
