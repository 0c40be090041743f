//! create-project - create a release board with its columns and labels.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use release_bot::board::BoardResolver;
use release_bot::provisioning::Provisioner;
use release_bot::tracker::github::GITHUB_API_URL;
use release_bot::tracker::{BoardScope, Repo};
use release_bot::{GitHubTracker, SyncError};

/// Create a release board.
#[derive(Parser)]
#[command(name = "create-project")]
#[command(version)]
#[command(about = "Create a release board, its stage columns and stage labels")]
struct Cli {
    /// Name of the board to create, e.g. 17.06.1-ce-rc4.
    name: String,

    /// Name of the repository to create the board in.
    #[arg(short, long, default_value = "staging-release-tracking")]
    repo: String,

    /// Owner of the repository.
    #[arg(short, long, default_value = "docker")]
    owner: String,

    /// Enable verbose logging.
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    /// GitHub token (or set `GITHUB_TOKEN`).
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    token: String,

    /// GitHub API base URL.
    #[arg(long, env = "GITHUB_API_URL", default_value = GITHUB_API_URL)]
    api_url: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let repo = Repo::new(&cli.owner, &cli.repo);
    let tracker: Arc<GitHubTracker> = Arc::new(
        GitHubTracker::with_base_url(&cli.token, &cli.api_url)
            .context("Failed to create GitHub client")?,
    );
    let boards = BoardResolver::new(tracker.clone());

    match boards.find_board_by_name(&repo, &cli.name, BoardScope::All).await {
        Ok(existing) => bail!(
            "Board '{}' already exists for repo {repo} (id {})",
            existing.name,
            existing.id
        ),
        Err(SyncError::NotFound { .. }) => {}
        Err(e) => return Err(e).context("Could not list existing boards"),
    }

    info!(board = %cli.name, repo = %repo, "Creating board");
    let board = boards
        .create_board(&repo, &cli.name)
        .await
        .context("Error creating board")?;

    // A running release-bot provisions the same board from its webhook;
    // provisioning skips whatever is already there.
    let provisioner = Provisioner::new(tracker);
    let report = provisioner
        .provision(&repo, &board)
        .await
        .with_context(|| format!("Error provisioning board '{}'", board.name))?;

    for column in &report.columns_created {
        info!("Created column {column}");
    }
    for label in &report.labels_created {
        info!("Created label {label}");
    }

    provisioner
        .wait_for_provisioning(&board)
        .await
        .with_context(|| format!("Board '{}' does not have its stage columns", board.name))?;
    info!(board = %board.name, "Board ready");
    Ok(())
}
