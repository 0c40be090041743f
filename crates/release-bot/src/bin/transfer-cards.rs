//! transfer-cards - move open release cards from one board to the next.
//!
//! Cards of the selected columns are recreated on the destination board in
//! priority order (p0, p1, p2, unprioritized) and removed from the source
//! board, which is then closed.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use release_bot::migration::{Migrator, TransferRequest};
use release_bot::tracker::github::GITHUB_API_URL;
use release_bot::tracker::Repo;
use release_bot::GitHubTracker;

/// Transfer release cards between project boards.
#[derive(Parser)]
#[command(name = "transfer-cards")]
#[command(version)]
#[command(about = "Move cards from one release board to another, highest priority first")]
struct Cli {
    /// Name of the board to pull cards from.
    source: String,

    /// Name of the board to put cards into; created when missing.
    destination: String,

    /// Don't make any changes upstream.
    #[arg(long, default_value = "false")]
    dry_run: bool,

    /// Columns to pull from, comma separated.
    #[arg(short, long, default_value = "Triage,Cherry Pick")]
    columns: String,

    /// Name of the repository holding the boards.
    #[arg(short = 'r', long, default_value = "staging-release-tracking")]
    repo_name: String,

    /// Owner of the repository holding the boards.
    #[arg(short = 'o', long, default_value = "docker")]
    repo_owner: String,

    /// See debug statements.
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    /// GitHub token (or set `GITHUB_TOKEN`).
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    token: String,

    /// GitHub API base URL.
    #[arg(long, env = "GITHUB_API_URL", default_value = GITHUB_API_URL)]
    api_url: String,
}

impl Cli {
    fn columns(&self) -> Vec<String> {
        self.columns
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(String::from)
            .collect()
    }
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

    let repo = Repo::new(&cli.repo_owner, &cli.repo_name);
    let tracker = GitHubTracker::with_base_url(&cli.token, &cli.api_url)
        .context("Failed to create GitHub client")?;
    let migrator = Migrator::new(Arc::new(tracker));

    let request = TransferRequest {
        source: cli.source.clone(),
        destination: cli.destination.clone(),
        columns: cli.columns(),
        dry_run: cli.dry_run,
    };
    info!(
        repo = %repo,
        source = %request.source,
        destination = %request.destination,
        columns = ?request.columns,
        dry_run = request.dry_run,
        "Transferring cards"
    );

    let report = migrator
        .transfer(&repo, &request)
        .await
        .with_context(|| format!("Failed to transfer cards from '{}'", request.source))?;

    info!(
        moved = report.moved.len(),
        duplicates = report.duplicates.len(),
        tolerated = report.tolerated.len(),
        failed = report.failed.len(),
        dry_run = report.dry_run,
        "Transfer complete"
    );
    Ok(())
}
