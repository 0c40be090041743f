//! Priority-ordered migration of cards between release boards.
//!
//! Cards of the named columns are deleted from the source board and created
//! in the same-named columns of the destination board so that each
//! destination column reads p0, p1, p2, then unprioritized from the top, each
//! bucket keeping its source order.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};

use crate::board::BoardResolver;
use crate::column::ColumnResolver;
use crate::error::SyncError;
use crate::label::Priority;
use crate::provisioning::Provisioner;
use crate::retry::PollPolicy;
use crate::tracker::{
    collect_pages, Board, BoardScope, Card, CardContent, Column, ContentType, Issue, Repo, Tracker,
};

/// Order source cards are deleted in.
const DELETE_ORDER: [Priority; 4] = [Priority::P2, Priority::P1, Priority::P0, Priority::None];

/// One batch transfer between two boards, by board name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub source: String,
    pub destination: String,
    pub columns: Vec<String>,
    pub dry_run: bool,
}

/// A card that was (or in a dry run would be) recreated on the destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardMove {
    pub column: String,
    pub issue: u64,
    pub priority: Priority,
}

/// What a migration did, per issue number.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub dry_run: bool,
    /// Recreated cards, in final top-to-bottom order per column.
    pub moved: Vec<CardMove>,
    /// Already on the destination board (422).
    pub duplicates: Vec<u64>,
    /// Rejected with 402, which the boards API returns for some content.
    pub tolerated: Vec<u64>,
    /// Any other creation failure.
    pub failed: Vec<u64>,
}

#[derive(Debug, Clone)]
struct PlannedMove {
    card: Card,
    issue: Issue,
    priority: Priority,
}

#[derive(Debug)]
struct ColumnPlan {
    source: Column,
    destination: Column,
    buckets: BTreeMap<Priority, Vec<PlannedMove>>,
}

impl ColumnPlan {
    /// Final top-to-bottom order on the destination.
    fn final_order(&self) -> impl DoubleEndedIterator<Item = &PlannedMove> {
        self.buckets.values().flatten()
    }

    fn bucket(&self, priority: Priority) -> &[PlannedMove] {
        self.buckets
            .get(&priority)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

/// Moves cards between release boards.
#[derive(Clone)]
pub struct Migrator {
    tracker: Arc<dyn Tracker>,
    boards: BoardResolver,
    columns: ColumnResolver,
    provisioner: Provisioner,
}

impl Migrator {
    #[must_use]
    pub fn new(tracker: Arc<dyn Tracker>) -> Self {
        Self {
            boards: BoardResolver::new(tracker.clone()),
            columns: ColumnResolver::new(tracker.clone()),
            provisioner: Provisioner::new(tracker.clone()),
            tracker,
        }
    }

    #[must_use]
    pub fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.provisioner = self.provisioner.with_poll_policy(poll);
        self
    }

    /// Resolve both boards by exact name, migrate, then close the source.
    ///
    /// A missing destination is created and waited on for its columns,
    /// except in a dry run. Nothing is closed in a dry run.
    pub async fn transfer(
        &self,
        repo: &Repo,
        request: &TransferRequest,
    ) -> Result<MigrationReport, SyncError> {
        let source = self
            .boards
            .find_board_by_name(repo, &request.source, BoardScope::All)
            .await?;
        let destination = self
            .destination_board(repo, &request.destination, request.dry_run)
            .await?;
        info!(
            source = %source.name,
            destination = %destination.name,
            "Resolved boards"
        );

        let report = self
            .migrate(repo, &source, &destination, &request.columns, request.dry_run)
            .await?;

        if !request.dry_run {
            self.boards.close_board(&source).await?;
            info!(board = %source.name, "Closed source board");
        }
        Ok(report)
    }

    async fn destination_board(
        &self,
        repo: &Repo,
        name: &str,
        dry_run: bool,
    ) -> Result<Board, SyncError> {
        match self
            .boards
            .find_board_by_name(repo, name, BoardScope::All)
            .await
        {
            Err(SyncError::NotFound { .. }) if !dry_run => {
                info!(board = %name, "Destination board not found, creating it");
                let board = self.boards.create_board(repo, name).await?;
                self.provisioner.wait_for_provisioning(&board).await?;
                Ok(board)
            }
            found => found,
        }
    }

    /// Move the cards of `columns` from `source` to `destination`.
    ///
    /// Every column and every card's issue is resolved before the first
    /// mutation; any miss aborts the run untouched.
    #[instrument(
        skip_all,
        fields(repo = %repo, source = %source.name, destination = %destination.name, dry_run = dry_run)
    )]
    pub async fn migrate(
        &self,
        repo: &Repo,
        source: &Board,
        destination: &Board,
        columns: &[String],
        dry_run: bool,
    ) -> Result<MigrationReport, SyncError> {
        let plans = self.plan(repo, source, destination, columns).await?;
        let mut report = MigrationReport {
            dry_run,
            ..MigrationReport::default()
        };

        for plan in &plans {
            if dry_run {
                for entry in plan.final_order() {
                    info!(
                        "(dryrun) {}/{} -> {}/{}: #{}",
                        source.name,
                        plan.source.name,
                        destination.name,
                        plan.destination.name,
                        entry.issue.number
                    );
                    report.moved.push(card_move(plan, entry));
                }
                continue;
            }

            for priority in DELETE_ORDER {
                for entry in plan.bucket(priority) {
                    debug!(
                        issue = entry.issue.number,
                        board = %source.name,
                        "Deleting card"
                    );
                    self.tracker.delete_card(entry.card.id).await?;
                }
            }

            // New cards land on top, so create bottom-up. Listed issues only
            // carry issue ids, pull requests included.
            let mut created = Vec::new();
            for entry in plan.final_order().rev() {
                let number = entry.issue.number;
                let content = CardContent {
                    id: entry.issue.id,
                    content_type: ContentType::Issue,
                };
                match self
                    .tracker
                    .create_card(plan.destination.id, content)
                    .await
                {
                    Ok(_) => {
                        info!(
                            "{}/{} -> {}/{}: #{}",
                            source.name,
                            plan.source.name,
                            destination.name,
                            plan.destination.name,
                            number
                        );
                        created.push(card_move(plan, entry));
                    }
                    Err(e) if e.status() == Some(422) => {
                        warn!(
                            issue = number,
                            "Could not create card: issue already exists on the destination board"
                        );
                        report.duplicates.push(number);
                    }
                    Err(e) if e.status() == Some(402) => {
                        debug!(issue = number, "Card creation returned 402, ignoring");
                        report.tolerated.push(number);
                    }
                    Err(e) => {
                        error!(issue = number, error = %e, "Failed to create card");
                        report.failed.push(number);
                    }
                }
            }
            created.reverse();
            report.moved.extend(created);
        }

        info!(
            moved = report.moved.len(),
            duplicates = report.duplicates.len(),
            tolerated = report.tolerated.len(),
            failed = report.failed.len(),
            "Migration finished"
        );
        Ok(report)
    }

    async fn plan(
        &self,
        repo: &Repo,
        source: &Board,
        destination: &Board,
        columns: &[String],
    ) -> Result<Vec<ColumnPlan>, SyncError> {
        let mut pairs = Vec::with_capacity(columns.len());
        for name in columns {
            let from = self.columns.find_column_by_name(source, name).await?;
            let to = self.columns.find_column_by_name(destination, name).await?;
            pairs.push((from, to));
        }

        let issues: HashMap<String, Issue> =
            collect_pages(|page| self.tracker.list_issues(repo, page))
                .await?
                .into_iter()
                .map(|issue| (issue.url.clone(), issue))
                .collect();
        debug!(issues = issues.len(), "Indexed repository issues");

        let mut plans = Vec::with_capacity(pairs.len());
        for (from, to) in pairs {
            let mut buckets: BTreeMap<Priority, Vec<PlannedMove>> = BTreeMap::new();
            for card in self.columns.list_cards(&from).await? {
                let issue = card
                    .content_url
                    .as_deref()
                    .and_then(|url| issues.get(url))
                    .ok_or_else(|| {
                        SyncError::not_found(
                            "issue",
                            format!(
                                "for card {} ({}) in '{}'",
                                card.id,
                                card.content_url.as_deref().unwrap_or("note"),
                                from.name
                            ),
                        )
                    })?;
                let priority = Priority::from_labels(&issue.labels);
                buckets.entry(priority).or_default().push(PlannedMove {
                    issue: issue.clone(),
                    card,
                    priority,
                });
            }
            plans.push(ColumnPlan {
                source: from,
                destination: to,
                buckets,
            });
        }
        Ok(plans)
    }
}

fn card_move(plan: &ColumnPlan, entry: &PlannedMove) -> CardMove {
    CardMove {
        column: plan.destination.name.clone(),
        issue: entry.issue.number,
        priority: entry.priority,
    }
}
