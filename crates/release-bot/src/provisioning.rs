//! Provisioning of new release boards.
//!
//! A release board gets the three canonical columns and the repository gets
//! the release's three stage labels. Columns and labels that already exist
//! are left alone, so provisioning the same board twice is harmless. The
//! first failure aborts the rest and nothing already created is rolled back.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::column::ColumnResolver;
use crate::error::SyncError;
use crate::label::{canonical_labels, release_prefix, CanonicalStage};
use crate::retry::{poll_until, PollPolicy, Polled};
use crate::tracker::{collect_pages, Board, Column, Repo, Tracker};

/// What provisioning created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProvisionReport {
    pub board: String,
    pub columns_created: Vec<String>,
    /// Canonical columns the board already had.
    pub columns_existing: Vec<String>,
    pub labels_created: Vec<String>,
    /// Canonical labels that were already defined.
    pub labels_existing: Vec<String>,
}

/// Creates columns and labels for release boards.
#[derive(Clone)]
pub struct Provisioner {
    tracker: Arc<dyn Tracker>,
    columns: ColumnResolver,
    poll: PollPolicy,
}

impl Provisioner {
    #[must_use]
    pub fn new(tracker: Arc<dyn Tracker>) -> Self {
        Self {
            columns: ColumnResolver::new(tracker.clone()),
            tracker,
            poll: PollPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    /// Create the canonical columns the board lacks in board order, then the
    /// missing stage labels for the board's release.
    #[instrument(skip(self, repo, board), fields(repo = %repo, board = %board.name))]
    pub async fn provision(&self, repo: &Repo, board: &Board) -> Result<ProvisionReport, SyncError> {
        let mut report = ProvisionReport {
            board: board.name.clone(),
            ..ProvisionReport::default()
        };

        let present: HashSet<String> = self
            .columns
            .list_columns(board)
            .await?
            .into_iter()
            .map(|c| c.name)
            .collect();

        for stage in CanonicalStage::ALL {
            let name = stage.column_name();
            if present.contains(name) {
                debug!(column = %name, "Column already exists");
                report.columns_existing.push(name.to_string());
                continue;
            }
            let column = self.tracker.create_column(board.id, name).await?;
            debug!(column = %column.name, column_id = column.id, "Created column");
            report.columns_created.push(column.name);
        }

        let prefix = release_prefix(&board.name);
        let (created, existing) = self.provision_labels(repo, &prefix).await?;
        report.labels_created = created;
        report.labels_existing = existing;

        info!(
            columns_created = report.columns_created.len(),
            columns_existing = report.columns_existing.len(),
            labels_created = report.labels_created.len(),
            labels_existing = report.labels_existing.len(),
            "Provisioned release board"
        );
        Ok(report)
    }

    /// Create the release's canonical labels that the repository lacks.
    ///
    /// Returns `(created, already_present)` label names.
    pub async fn provision_labels(
        &self,
        repo: &Repo,
        prefix: &str,
    ) -> Result<(Vec<String>, Vec<String>), SyncError> {
        let defined: HashSet<String> = collect_pages(|page| self.tracker.list_labels(repo, page))
            .await?
            .into_iter()
            .map(|l| l.name)
            .collect();

        let mut created = Vec::new();
        let mut existing = Vec::new();
        for label in canonical_labels(prefix) {
            if defined.contains(&label.name) {
                debug!(label = %label.name, "Label already exists");
                existing.push(label.name);
                continue;
            }
            self.tracker
                .create_label(repo, &label.name, label.color)
                .await?;
            debug!(label = %label.name, color = label.color, "Created label");
            created.push(label.name);
        }
        Ok((created, existing))
    }

    /// Wait until a board shows exactly its three canonical columns.
    ///
    /// Columns of a freshly created board are added asynchronously by the
    /// webhook service, so the batch tools poll before moving cards.
    #[instrument(skip(self, board), fields(board = %board.name))]
    pub async fn wait_for_provisioning(&self, board: &Board) -> Result<Vec<Column>, SyncError> {
        let expected = CanonicalStage::ALL.len();
        let polled = poll_until(
            &self.poll,
            "board provisioning",
            || self.columns.list_columns(board),
            |columns| columns.len() == expected,
        )
        .await?;

        match polled {
            Polled::Ready(columns) => Ok(columns),
            Polled::Exhausted { attempts, last } => Err(SyncError::ProvisioningTimeout {
                board: board.name.clone(),
                attempts,
                columns: last.len(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::tracker::memory::{Call, MemoryTracker};
    use crate::tracker::BoardState;

    fn repo() -> Repo {
        Repo::new("docker", "release-tracking")
    }

    #[tokio::test]
    async fn test_new_board_gets_columns_and_labels() {
        let tracker = Arc::new(MemoryTracker::new());
        let board = tracker.add_board(&repo(), "18.09-ee-rc1", BoardState::Open);

        let report = Provisioner::new(tracker.clone())
            .provision(&repo(), &board)
            .await
            .unwrap();

        let columns: Vec<_> = tracker
            .columns(board.id)
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(columns, vec!["Triage", "Cherry Pick", "Cherry Picked"]);

        let labels: Vec<_> = tracker
            .labels(&repo())
            .into_iter()
            .map(|l| (l.name, l.color))
            .collect();
        assert_eq!(
            labels,
            vec![
                ("18.09-ee/triage".to_string(), "eeeeee".to_string()),
                ("18.09-ee/cherry-pick".to_string(), "a98bf3".to_string()),
                ("18.09-ee/cherry-picked".to_string(), "bfe5bf".to_string()),
            ]
        );
        assert_eq!(report.columns_created.len(), 3);
        assert_eq!(report.labels_created.len(), 3);
        assert!(report.labels_existing.is_empty());
    }

    #[tokio::test]
    async fn test_existing_labels_are_skipped() {
        let tracker = Arc::new(MemoryTracker::new().with_page_size(1));
        tracker.add_label(&repo(), "bug", "ff0000");
        tracker.add_label(&repo(), "18.09-ee/cherry-pick", "000000");
        let board = tracker.add_board(&repo(), "18.09-ee-rc2", BoardState::Open);

        let report = Provisioner::new(tracker.clone())
            .provision(&repo(), &board)
            .await
            .unwrap();

        assert_eq!(report.labels_existing, vec!["18.09-ee/cherry-pick"]);
        let created: Vec<_> = tracker
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::CreateLabel(name) => Some(name),
                _ => None,
            })
            .collect();
        assert_eq!(created, vec!["18.09-ee/triage", "18.09-ee/cherry-picked"]);
    }

    #[tokio::test]
    async fn test_first_failure_aborts() {
        let tracker = Arc::new(MemoryTracker::new());
        let missing = Board {
            id: 404,
            name: "18.09-ee-rc1".to_string(),
            state: BoardState::Open,
            body: String::new(),
        };

        let err = Provisioner::new(tracker.clone())
            .provision(&repo(), &missing)
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Tracker(ref e) if e.is_not_found()));
        assert!(tracker.calls().is_empty());
    }

    #[tokio::test]
    async fn test_provisioning_twice_keeps_three_columns() {
        let tracker = Arc::new(MemoryTracker::new());
        let board = tracker.add_board(&repo(), "18.09-ee-rc1", BoardState::Open);
        let provisioner = Provisioner::new(tracker.clone());

        provisioner.provision(&repo(), &board).await.unwrap();
        let again = provisioner.provision(&repo(), &board).await.unwrap();

        assert!(again.columns_created.is_empty());
        assert_eq!(again.columns_existing, vec!["Triage", "Cherry Pick", "Cherry Picked"]);
        assert!(again.labels_created.is_empty());
        assert_eq!(tracker.columns(board.id).len(), 3);
        assert_eq!(provisioner.wait_for_provisioning(&board).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_partially_provisioned_board_gets_missing_columns() {
        let tracker = Arc::new(MemoryTracker::new());
        let board = tracker.add_board(&repo(), "18.09-ee-rc1", BoardState::Open);
        tracker.add_column(board.id, "Triage");

        let report = Provisioner::new(tracker.clone())
            .provision(&repo(), &board)
            .await
            .unwrap();

        assert_eq!(report.columns_existing, vec!["Triage"]);
        assert_eq!(report.columns_created, vec!["Cherry Pick", "Cherry Picked"]);
        let names: Vec<_> = tracker
            .columns(board.id)
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["Triage", "Cherry Pick", "Cherry Picked"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_provisioning_ready() {
        let tracker = Arc::new(MemoryTracker::new());
        let board = tracker.add_board(&repo(), "18.09-ee-rc1", BoardState::Open);
        for name in ["Triage", "Cherry Pick", "Cherry Picked"] {
            tracker.add_column(board.id, name);
        }

        let columns = Provisioner::new(tracker)
            .wait_for_provisioning(&board)
            .await
            .unwrap();
        assert_eq!(columns.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_provisioning_times_out() {
        let tracker = Arc::new(MemoryTracker::new());
        let board = tracker.add_board(&repo(), "18.09-ee-rc1", BoardState::Open);
        tracker.add_column(board.id, "Triage");

        let start = tokio::time::Instant::now();
        let err = Provisioner::new(tracker)
            .wait_for_provisioning(&board)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SyncError::ProvisioningTimeout {
                attempts: 4,
                columns: 1,
                ..
            }
        ));
        assert_eq!(start.elapsed(), Duration::from_secs(15));
    }
}
