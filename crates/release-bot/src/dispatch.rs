//! Event dispatch.
//!
//! [`Engine`] routes each [`Event`] to its reconciler. [`Dispatcher`] runs
//! engine jobs off a bounded queue with a fixed number of concurrent workers,
//! each job under a deadline.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::error::SyncError;
use crate::events::Event;
use crate::label::StageLabel;
use crate::outcome::Outcome;
use crate::placement::PlacementReconciler;
use crate::provisioning::Provisioner;
use crate::tracker::Tracker;

/// Routes events to the reconcilers.
#[derive(Clone)]
pub struct Engine {
    placement: PlacementReconciler,
    provisioner: Provisioner,
}

impl Engine {
    #[must_use]
    pub fn new(tracker: Arc<dyn Tracker>) -> Self {
        Self {
            placement: PlacementReconciler::new(tracker.clone()),
            provisioner: Provisioner::new(tracker),
        }
    }

    /// Reconcile one event.
    #[instrument(skip_all, fields(event = event.kind(), repo = %event.repo()))]
    pub async fn handle(&self, event: &Event) -> Result<Outcome, SyncError> {
        match event {
            Event::LabelAdded { repo, issue, label } => {
                self.placement.place(repo, issue, label).await
            }
            Event::LabelRemoved { repo, issue, label } => {
                self.placement.unplace(repo, issue, label).await
            }
            Event::IssueOpened { repo, issue } => {
                // Every stage label gets its placement; a failing one does not
                // stop the others and the first failure is reported.
                let mut outcomes = Vec::new();
                let mut first_error = None;
                for label in &issue.labels {
                    if StageLabel::parse(&label.name).is_err() {
                        continue;
                    }
                    match self.placement.place(repo, issue, &label.name).await {
                        Ok(outcome) => outcomes.push(outcome),
                        Err(e) => {
                            warn!(label = %label.name, error = %e, "Placement failed");
                            first_error.get_or_insert(e);
                        }
                    }
                }
                match first_error {
                    Some(e) => Err(e),
                    None => Ok(Outcome::Many { outcomes }),
                }
            }
            Event::BoardCreated { repo, board } => self
                .provisioner
                .provision(repo, board)
                .await
                .map(Outcome::Provisioned),
            Event::CardCreated { repo, card } | Event::CardMoved { repo, card } => {
                self.placement.sync_labels(repo, card).await
            }
            Event::CardDeleted { repo, card } => self.placement.clear_labels(repo, card).await,
        }
    }
}

/// Sizing of the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Jobs running at once.
    pub workers: usize,
    /// Jobs waiting for a worker before new ones are rejected.
    pub queue_depth: usize,
    /// Deadline for one job.
    pub job_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            queue_depth: 256,
            job_timeout: Duration::from_secs(300),
        }
    }
}

/// Why an event was not queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("event queue is full")]
    QueueFull,
    #[error("dispatcher has shut down")]
    Closed,
}

#[derive(Debug, Default)]
struct Counters {
    completed: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    rejected: AtomicU64,
}

/// Job counters since start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub rejected: u64,
}

struct Job {
    event: Event,
    reply: oneshot::Sender<Result<Outcome, SyncError>>,
}

/// Completion of a submitted job.
#[derive(Debug)]
pub struct JobHandle(oneshot::Receiver<Result<Outcome, SyncError>>);

impl JobHandle {
    /// Wait for the job. `None` if the dispatcher went away first.
    pub async fn wait(self) -> Option<Result<Outcome, SyncError>> {
        self.0.await.ok()
    }
}

/// Bounded queue of engine jobs.
#[derive(Clone)]
pub struct Dispatcher {
    queue: mpsc::Sender<Job>,
    counters: Arc<Counters>,
}

impl Dispatcher {
    /// Start the dispatch loop. It stops once every `Dispatcher` clone is
    /// dropped and the queue has drained.
    #[must_use]
    pub fn start(engine: Engine, config: DispatchConfig) -> (Self, JoinHandle<()>) {
        let (queue, mut jobs) = mpsc::channel::<Job>(config.queue_depth.max(1));
        let counters = Arc::new(Counters::default());
        let workers = Arc::new(Semaphore::new(config.workers.max(1)));

        info!(
            workers = config.workers,
            queue_depth = config.queue_depth,
            job_timeout_secs = config.job_timeout.as_secs(),
            "Starting dispatcher"
        );

        let loop_counters = counters.clone();
        let handle = tokio::spawn(async move {
            while let Some(job) = jobs.recv().await {
                let Ok(permit) = workers.clone().acquire_owned().await else {
                    break;
                };
                let engine = engine.clone();
                let counters = loop_counters.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    let result = run_job(&engine, &job.event, config.job_timeout, &counters).await;
                    // The submitter may not be waiting.
                    let _ = job.reply.send(result);
                });
            }
            debug!("Dispatcher queue closed");
        });

        (Self { queue, counters }, handle)
    }

    /// Queue an event without waiting for room.
    pub fn submit(&self, event: Event) -> Result<JobHandle, SubmitError> {
        let (reply, done) = oneshot::channel();
        match self.queue.try_send(Job { event, reply }) {
            Ok(()) => Ok(JobHandle(done)),
            Err(TrySendError::Full(job)) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                warn!(
                    event = job.event.kind(),
                    repo = %job.event.repo(),
                    "Event queue full, rejecting event"
                );
                Err(SubmitError::QueueFull)
            }
            Err(TrySendError::Closed(_)) => Err(SubmitError::Closed),
        }
    }

    #[must_use]
    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            timed_out: self.counters.timed_out.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
        }
    }
}

async fn run_job(
    engine: &Engine,
    event: &Event,
    deadline: Duration,
    counters: &Counters,
) -> Result<Outcome, SyncError> {
    match tokio::time::timeout(deadline, engine.handle(event)).await {
        Ok(Ok(outcome)) => {
            counters.completed.fetch_add(1, Ordering::Relaxed);
            debug!(event = event.kind(), outcome = ?outcome, "Event reconciled");
            Ok(outcome)
        }
        Ok(Err(e)) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            match &e {
                SyncError::NotFound { .. } => {
                    warn!(event = event.kind(), repo = %event.repo(), error = %e, "Reconciliation aborted");
                }
                _ => error!(event = event.kind(), repo = %event.repo(), error = %e, "Reconciliation failed"),
            }
            Err(e)
        }
        Err(_) => {
            counters.timed_out.fetch_add(1, Ordering::Relaxed);
            error!(
                event = event.kind(),
                repo = %event.repo(),
                timeout_secs = deadline.as_secs(),
                "Reconciliation timed out, operations already issued are kept"
            );
            Err(SyncError::Timeout(deadline))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::SkipReason;
    use crate::tracker::memory::MemoryTracker;
    use crate::tracker::{BoardState, Card, Repo};

    fn repo() -> Repo {
        Repo::new("docker", "release-tracking")
    }

    fn seeded(tracker: &MemoryTracker) -> (u64, u64) {
        let board = tracker.add_board(&repo(), "18.09-ee-rc1", BoardState::Open);
        let triage = tracker.add_column(board.id, "Triage");
        tracker.add_column(board.id, "Cherry Pick");
        tracker.add_column(board.id, "Cherry Picked");
        (board.id, triage.id)
    }

    fn labeled(tracker: &MemoryTracker, number: u64, label: &str) -> Event {
        Event::LabelAdded {
            repo: repo(),
            issue: tracker.add_issue(&repo(), number, &[label]),
            label: label.to_string(),
        }
    }

    #[tokio::test]
    async fn test_engine_routes_every_event_kind() {
        let tracker = Arc::new(MemoryTracker::new());
        let (board_id, triage) = seeded(&tracker);
        let engine = Engine::new(tracker.clone());

        let outcome = engine.handle(&labeled(&tracker, 42, "18.09-ee/triage")).await.unwrap();
        assert!(matches!(outcome, Outcome::CardCreated { .. }));

        let card: Card = tracker.cards(triage)[0].clone();
        let outcome = engine
            .handle(&Event::CardMoved {
                repo: repo(),
                card: card.clone(),
            })
            .await
            .unwrap();
        assert_eq!(
            outcome,
            Outcome::LabelsSynced {
                added: vec![],
                removed: vec![]
            }
        );

        let outcome = engine
            .handle(&Event::BoardCreated {
                repo: repo(),
                board: tracker.add_board(&repo(), "19.03-ce-rc1", BoardState::Open),
            })
            .await
            .unwrap();
        assert!(matches!(outcome, Outcome::Provisioned(ref r) if r.columns_created.len() == 3));

        let outcome = engine
            .handle(&Event::CardDeleted { repo: repo(), card })
            .await
            .unwrap();
        assert!(matches!(outcome, Outcome::LabelsSynced { ref removed, .. } if removed.len() == 1));
        assert_eq!(tracker.columns(board_id).len(), 3);
    }

    #[tokio::test]
    async fn test_issue_opened_places_each_stage_label() {
        let tracker = Arc::new(MemoryTracker::new());
        let (_, triage) = seeded(&tracker);
        let engine = Engine::new(tracker.clone());
        let issue = tracker.add_issue(&repo(), 42, &["bug", "18.09-ee/triage", "17.06-ee/triage"]);

        let outcome = engine
            .handle(&Event::IssueOpened { repo: repo(), issue })
            .await
            .unwrap();

        let Outcome::Many { outcomes } = outcome else {
            panic!("expected one outcome per stage label");
        };
        assert_eq!(outcomes.len(), 2);
        assert!(matches!(outcomes[0], Outcome::CardCreated { .. }));
        assert_eq!(outcomes[1], Outcome::skipped(SkipReason::NoBoard));
        assert_eq!(tracker.cards(triage).len(), 1);
    }

    #[tokio::test]
    async fn test_issue_opened_places_labels_after_a_failure() {
        let tracker = Arc::new(MemoryTracker::new());
        let (_, triage) = seeded(&tracker);
        let engine = Engine::new(tracker.clone());
        let issue = tracker.add_issue(&repo(), 42, &["18.09-ee/docs", "18.09-ee/triage"]);

        let err = engine
            .handle(&Event::IssueOpened { repo: repo(), issue })
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::NotFound { kind: "column", .. }));
        assert_eq!(tracker.cards(triage).len(), 1);
    }

    #[tokio::test]
    async fn test_board_created_after_direct_provisioning_adds_nothing() {
        let tracker = Arc::new(MemoryTracker::new());
        let board = crate::board::BoardResolver::new(tracker.clone())
            .create_board(&repo(), "19.03-ce-rc1")
            .await
            .unwrap();
        Provisioner::new(tracker.clone())
            .provision(&repo(), &board)
            .await
            .unwrap();

        let outcome = Engine::new(tracker.clone())
            .handle(&Event::BoardCreated {
                repo: repo(),
                board: board.clone(),
            })
            .await
            .unwrap();

        assert!(matches!(outcome, Outcome::Provisioned(ref r) if r.columns_created.is_empty()));
        let names: Vec<_> = tracker
            .columns(board.id)
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["Triage", "Cherry Pick", "Cherry Picked"]);
    }

    #[tokio::test]
    async fn test_dispatcher_runs_jobs_and_counts() {
        let tracker = Arc::new(MemoryTracker::new());
        seeded(&tracker);
        let (dispatcher, _loop) = Dispatcher::start(Engine::new(tracker.clone()), DispatchConfig::default());

        let ok = dispatcher.submit(labeled(&tracker, 1, "18.09-ee/triage")).unwrap();
        let missing_column = dispatcher.submit(labeled(&tracker, 2, "18.09-ee/docs")).unwrap();

        assert!(matches!(ok.wait().await, Some(Ok(Outcome::CardCreated { .. }))));
        assert!(matches!(
            missing_column.wait().await,
            Some(Err(SyncError::NotFound { kind: "column", .. }))
        ));
        assert_eq!(
            dispatcher.stats(),
            DispatchStats {
                completed: 1,
                failed: 1,
                timed_out: 0,
                rejected: 0
            }
        );
    }

    #[tokio::test]
    async fn test_full_queue_rejects() {
        let tracker = Arc::new(MemoryTracker::new());
        seeded(&tracker);
        let config = DispatchConfig {
            workers: 1,
            queue_depth: 1,
            ..DispatchConfig::default()
        };
        let (dispatcher, _loop) = Dispatcher::start(Engine::new(tracker.clone()), config);

        // Nothing has yielded yet, so the loop has not taken the first job.
        let first = dispatcher.submit(labeled(&tracker, 1, "18.09-ee/triage")).unwrap();
        let second = dispatcher.submit(labeled(&tracker, 2, "18.09-ee/triage"));

        assert_eq!(second.unwrap_err(), SubmitError::QueueFull);
        assert!(first.wait().await.is_some());
        assert_eq!(dispatcher.stats().rejected, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_timeout() {
        let tracker = Arc::new(MemoryTracker::new().with_latency(Duration::from_secs(120)));
        seeded(&tracker);
        let config = DispatchConfig {
            job_timeout: Duration::from_secs(300),
            ..DispatchConfig::default()
        };
        let (dispatcher, _loop) = Dispatcher::start(Engine::new(tracker.clone()), config);

        // Board, column and card lookups each take two minutes.
        let handle = dispatcher.submit(labeled(&tracker, 1, "18.09-ee/triage")).unwrap();

        assert!(matches!(
            handle.wait().await,
            Some(Err(SyncError::Timeout(d))) if d == Duration::from_secs(300)
        ));
        assert_eq!(dispatcher.stats().timed_out, 1);
    }

    #[tokio::test]
    async fn test_loop_stops_when_dispatcher_dropped() {
        let tracker = Arc::new(MemoryTracker::new());
        let (dispatcher, handle) = Dispatcher::start(Engine::new(tracker), DispatchConfig::default());
        drop(dispatcher);
        handle.await.unwrap();
    }
}
