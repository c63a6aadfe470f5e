//! Interval polling of the task store.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{ProgressObserver, ProgressUpdate};
use crate::core::{TaskId, TaskRecord};
use crate::errors::{ContentflowError, PollTimeout, StoreError};
use crate::store::TaskStore;

/// What happens to the stored task when the poll budget runs out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollTimeoutPolicy {
    /// Only the consumer's view times out; the task stays resumable.
    #[default]
    ClientOnly,
    /// The task is also marked FAILED.
    FailTask,
}

/// Poller settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Time between reads, in milliseconds.
    pub interval_ms: u64,
    /// Reads before giving up.
    pub max_polls: u32,
    /// Timeout policy.
    pub timeout_policy: PollTimeoutPolicy,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            max_polls: 300,
            timeout_policy: PollTimeoutPolicy::ClientOnly,
        }
    }
}

impl PollConfig {
    /// Returns the poll interval.
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// How a poll ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The task reached a terminal status.
    Terminal(Box<TaskRecord>),
    /// The poll budget ran out.
    TimedOut(PollTimeout),
    /// The consumer stopped polling.
    Stopped,
}

impl PollOutcome {
    /// Converts into the terminal record, or an error for the other outcomes.
    pub fn into_record(self) -> Result<TaskRecord, ContentflowError> {
        match self {
            Self::Terminal(record) => Ok(*record),
            Self::TimedOut(timeout) => Err(timeout.into()),
            Self::Stopped => Err(ContentflowError::Internal("polling was stopped".to_string())),
        }
    }
}

/// Reads a task on a fixed interval and reports to an observer.
///
/// Polling is a pure read (except under [`PollTimeoutPolicy::FailTask`]), so
/// any number of pollers may attach to the same task, and a new poller may
/// replace one that was dropped.
#[derive(Clone)]
pub struct ProgressPoller {
    store: Arc<dyn TaskStore>,
    config: PollConfig,
}

impl std::fmt::Debug for ProgressPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressPoller")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ProgressPoller {
    /// Creates a poller.
    pub fn new(store: Arc<dyn TaskStore>, config: PollConfig) -> Self {
        Self { store, config }
    }

    /// Polls until terminal or timeout, on the current task.
    pub async fn poll(
        &self,
        task_id: TaskId,
        observer: &dyn ProgressObserver,
    ) -> Result<PollOutcome, ContentflowError> {
        let (_stop_tx, stop_rx) = watch::channel(false);
        self.poll_until_stopped(task_id, observer, stop_rx).await
    }

    /// Starts polling in the background.
    pub fn start(&self, task_id: TaskId, observer: Arc<dyn ProgressObserver>) -> PollHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let poller = self.clone();
        let join = tokio::spawn(async move {
            poller
                .poll_until_stopped(task_id, observer.as_ref(), stop_rx)
                .await
        });
        PollHandle { stop_tx, join }
    }

    async fn poll_until_stopped(
        &self,
        task_id: TaskId,
        observer: &dyn ProgressObserver,
        mut stop_rx: watch::Receiver<bool>,
    ) -> Result<PollOutcome, ContentflowError> {
        let max_polls = self.config.max_polls.max(1);
        let mut last: Option<ProgressUpdate> = None;

        for poll in 1..=max_polls {
            if *stop_rx.borrow() {
                return Ok(PollOutcome::Stopped);
            }

            let record = self.store.get(task_id).await?;
            debug!(task_id = %task_id, poll, progress = record.progress, status = %record.status, "Poll tick");

            let update = ProgressUpdate::from(&record);
            if last.as_ref() != Some(&update) {
                observer.on_update(&update).await;
                last = Some(update);
            }

            if record.is_terminal() {
                observer.on_terminal(&record).await;
                return Ok(PollOutcome::Terminal(Box::new(record)));
            }

            if poll < max_polls {
                // Only `true` is ever sent; a dropped handle also ends polling.
                let stopped = tokio::select! {
                    () = tokio::time::sleep(self.config.interval()) => false,
                    _ = stop_rx.changed() => true,
                };
                if stopped {
                    return Ok(PollOutcome::Stopped);
                }
            }
        }

        let timeout = PollTimeout {
            task_id,
            polls: max_polls,
        };
        warn!(task_id = %task_id, polls = max_polls, policy = ?self.config.timeout_policy, "Poll budget exhausted");

        if self.config.timeout_policy == PollTimeoutPolicy::FailTask {
            match self.store.fail(task_id, &timeout.to_string()).await {
                Ok(_) | Err(StoreError::AlreadyTerminal { .. }) => {}
                Err(err) => return Err(err.into()),
            }
        }

        observer.on_timeout(&timeout).await;
        Ok(PollOutcome::TimedOut(timeout))
    }
}

/// Handle to a background poll.
///
/// Dropping the handle stops polling at the next tick; it never touches the
/// task itself.
#[derive(Debug)]
pub struct PollHandle {
    stop_tx: watch::Sender<bool>,
    join: JoinHandle<Result<PollOutcome, ContentflowError>>,
}

impl PollHandle {
    /// Asks the poller to stop. No further callbacks after the current one.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    /// Waits for the poll to end.
    pub async fn join(self) -> Result<PollOutcome, ContentflowError> {
        let Self { stop_tx, join } = self;
        let outcome = join
            .await
            .map_err(|err| ContentflowError::Internal(format!("poller task panicked: {err}")));
        drop(stop_tx);
        outcome?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ContentBrief, GenerationRequest, PipelineStage, TaskStatus, TaskUpdate};
    use crate::store::InMemoryTaskStore;
    use crate::testing::CollectingProgressObserver;
    use pretty_assertions::assert_eq;

    fn request() -> GenerationRequest {
        GenerationRequest::ContentCreation(ContentBrief {
            subject: "s".to_string(),
            target_length: None,
            style: "plain".to_string(),
            platform: None,
        })
    }

    fn config(max_polls: u32, policy: PollTimeoutPolicy) -> PollConfig {
        PollConfig {
            interval_ms: 1000,
            max_polls,
            timeout_policy: policy,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_stops_polling() {
        let store = Arc::new(InMemoryTaskStore::new());
        let record = store.create("ctx", request()).await.unwrap();
        store.fail(record.id, "boom").await.unwrap();

        let observer = CollectingProgressObserver::new();
        let outcome = ProgressPoller::new(store.clone(), PollConfig::default())
            .poll(record.id, &observer)
            .await
            .unwrap();

        let PollOutcome::Terminal(terminal) = outcome else {
            panic!("expected terminal outcome");
        };
        assert_eq!(terminal.status, TaskStatus::Failed);
        assert_eq!(observer.terminal().map(|r| r.id), Some(record.id));
        assert!(observer.timeouts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_only_timeout_leaves_task_untouched() {
        let store = Arc::new(InMemoryTaskStore::new());
        let record = store.create("ctx", request()).await.unwrap();
        let before = store
            .update(record.id, 0, TaskUpdate::new().stage(PipelineStage::Rewrite).progress(5, "Rewriting"))
            .await
            .unwrap();

        let observer = CollectingProgressObserver::new();
        let outcome = ProgressPoller::new(store.clone(), config(300, PollTimeoutPolicy::ClientOnly))
            .poll(record.id, &observer)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            PollOutcome::TimedOut(PollTimeout {
                task_id: record.id,
                polls: 300,
            })
        );
        // One update: nothing changed after the first read.
        assert_eq!(observer.updates().len(), 1);
        assert_eq!(observer.timeouts().len(), 1);
        assert_eq!(store.get(record.id).await.unwrap(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_task_policy_marks_failed() {
        let store = Arc::new(InMemoryTaskStore::new());
        let record = store.create("ctx", request()).await.unwrap();

        let observer = CollectingProgressObserver::new();
        ProgressPoller::new(store.clone(), config(3, PollTimeoutPolicy::FailTask))
            .poll(record.id, &observer)
            .await
            .unwrap();

        let stored = store.get(record.id).await.unwrap();
        assert_eq!(stored.status, TaskStatus::Failed);
        assert!(stored.error.unwrap().contains("after 3 polls"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_observes_progress_then_completion() {
        let store = Arc::new(InMemoryTaskStore::new());
        let record = store.create("ctx", request()).await.unwrap();
        let observer = Arc::new(CollectingProgressObserver::new());
        let handle = ProgressPoller::new(store.clone(), PollConfig::default())
            .start(record.id, observer.clone());

        tokio::time::sleep(Duration::from_millis(1500)).await;
        let updated = store
            .update(record.id, 0, TaskUpdate::new().stage(PipelineStage::Rewrite).progress(30, "Rewritten"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        let result = crate::core::TaskResult::assemble(&updated, 10);
        store.complete(record.id, result).await.unwrap();

        let outcome = handle.join().await.unwrap();
        assert!(matches!(outcome, PollOutcome::Terminal(_)));

        let progress: Vec<u8> = observer.updates().iter().map(|u| u.progress).collect();
        assert_eq!(progress, vec![0, 30, 100]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_ends_polling() {
        let store = Arc::new(InMemoryTaskStore::new());
        let record = store.create("ctx", request()).await.unwrap();
        let observer = Arc::new(CollectingProgressObserver::new());

        let handle = ProgressPoller::new(store.clone(), PollConfig::default())
            .start(record.id, observer.clone());
        tokio::time::sleep(Duration::from_millis(2500)).await;
        handle.stop();

        assert_eq!(handle.join().await.unwrap(), PollOutcome::Stopped);
        assert!(observer.timeouts().is_empty());
        assert_eq!(store.get(record.id).await.unwrap().version, 0);
    }

    #[tokio::test]
    async fn test_unknown_task_is_error() {
        let store = Arc::new(InMemoryTaskStore::new());
        let observer = CollectingProgressObserver::new();
        let err = ProgressPoller::new(store, PollConfig::default())
            .poll(TaskId::new(), &observer)
            .await
            .unwrap_err();
        assert!(matches!(err, ContentflowError::Store(StoreError::NotFound(_))));
    }
}
