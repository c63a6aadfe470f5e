//! Push-style progress over a `tokio::sync::watch` channel.

use async_trait::async_trait;
use tokio::sync::watch;

use super::{ProgressObserver, ProgressUpdate};
use crate::core::TaskRecord;
use crate::errors::PollTimeout;

/// Latest state published by a [`WatchProgressObserver`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum WatchedProgress {
    /// Nothing observed yet.
    #[default]
    Waiting,
    /// Latest non-terminal update.
    Update(ProgressUpdate),
    /// The task finished.
    Terminal(Box<TaskRecord>),
    /// The poll budget ran out.
    TimedOut(PollTimeout),
}

impl WatchedProgress {
    /// Returns true once nothing further will be published.
    #[must_use]
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Terminal(_) | Self::TimedOut(_))
    }
}

/// Republishes poller callbacks to any number of watch receivers.
///
/// Receivers only ever see the latest state, which is what a UI redrawing a
/// progress bar wants.
#[derive(Debug)]
pub struct WatchProgressObserver {
    tx: watch::Sender<WatchedProgress>,
}

impl WatchProgressObserver {
    /// Creates the observer and a first receiver.
    #[must_use]
    pub fn channel() -> (Self, watch::Receiver<WatchedProgress>) {
        let (tx, rx) = watch::channel(WatchedProgress::Waiting);
        (Self { tx }, rx)
    }

    /// Creates another receiver.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<WatchedProgress> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl ProgressObserver for WatchProgressObserver {
    async fn on_update(&self, update: &ProgressUpdate) {
        if !update.status.is_terminal() {
            self.tx.send_replace(WatchedProgress::Update(update.clone()));
        }
    }

    async fn on_terminal(&self, record: &TaskRecord) {
        self.tx
            .send_replace(WatchedProgress::Terminal(Box::new(record.clone())));
    }

    async fn on_timeout(&self, timeout: &PollTimeout) {
        self.tx.send_replace(WatchedProgress::TimedOut(timeout.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ContentBrief, GenerationRequest, PipelineStage, TaskUpdate};
    use crate::progress::{PollConfig, ProgressPoller};
    use crate::store::{InMemoryTaskStore, TaskStore};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_receiver_sees_latest_then_terminal() {
        let store = Arc::new(InMemoryTaskStore::new());
        let record = store
            .create(
                "ctx",
                GenerationRequest::ContentCreation(ContentBrief {
                    subject: "s".to_string(),
                    target_length: None,
                    style: "plain".to_string(),
                    platform: None,
                }),
            )
            .await
            .unwrap();
        store
            .update(
                record.id,
                0,
                TaskUpdate::new().stage(PipelineStage::Rewrite).progress(12, "Rewriting"),
            )
            .await
            .unwrap();

        let (observer, mut rx) = WatchProgressObserver::channel();
        let observer = Arc::new(observer);
        let late = observer.subscribe();
        let handle = ProgressPoller::new(store.clone(), PollConfig::default())
            .start(record.id, observer.clone());

        rx.changed().await.unwrap();
        match &*rx.borrow_and_update() {
            WatchedProgress::Update(update) => assert_eq!(update.progress, 12),
            other => panic!("unexpected {other:?}"),
        }

        store.fail(record.id, "boom").await.unwrap();
        handle.join().await.unwrap();

        assert!(rx.borrow().is_final());
        assert!(late.borrow().is_final());
    }
}
