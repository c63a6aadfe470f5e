//! Bounded, sequential, partial-failure-tolerant batches.
//!
//! The runner walks an ordered item list one item at a time, never in
//! parallel, and pauses for a fixed delay between provider-invoking items so
//! the providers' rate limits are respected. A failed item leaves a `None` at
//! its index and the batch carries on.
//!
//! The returned [`BatchOutcome`] separates `success_count` from `total`:
//! a batch *finishing* is what moves the pipeline forward, and callers decide
//! from `success_count` whether a downstream stage has anything to work on.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::errors::{BatchItemFailure, ContentflowError};

/// Batch limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Items beyond this count are dropped before processing.
    pub cap: usize,
    /// Pause between provider-invoking items, in milliseconds.
    pub inter_item_delay_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            cap: 10,
            inter_item_delay_ms: 5000,
        }
    }
}

impl BatchConfig {
    /// Returns the inter-item delay.
    #[must_use]
    pub fn inter_item_delay(&self) -> Duration {
        Duration::from_millis(self.inter_item_delay_ms)
    }
}

/// The slice of the 0..=100 progress range a stage owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressBand {
    /// Progress when the stage starts.
    pub start: u8,
    /// Progress when the stage ends.
    pub end: u8,
}

impl ProgressBand {
    /// Creates a band.
    #[must_use]
    pub const fn new(start: u8, end: u8) -> Self {
        Self { start, end }
    }

    /// Progress after `completed` of `total` items:
    /// `start + floor(completed / total * span)`.
    #[must_use]
    pub fn at(&self, completed: usize, total: usize) -> u8 {
        if total == 0 {
            return self.end;
        }
        let span = usize::from(self.end.saturating_sub(self.start));
        let advanced = completed.min(total) * span / total;
        self.start + u8::try_from(advanced).unwrap_or(u8::MAX - self.start)
    }
}

/// What happened to one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome<R> {
    /// The provider produced a value.
    Produced(R),
    /// A value checkpointed by an earlier run was reused.
    Reused(R),
    /// The item had no input to work on (e.g. no prompt).
    Skipped,
    /// The provider failed after its retry budget.
    Failed(BatchItemFailure),
}

impl<R> ItemOutcome<R> {
    /// Returns true if a provider was called for this item.
    #[must_use]
    pub fn invoked_provider(&self) -> bool {
        matches!(self, Self::Produced(_) | Self::Failed(_))
    }

    /// Returns the value, if any.
    #[must_use]
    pub fn value(&self) -> Option<&R> {
        match self {
            Self::Produced(value) | Self::Reused(value) => Some(value),
            Self::Skipped | Self::Failed(_) => None,
        }
    }
}

/// Per-item notification handed to a [`BatchObserver`].
#[derive(Debug)]
pub struct BatchItemReport<'a, R> {
    /// Item index in the capped list.
    pub index: usize,
    /// Items finished so far, this one included.
    pub completed: usize,
    /// Capped item count.
    pub total: usize,
    /// Stage progress after this item.
    pub progress: u8,
    /// The item's outcome.
    pub outcome: &'a ItemOutcome<R>,
}

/// Receives each item's outcome as soon as it is known.
///
/// Returning an error aborts the batch; this is how a controller that lost
/// ownership of its task stops early.
#[async_trait]
pub trait BatchObserver<R: Send + Sync>: Send + Sync {
    /// Called after every item, in order.
    async fn on_item(&self, report: BatchItemReport<'_, R>) -> Result<(), ContentflowError>;
}

#[async_trait]
impl<R: Send + Sync> BatchObserver<R> for () {
    async fn on_item(&self, _report: BatchItemReport<'_, R>) -> Result<(), ContentflowError> {
        Ok(())
    }
}

/// Result of a finished batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome<R> {
    /// One slot per processed item; `None` for failed or skipped items.
    pub results: Vec<Option<R>>,
    /// Number of slots holding a value.
    pub success_count: usize,
    /// Failures absorbed by the batch.
    pub failures: Vec<BatchItemFailure>,
}

impl<R> BatchOutcome<R> {
    /// Number of processed items (the capped count).
    #[must_use]
    pub fn total(&self) -> usize {
        self.results.len()
    }

    /// Returns true if no item produced a value.
    #[must_use]
    pub fn is_empty_success(&self) -> bool {
        self.success_count == 0
    }
}

/// Drives one operation across an ordered item list.
#[derive(Debug, Clone, Default)]
pub struct BatchRunner {
    config: BatchConfig,
}

impl BatchRunner {
    /// Creates a runner.
    #[must_use]
    pub fn new(config: BatchConfig) -> Self {
        Self { config }
    }

    /// Returns the batch limits.
    #[must_use]
    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Processes at most `cap` items from `items`, strictly in order.
    ///
    /// `op` is awaited once per item. After every item except the last, the
    /// runner sleeps the inter-item delay if the item reached a provider;
    /// reused and skipped items cost no delay.
    ///
    /// This is narrower than pausing after every item: the pause only
    /// throttles provider traffic, so a resumed run that replays checkpointed
    /// items does not wait on them.
    pub async fn run<'a, T, R, F, Fut>(
        &self,
        items: &'a [T],
        band: ProgressBand,
        mut op: F,
        observer: &dyn BatchObserver<R>,
    ) -> Result<BatchOutcome<R>, ContentflowError>
    where
        T: Sync,
        R: Clone + Send + Sync,
        F: FnMut(usize, &'a T) -> Fut + Send,
        Fut: Future<Output = ItemOutcome<R>> + Send,
    {
        let total = items.len().min(self.config.cap.max(1));
        if items.len() > total {
            debug!(requested = items.len(), cap = total, "Truncating batch to cap");
        }

        let mut results = Vec::with_capacity(total);
        let mut failures = Vec::new();
        let mut success_count = 0;

        for (index, item) in items.iter().take(total).enumerate() {
            let outcome = op(index, item).await;
            let completed = index + 1;

            match outcome {
                ItemOutcome::Produced(_) | ItemOutcome::Reused(_) => success_count += 1,
                ItemOutcome::Failed(ref failure) => {
                    warn!(index, error = %failure.cause, "Batch item failed");
                    failures.push(failure.clone());
                }
                ItemOutcome::Skipped => debug!(index, "Batch item skipped"),
            }

            observer
                .on_item(BatchItemReport {
                    index,
                    completed,
                    total,
                    progress: band.at(completed, total),
                    outcome: &outcome,
                })
                .await?;

            let pause = outcome.invoked_provider() && completed < total;
            results.push(outcome.value().cloned());

            if pause && self.config.inter_item_delay_ms > 0 {
                debug!(index, delay_ms = self.config.inter_item_delay_ms, "Pausing between items");
                tokio::time::sleep(self.config.inter_item_delay()).await;
            }
        }

        Ok(BatchOutcome {
            results,
            success_count,
            failures,
        })
    }
}
