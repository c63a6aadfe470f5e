//! The pipeline controller: rewrite, analyze, generate, complete.
//!
//! A controller owns one run of one task. It reads the persisted record,
//! picks the stage to continue from (see [`super::plan`]), and walks the
//! fixed stage order, writing every transition back to the store. Stages and
//! batch items are awaited strictly one after another.
//!
//! Writes are guarded by the record version the controller last saw. If
//! another controller writes to the same task, this one stops with
//! [`StoreError::VersionConflict`] and leaves the task alone.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use super::batch::{BatchItemReport, BatchObserver, BatchOutcome, BatchRunner, ItemOutcome};
use super::executor::StageExecutor;
use super::plan::{self, ResumePoint};
use super::retry::RetryConfig;
use crate::config::PipelineConfig;
use crate::core::{
    ItemFailure, PipelineStage, TaskId, TaskRecord, TaskResult, TaskStatus, TaskUpdate,
};
use crate::errors::{BatchItemFailure, ContentflowError, PipelineFailure, StoreError};
use crate::events::{self, names, EventSink, NoOpEventSink};
use crate::observability::SpanTimer;
use crate::providers::{AnalyzeRequest, GenerateImageRequest, Providers, RewriteRequest};
use crate::store::TaskStore;

/// Drives tasks through their stages.
#[derive(Clone)]
pub struct PipelineController {
    store: Arc<dyn TaskStore>,
    providers: Providers,
    config: PipelineConfig,
    runner: BatchRunner,
    events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for PipelineController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineController")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PipelineController {
    /// Creates a controller.
    pub fn new(store: Arc<dyn TaskStore>, providers: Providers, config: PipelineConfig) -> Self {
        let runner = BatchRunner::new(config.batch.clone());
        Self {
            store,
            providers,
            config,
            runner,
            events: Arc::new(NoOpEventSink),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Returns the config.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Returns the store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    /// Runs (or resumes) a task to a terminal state.
    ///
    /// Returns the COMPLETED record. A stage that fails after its retries
    /// marks the task FAILED and returns [`ContentflowError::Pipeline`].
    /// Losing ownership of the task returns a [`ContentflowError::Store`]
    /// error without touching the task.
    #[instrument(skip(self), fields(task_id = %task_id))]
    pub async fn run(&self, task_id: TaskId) -> Result<TaskRecord, ContentflowError> {
        let record = self.store.get(task_id).await?;
        let resumed = record.status == TaskStatus::Processing;

        let mut stage = match plan::resume_point(&record, self.config.batch.cap) {
            ResumePoint::AlreadyCompleted => {
                info!("Task already completed");
                return Ok(record);
            }
            ResumePoint::AlreadyFailed => {
                return Err(PipelineFailure {
                    task_id,
                    stage: record.current_stage.unwrap_or(PipelineStage::Rewrite),
                    message: record.error.unwrap_or_default(),
                }
                .into());
            }
            ResumePoint::Start(stage) => stage,
        };
        if resumed {
            info!(stage = %stage, progress = record.progress, "Resuming task");
        }

        let writer = TaskWriter::new(self.store.as_ref(), &record);
        let mut record = record;

        loop {
            self.events
                .emit(
                    names::STAGE_STARTED,
                    Some(events::stage_started(task_id, stage, resumed)),
                )
                .await;
            let timer = SpanTimer::start(task_id, stage);

            let outcome = match stage {
                PipelineStage::Rewrite => self.rewrite(&writer, &record).await,
                PipelineStage::Analyze => self.analyze(&writer, &record).await,
                PipelineStage::Generate => self.generate(&writer).await,
                PipelineStage::Complete => return self.complete(task_id, &record).await,
            };

            match outcome {
                Ok((next_record, next)) => {
                    let span = timer.finish();
                    info!(stage = %stage, next = %next, duration_ms = span.duration_ms, "Stage completed");
                    self.events
                        .emit(
                            names::STAGE_COMPLETED,
                            Some(events::stage_completed(&span, next)),
                        )
                        .await;
                    record = next_record;
                    stage = next;
                }
                Err(ContentflowError::RetriesExhausted(exhausted)) => {
                    return Err(self.fail(task_id, stage, &exhausted.to_string()).await);
                }
                Err(err) => {
                    warn!(stage = %stage, error = %err, "Controller stopped without changing task state");
                    return Err(err);
                }
            }
        }
    }

    /// Generates one image again for a completed task.
    ///
    /// Uses the stored prompt and the source image at `index`. The terminal
    /// record is not modified; the caller decides what to do with the URL.
    pub async fn regenerate(
        &self,
        record: &TaskRecord,
        index: usize,
    ) -> Result<String, ContentflowError> {
        if record.status != TaskStatus::Completed {
            return Err(ContentflowError::InvalidRequest(format!(
                "task {} is {}, only completed tasks can regenerate images",
                record.id, record.status
            )));
        }
        if index >= plan::capped_image_count(record, self.config.batch.cap) {
            return Err(ContentflowError::InvalidRequest(format!(
                "task {} has no image at index {index}",
                record.id
            )));
        }
        let prompt = record.partial_results.prompt_at(index).ok_or_else(|| {
            ContentflowError::InvalidRequest(format!(
                "image {index} of task {} has no prompt to regenerate from",
                record.id
            ))
        })?;

        let request = GenerateImageRequest {
            prompt: prompt.to_string(),
            reference_image_url: record.request.source_images()[index].clone(),
        };
        let generator = self.providers.generator.as_ref();
        let response = self
            .executor(&self.config.retry.generate)
            .execute(&format!("regenerate[{index}]"), move || {
                generator.generate(request.clone())
            })
            .await?;

        info!(task_id = %record.id, index, "Image regenerated");
        Ok(response.generated_image_url)
    }

    fn executor(&self, retry: &RetryConfig) -> StageExecutor {
        StageExecutor::new(retry.clone(), self.config.provider_timeout())
    }

    async fn rewrite(
        &self,
        writer: &TaskWriter<'_>,
        record: &TaskRecord,
    ) -> Result<(TaskRecord, PipelineStage), ContentflowError> {
        let band = self.config.progress.rewrite;
        writer
            .update(
                TaskUpdate::new()
                    .stage(PipelineStage::Rewrite)
                    .progress(band.start, "Rewriting content"),
            )
            .await?;

        let request = RewriteRequest {
            original_text: record.request.source_text(),
            target_style: record.request.target_style().to_string(),
        };
        let rewriter = self.providers.rewriter.as_ref();
        let response = self
            .executor(&self.config.retry.rewrite)
            .execute("rewrite", move || rewriter.rewrite(request.clone()))
            .await?;

        let next = plan::after_rewrite(record, self.config.batch.cap);
        let record = writer
            .update(
                TaskUpdate::new()
                    .rewritten_text(response.rewritten_text)
                    .progress(band.end, "Content rewritten")
                    .stage(next),
            )
            .await?;
        Ok((record, next))
    }

    async fn analyze(
        &self,
        writer: &TaskWriter<'_>,
        record: &TaskRecord,
    ) -> Result<(TaskRecord, PipelineStage), ContentflowError> {
        let band = self.config.progress.analyze;
        writer
            .update(
                TaskUpdate::new()
                    .stage(PipelineStage::Analyze)
                    .progress(band.start, "Analyzing images"),
            )
            .await?;

        let images = record.request.source_images();
        let executor = &self.executor(&self.config.retry.analyze);
        let analyzer = self.providers.analyzer.as_ref();
        let observer = StageObserver {
            writer,
            events: self.events.as_ref(),
            stage: PipelineStage::Analyze,
        };

        let outcome = self
            .runner
            .run(
                images,
                band,
                move |index, image_url| {
                    let request = AnalyzeRequest {
                        image_url: image_url.clone(),
                    };
                    async move {
                        let operation = format!("analyze[{index}]");
                        match executor
                            .execute(&operation, move || analyzer.analyze(request.clone()))
                            .await
                        {
                            Ok(response) => ItemOutcome::Produced(response.prompt),
                            Err(cause) => ItemOutcome::Failed(BatchItemFailure { index, cause }),
                        }
                    }
                },
                &observer,
            )
            .await?;

        let BatchOutcome {
            results,
            success_count,
            failures,
        } = outcome;
        let total = results.len();
        // Only a batch with at least one usable prompt has anything to generate.
        let next = if success_count > 0 {
            PipelineStage::Generate
        } else {
            PipelineStage::Complete
        };

        let mut update = TaskUpdate::new()
            .progress(band.end, format!("Analyzed {success_count} of {total} images"))
            .stage(next);
        for (index, prompt) in results.into_iter().enumerate() {
            update = update.prompt(index, prompt);
        }
        for failure in &failures {
            update = update.item_failure(item_failure(PipelineStage::Analyze, failure));
        }

        let record = writer.update(update).await?;
        Ok((record, next))
    }

    async fn generate(
        &self,
        writer: &TaskWriter<'_>,
    ) -> Result<(TaskRecord, PipelineStage), ContentflowError> {
        let band = self.config.progress.generate;
        let record = writer
            .update(
                TaskUpdate::new()
                    .stage(PipelineStage::Generate)
                    .progress(band.start, "Generating images"),
            )
            .await?;

        let count = plan::capped_image_count(&record, self.config.batch.cap);
        let partial = &record.partial_results;
        let slots: Vec<GenerateSlot> = record.request.source_images()[..count]
            .iter()
            .enumerate()
            .map(|(index, reference)| GenerateSlot {
                reference_image_url: reference.clone(),
                prompt: partial.prompt_at(index).map(str::to_string),
                existing: partial.generated_at(index).map(str::to_string),
            })
            .collect();
        let reused = slots.iter().filter(|slot| slot.existing.is_some()).count();
        if reused > 0 {
            info!(reused, total = count, "Reusing checkpointed images");
        }

        let executor = &self.executor(&self.config.retry.generate);
        let generator = self.providers.generator.as_ref();
        let observer = StageObserver {
            writer,
            events: self.events.as_ref(),
            stage: PipelineStage::Generate,
        };

        let outcome = self
            .runner
            .run(
                &slots,
                band,
                move |index, slot| async move {
                    if let Some(ref url) = slot.existing {
                        return ItemOutcome::Reused(url.clone());
                    }
                    let Some(ref prompt) = slot.prompt else {
                        return ItemOutcome::Skipped;
                    };

                    let request = GenerateImageRequest {
                        prompt: prompt.clone(),
                        reference_image_url: slot.reference_image_url.clone(),
                    };
                    let operation = format!("generate[{index}]");
                    match executor
                        .execute(&operation, move || generator.generate(request.clone()))
                        .await
                    {
                        Ok(response) => ItemOutcome::Produced(response.generated_image_url),
                        Err(cause) => ItemOutcome::Failed(BatchItemFailure { index, cause }),
                    }
                },
                &observer,
            )
            .await?;

        // The batch finishing is what moves the task on, whatever succeeded.
        let record = writer
            .update(
                TaskUpdate::new()
                    .progress(
                        band.end,
                        format!(
                            "Generated {} of {} images",
                            outcome.success_count,
                            outcome.total()
                        ),
                    )
                    .stage(PipelineStage::Complete),
            )
            .await?;
        Ok((record, PipelineStage::Complete))
    }

    async fn complete(
        &self,
        task_id: TaskId,
        record: &TaskRecord,
    ) -> Result<TaskRecord, ContentflowError> {
        let result = TaskResult::assemble(record, self.config.batch.cap);
        let payload = events::completed(task_id, &result);
        let completed = self.store.complete(task_id, result).await?;

        info!(
            success_count = completed.result.as_ref().map_or(0, |r| r.success_count),
            "Task completed"
        );
        self.events.emit(names::COMPLETED, Some(payload)).await;
        Ok(completed)
    }

    async fn fail(&self, task_id: TaskId, stage: PipelineStage, message: &str) -> ContentflowError {
        error!(stage = %stage, error = message, "Stage failed, failing task");
        if let Err(err) = self.store.fail(task_id, message).await {
            error!(error = %err, "Could not mark task failed");
            return err.into();
        }

        self.events
            .emit(names::FAILED, Some(events::failed(task_id, Some(stage), message)))
            .await;
        PipelineFailure {
            task_id,
            stage,
            message: message.to_string(),
        }
        .into()
    }
}

/// Inputs for one generate item.
#[derive(Debug)]
struct GenerateSlot {
    reference_image_url: String,
    prompt: Option<String>,
    existing: Option<String>,
}

fn item_failure(stage: PipelineStage, failure: &BatchItemFailure) -> ItemFailure {
    ItemFailure {
        stage,
        index: failure.index,
        message: failure.cause.to_string(),
    }
}

/// Version-guarded writes for one controller run.
struct TaskWriter<'a> {
    store: &'a dyn TaskStore,
    task_id: TaskId,
    version: AtomicU64,
}

impl<'a> TaskWriter<'a> {
    fn new(store: &'a dyn TaskStore, record: &TaskRecord) -> Self {
        Self {
            store,
            task_id: record.id,
            version: AtomicU64::new(record.version),
        }
    }

    async fn update(&self, update: TaskUpdate) -> Result<TaskRecord, ContentflowError> {
        let expected = self.version.load(Ordering::Acquire);
        let record = match self.store.update(self.task_id, expected, update).await {
            Ok(record) => record,
            Err(err @ StoreError::VersionConflict { .. }) => {
                warn!(error = %err, "Task was written by another controller");
                return Err(err.into());
            }
            Err(err) => return Err(err.into()),
        };

        // Someone else finished the task while this run was in flight.
        if record.is_terminal() {
            return Err(StoreError::AlreadyTerminal {
                task_id: self.task_id,
                status: record.status,
            }
            .into());
        }

        self.version.store(record.version, Ordering::Release);
        Ok(record)
    }
}

/// Persists per-item progress, and for `generate` the item itself.
struct StageObserver<'a> {
    writer: &'a TaskWriter<'a>,
    events: &'a dyn EventSink,
    stage: PipelineStage,
}

#[async_trait]
impl BatchObserver<String> for StageObserver<'_> {
    async fn on_item(&self, report: BatchItemReport<'_, String>) -> Result<(), ContentflowError> {
        let verb = match self.stage {
            PipelineStage::Analyze => "Analyzed",
            _ => "Generated",
        };
        let mut update = TaskUpdate::new().progress(
            report.progress,
            format!("{verb} image {} of {}", report.completed, report.total),
        );
        // Analyze is re-run from scratch on resume, so only generate
        // checkpoints its items.
        let checkpoint = self.stage == PipelineStage::Generate;

        match report.outcome {
            ItemOutcome::Produced(url) if checkpoint => {
                update = update.generated_image(report.index, Some(url.clone()));
            }
            ItemOutcome::Failed(failure) => {
                self.events
                    .emit(
                        names::ITEM_FAILED,
                        Some(events::item_failed(self.writer.task_id, self.stage, failure)),
                    )
                    .await;
                if checkpoint {
                    update = update.item_failure(item_failure(self.stage, failure));
                }
            }
            _ => {}
        }

        self.writer.update(update).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TaskStatus;
    use crate::events::CollectingEventSink;
    use crate::testing::{
        assert_completed, content_brief_request, media_rewrite_request, TestHarness,
    };
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_content_creation_skips_image_stages() {
        let harness = TestHarness::new();
        let record = harness
            .store
            .create("ctx", content_brief_request())
            .await
            .unwrap();

        let done = harness.controller().run(record.id).await.unwrap();

        assert_completed(&done);
        let result = done.result.unwrap();
        assert!(result.text.starts_with("[friendly] Subject: Five tips"));
        assert!(result.generated_images.is_empty());
        assert_eq!(harness.analyzer.call_count(), 0);
        assert_eq!(harness.generator.call_count(), 0);
    }

    #[tokio::test]
    async fn test_media_without_images_completes_after_rewrite() {
        let harness = TestHarness::new();
        let record = harness
            .store
            .create("ctx", media_rewrite_request(0))
            .await
            .unwrap();

        let done = harness.controller().run(record.id).await.unwrap();

        assert_completed(&done);
        assert_eq!(harness.analyzer.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_analysis_failures_give_text_only_result() {
        let harness = TestHarness::new();
        harness.analyzer.fail_image(crate::testing::image_url(0));
        harness.analyzer.fail_image(crate::testing::image_url(1));
        let record = harness
            .store
            .create("ctx", media_rewrite_request(2))
            .await
            .unwrap();

        let done = harness.controller().run(record.id).await.unwrap();

        assert!(assert_completed(&done).is_empty());
        assert_eq!(harness.generator.call_count(), 0);
        let failures = &done.partial_results.item_failures;
        assert_eq!(failures.len(), 2);
        assert!(failures.iter().all(|f| f.stage == PipelineStage::Analyze));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stage_events_emitted_in_order() {
        let harness = TestHarness::new();
        let sink = Arc::new(CollectingEventSink::new());
        let record = harness
            .store
            .create("ctx", media_rewrite_request(1))
            .await
            .unwrap();

        harness
            .controller()
            .with_event_sink(sink.clone())
            .run(record.id)
            .await
            .unwrap();

        let stages: Vec<String> = sink
            .events_of_type(names::STAGE_STARTED)
            .into_iter()
            .map(|data| data.unwrap()["stage"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(stages, vec!["rewrite", "analyze", "generate", "complete"]);
        assert_eq!(sink.events_of_type(names::COMPLETED).len(), 1);
        assert!(sink.events_of_type(names::FAILED).is_empty());
    }

    #[tokio::test]
    async fn test_completed_task_short_circuits() {
        let harness = TestHarness::new();
        let record = harness
            .store
            .create("ctx", content_brief_request())
            .await
            .unwrap();
        let controller = harness.controller();
        let first = controller.run(record.id).await.unwrap();

        let second = controller.run(record.id).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(harness.rewriter.call_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_task_is_not_rerun() {
        let harness = TestHarness::new();
        let record = harness
            .store
            .create("ctx", content_brief_request())
            .await
            .unwrap();
        harness.store.fail(record.id, "earlier failure").await.unwrap();

        let err = harness.controller().run(record.id).await.unwrap_err();

        assert!(matches!(err, ContentflowError::Pipeline(ref f) if f.message == "earlier failure"));
        assert_eq!(harness.rewriter.call_count(), 0);
    }

    #[tokio::test]
    async fn test_version_conflict_stops_without_failing() {
        let harness = TestHarness::new();
        let record = harness
            .store
            .create("ctx", content_brief_request())
            .await
            .unwrap();
        let writer = TaskWriter::new(harness.store.as_ref(), &record);

        // Another controller writes first.
        harness
            .store
            .update(record.id, record.version, TaskUpdate::new().stage(PipelineStage::Rewrite))
            .await
            .unwrap();

        let err = writer
            .update(TaskUpdate::new().progress(10, "stale"))
            .await
            .unwrap_err();
        assert!(matches!(err, ContentflowError::Store(StoreError::VersionConflict { .. })));
        assert_eq!(
            harness.store.get(record.id).await.unwrap().status,
            TaskStatus::Processing
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_regenerate_single_image() {
        let harness = TestHarness::new();
        let record = harness
            .store
            .create("ctx", media_rewrite_request(2))
            .await
            .unwrap();
        let controller = harness.controller();
        let done = controller.run(record.id).await.unwrap();

        let url = controller.regenerate(&done, 1).await.unwrap();

        assert_eq!(url, crate::testing::ScriptedImageGenerator::output_for(&crate::testing::image_url(1)));
        assert_eq!(harness.store.get(record.id).await.unwrap(), done);

        let err = controller.regenerate(&done, 5).await.unwrap_err();
        assert!(matches!(err, ContentflowError::InvalidRequest(_)));
    }
}
