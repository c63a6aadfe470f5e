//! Task service: the surface a client talks to.
//!
//! [`TaskService`] creates tasks, answers status queries, resumes from the
//! durable slot after a reload, and offers the per-task follow-ups a UI needs
//! (acknowledge, retry a failed task, regenerate one image). Controller runs
//! are spawned onto the tokio runtime; at most one run per task id is in
//! flight inside one service.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::PipelineConfig;
use crate::core::{
    GenerationRequest, PipelineStage, TaskId, TaskRecord, TaskResult, TaskStatus, TaskUpdate,
};
use crate::errors::ContentflowError;
use crate::events::EventSink;
use crate::pipeline::PipelineController;
use crate::progress::ProgressPoller;
use crate::providers::Providers;
use crate::store::{validate_resume_token, ResumeSlot, ResumeToken, TaskStore};

/// Reply to a task creation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskResponse {
    /// Whether the task was created.
    pub success: bool,
    /// The new task's id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    /// Why creation was refused.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The client-facing view of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatusView {
    /// Lifecycle status.
    pub status: TaskStatus,
    /// Progress percentage.
    pub progress: u8,
    /// Human-readable progress message.
    pub progress_message: String,
    /// Stage in progress, or the stage a failed task stopped at.
    pub current_stage: Option<PipelineStage>,
    /// Result, once COMPLETED.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
    /// Error, once FAILED.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&TaskRecord> for TaskStatusView {
    fn from(record: &TaskRecord) -> Self {
        Self {
            status: record.status,
            progress: record.progress,
            progress_message: record.progress_message.clone(),
            current_stage: record.current_stage,
            result: record.result.clone(),
            error: record.error.clone(),
        }
    }
}

/// Reply to a status query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatusResponse {
    /// Whether the task was found.
    pub success: bool,
    /// The task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<TaskStatusView>,
    /// Why the query failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A controller run started by the service.
#[derive(Debug)]
pub struct StartedTask {
    /// The task as it was when the run was spawned.
    pub record: TaskRecord,
    /// Completes when the run ends.
    pub handle: JoinHandle<Result<TaskRecord, ContentflowError>>,
}

impl StartedTask {
    /// Waits for the run to end.
    pub async fn join(self) -> Result<TaskRecord, ContentflowError> {
        self.handle
            .await
            .map_err(|err| ContentflowError::Internal(format!("controller task panicked: {err}")))?
    }
}

/// What a resume attempt found.
#[derive(Debug)]
pub enum ResumeOutcome {
    /// The task was active and a controller run was spawned for it.
    Resumed(StartedTask),
    /// The task is active and already being run by this service.
    AlreadyRunning(TaskRecord),
    /// The task already finished; the UI should consume and acknowledge it.
    Terminal(TaskRecord),
}

impl ResumeOutcome {
    /// Returns the task id.
    #[must_use]
    pub fn task_id(&self) -> TaskId {
        match self {
            Self::Resumed(started) => started.record.id,
            Self::AlreadyRunning(record) | Self::Terminal(record) => record.id,
        }
    }
}

/// Creates, resumes and inspects generation tasks.
#[derive(Clone)]
pub struct TaskService {
    store: Arc<dyn TaskStore>,
    slot: Arc<dyn ResumeSlot>,
    controller: PipelineController,
    running: Arc<DashMap<TaskId, Instant>>,
}

impl std::fmt::Debug for TaskService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskService")
            .field("running", &self.running.len())
            .finish_non_exhaustive()
    }
}

impl TaskService {
    /// Creates a service.
    pub fn new(
        store: Arc<dyn TaskStore>,
        slot: Arc<dyn ResumeSlot>,
        providers: Providers,
        config: PipelineConfig,
    ) -> Self {
        let controller = PipelineController::new(store.clone(), providers, config);
        Self {
            store,
            slot,
            controller,
            running: Arc::new(DashMap::new()),
        }
    }

    /// Sets the event sink used by spawned controllers.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.controller = self.controller.with_event_sink(events);
        self
    }

    /// Returns a poller over this service's store.
    #[must_use]
    pub fn poller(&self) -> ProgressPoller {
        ProgressPoller::new(self.store.clone(), self.controller.config().poll.clone())
    }

    /// Number of controller runs currently in flight.
    #[must_use]
    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    /// Creates a task, remembers it in the resume slot and starts running it.
    ///
    /// If the task cannot be remembered or started it is marked FAILED, so the
    /// context is free for the next request.
    pub async fn start_task(
        &self,
        context_label: &str,
        request: GenerationRequest,
    ) -> Result<StartedTask, ContentflowError> {
        validate_request(&request)?;
        let record = self.store.create(context_label, request).await?;
        info!(task_id = %record.id, task_type = %record.task_type, context = context_label, "Task created");

        let task_id = record.id;
        match self.launch(record).await {
            Ok(started) => Ok(started),
            Err(err) => Err(self.abandon(task_id, err).await),
        }
    }

    /// Creates a task and replies with the creation envelope.
    ///
    /// The run continues in the background; follow it with
    /// [`TaskService::task_status`] or a [`ProgressPoller`].
    pub async fn create_task(
        &self,
        context_label: &str,
        request: GenerationRequest,
    ) -> CreateTaskResponse {
        match self.start_task(context_label, request).await {
            Ok(started) => CreateTaskResponse {
                success: true,
                task_id: Some(started.record.id),
                error: None,
            },
            Err(err) => {
                warn!(context = context_label, error = %err, "Task creation refused");
                CreateTaskResponse {
                    success: false,
                    task_id: None,
                    error: Some(err.to_string()),
                }
            }
        }
    }

    /// Answers a status query.
    pub async fn task_status(&self, task_id: TaskId) -> TaskStatusResponse {
        match self.store.get(task_id).await {
            Ok(record) => TaskStatusResponse {
                success: true,
                task: Some(TaskStatusView::from(&record)),
                error: None,
            },
            Err(err) => TaskStatusResponse {
                success: false,
                task: None,
                error: Some(err.to_string()),
            },
        }
    }

    /// Resumes the task a token points at.
    ///
    /// The token is validated against the store first; a mismatch is
    /// returned as [`ContentflowError::ResumeRejected`].
    pub async fn resume(&self, token: &ResumeToken) -> Result<ResumeOutcome, ContentflowError> {
        let record = validate_resume_token(token, self.store.as_ref()).await?;

        if record.is_terminal() {
            debug!(task_id = %record.id, status = %record.status, "Resume found a finished task");
            return Ok(ResumeOutcome::Terminal(record));
        }
        match self.spawn(record.clone()) {
            Ok(started) => Ok(ResumeOutcome::Resumed(started)),
            Err(ContentflowError::AlreadyRunning(_)) => Ok(ResumeOutcome::AlreadyRunning(record)),
            Err(err) => Err(err),
        }
    }

    /// Resumes whatever the durable slot remembers, if anything.
    ///
    /// A token the store rejects is cleared so the next startup does not
    /// trip over it again.
    pub async fn resume_from_slot(&self) -> Result<Option<ResumeOutcome>, ContentflowError> {
        let Some(token) = self.slot.load().await? else {
            return Ok(None);
        };

        match self.resume(&token).await {
            Ok(outcome) => {
                info!(task_id = %outcome.task_id(), "Resumed from slot");
                Ok(Some(outcome))
            }
            Err(err @ ContentflowError::ResumeRejected(_)) => {
                warn!(error = %err, "Discarding invalid resume token");
                self.slot.clear().await?;
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Marks a finished task as consumed by the UI and clears the slot.
    pub async fn acknowledge(&self, task_id: TaskId) -> Result<(), ContentflowError> {
        let record = self.store.get(task_id).await?;
        if !record.is_terminal() {
            return Err(ContentflowError::InvalidRequest(format!(
                "task {task_id} is {} and cannot be acknowledged yet",
                record.status
            )));
        }

        let remembered = self.slot.load().await?;
        if remembered.as_ref().and_then(|token| token.task_id().ok()) == Some(task_id) {
            self.slot.clear().await?;
            debug!(task_id = %task_id, "Resume slot cleared");
        }
        Ok(())
    }

    /// Starts a new task continuing where a failed one stopped.
    ///
    /// The new task copies the failed one's request, partial results and
    /// stage, so the resume policy skips finished work. Like any new task for
    /// the context, it supersedes the failed record.
    pub async fn retry_failed(&self, task_id: TaskId) -> Result<StartedTask, ContentflowError> {
        let failed = self.store.get(task_id).await?;
        if failed.status != TaskStatus::Failed {
            return Err(ContentflowError::InvalidRequest(format!(
                "task {task_id} is {}, only failed tasks can be retried",
                failed.status
            )));
        }

        let created = self
            .store
            .create(&failed.context_label, failed.request.clone())
            .await?;
        let created_id = created.id;
        match self.continue_from(&failed, created).await {
            Ok(started) => Ok(started),
            Err(err) => Err(self.abandon(created_id, err).await),
        }
    }

    /// Generates one image of a completed task again and returns its URL.
    pub async fn regenerate_image(
        &self,
        task_id: TaskId,
        index: usize,
    ) -> Result<String, ContentflowError> {
        let record = self.store.get(task_id).await?;
        self.controller.regenerate(&record, index).await
    }

    async fn continue_from(
        &self,
        failed: &TaskRecord,
        created: TaskRecord,
    ) -> Result<StartedTask, ContentflowError> {
        let record = self
            .store
            .update(
                created.id,
                created.version,
                TaskUpdate::new()
                    .carry_over(failed)
                    .progress(0, "Retrying failed task"),
            )
            .await?;
        info!(
            task_id = %record.id,
            previous = %failed.id,
            stage = ?record.current_stage,
            "Retrying failed task"
        );
        self.launch(record).await
    }

    async fn launch(&self, record: TaskRecord) -> Result<StartedTask, ContentflowError> {
        self.slot.save(&ResumeToken::for_task(&record)).await?;
        self.spawn(record)
    }

    /// Fails a freshly created task that never started, then hands back `err`.
    async fn abandon(&self, task_id: TaskId, err: ContentflowError) -> ContentflowError {
        warn!(task_id = %task_id, error = %err, "Task could not be started");
        if let Err(fail_err) = self
            .store
            .fail(task_id, &format!("Task could not be started: {err}"))
            .await
        {
            error!(task_id = %task_id, error = %fail_err, "Failed to release unstarted task");
        }
        err
    }

    fn spawn(&self, record: TaskRecord) -> Result<StartedTask, ContentflowError> {
        let guard = RunGuard::claim(&self.running, record.id)?;
        let controller = self.controller.clone();
        let task_id = record.id;

        let handle = tokio::spawn(async move {
            let _guard = guard;
            controller.run(task_id).await
        });
        Ok(StartedTask { record, handle })
    }
}

/// Holds a task id in the running set until dropped.
struct RunGuard {
    running: Arc<DashMap<TaskId, Instant>>,
    task_id: TaskId,
}

impl RunGuard {
    fn claim(
        running: &Arc<DashMap<TaskId, Instant>>,
        task_id: TaskId,
    ) -> Result<Self, ContentflowError> {
        match running.entry(task_id) {
            Entry::Occupied(entry) => {
                warn!(
                    task_id = %task_id,
                    running_for = ?entry.get().elapsed(),
                    "Refusing second controller run"
                );
                Err(ContentflowError::AlreadyRunning(task_id))
            }
            Entry::Vacant(entry) => {
                entry.insert(Instant::now());
                Ok(Self {
                    running: running.clone(),
                    task_id,
                })
            }
        }
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.running.remove(&self.task_id);
    }
}

fn validate_request(request: &GenerationRequest) -> Result<(), ContentflowError> {
    let missing = match request {
        GenerationRequest::ContentCreation(brief) if brief.subject.trim().is_empty() => {
            Some("subject")
        }
        GenerationRequest::MediaRewrite(original) if original.text.trim().is_empty() => {
            Some("original text")
        }
        _ if request.target_style().trim().is_empty() => Some("style"),
        _ => None,
    };
    match missing {
        Some(field) => Err(ContentflowError::InvalidRequest(format!("{field} is required"))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ContentBrief, TaskType};
    use crate::errors::{ResumeRejected, StoreError};
    use crate::store::{InMemoryResumeSlot, MockResumeSlot};
    use crate::testing::{
        assert_completed, content_brief_request, image_url, media_rewrite_request,
        ScriptedImageGenerator, TestHarness,
    };
    use pretty_assertions::assert_eq;

    fn service(harness: &TestHarness, slot: Arc<InMemoryResumeSlot>) -> TaskService {
        TaskService::new(
            harness.store(),
            slot,
            harness.providers(),
            harness.config.clone(),
        )
    }

    #[tokio::test]
    async fn test_start_task_runs_and_remembers_token() {
        let harness = TestHarness::new();
        let slot = Arc::new(InMemoryResumeSlot::new());
        let service = service(&harness, slot.clone());

        let started = service
            .start_task("editor", content_brief_request())
            .await
            .unwrap();
        let task_id = started.record.id;
        let done = started.join().await.unwrap();

        assert_completed(&done);
        let token = slot.load().await.unwrap().unwrap();
        assert_eq!(token.task_id().unwrap(), task_id);
        assert_eq!(token.task_type, TaskType::ContentCreation);
        assert_eq!(service.running_count(), 0);

        let status = service.task_status(task_id).await;
        assert!(status.success);
        let view = status.task.unwrap();
        assert_eq!(view.status, TaskStatus::Completed);
        assert_eq!(view.progress, 100);
        assert!(view.result.is_some());
    }

    #[tokio::test]
    async fn test_envelopes_use_wire_names() {
        let harness = TestHarness::new();
        let service = service(&harness, Arc::new(InMemoryResumeSlot::new()));

        let response = service.create_task("editor", content_brief_request()).await;
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["success"], true);
        assert!(json["taskId"].is_string());
        assert!(json.get("error").is_none());

        let status = service.task_status(TaskId::new()).await;
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["success"], false);
        assert!(json.get("task").is_none());
        assert!(json["error"].is_string());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_task_for_busy_context_refused() {
        let harness = TestHarness::new();
        let service = service(&harness, Arc::new(InMemoryResumeSlot::new()));

        let first = service.create_task("editor", media_rewrite_request(3)).await;
        let second = service.create_task("editor", media_rewrite_request(1)).await;

        assert!(first.success);
        assert!(!second.success);
        assert!(second.error.unwrap().contains("editor"));
    }

    #[tokio::test]
    async fn test_blank_request_rejected() {
        let harness = TestHarness::new();
        let service = service(&harness, Arc::new(InMemoryResumeSlot::new()));
        let request = GenerationRequest::ContentCreation(ContentBrief {
            subject: "  ".to_string(),
            target_length: None,
            style: "plain".to_string(),
            platform: None,
        });

        let err = service.start_task("editor", request).await.unwrap_err();

        assert!(matches!(err, ContentflowError::InvalidRequest(ref m) if m.contains("subject")));
        assert!(harness.store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_refuses_duplicate_run() {
        let harness = TestHarness::new();
        let service = service(&harness, Arc::new(InMemoryResumeSlot::new()));
        let started = service
            .start_task("editor", media_rewrite_request(3))
            .await
            .unwrap();
        let token = ResumeToken::for_task(&started.record);

        let outcome = service.resume(&token).await.unwrap();

        assert!(matches!(outcome, ResumeOutcome::AlreadyRunning(_)));
        started.join().await.unwrap();
        assert_eq!(harness.rewriter.call_count(), 1);
        assert!(matches!(
            service.resume(&token).await.unwrap(),
            ResumeOutcome::Terminal(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_from_slot_after_reload() {
        let harness = TestHarness::new();
        let record = harness
            .store
            .create("editor", media_rewrite_request(2))
            .await
            .unwrap();
        harness
            .store
            .update(
                record.id,
                record.version,
                TaskUpdate::new()
                    .stage(PipelineStage::Analyze)
                    .progress(30, "Content rewritten")
                    .rewritten_text("kept from before the reload"),
            )
            .await
            .unwrap();
        let slot = Arc::new(InMemoryResumeSlot::with_token(ResumeToken::for_task(&record)));
        let service = service(&harness, slot);

        let outcome = service.resume_from_slot().await.unwrap().unwrap();

        let ResumeOutcome::Resumed(started) = outcome else {
            panic!("expected a resumed run");
        };
        let done = started.join().await.unwrap();
        assert_eq!(assert_completed(&done).len(), 2);
        assert_eq!(harness.rewriter.call_count(), 0);
        assert_eq!(done.result.unwrap().text, "kept from before the reload");
    }

    #[tokio::test]
    async fn test_resume_from_slot_rejects_and_clears_tampered_token() {
        let harness = TestHarness::new();
        let record = harness
            .store
            .create("editor", content_brief_request())
            .await
            .unwrap();
        let mut token = ResumeToken::for_task(&record);
        token.context_label = "someone-else".to_string();
        let slot = Arc::new(InMemoryResumeSlot::with_token(token));
        let service = service(&harness, slot.clone());

        let err = service.resume_from_slot().await.unwrap_err();

        assert!(matches!(
            err,
            ContentflowError::ResumeRejected(ResumeRejected::ContextMismatch { .. })
        ));
        assert!(slot.load().await.unwrap().is_none());
        assert!(service.resume_from_slot().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_acknowledge_clears_slot_only_when_terminal() {
        let harness = TestHarness::new();
        let slot = Arc::new(InMemoryResumeSlot::new());
        let service = service(&harness, slot.clone());
        let record = harness
            .store
            .create("editor", content_brief_request())
            .await
            .unwrap();
        slot.save(&ResumeToken::for_task(&record)).await.unwrap();

        let err = service.acknowledge(record.id).await.unwrap_err();
        assert!(matches!(err, ContentflowError::InvalidRequest(_)));
        assert!(slot.load().await.unwrap().is_some());

        harness.controller().run(record.id).await.unwrap();
        service.acknowledge(record.id).await.unwrap();
        assert!(slot.load().await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_failed_continues_from_stopped_stage() {
        let harness = TestHarness::new();
        let slot = Arc::new(InMemoryResumeSlot::new());
        let service = service(&harness, slot.clone());
        let record = harness
            .store
            .create("editor", media_rewrite_request(2))
            .await
            .unwrap();
        harness
            .store
            .update(
                record.id,
                record.version,
                TaskUpdate::new()
                    .stage(PipelineStage::Analyze)
                    .rewritten_text("rewritten once"),
            )
            .await
            .unwrap();
        harness.store.fail(record.id, "analysis crashed").await.unwrap();

        let started = service.retry_failed(record.id).await.unwrap();

        assert_ne!(started.record.id, record.id);
        assert_eq!(started.record.current_stage, Some(PipelineStage::Analyze));
        let done = started.join().await.unwrap();
        assert_eq!(assert_completed(&done).len(), 2);
        assert_eq!(harness.rewriter.call_count(), 0);
        assert!(matches!(
            harness.store.get(record.id).await,
            Err(StoreError::NotFound(_))
        ));
        assert_eq!(
            slot.load().await.unwrap().unwrap().task_id().unwrap(),
            done.id
        );

        let err = service.retry_failed(done.id).await.unwrap_err();
        assert!(matches!(err, ContentflowError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_unsaved_token_releases_context() {
        let harness = TestHarness::new();
        let mut slot = MockResumeSlot::new();
        slot.expect_save()
            .times(1)
            .returning(|_| Err(StoreError::Io("disk full".to_string())));
        let service = TaskService::new(
            harness.store(),
            Arc::new(slot),
            harness.providers(),
            harness.config.clone(),
        );

        let err = service
            .start_task("editor", media_rewrite_request(1))
            .await
            .unwrap_err();

        assert!(matches!(err, ContentflowError::Store(StoreError::Io(_))));
        assert_eq!(service.running_count(), 0);
        let stranded = harness
            .store
            .current_for_context("editor")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stranded.status, TaskStatus::Failed);
        assert!(stranded.error.unwrap().contains("disk full"));

        // The context is free again.
        let next = harness
            .store
            .create("editor", media_rewrite_request(1))
            .await
            .unwrap();
        assert_eq!(next.status, TaskStatus::Pending);
    }

    #[tokio::test(start_paused = true)]
    async fn test_regenerate_image_of_completed_task() {
        let harness = TestHarness::new();
        let service = service(&harness, Arc::new(InMemoryResumeSlot::new()));
        let done = service
            .start_task("editor", media_rewrite_request(2))
            .await
            .unwrap()
            .join()
            .await
            .unwrap();

        let url = service.regenerate_image(done.id, 0).await.unwrap();

        assert_eq!(url, ScriptedImageGenerator::output_for(&image_url(0)));
        assert_eq!(harness.generator.call_count(), 3);
    }
}
