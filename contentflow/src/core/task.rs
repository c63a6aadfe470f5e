//! The task record and the rules for mutating it.
//!
//! Stores only handle locking and persistence; every merge and terminal-state
//! rule lives on [`TaskRecord`] so that all stores behave identically.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::{GenerationRequest, PipelineStage, TaskStatus, TaskType};
use crate::errors::StoreError;

/// Opaque task identifier, stable for the task's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Allocates a new random id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// One recorded, non-fatal failure of a batch item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemFailure {
    /// Stage the item belonged to.
    pub stage: PipelineStage,
    /// Index of the item in the (capped) source list.
    pub index: usize,
    /// Human-readable cause.
    pub message: String,
}

/// Stage-scoped accumulators, indexed like their source inputs.
///
/// Vectors only grow or have a slot replaced; they never shrink.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialResults {
    /// Output of the rewrite stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rewritten_text: Option<String>,
    /// Per-image prompt; `None` marks an analysis failure.
    #[serde(default)]
    pub image_prompts: Vec<Option<String>>,
    /// Per-image generated URL; `None` marks a generation failure or skip.
    #[serde(default)]
    pub generated_images: Vec<Option<String>>,
    /// Failures absorbed by batch stages.
    #[serde(default)]
    pub item_failures: Vec<ItemFailure>,
}

impl PartialResults {
    /// Returns true if at least one usable prompt was produced.
    #[must_use]
    pub fn has_usable_prompt(&self) -> bool {
        self.image_prompts.iter().any(Option::is_some)
    }

    /// Returns the prompt recorded at `index`, if any.
    #[must_use]
    pub fn prompt_at(&self, index: usize) -> Option<&str> {
        self.image_prompts.get(index).and_then(Option::as_deref)
    }

    /// Returns the generated URL recorded at `index`, if any.
    #[must_use]
    pub fn generated_at(&self, index: usize) -> Option<&str> {
        self.generated_images.get(index).and_then(Option::as_deref)
    }

    fn clear_failure(&mut self, stage: PipelineStage, index: usize) {
        self.item_failures
            .retain(|failure| !(failure.stage == stage && failure.index == index));
    }
}

fn set_slot(slots: &mut Vec<Option<String>>, index: usize, value: Option<String>) {
    if slots.len() <= index {
        slots.resize(index + 1, None);
    }
    // A failure marker never erases an earlier success.
    if value.is_some() {
        slots[index] = value;
    }
}

/// A partial mutation merged into a record by [`crate::store::TaskStore::update`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskUpdate {
    /// New current stage.
    pub stage: Option<PipelineStage>,
    /// New progress; lower values than the current one are ignored.
    pub progress: Option<u8>,
    /// Replacement progress message.
    pub message: Option<String>,
    /// Rewritten text.
    pub rewritten_text: Option<String>,
    /// Prompt slots to write.
    pub prompts: Vec<(usize, Option<String>)>,
    /// Generated image slots to write.
    pub generated_images: Vec<(usize, Option<String>)>,
    /// Item failures to append.
    pub item_failures: Vec<ItemFailure>,
}

impl TaskUpdate {
    /// Creates an empty update.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the current stage.
    #[must_use]
    pub fn stage(mut self, stage: PipelineStage) -> Self {
        self.stage = Some(stage);
        self
    }

    /// Sets progress and message together.
    #[must_use]
    pub fn progress(mut self, progress: u8, message: impl Into<String>) -> Self {
        self.progress = Some(progress);
        self.message = Some(message.into());
        self
    }

    /// Records the rewritten text.
    #[must_use]
    pub fn rewritten_text(mut self, text: impl Into<String>) -> Self {
        self.rewritten_text = Some(text.into());
        self
    }

    /// Writes a prompt slot.
    #[must_use]
    pub fn prompt(mut self, index: usize, prompt: Option<String>) -> Self {
        self.prompts.push((index, prompt));
        self
    }

    /// Writes a generated image slot.
    #[must_use]
    pub fn generated_image(mut self, index: usize, url: Option<String>) -> Self {
        self.generated_images.push((index, url));
        self
    }

    /// Appends an item failure.
    #[must_use]
    pub fn item_failure(mut self, failure: ItemFailure) -> Self {
        self.item_failures.push(failure);
        self
    }

    /// Copies all partial results and the stage of an earlier record.
    #[must_use]
    pub fn carry_over(mut self, previous: &TaskRecord) -> Self {
        self.stage = previous.current_stage;
        let partial = &previous.partial_results;
        self.rewritten_text.clone_from(&partial.rewritten_text);
        self.prompts
            .extend(partial.image_prompts.iter().cloned().enumerate());
        self.generated_images
            .extend(partial.generated_images.iter().cloned().enumerate());
        self.item_failures.extend(partial.item_failures.iter().cloned());
        self
    }
}

/// The terminal payload of a completed task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    /// Final text.
    pub text: String,
    /// Source images that were processed (capped).
    pub source_images: Vec<String>,
    /// One slot per processed source image; empty for text-only results.
    pub generated_images: Vec<Option<String>>,
    /// Number of generated images that succeeded.
    pub success_count: usize,
    /// Indices of `generated_images` without a URL.
    pub failed_indices: Vec<usize>,
}

impl TaskResult {
    /// Assembles the result from a record's partial results.
    ///
    /// `cap` is the batch cap the stages ran with. When no usable prompt
    /// exists the result is text-only.
    #[must_use]
    pub fn assemble(record: &TaskRecord, cap: usize) -> Self {
        let partial = &record.partial_results;
        let source_images: Vec<String> = record
            .request
            .source_images()
            .iter()
            .take(cap)
            .cloned()
            .collect();

        let generated_images: Vec<Option<String>> = if partial.has_usable_prompt() {
            (0..source_images.len())
                .map(|index| partial.generated_at(index).map(str::to_string))
                .collect()
        } else {
            Vec::new()
        };

        let failed_indices = generated_images
            .iter()
            .enumerate()
            .filter(|(_, url)| url.is_none())
            .map(|(index, _)| index)
            .collect();
        let success_count = generated_images.iter().filter(|url| url.is_some()).count();

        Self {
            text: partial.rewritten_text.clone().unwrap_or_default(),
            source_images,
            generated_images,
            success_count,
            failed_indices,
        }
    }
}

/// The durable state of one generation task.
///
/// Stores hand out owned clones, so a `TaskRecord` obtained from a store is a
/// point-in-time snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    /// Task id.
    pub id: TaskId,
    /// Task type, derived from the request.
    #[serde(rename = "type")]
    pub task_type: TaskType,
    /// Client context the task belongs to.
    pub context_label: String,
    /// The generation request.
    pub request: GenerationRequest,
    /// Lifecycle status.
    pub status: TaskStatus,
    /// Stage currently (or last) running; `None` until started.
    pub current_stage: Option<PipelineStage>,
    /// 0..=100, never decreasing.
    pub progress: u8,
    /// Latest progress message.
    pub progress_message: String,
    /// Stage accumulators.
    pub partial_results: PartialResults,
    /// Terminal result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
    /// Terminal error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Optimistic concurrency version, bumped on every mutation.
    pub version: u64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    /// Creates a PENDING record.
    #[must_use]
    pub fn new(context_label: impl Into<String>, request: GenerationRequest) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::new(),
            task_type: request.task_type(),
            context_label: context_label.into(),
            request,
            status: TaskStatus::Pending,
            current_stage: None,
            progress: 0,
            progress_message: "Queued".to_string(),
            partial_results: PartialResults::default(),
            result: None,
            error: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns true once COMPLETED or FAILED.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Merges an update. Returns false (and changes nothing) if terminal.
    pub fn apply_update(&mut self, update: &TaskUpdate) -> bool {
        if self.is_terminal() {
            return false;
        }

        self.status = TaskStatus::Processing;
        if let Some(stage) = update.stage {
            self.current_stage = Some(stage);
        }
        if let Some(progress) = update.progress {
            self.progress = self.progress.max(progress.min(100));
        }
        if let Some(ref message) = update.message {
            self.progress_message.clone_from(message);
        }

        let partial = &mut self.partial_results;
        if let Some(ref text) = update.rewritten_text {
            partial.rewritten_text = Some(text.clone());
        }
        for (index, prompt) in &update.prompts {
            if prompt.is_some() {
                partial.clear_failure(PipelineStage::Analyze, *index);
            }
            set_slot(&mut partial.image_prompts, *index, prompt.clone());
        }
        for (index, url) in &update.generated_images {
            if url.is_some() {
                partial.clear_failure(PipelineStage::Generate, *index);
            }
            set_slot(&mut partial.generated_images, *index, url.clone());
        }
        for failure in &update.item_failures {
            if !partial.item_failures.contains(failure) {
                partial.item_failures.push(failure.clone());
            }
        }

        self.touch();
        true
    }

    /// Marks the record COMPLETED.
    ///
    /// Returns `Ok(false)` if already COMPLETED (the stored result is kept).
    pub fn mark_completed(&mut self, result: TaskResult) -> Result<bool, StoreError> {
        match self.status {
            TaskStatus::Completed => Ok(false),
            TaskStatus::Failed => Err(StoreError::AlreadyTerminal {
                task_id: self.id,
                status: self.status,
            }),
            TaskStatus::Pending | TaskStatus::Processing => {
                self.status = TaskStatus::Completed;
                self.current_stage = Some(PipelineStage::Complete);
                self.progress = 100;
                self.progress_message = "Generation complete".to_string();
                self.result = Some(result);
                self.touch();
                Ok(true)
            }
        }
    }

    /// Marks the record FAILED, leaving `current_stage` untouched.
    ///
    /// Returns `Ok(false)` if already FAILED (the stored error is kept).
    pub fn mark_failed(&mut self, error: &str) -> Result<bool, StoreError> {
        match self.status {
            TaskStatus::Failed => Ok(false),
            TaskStatus::Completed => Err(StoreError::AlreadyTerminal {
                task_id: self.id,
                status: self.status,
            }),
            TaskStatus::Pending | TaskStatus::Processing => {
                self.status = TaskStatus::Failed;
                self.progress_message = format!("Generation failed: {error}");
                self.error = Some(error.to_string());
                self.touch();
                Ok(true)
            }
        }
    }

    fn touch(&mut self) {
        self.version += 1;
        self.updated_at = Utc::now();
    }
}
