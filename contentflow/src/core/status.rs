//! Task status, task type and pipeline stage enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of generation job a task performs.
///
/// The type selects which stages the pipeline walks through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskType {
    /// Write new content from a brief (subject, length, style, platform).
    ContentCreation,
    /// Rewrite existing content and regenerate its images.
    MediaRewrite,
}

const CONTENT_CREATION_STAGES: &[PipelineStage] = &[PipelineStage::Rewrite, PipelineStage::Complete];

const MEDIA_REWRITE_STAGES: &[PipelineStage] = &[
    PipelineStage::Rewrite,
    PipelineStage::Analyze,
    PipelineStage::Generate,
    PipelineStage::Complete,
];

impl TaskType {
    /// Returns the ordered stage sequence this task type may visit.
    ///
    /// Stages can be skipped at runtime (e.g. no images), but never reordered.
    #[must_use]
    pub fn stages(self) -> &'static [PipelineStage] {
        match self {
            Self::ContentCreation => CONTENT_CREATION_STAGES,
            Self::MediaRewrite => MEDIA_REWRITE_STAGES,
        }
    }

    /// Returns true if the stage belongs to this task type's sequence.
    #[must_use]
    pub fn includes(self, stage: PipelineStage) -> bool {
        self.stages().contains(&stage)
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ContentCreation => write!(f, "content-creation"),
            Self::MediaRewrite => write!(f, "media-rewrite"),
        }
    }
}

/// Task-level lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Created, no stage has started yet.
    #[default]
    Pending,
    /// A stage is running or the task is waiting to be resumed.
    Processing,
    /// Finished with a result.
    Completed,
    /// Finished with an error.
    Failed,
}

impl TaskStatus {
    /// Returns true for COMPLETED and FAILED.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Returns true for PENDING and PROCESSING.
    #[must_use]
    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Processing => write!(f, "PROCESSING"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// A named phase of the generation pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStage {
    /// Rewrite (or compose) the text.
    Rewrite,
    /// Turn each source image into a generation prompt.
    Analyze,
    /// Generate a new image per prompt.
    Generate,
    /// Assemble the result and finish the task.
    Complete,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rewrite => write!(f, "rewrite"),
            Self::Analyze => write!(f, "analyze"),
            Self::Generate => write!(f, "generate"),
            Self::Complete => write!(f, "complete"),
        }
    }
}
