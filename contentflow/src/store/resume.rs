//! Resume tokens and the durable slot that holds them.
//!
//! A client writes a [`ResumeToken`] when it starts a task and reads it back at
//! startup to decide whether to resume. The token is untrusted input: it is
//! always re-validated against the task store before anything is resumed.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::TaskStore;
use crate::core::{TaskId, TaskRecord, TaskType};
use crate::errors::{ContentflowError, ResumeRejected, StoreError};

/// What a client remembers about its active task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeToken {
    /// Task id as the client stored it.
    pub active_task_id: String,
    /// Task type the client believes the task has.
    pub task_type: TaskType,
    /// Context the task was started from.
    pub context_label: String,
}

impl ResumeToken {
    /// Creates a token describing a stored task.
    #[must_use]
    pub fn for_task(record: &TaskRecord) -> Self {
        Self {
            active_task_id: record.id.to_string(),
            task_type: record.task_type,
            context_label: record.context_label.clone(),
        }
    }

    /// Parses the task id.
    pub fn task_id(&self) -> Result<TaskId, ResumeRejected> {
        self.active_task_id
            .parse()
            .map_err(|_| ResumeRejected::MalformedId(self.active_task_id.clone()))
    }
}

/// Checks a token against the store and returns the task it refers to.
pub async fn validate_resume_token(
    token: &ResumeToken,
    store: &dyn TaskStore,
) -> Result<TaskRecord, ContentflowError> {
    let id = token.task_id()?;
    let record = match store.get(id).await {
        Ok(record) => record,
        Err(StoreError::NotFound(_)) => return Err(ResumeRejected::UnknownTask(id).into()),
        Err(err) => return Err(err.into()),
    };

    if record.task_type != token.task_type {
        return Err(ResumeRejected::TypeMismatch {
            claimed: token.task_type,
            actual: record.task_type,
        }
        .into());
    }
    if record.context_label != token.context_label {
        return Err(ResumeRejected::ContextMismatch {
            claimed: token.context_label.clone(),
            actual: record.context_label,
        }
        .into());
    }

    Ok(record)
}

/// A well-known durable slot holding at most one resume token.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResumeSlot: Send + Sync {
    /// Reads the stored token, if any.
    async fn load(&self) -> Result<Option<ResumeToken>, StoreError>;

    /// Replaces the stored token.
    async fn save(&self, token: &ResumeToken) -> Result<(), StoreError>;

    /// Removes the stored token.
    async fn clear(&self) -> Result<(), StoreError>;
}

/// A resume slot held in memory.
#[derive(Debug, Default)]
pub struct InMemoryResumeSlot {
    token: Mutex<Option<ResumeToken>>,
}

impl InMemoryResumeSlot {
    /// Creates an empty slot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a slot already holding a token.
    #[must_use]
    pub fn with_token(token: ResumeToken) -> Self {
        Self {
            token: Mutex::new(Some(token)),
        }
    }
}

#[async_trait]
impl ResumeSlot for InMemoryResumeSlot {
    async fn load(&self) -> Result<Option<ResumeToken>, StoreError> {
        Ok(self.token.lock().clone())
    }

    async fn save(&self, token: &ResumeToken) -> Result<(), StoreError> {
        *self.token.lock() = Some(token.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        *self.token.lock() = None;
        Ok(())
    }
}

/// A resume slot persisted as a small JSON file.
#[derive(Debug, Clone)]
pub struct FileResumeSlot {
    path: PathBuf,
}

impl FileResumeSlot {
    /// Creates a slot at `path`. The file is created on first save.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ResumeSlot for FileResumeSlot {
    async fn load(&self) -> Result<Option<ResumeToken>, StoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(token) => Ok(Some(token)),
                Err(err) => {
                    // A garbled slot is treated like an empty one.
                    tracing::warn!(path = %self.path.display(), error = %err, "Ignoring unreadable resume slot");
                    Ok(None)
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn save(&self, token: &ResumeToken) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let bytes = serde_json::to_vec(token)?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
