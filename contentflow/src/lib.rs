//! # Contentflow
//!
//! A resumable, multi-stage content generation task pipeline.
//!
//! One generation request becomes one durable task that moves through
//! `rewrite → analyze → generate → complete`, calling external text and image
//! providers along the way. Contentflow provides:
//!
//! - **Durable task records**: every transition is written to a [`store::TaskStore`]
//!   so a controller can pick up where a previous one stopped
//! - **Bounded, rate-limited batches**: at most ten images, processed one at a
//!   time with a pause between provider calls
//! - **Bounded retries**: every provider call has a fixed attempt budget and a
//!   per-call timeout
//! - **Per-item failure tolerance**: a failed image leaves a gap in the result
//!   instead of failing the task
//! - **Progress observation**: a polling reader behind a swappable observer
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use contentflow::prelude::*;
//!
//! let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
//! let slot = Arc::new(FileResumeSlot::new("resume.json"));
//! let service = TaskService::new(store, slot, providers, PipelineConfig::default());
//!
//! // On startup, continue whatever the slot remembers.
//! if let Some(outcome) = service.resume_from_slot().await? {
//!     println!("resumed {}", outcome.task_id());
//! }
//!
//! let started = service.start_task("editor", request).await?;
//! let record = started.join().await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod observability;
pub mod pipeline;
pub mod progress;
pub mod providers;
pub mod service;
pub mod store;
pub mod testing;

pub use errors::{ContentflowError, Result};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::PipelineConfig;
    pub use crate::core::{
        ContentBrief, GenerationRequest, OriginalContent, PipelineStage, TaskId, TaskRecord,
        TaskResult, TaskStatus, TaskType,
    };
    pub use crate::errors::{
        BatchItemFailure, ContentflowError, PipelineFailure, PollTimeout, ProviderError,
        RetriesExhausted, StoreError,
    };
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::observability::{init_logging, LogConfig};
    pub use crate::pipeline::{BatchRunner, PipelineController, StageExecutor};
    pub use crate::progress::{
        PollConfig, PollOutcome, PollTimeoutPolicy, ProgressObserver, ProgressPoller,
        ProgressUpdate,
    };
    pub use crate::providers::{ImageAnalyzer, ImageGenerator, Providers, TextRewriter};
    pub use crate::service::{
        CreateTaskResponse, ResumeOutcome, StartedTask, TaskService, TaskStatusResponse,
    };
    pub use crate::store::{
        FileResumeSlot, FileTaskStore, InMemoryResumeSlot, InMemoryTaskStore, ResumeSlot,
        ResumeToken, TaskStore,
    };
    pub use std::sync::Arc;
}
