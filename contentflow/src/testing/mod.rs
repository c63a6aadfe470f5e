//! Testing utilities for contentflow pipelines.
//!
//! This module provides:
//! - Scripted providers with per-input failure plans and call logs
//! - A progress observer that records every callback
//! - Request fixtures and a wired-up test harness

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{assert_completed, assert_failed, assert_progress_monotonic};
pub use fixtures::{
    content_brief_request, fast_config, image_url, media_rewrite_request, TestHarness,
};
pub use mocks::{
    CollectingProgressObserver, ScriptedImageAnalyzer, ScriptedImageGenerator,
    ScriptedTextRewriter,
};
