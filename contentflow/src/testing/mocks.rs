//! Scripted providers and observers for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

use crate::core::TaskRecord;
use crate::errors::{PollTimeout, ProviderError};
use crate::progress::{ProgressObserver, ProgressUpdate};
use crate::providers::{
    AnalyzeRequest, AnalyzeResponse, GenerateImageRequest, GenerateImageResponse, ImageAnalyzer,
    ImageGenerator, RewriteRequest, RewriteResponse, TextRewriter,
};

/// Failure plan keyed by call input, plus a log of every call.
#[derive(Debug, Default)]
struct Script {
    failures: Mutex<HashMap<String, usize>>,
    calls: Mutex<Vec<String>>,
    latency: Mutex<Option<Duration>>,
}

impl Script {
    fn fail(&self, key: impl Into<String>, times: usize) {
        self.failures.lock().insert(key.into(), times);
    }

    /// Records a call and returns true if it should fail.
    async fn call(&self, key: &str) -> bool {
        self.calls.lock().push(key.to_string());
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut failures = self.failures.lock();
        for candidate in [key, "*"] {
            if let Some(remaining) = failures.get_mut(candidate) {
                if *remaining > 0 {
                    *remaining = remaining.saturating_sub(1);
                    return true;
                }
            }
        }
        false
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

/// A rewriter that prefixes the input, or fails as scripted.
#[derive(Debug, Default)]
pub struct ScriptedTextRewriter {
    script: Script,
}

impl ScriptedTextRewriter {
    /// Creates a rewriter that always succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a rewriter that always fails.
    #[must_use]
    pub fn failing() -> Self {
        let rewriter = Self::new();
        rewriter.script.fail("*", usize::MAX);
        rewriter
    }

    /// Fails the next `times` calls.
    pub fn fail_next(&self, times: usize) {
        self.script.fail("*", times);
    }

    /// Returns how many times the rewriter was called.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.script.calls().len()
    }
}

#[async_trait]
impl TextRewriter for ScriptedTextRewriter {
    async fn rewrite(&self, request: RewriteRequest) -> Result<RewriteResponse, ProviderError> {
        if self.script.call(&request.original_text).await {
            return Err(ProviderError::unavailable("scripted rewrite failure"));
        }
        Ok(RewriteResponse {
            rewritten_text: format!("[{}] {}", request.target_style, request.original_text),
        })
    }
}

/// An analyzer that derives a prompt from the image URL.
#[derive(Debug, Default)]
pub struct ScriptedImageAnalyzer {
    script: Script,
}

impl ScriptedImageAnalyzer {
    /// Creates an analyzer that always succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails every call for `image_url`.
    pub fn fail_image(&self, image_url: impl Into<String>) {
        self.script.fail(image_url, usize::MAX);
    }

    /// Returns the image URLs analyzed, in call order.
    #[must_use]
    pub fn analyzed(&self) -> Vec<String> {
        self.script.calls()
    }

    /// Returns how many times the analyzer was called.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.script.calls().len()
    }
}

#[async_trait]
impl ImageAnalyzer for ScriptedImageAnalyzer {
    async fn analyze(&self, request: AnalyzeRequest) -> Result<AnalyzeResponse, ProviderError> {
        if self.script.call(&request.image_url).await {
            return Err(ProviderError::unreachable_image(request.image_url));
        }
        Ok(AnalyzeResponse {
            prompt: format!("prompt for {}", request.image_url),
        })
    }
}

/// A generator that derives the new URL from the reference image.
#[derive(Debug, Default)]
pub struct ScriptedImageGenerator {
    script: Script,
}

impl ScriptedImageGenerator {
    /// Creates a generator that always succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails every call for `reference_image_url`.
    pub fn fail_image(&self, reference_image_url: impl Into<String>) {
        self.script.fail(reference_image_url, usize::MAX);
    }

    /// Fails the next `times` calls for `reference_image_url`.
    pub fn fail_image_times(&self, reference_image_url: impl Into<String>, times: usize) {
        self.script.fail(reference_image_url, times);
    }

    /// Sleeps this long inside every call.
    pub fn set_latency(&self, latency: Duration) {
        *self.script.latency.lock() = Some(latency);
    }

    /// Returns the reference URLs generated from, in call order.
    #[must_use]
    pub fn generated(&self) -> Vec<String> {
        self.script.calls()
    }

    /// Returns how many times the generator was called.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.script.calls().len()
    }

    /// The URL this generator returns for a reference image.
    #[must_use]
    pub fn output_for(reference_image_url: &str) -> String {
        format!("{reference_image_url}?regenerated")
    }
}

#[async_trait]
impl ImageGenerator for ScriptedImageGenerator {
    async fn generate(
        &self,
        request: GenerateImageRequest,
    ) -> Result<GenerateImageResponse, ProviderError> {
        if self.script.call(&request.reference_image_url).await {
            return Err(ProviderError::unavailable("scripted generation failure"));
        }
        Ok(GenerateImageResponse {
            generated_image_url: Self::output_for(&request.reference_image_url),
        })
    }
}

/// Records every progress callback.
#[derive(Debug, Default)]
pub struct CollectingProgressObserver {
    updates: Mutex<Vec<ProgressUpdate>>,
    terminal: Mutex<Option<TaskRecord>>,
    timeouts: Mutex<Vec<PollTimeout>>,
}

impl CollectingProgressObserver {
    /// Creates an empty observer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all updates, in order.
    #[must_use]
    pub fn updates(&self) -> Vec<ProgressUpdate> {
        self.updates.lock().clone()
    }

    /// Returns the terminal record, if one was seen.
    #[must_use]
    pub fn terminal(&self) -> Option<TaskRecord> {
        self.terminal.lock().clone()
    }

    /// Returns all reported timeouts.
    #[must_use]
    pub fn timeouts(&self) -> Vec<PollTimeout> {
        self.timeouts.lock().clone()
    }
}

#[async_trait]
impl ProgressObserver for CollectingProgressObserver {
    async fn on_update(&self, update: &ProgressUpdate) {
        self.updates.lock().push(update.clone());
    }

    async fn on_terminal(&self, record: &TaskRecord) {
        *self.terminal.lock() = Some(record.clone());
    }

    async fn on_timeout(&self, timeout: &PollTimeout) {
        self.timeouts.lock().push(timeout.clone());
    }
}
