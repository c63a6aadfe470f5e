//! Test fixtures for pipeline testing.

use std::sync::Arc;

use super::mocks::{ScriptedImageAnalyzer, ScriptedImageGenerator, ScriptedTextRewriter};
use crate::config::PipelineConfig;
use crate::core::{ContentBrief, GenerationRequest, OriginalContent};
use crate::pipeline::PipelineController;
use crate::providers::Providers;
use crate::store::{InMemoryTaskStore, TaskStore};

/// URL of the `index`-th fixture image.
#[must_use]
pub fn image_url(index: usize) -> String {
    format!("https://images.test/{index}.png")
}

/// A media-rewrite request with `images` source images.
#[must_use]
pub fn media_rewrite_request(images: usize) -> GenerationRequest {
    GenerationRequest::MediaRewrite(OriginalContent {
        text: "Original post about a weekend in the mountains.".to_string(),
        image_urls: (0..images).map(image_url).collect(),
        style: "lively".to_string(),
        platform: Some("blog".to_string()),
    })
}

/// A content-creation request.
#[must_use]
pub fn content_brief_request() -> GenerationRequest {
    GenerationRequest::ContentCreation(ContentBrief {
        subject: "Five tips for better sleep".to_string(),
        target_length: Some(200),
        style: "friendly".to_string(),
        platform: None,
    })
}

/// Default config with retry backoff removed so failures resolve instantly.
///
/// The inter-item delay is kept; run tests that use it with paused time.
#[must_use]
pub fn fast_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.retry.rewrite.base_delay_ms = 0;
    config
}

/// An in-memory store, scripted providers and a controller wired together.
pub struct TestHarness {
    /// The store.
    pub store: Arc<InMemoryTaskStore>,
    /// The rewriter.
    pub rewriter: Arc<ScriptedTextRewriter>,
    /// The analyzer.
    pub analyzer: Arc<ScriptedImageAnalyzer>,
    /// The generator.
    pub generator: Arc<ScriptedImageGenerator>,
    /// The config the controller runs with.
    pub config: PipelineConfig,
}

impl TestHarness {
    /// Creates a harness with [`fast_config`] and always-succeeding providers.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(fast_config())
    }

    /// Creates a harness with a specific config.
    #[must_use]
    pub fn with_config(config: PipelineConfig) -> Self {
        Self {
            store: Arc::new(InMemoryTaskStore::new()),
            rewriter: Arc::new(ScriptedTextRewriter::new()),
            analyzer: Arc::new(ScriptedImageAnalyzer::new()),
            generator: Arc::new(ScriptedImageGenerator::new()),
            config,
        }
    }

    /// Replaces the rewriter.
    #[must_use]
    pub fn with_rewriter(mut self, rewriter: ScriptedTextRewriter) -> Self {
        self.rewriter = Arc::new(rewriter);
        self
    }

    /// Returns the store as a trait object.
    #[must_use]
    pub fn store(&self) -> Arc<dyn TaskStore> {
        self.store.clone()
    }

    /// Bundles the scripted providers.
    #[must_use]
    pub fn providers(&self) -> Providers {
        Providers::new(
            self.rewriter.clone(),
            self.analyzer.clone(),
            self.generator.clone(),
        )
    }

    /// Builds a fresh controller over the shared store and providers.
    #[must_use]
    pub fn controller(&self) -> PipelineController {
        PipelineController::new(self.store(), self.providers(), self.config.clone())
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TestHarness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestHarness")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
