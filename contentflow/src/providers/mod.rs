//! External generation provider contracts.
//!
//! Providers are stateless services invoked once per call. The pipeline only
//! sees these traits; concrete transports live in submodules.

#[cfg(feature = "http")]
mod http;

#[cfg(feature = "http")]
pub use http::{HttpImageAnalyzer, HttpImageGenerator, HttpProviderConfig, HttpTextRewriter};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::errors::ProviderError;

/// Text rewrite request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewriteRequest {
    /// Text to rewrite.
    pub original_text: String,
    /// Desired style.
    pub target_style: String,
}

/// Text rewrite response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewriteResponse {
    /// Rewritten text.
    pub rewritten_text: String,
}

/// Image analysis request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeRequest {
    /// Image to describe.
    pub image_url: String,
}

/// Image analysis response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeResponse {
    /// Generation prompt describing the image.
    pub prompt: String,
}

/// Image generation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateImageRequest {
    /// Prompt for the new image.
    pub prompt: String,
    /// Source image used as a reference.
    pub reference_image_url: String,
}

/// Image generation response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateImageResponse {
    /// URL of the generated image.
    pub generated_image_url: String,
}

/// A provider response that may be present but unusable.
///
/// The stage executor treats an unusable response exactly like a failed call.
pub trait ProviderOutput {
    /// Returns false for empty or whitespace-only payloads.
    fn is_usable(&self) -> bool;
}

impl ProviderOutput for RewriteResponse {
    fn is_usable(&self) -> bool {
        !self.rewritten_text.trim().is_empty()
    }
}

impl ProviderOutput for AnalyzeResponse {
    fn is_usable(&self) -> bool {
        !self.prompt.trim().is_empty()
    }
}

impl ProviderOutput for GenerateImageResponse {
    fn is_usable(&self) -> bool {
        !self.generated_image_url.trim().is_empty()
    }
}

/// Rewrites text into a target style.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TextRewriter: Send + Sync {
    /// Performs one rewrite call.
    async fn rewrite(&self, request: RewriteRequest) -> Result<RewriteResponse, ProviderError>;
}

/// Describes an image as a generation prompt.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ImageAnalyzer: Send + Sync {
    /// Performs one analysis call.
    async fn analyze(&self, request: AnalyzeRequest) -> Result<AnalyzeResponse, ProviderError>;
}

/// Generates a new image from a prompt and a reference image.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// Performs one generation call.
    async fn generate(
        &self,
        request: GenerateImageRequest,
    ) -> Result<GenerateImageResponse, ProviderError>;
}

/// The three providers the pipeline needs.
#[derive(Clone)]
pub struct Providers {
    /// Text rewrite provider.
    pub rewriter: Arc<dyn TextRewriter>,
    /// Image analysis provider.
    pub analyzer: Arc<dyn ImageAnalyzer>,
    /// Image generation provider.
    pub generator: Arc<dyn ImageGenerator>,
}

impl Providers {
    /// Bundles three providers.
    pub fn new(
        rewriter: Arc<dyn TextRewriter>,
        analyzer: Arc<dyn ImageAnalyzer>,
        generator: Arc<dyn ImageGenerator>,
    ) -> Self {
        Self {
            rewriter,
            analyzer,
            generator,
        }
    }
}

impl std::fmt::Debug for Providers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Providers").finish_non_exhaustive()
    }
}
