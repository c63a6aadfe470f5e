//! Generation requests accepted at task creation.

use serde::{Deserialize, Serialize};

use super::TaskType;

/// A brief for writing new content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentBrief {
    /// What the content is about.
    pub subject: String,
    /// Approximate length in words.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_length: Option<u32>,
    /// Writing style passed to the rewrite provider.
    pub style: String,
    /// Target publishing platform.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
}

/// A reference to existing content that should be rewritten.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OriginalContent {
    /// Original body text.
    pub text: String,
    /// Source image URLs, in display order.
    #[serde(default)]
    pub image_urls: Vec<String>,
    /// Writing style passed to the rewrite provider.
    pub style: String,
    /// Target publishing platform.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
}

/// The input of one generation task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum GenerationRequest {
    /// Write new content from a brief.
    ContentCreation(ContentBrief),
    /// Rewrite existing content and regenerate its images.
    MediaRewrite(OriginalContent),
}

impl GenerationRequest {
    /// Returns the task type this request creates.
    #[must_use]
    pub fn task_type(&self) -> TaskType {
        match self {
            Self::ContentCreation(_) => TaskType::ContentCreation,
            Self::MediaRewrite(_) => TaskType::MediaRewrite,
        }
    }

    /// Returns the text handed to the rewrite provider.
    ///
    /// For a brief this is a composed instruction; for original content it is
    /// the original text verbatim.
    #[must_use]
    pub fn source_text(&self) -> String {
        match self {
            Self::ContentCreation(brief) => {
                let mut text = format!("Subject: {}", brief.subject);
                if let Some(length) = brief.target_length {
                    text.push_str(&format!("\nTarget length: about {length} words"));
                }
                if let Some(ref platform) = brief.platform {
                    text.push_str(&format!("\nPlatform: {platform}"));
                }
                text
            }
            Self::MediaRewrite(original) => original.text.clone(),
        }
    }

    /// Returns the requested style.
    #[must_use]
    pub fn target_style(&self) -> &str {
        match self {
            Self::ContentCreation(brief) => &brief.style,
            Self::MediaRewrite(original) => &original.style,
        }
    }

    /// Returns the source images (uncapped).
    #[must_use]
    pub fn source_images(&self) -> &[String] {
        match self {
            Self::ContentCreation(_) => &[],
            Self::MediaRewrite(original) => &original.image_urls,
        }
    }
}
