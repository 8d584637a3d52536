//! Vision side channel: turn a screenshot into a text description.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::{DasiError, Result};
use crate::prompts::VISION_SYSTEM_PROMPT;
use crate::provider::{ModelProvider, ProviderRequest};
use crate::types::{GenerationSettings, ImageContent, ModelMessage};

use super::ResolverOutcome;

/// Produces a description of an image.
#[async_trait]
pub trait VisionDescriber: Send + Sync {
    /// Whether a vision model is available at all.
    fn is_configured(&self) -> bool {
        true
    }

    async fn describe(&self, image: &ImageContent, hint: &str) -> Result<String>;
}

/// Describes images with a multimodal chat model.
pub struct ModelVisionDescriber {
    provider: Arc<dyn ModelProvider>,
    settings: GenerationSettings,
}

impl ModelVisionDescriber {
    pub fn new(provider: Arc<dyn ModelProvider>) -> Self {
        Self {
            provider,
            settings: GenerationSettings::builder()
                .temperature(0.1)
                .max_tokens(1_000)
                .build(),
        }
    }
}

#[async_trait]
impl VisionDescriber for ModelVisionDescriber {
    async fn describe(&self, image: &ImageContent, hint: &str) -> Result<String> {
        let prompt = if hint.trim().is_empty() {
            "Describe this image."
        } else {
            hint
        };
        let request = ProviderRequest {
            messages: vec![
                ModelMessage::system(VISION_SYSTEM_PROMPT),
                ModelMessage::user_with_image(prompt, image.clone()),
            ],
            settings: self.settings.clone(),
            tools: None,
        };
        let response = self.provider.generate_text(&request).await?;
        let description = response.text.trim().to_string();
        if description.is_empty() {
            return Err(DasiError::api(200, "vision model returned an empty description"));
        }
        Ok(description)
    }
}

/// Wraps an optional [`VisionDescriber`].
#[derive(Clone, Default)]
pub struct VisionResolver {
    describer: Option<Arc<dyn VisionDescriber>>,
}

impl VisionResolver {
    pub fn new(describer: Arc<dyn VisionDescriber>) -> Self {
        Self {
            describer: Some(describer),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.describer.as_ref().is_some_and(|d| d.is_configured())
    }

    /// `None` when no vision model is configured and the image should go to
    /// the main model directly.
    pub async fn resolve(&self, image: &ImageContent, hint: &str) -> Option<ResolverOutcome> {
        let describer = self.describer.as_ref().filter(|d| d.is_configured())?;
        let outcome = match describer.describe(image, hint).await {
            Ok(description) => {
                info!(chars = description.len(), "image described");
                ResolverOutcome::success(description, None)
            }
            Err(e) => {
                warn!(error = %e, "vision description failed");
                ResolverOutcome::error(format!(
                    "An image was provided but it could not be described ({e}). Answer based on the text alone and mention that the image could not be analyzed."
                ))
            }
        };
        Some(outcome)
    }
}

impl std::fmt::Debug for VisionResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisionResolver")
            .field("configured", &self.is_configured())
            .finish()
    }
}
