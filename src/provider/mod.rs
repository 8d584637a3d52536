//! Model gateway trait and the OpenAI-compatible transport.

pub mod http;

#[cfg(feature = "openai")]
pub mod openai;

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::config::DasiConfig;
use crate::error::DasiError;
use crate::types::{FinishReason, GenerationSettings, ModelMessage, StructuredToolCalls, TextStreamDelta};

/// A request sent to a model provider.
#[derive(Debug, Clone, Default)]
pub struct ProviderRequest {
    pub messages: Vec<ModelMessage>,
    pub settings: GenerationSettings,
    pub tools: Option<Vec<ToolDefinition>>,
}

/// Tool definition sent to the provider API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Response from a non-streaming call.
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub text: String,
    pub tool_calls: Option<StructuredToolCalls>,
    pub finish_reason: Option<FinishReason>,
}

/// Core trait implemented by model providers.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Provider name (e.g., "openai").
    fn provider_name(&self) -> &str;
    /// The model ID this provider instance serves.
    fn model_id(&self) -> &str;

    /// Generate text (non-streaming).
    async fn generate_text(&self, request: &ProviderRequest)
        -> Result<ProviderResponse, DasiError>;

    /// Generate text (streaming). Structured tool calls arrive on a
    /// terminal [`TextStreamDelta`] once the model has finished emitting them.
    async fn stream_text(
        &self,
        request: &ProviderRequest,
    ) -> Result<BoxStream<'static, Result<TextStreamDelta, DasiError>>, DasiError>;
}

/// Create the provider described by the config.
///
/// An API key is required unless a custom base URL points at a local
/// OpenAI-compatible server.
#[cfg(feature = "openai")]
pub fn create_provider(config: &DasiConfig) -> Result<Arc<dyn ModelProvider>, DasiError> {
    let api_key = match (&config.api_key, &config.base_url) {
        (Some(key), _) => key.clone(),
        (None, Some(_)) => String::new(),
        (None, None) => {
            return Err(DasiError::Authentication(
                "Missing DASI_API_KEY or OPENAI_API_KEY".into(),
            ))
        }
    };
    Ok(Arc::new(openai::OpenAiProvider::new(
        config.model.clone(),
        api_key,
        config.base_url.clone(),
    )))
}
