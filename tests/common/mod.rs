//! Shared test helpers and a scripted streaming provider.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::BoxStream;

use dasi::error::DasiError;
use dasi::provider::{ModelProvider, ProviderRequest, ProviderResponse};
use dasi::tools::{Tool, ToolArguments, ToolExecutionContext, ToolParameters, ToolRegistry};
use dasi::types::*;

/// One scripted model reply: the deltas the stream will yield, in order.
pub type ScriptedTurn = Vec<Result<TextStreamDelta, DasiError>>;

/// A provider that replays scripted replies and records every request.
pub struct ScriptedProvider {
    turns: Mutex<VecDeque<ScriptedTurn>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            turns: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a reply streamed as the given chunks.
    pub fn reply(self, chunks: &[&str]) -> Self {
        let mut turn: ScriptedTurn = chunks.iter().map(|c| Ok(TextStreamDelta::text(*c))).collect();
        turn.push(Ok(TextStreamDelta::done(Some(FinishReason::Stop))));
        self.turns.lock().unwrap().push_back(turn);
        self
    }

    /// Queue a reply carrying a structured `tool_calls` array.
    pub fn tool_call(self, id: &str, name: &str, arguments: serde_json::Value) -> Self {
        let turn: ScriptedTurn = vec![
            Ok(TextStreamDelta::tool_calls(StructuredToolCalls::Multiple(vec![
                RawToolCall::structured(Some(id), name, arguments),
            ]))),
            Ok(TextStreamDelta::done(Some(FinishReason::ToolCalls))),
        ];
        self.turns.lock().unwrap().push_back(turn);
        self
    }

    /// Queue a reply carrying a raw structured payload.
    pub fn structured(self, text: &str, calls: StructuredToolCalls) -> Self {
        let mut turn: ScriptedTurn = Vec::new();
        if !text.is_empty() {
            turn.push(Ok(TextStreamDelta::text(text)));
        }
        turn.push(Ok(TextStreamDelta::tool_calls(calls)));
        turn.push(Ok(TextStreamDelta::done(Some(FinishReason::ToolCalls))));
        self.turns.lock().unwrap().push_back(turn);
        self
    }

    /// Queue a reply that streams `chunks` and then fails.
    pub fn fail_after(self, chunks: &[&str], error: DasiError) -> Self {
        let mut turn: ScriptedTurn = chunks.iter().map(|c| Ok(TextStreamDelta::text(*c))).collect();
        turn.push(Err(error));
        self.turns.lock().unwrap().push_back(turn);
        self
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn provider_name(&self) -> &str {
        "scripted"
    }

    fn model_id(&self) -> &str {
        "scripted-model"
    }

    async fn generate_text(
        &self,
        request: &ProviderRequest,
    ) -> Result<ProviderResponse, DasiError> {
        self.requests.lock().unwrap().push(request.clone());
        let turn = self.turns.lock().unwrap().pop_front().unwrap_or_default();
        let mut text = String::new();
        for delta in turn {
            text.push_str(&delta?.text);
        }
        Ok(ProviderResponse {
            text,
            tool_calls: None,
            finish_reason: Some(FinishReason::Stop),
        })
    }

    async fn stream_text(
        &self,
        request: &ProviderRequest,
    ) -> Result<BoxStream<'static, Result<TextStreamDelta, DasiError>>, DasiError> {
        self.requests.lock().unwrap().push(request.clone());
        let turn = self
            .turns
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| vec![Ok(TextStreamDelta::text("(script exhausted)"))]);
        Ok(Box::pin(futures::stream::iter(turn)))
    }
}

/// A `weather` tool that counts its executions.
pub struct WeatherTool {
    runs: Arc<AtomicUsize>,
    parameters: ToolParameters,
}

impl WeatherTool {
    pub fn new(runs: Arc<AtomicUsize>) -> Self {
        Self {
            runs,
            parameters: ToolParameters::object()
                .string("city", "City name", true)
                .build(),
        }
    }
}

#[async_trait]
impl Tool for WeatherTool {
    fn name(&self) -> &str {
        "weather"
    }

    fn description(&self) -> &str {
        "Current weather for a city"
    }

    fn parameters(&self) -> &ToolParameters {
        &self.parameters
    }

    async fn execute(
        &self,
        args: &ToolArguments,
        _ctx: &ToolExecutionContext,
    ) -> Result<serde_json::Value, DasiError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let city = args.get_str("city")?;
        Ok(serde_json::json!({ "status": "success", "data": format!("{city}: 15°C, cloudy") }))
    }
}

/// A registry holding only [`WeatherTool`].
pub fn weather_registry(runs: Arc<AtomicUsize>) -> ToolRegistry {
    ToolRegistry::new().with(Arc::new(WeatherTool::new(runs)))
}

/// Roles of a message list, for compact assertions.
pub fn roles(messages: &[ModelMessage]) -> Vec<Role> {
    messages.iter().map(|m| m.role).collect()
}
