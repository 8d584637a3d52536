//! OpenAI Chat Completions API provider (also serves compatible local servers).

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::DasiError;
use crate::types::*;

use super::http::{bearer_headers, parse_sse_data, shared_client, status_to_error};
use super::{ModelProvider, ProviderRequest, ProviderResponse};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiProvider {
    model: String,
    api_key: String,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(model: String, api_key: String, base_url: Option<String>) -> Self {
        let base_url = base_url
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self {
            model,
            api_key,
            base_url,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    pub(crate) fn build_request_body(&self, request: &ProviderRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::Map::new();
        body.insert("model".into(), self.model.clone().into());
        body.insert("messages".into(), messages_to_openai(&request.messages).into());
        body.insert("stream".into(), stream.into());

        let settings = &request.settings;
        if let Some(max) = settings.max_tokens {
            body.insert("max_tokens".into(), max.into());
        }
        if let Some(temp) = settings.temperature {
            body.insert("temperature".into(), temp.into());
        }
        if let Some(top_p) = settings.top_p {
            body.insert("top_p".into(), top_p.into());
        }
        if let Some(ref stops) = settings.stop_sequences {
            body.insert("stop".into(), serde_json::json!(stops));
        }
        if let Some(ref user) = settings.user {
            body.insert("user".into(), user.clone().into());
        }

        if let Some(ref tools) = request.tools {
            if !tools.is_empty() {
                let tool_defs: Vec<serde_json::Value> = tools
                    .iter()
                    .map(|t| {
                        serde_json::json!({
                            "type": "function",
                            "function": {
                                "name": t.name,
                                "description": t.description,
                                "parameters": t.parameters,
                            }
                        })
                    })
                    .collect();
                body.insert("tools".into(), tool_defs.into());
                // One call in flight at a time.
                body.insert("parallel_tool_calls".into(), false.into());
            }
        }

        serde_json::Value::Object(body)
    }

    async fn post(&self, body: &serde_json::Value) -> Result<reqwest::Response, DasiError> {
        let resp = shared_client()
            .post(self.endpoint())
            .headers(bearer_headers(&self.api_key))
            .json(body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status != 200 {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(status_to_error(status, &body_text));
        }
        Ok(resp)
    }
}

#[async_trait]
impl ModelProvider for OpenAiProvider {
    fn provider_name(&self) -> &str {
        "openai"
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    async fn generate_text(&self, request: &ProviderRequest) -> Result<ProviderResponse, DasiError> {
        let body = self.build_request_body(request, false);
        debug!(model = %self.model, "OpenAI generate_text");

        let data: OpenAiChatResponse = self.post(&body).await?.json().await?;
        let choice = data
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| DasiError::api(200, "No choices in OpenAI response"))?;

        let tool_calls = match (choice.message.tool_calls, choice.message.function_call) {
            (Some(calls), _) if !calls.is_empty() => Some(StructuredToolCalls::Multiple(
                calls
                    .into_iter()
                    .map(|tc| {
                        RawToolCall::encoded(
                            tc.id.as_deref(),
                            &tc.function.name,
                            &tc.function.arguments,
                        )
                    })
                    .collect(),
            )),
            (_, Some(call)) => Some(StructuredToolCalls::Single(RawToolCall::encoded(
                None,
                &call.name,
                &call.arguments,
            ))),
            _ => None,
        };

        Ok(ProviderResponse {
            text: choice.message.content.unwrap_or_default(),
            tool_calls,
            finish_reason: choice
                .finish_reason
                .as_deref()
                .and_then(FinishReason::from_provider),
        })
    }

    async fn stream_text(
        &self,
        request: &ProviderRequest,
    ) -> Result<BoxStream<'static, Result<TextStreamDelta, DasiError>>, DasiError> {
        let body = self.build_request_body(request, true);
        debug!(model = %self.model, tools = request.tools.as_ref().map_or(0, Vec::len), "OpenAI stream_text");

        let byte_stream = self.post(&body).await?.bytes_stream();

        let stream = async_stream::stream! {
            let mut buffer: Vec<u8> = Vec::new();
            let mut calls = ToolCallAccumulator::default();
            let mut finish: Option<FinishReason> = None;
            futures::pin_mut!(byte_stream);

            'read: while let Some(chunk_result) = byte_stream.next().await {
                let chunk = match chunk_result {
                    Ok(c) => c,
                    Err(e) => {
                        yield Err(DasiError::Network(e));
                        return;
                    }
                };

                // Chunks may split a UTF-8 sequence; only complete lines are decoded.
                buffer.extend_from_slice(&chunk);

                while let Some(line_end) = buffer.iter().position(|&b| b == b'\n') {
                    let raw: Vec<u8> = buffer.drain(..=line_end).collect();
                    let line = String::from_utf8_lossy(&raw).trim().to_string();

                    if line.is_empty() || line.starts_with(':') {
                        continue;
                    }
                    if line == "data: [DONE]" || line == "data:[DONE]" {
                        break 'read;
                    }

                    let Some(data) = parse_sse_data(&line) else {
                        continue;
                    };
                    match serde_json::from_str::<OpenAiStreamChunk>(data) {
                        Ok(chunk) => {
                            let Some(choice) = chunk.choices.into_iter().next() else {
                                continue;
                            };
                            if let Some(reason) = choice.finish_reason.as_deref() {
                                finish = FinishReason::from_provider(reason);
                            }
                            for delta in choice.delta.tool_calls.unwrap_or_default() {
                                calls.push_tool_call(delta);
                            }
                            if let Some(delta) = choice.delta.function_call {
                                calls.push_function_call(delta);
                            }
                            if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
                                yield Ok(TextStreamDelta::text(text));
                            }
                        }
                        Err(e) => warn!(error = %e, "skipping unparseable OpenAI stream chunk"),
                    }
                }
            }

            if let Some(structured) = calls.finish() {
                yield Ok(TextStreamDelta::tool_calls(structured));
            }
            yield Ok(TextStreamDelta::done(finish));
        };

        Ok(Box::pin(stream))
    }
}

/// Rebuilds streamed tool-call fragments into complete calls.
#[derive(Default)]
struct ToolCallAccumulator {
    by_index: BTreeMap<u32, PartialCall>,
    legacy: Option<PartialCall>,
}

#[derive(Default)]
struct PartialCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

impl PartialCall {
    fn into_raw(self) -> RawToolCall {
        RawToolCall {
            id: self.id,
            name: Some(self.name).filter(|n| !n.is_empty()),
            arguments: Some(RawArguments::Encoded(self.arguments)),
        }
    }
}

impl ToolCallAccumulator {
    fn push_tool_call(&mut self, delta: OpenAiToolCallDelta) {
        let entry = self.by_index.entry(delta.index.unwrap_or(0)).or_default();
        if let Some(id) = delta.id {
            entry.id = Some(id);
        }
        if let Some(function) = delta.function {
            if let Some(name) = function.name {
                entry.name.push_str(&name);
            }
            if let Some(args) = function.arguments {
                entry.arguments.push_str(&args);
            }
        }
    }

    fn push_function_call(&mut self, delta: OpenAiFunctionDelta) {
        let entry = self.legacy.get_or_insert_with(PartialCall::default);
        if let Some(name) = delta.name {
            entry.name.push_str(&name);
        }
        if let Some(args) = delta.arguments {
            entry.arguments.push_str(&args);
        }
    }

    fn finish(self) -> Option<StructuredToolCalls> {
        if !self.by_index.is_empty() {
            return Some(StructuredToolCalls::Multiple(
                self.by_index.into_values().map(PartialCall::into_raw).collect(),
            ));
        }
        self.legacy
            .map(|call| StructuredToolCalls::Single(call.into_raw()))
    }
}

/// Convert a transcript to Chat Completions messages.
///
/// Tool results whose call was not announced earlier in the same request
/// (entries replayed from history) are sent as plain user context, since the
/// API rejects orphaned `tool` messages.
fn messages_to_openai(messages: &[ModelMessage]) -> Vec<serde_json::Value> {
    let mut announced: HashSet<&str> = HashSet::new();
    let mut out = Vec::with_capacity(messages.len());

    for msg in messages {
        for call in msg.tool_calls() {
            announced.insert(call.id.as_str());
        }
        if let Some(result) = msg.tool_result_part() {
            if announced.contains(result.tool_call_id.as_str()) {
                out.push(serde_json::json!({
                    "role": "tool",
                    "tool_call_id": result.tool_call_id,
                    "content": result.content,
                }));
            } else {
                out.push(serde_json::json!({
                    "role": "user",
                    "content": format!("[{} tool result]\n{}", result.tool_name, result.content),
                }));
            }
            continue;
        }
        out.push(message_to_openai(msg));
    }
    out
}

fn message_to_openai(msg: &ModelMessage) -> serde_json::Value {
    let role = match msg.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    };

    let tool_calls = msg.tool_calls();
    if !tool_calls.is_empty() {
        let tc_json: Vec<serde_json::Value> = tool_calls
            .iter()
            .map(|tc| {
                serde_json::json!({
                    "id": tc.id,
                    "type": "function",
                    "function": {
                        "name": tc.name,
                        "arguments": tc.arguments.to_string(),
                    }
                })
            })
            .collect();
        let text = msg.text();
        return serde_json::json!({
            "role": role,
            "content": if text.is_empty() { serde_json::Value::Null } else { serde_json::Value::String(text) },
            "tool_calls": tc_json,
        });
    }

    if !msg.has_image() {
        return serde_json::json!({ "role": role, "content": msg.text() });
    }

    let parts: Vec<serde_json::Value> = msg
        .content
        .iter()
        .filter_map(|part| match part {
            ContentPart::Text { text } => Some(serde_json::json!({
                "type": "text",
                "text": text,
            })),
            ContentPart::Image(img) => Some(serde_json::json!({
                "type": "image_url",
                "image_url": { "url": img.data_url() }
            })),
            _ => None,
        })
        .collect();

    serde_json::json!({ "role": role, "content": parts })
}

// OpenAI API response types (internal)

#[derive(Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiMessage {
    content: Option<String>,
    tool_calls: Option<Vec<OpenAiToolCall>>,
    function_call: Option<OpenAiFunction>,
}

#[derive(Deserialize)]
struct OpenAiToolCall {
    id: Option<String>,
    function: OpenAiFunction,
}

#[derive(Deserialize)]
struct OpenAiFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Deserialize)]
struct OpenAiStreamChunk {
    choices: Vec<OpenAiStreamChoice>,
}

#[derive(Deserialize)]
struct OpenAiStreamChoice {
    delta: OpenAiStreamDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiStreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<OpenAiToolCallDelta>>,
    function_call: Option<OpenAiFunctionDelta>,
}

#[derive(Deserialize)]
struct OpenAiToolCallDelta {
    index: Option<u32>,
    id: Option<String>,
    function: Option<OpenAiFunctionDelta>,
}

#[derive(Deserialize)]
struct OpenAiFunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}
