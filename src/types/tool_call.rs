//! Tool calls as emitted by a model, before normalization.
//!
//! Providers disagree on how a call is encoded: OpenAI's legacy
//! `function_call` carries a single call with JSON-encoded arguments,
//! Anthropic-style `tool_use` carries a single call with an argument object,
//! and `tool_calls` carries an array. These types hold any of them verbatim
//! so the detector can decide what is well formed.

use serde::{Deserialize, Serialize};

/// Arguments exactly as the model sent them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum RawArguments {
    /// JSON text that still needs parsing.
    Encoded(String),
    /// Already-structured arguments.
    Value(serde_json::Value),
}

/// One structured tool call with every field optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RawToolCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<RawArguments>,
}

impl RawToolCall {
    pub fn encoded(id: Option<&str>, name: &str, arguments: &str) -> Self {
        Self {
            id: id.map(str::to_string),
            name: Some(name.to_string()),
            arguments: Some(RawArguments::Encoded(arguments.to_string())),
        }
    }

    pub fn structured(id: Option<&str>, name: &str, arguments: serde_json::Value) -> Self {
        Self {
            id: id.map(str::to_string),
            name: Some(name.to_string()),
            arguments: Some(RawArguments::Value(arguments)),
        }
    }
}

/// The structured (non-inline) encodings a model turn may carry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "shape", content = "calls", rename_all = "snake_case")]
pub enum StructuredToolCalls {
    /// A single call field (`function_call` / `tool_use`).
    Single(RawToolCall),
    /// A `tool_calls` array.
    Multiple(Vec<RawToolCall>),
}

impl StructuredToolCalls {
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Multiple(calls) if calls.is_empty())
    }
}
