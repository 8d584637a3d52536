//! Streaming types.

use serde::{Deserialize, Serialize};

use super::generation::FinishReason;
use super::tool_call::StructuredToolCalls;

/// A delta emitted during streaming.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TextStreamDelta {
    /// The incremental text chunk.
    pub text: String,
    pub event_type: StreamEventType,
    /// Terminal structured tool-call payload, if the model produced one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<StructuredToolCalls>,
    /// Finish reason (only on the final delta).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
}

impl TextStreamDelta {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            event_type: StreamEventType::TextDelta,
            tool_calls: None,
            finish_reason: None,
        }
    }

    pub fn tool_calls(calls: StructuredToolCalls) -> Self {
        Self {
            text: String::new(),
            event_type: StreamEventType::ToolCall,
            tool_calls: Some(calls),
            finish_reason: Some(FinishReason::ToolCalls),
        }
    }

    pub fn done(finish_reason: Option<FinishReason>) -> Self {
        Self {
            text: String::new(),
            event_type: StreamEventType::Done,
            tool_calls: None,
            finish_reason,
        }
    }
}

/// Type of stream event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StreamEventType {
    /// Incremental text content.
    TextDelta,
    /// Completed structured tool call(s).
    ToolCall,
    /// Stream finished.
    Done,
}
