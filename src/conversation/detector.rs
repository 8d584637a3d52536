//! Tool-call detection.
//!
//! A completed model turn can request a tool in three ways:
//!
//! 1. an inline marker in the text: `<<TOOL: name {"arg": "value"}>>`
//! 2. a single structured call field (`function_call` / `tool_use`)
//! 3. a structured `tool_calls` array
//!
//! All of them are normalized into one [`ToolCall`]. Structured calls win
//! over inline markers. Anything malformed means "no call" and the text is
//! returned untouched, so the raw answer can still be shown to the user.

use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::types::{RawArguments, RawToolCall, StructuredToolCalls, ToolCall};

use super::state::synthesize_call_id;

/// Result of running detection over one model turn.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub call: Option<ToolCall>,
    /// The turn's text, minus the inline marker when one was used.
    pub text: String,
}

impl Detection {
    fn none(text: &str) -> Self {
        Self {
            call: None,
            text: text.to_string(),
        }
    }
}

/// How a candidate call was encoded.
#[derive(Debug)]
enum CallEncoding<'a> {
    Inline {
        name: &'a str,
        arguments: &'a str,
        span: std::ops::Range<usize>,
    },
    Single(&'a RawToolCall),
    Multiple(&'a [RawToolCall]),
}

fn marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)<<TOOL:\s*(\w+)\s*(\{.*?\})\s*>>").expect("tool marker regex must compile")
    })
}

fn any_marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<<TOOL:.*?>>").expect("tool marker regex must compile"))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ToolCallDetector;

impl ToolCallDetector {
    pub fn new() -> Self {
        Self
    }

    /// Never fails; a malformed request is reported as no call.
    pub fn detect(&self, text: &str, structured: Option<&StructuredToolCalls>) -> Detection {
        let Some(encoding) = classify(text, structured) else {
            return Detection::none(text);
        };

        match encoding {
            CallEncoding::Inline {
                name,
                arguments,
                span,
            } => {
                let Some(arguments) = parse_encoded(arguments) else {
                    warn!(tool = name, "inline tool marker has unparsable arguments");
                    return Detection::none(text);
                };
                let mut stripped = String::with_capacity(text.len());
                stripped.push_str(&text[..span.start]);
                stripped.push_str(&text[span.end..]);
                let call = ToolCall {
                    id: synthesize_call_id(),
                    name: name.to_string(),
                    arguments,
                };
                debug!(tool = %call.name, call_id = %call.id, "inline tool call detected");
                Detection {
                    call: Some(call),
                    text: stripped.trim().to_string(),
                }
            }
            CallEncoding::Single(raw) => structured_detection(text, raw),
            CallEncoding::Multiple(calls) => {
                if calls.len() > 1 {
                    warn!(
                        count = calls.len(),
                        "model requested several tools at once; only the first is used"
                    );
                }
                match calls.first() {
                    Some(raw) => structured_detection(text, raw),
                    None => Detection::none(text),
                }
            }
        }
    }
}

fn classify<'a>(
    text: &'a str,
    structured: Option<&'a StructuredToolCalls>,
) -> Option<CallEncoding<'a>> {
    match structured {
        Some(StructuredToolCalls::Single(raw)) => return Some(CallEncoding::Single(raw)),
        Some(StructuredToolCalls::Multiple(calls)) if !calls.is_empty() => {
            return Some(CallEncoding::Multiple(calls))
        }
        _ => {}
    }

    if !text.contains("<<TOOL:") {
        return None;
    }
    let Some(caps) = marker_re().captures(text) else {
        warn!("tool marker found but it does not name a tool with an argument object");
        return None;
    };
    let (whole, name, arguments) = (caps.get(0)?, caps.get(1)?, caps.get(2)?);
    Some(CallEncoding::Inline {
        name: name.as_str(),
        arguments: arguments.as_str(),
        span: whole.range(),
    })
}

fn structured_detection(text: &str, raw: &RawToolCall) -> Detection {
    let Some(call) = normalize(raw) else {
        return Detection::none(text);
    };
    debug!(tool = %call.name, call_id = %call.id, "structured tool call detected");
    // A marker left in the text alongside a native call is dropped too.
    let cleaned = any_marker_re().replace_all(text, "");
    Detection {
        call: Some(call),
        text: cleaned.trim().to_string(),
    }
}

fn normalize(raw: &RawToolCall) -> Option<ToolCall> {
    let Some(name) = raw.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) else {
        warn!("structured tool call has no name");
        return None;
    };

    let arguments = match &raw.arguments {
        None => serde_json::json!({}),
        Some(RawArguments::Encoded(encoded)) => match parse_encoded(encoded) {
            Some(value) => value,
            None => {
                warn!(tool = name, "structured tool call has unparsable arguments");
                return None;
            }
        },
        Some(RawArguments::Value(serde_json::Value::Null)) => serde_json::json!({}),
        Some(RawArguments::Value(value)) if value.is_object() => value.clone(),
        Some(RawArguments::Value(_)) => {
            warn!(tool = name, "structured tool call arguments are not an object");
            return None;
        }
    };

    let id = raw
        .id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .unwrap_or_else(synthesize_call_id);

    Some(ToolCall {
        id,
        name: name.to_string(),
        arguments,
    })
}

/// Blank text means no arguments; otherwise it must be a JSON object.
fn parse_encoded(encoded: &str) -> Option<serde_json::Value> {
    if encoded.trim().is_empty() {
        return Some(serde_json::json!({}));
    }
    serde_json::from_str::<serde_json::Value>(encoded)
        .ok()
        .filter(serde_json::Value::is_object)
}
