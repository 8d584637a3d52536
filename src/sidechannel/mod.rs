//! Side-channel resolvers: auxiliary context (web results, image
//! descriptions) whose failure degrades the prompt instead of aborting a turn.

pub mod vision;
pub mod web;

use serde::{Deserialize, Serialize};

pub use vision::{ModelVisionDescriber, VisionDescriber, VisionResolver};
pub use web::{QueryContext, ScrapedPage, SearchHit, SearchMode, SearchProvider, WebSearchResolver};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResolverStatus {
    Success,
    Error,
}

/// Result of a side-channel lookup. Resolvers report failures here rather
/// than returning `Err`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResolverOutcome {
    pub status: ResolverStatus,
    /// Formatted payload on success, error description on failure.
    pub data: String,
    /// Extra system instruction to place in the prompt, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_note: Option<String>,
}

impl ResolverOutcome {
    pub fn success(data: impl Into<String>, system_note: Option<String>) -> Self {
        Self {
            status: ResolverStatus::Success,
            data: data.into(),
            system_note,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ResolverStatus::Error,
            data: message.into(),
            system_note: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResolverStatus::Success
    }
}
