//! Per-turn conversation state.

use std::collections::HashSet;

use bon::Builder;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::error::{DasiError, Result};
use crate::sidechannel::{QueryContext, ResolverOutcome};
use crate::types::{ImageContent, ModelMessage, ToolCall};

use super::gateway::ToolOutcome;

/// Session used when the caller names none.
pub const DEFAULT_SESSION_ID: &str = "default";

/// Response style for a turn.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Mode {
    #[default]
    Chat,
    /// Direct, paste-ready content; the final answer is unwrapped from a
    /// single fenced block if it is one.
    Compose,
}

/// What the caller hands to [`TurnLoop::run`](super::TurnLoop::run).
#[derive(Debug, Clone, Builder)]
pub struct TurnInput {
    #[builder(into)]
    pub query: String,
    #[builder(into, default = DEFAULT_SESSION_ID.to_string())]
    pub session_id: String,
    #[builder(default)]
    pub mode: Mode,
    #[builder(into)]
    pub selected_text: Option<String>,
    /// Screenshot to describe through the vision side channel.
    pub image: Option<ImageContent>,
    /// Explicit web-search toggle; `#web` and URLs in the query also trigger it.
    #[builder(default)]
    pub web_search: bool,
}

/// Side-channel results, resolved once per turn.
#[derive(Debug, Clone, Default)]
pub struct SideChannels {
    /// Web-search intent parsed from the query.
    pub web_context: Option<QueryContext>,
    /// `None` when no search was wanted.
    pub web: Option<ResolverOutcome>,
    pub vision: Option<ResolverOutcome>,
}

/// Mutable state of one turn. Owned by the turn loop and dropped once the
/// final answer is persisted.
#[derive(Debug)]
pub struct ConversationState {
    /// Fresh per turn; tags every event and log line.
    pub turn_id: Uuid,
    /// History partition read and extended by this turn.
    pub session_id: String,
    pub mode: Mode,
    /// The user's query exactly as received.
    pub query: String,
    /// Blank selections are dropped.
    pub selected_text: Option<String>,
    pub image: Option<ImageContent>,
    pub web_search: bool,
    /// Filled on the first PREPARE and reused by every later iteration.
    pub side_channels: Option<SideChannels>,
    /// Entries produced during this turn, in order: assistant tool-call
    /// messages and tool results.
    pub turn_messages: Vec<ModelMessage>,
    /// History ids appended during this turn, excluded when history is re-read.
    pub persisted_ids: Vec<Uuid>,
    /// Set once the user entry is in history; it is written at most once.
    pub human_persisted: bool,
    /// Text of every generation so far, joined by blank lines.
    pub accumulated_text: String,
    /// Tool calls dispatched so far, counted against the turn's budget.
    pub tool_turns: usize,
    /// Once the budget is spent no tools are offered again this turn.
    pub tools_withheld: bool,
    /// Outcomes merged so far, oldest first.
    pub outcomes: Vec<ToolOutcome>,
    pending_tool_call: Option<ToolCall>,
    tool_outcome: Option<ToolOutcome>,
    call_ids: HashSet<String>,
}

impl ConversationState {
    /// Start a turn. A blank session id selects [`DEFAULT_SESSION_ID`].
    pub fn new(input: TurnInput) -> Self {
        let session_id = match input.session_id.trim() {
            "" => DEFAULT_SESSION_ID.to_string(),
            id => id.to_string(),
        };
        Self {
            turn_id: Uuid::new_v4(),
            session_id,
            mode: input.mode,
            query: input.query,
            selected_text: input.selected_text.filter(|t| !t.trim().is_empty()),
            image: input.image,
            web_search: input.web_search,
            side_channels: None,
            turn_messages: Vec::new(),
            persisted_ids: Vec::new(),
            human_persisted: false,
            accumulated_text: String::new(),
            tool_turns: 0,
            tools_withheld: false,
            outcomes: Vec::new(),
            pending_tool_call: None,
            tool_outcome: None,
            call_ids: HashSet::new(),
        }
    }

    /// Append one generation's text; blank iterations are skipped.
    pub fn append_text(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        if !self.accumulated_text.is_empty() {
            self.accumulated_text.push_str("\n\n");
        }
        self.accumulated_text.push_str(text);
    }

    /// Install the detected call. Fails if one is already pending. A call id
    /// already seen in this turn is replaced with a fresh one.
    pub fn set_pending(&mut self, mut call: ToolCall) -> Result<&ToolCall> {
        if let Some(existing) = &self.pending_tool_call {
            return Err(DasiError::InvalidState(format!(
                "tool call {} is still pending",
                existing.id
            )));
        }
        if !self.call_ids.insert(call.id.clone()) {
            call.id = synthesize_call_id();
            self.call_ids.insert(call.id.clone());
        }
        Ok(&*self.pending_tool_call.insert(call))
    }

    pub fn pending_tool_call(&self) -> Option<&ToolCall> {
        self.pending_tool_call.as_ref()
    }

    /// Clear the pending call for dispatch. It is never put back.
    pub fn take_pending(&mut self) -> Option<ToolCall> {
        self.pending_tool_call.take()
    }

    /// Hold the resolved outcome until MERGE picks it up.
    pub fn set_outcome(&mut self, outcome: ToolOutcome) {
        self.tool_outcome = Some(outcome);
    }

    /// The outcome is consumed exactly once, by the merge step.
    pub fn take_outcome(&mut self) -> Option<ToolOutcome> {
        self.tool_outcome.take()
    }
}

/// `call_` followed by 24 hex characters.
pub fn synthesize_call_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("call_{}", &hex[..24])
}
