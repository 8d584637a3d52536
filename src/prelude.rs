//! Convenience re-exports for common use.

pub use crate::config::DasiConfig;
pub use crate::conversation::{
    suggest_filename, ApprovalDecision, ApprovalReply, ApprovalRequest, Mode, OutcomeStatus,
    ToolCallGateway, ToolOutcome, TurnError, TurnEvent, TurnEventPayload, TurnInput, TurnLoop,
    TurnResponse,
};
pub use crate::error::{DasiError, Result};
pub use crate::history::{FileHistoryStore, HistoryEntry, HistoryStore, InMemoryHistoryStore};
pub use crate::provider::ModelProvider;
pub use crate::tools::{
    Tool, ToolArguments, ToolExecutionContext, ToolExecutor, ToolParameters, ToolRegistry,
};
pub use crate::types::{GenerationSettings, ImageContent, ModelMessage, Role, ToolCall};
