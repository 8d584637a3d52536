//! Tool-gated conversation orchestration.
//!
//! A [`TurnLoop`] turns one user query into one answer. Along the way the
//! model may ask for tools; each request is parked in the
//! [`ToolCallGateway`] until an approval actor answers it or the approval
//! timeout fires, then the result (or a rejection or timeout notice) is merged
//! back into the prompt and the model is asked again.

pub mod assembler;
pub mod compose;
pub mod detector;
pub mod events;
pub mod filename;
pub mod gateway;
pub mod state;
pub mod turn_loop;

pub use assembler::PromptAssembler;
pub use compose::extract_block;
pub use detector::{Detection, ToolCallDetector};
pub use events::{TurnEvent, TurnEventPayload, TurnEventSink, TurnPhase};
pub use filename::{extension_for, suggest_filename};
pub use gateway::{
    ApprovalDecision, ApprovalNotifier, ApprovalReply, ApprovalRequest, OutcomeStatus,
    ToolCallGateway, ToolOutcome,
};
pub use state::{ConversationState, Mode, SideChannels, TurnInput};
pub use turn_loop::{TurnError, TurnLoop, TurnResponse};
