//! Observable turn events.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;
use uuid::Uuid;

use super::gateway::{ApprovalRequest, ToolOutcome};
use super::turn_loop::TurnResponse;

/// Turn loop states.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TurnPhase {
    Init,
    Prepare,
    Generate,
    DetectNone,
    DetectCall,
    AwaitApproval,
    Execute,
    Rejected,
    Timeout,
    Merge,
    Done,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEventPayload {
    PhaseChanged { phase: TurnPhase },
    TextDelta { text: String },
    ToolCallRequested { request: ApprovalRequest },
    ToolCallResolved { outcome: ToolOutcome },
    /// A side channel failed and was folded into the prompt as a note.
    SideChannelNote { note: String },
    Completed { response: TurnResponse },
    Failed { error: String },
}

/// Envelope for turn events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnEvent {
    pub turn_id: Uuid,
    /// Monotonic within a turn, starting at one.
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub payload: TurnEventPayload,
}

/// Callback used for streaming turn events.
pub type TurnEventSink = Arc<dyn Fn(TurnEvent) + Send + Sync>;

pub(crate) struct TurnEventEmitter {
    turn_id: Uuid,
    seq: AtomicU64,
    sink: Option<TurnEventSink>,
}

impl TurnEventEmitter {
    pub(crate) fn new(turn_id: Uuid, sink: Option<TurnEventSink>) -> Self {
        Self {
            turn_id,
            seq: AtomicU64::new(1),
            sink,
        }
    }

    pub(crate) fn emit(&self, payload: TurnEventPayload) {
        let Some(sink) = &self.sink else {
            return;
        };
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        sink(TurnEvent {
            turn_id: self.turn_id,
            seq,
            timestamp: Utc::now(),
            payload,
        });
    }

    pub(crate) fn phase(&self, phase: TurnPhase) {
        tracing::debug!(turn_id = %self.turn_id, %phase, "turn phase");
        self.emit(TurnEventPayload::PhaseChanged { phase });
    }
}
