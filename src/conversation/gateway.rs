//! Human approval handshake for tool calls.
//!
//! The turn loop publishes a request and suspends on a single-slot oneshot
//! channel keyed by `call_id`. An approval actor on any thread resolves it
//! with [`ToolCallGateway::report`]. The first writer wins: taking the
//! sender and sending happen under one lock, so a report that loses the race
//! with the timeout (or a duplicate report) finds nothing and is ignored.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, oneshot};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};

use crate::error::{DasiError, Result};
use crate::types::ToolCall;

const BROADCAST_CAPACITY: usize = 16;

/// A pending call as shown to the approval actor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApprovalRequest {
    /// Key for [`ToolCallGateway::report`].
    pub call_id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

impl From<&ToolCall> for ApprovalRequest {
    fn from(call: &ToolCall) -> Self {
        Self {
            call_id: call.id.clone(),
            name: call.name.clone(),
            arguments: call.arguments.clone(),
        }
    }
}

/// The approval actor's verdict on one call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approve,
    Reject,
}

/// What the approval actor reported.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApprovalReply {
    pub decision: ApprovalDecision,
    /// Result produced by the actor itself; when present on an approval the
    /// executor is skipped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Approved,
    Rejected,
    Timeout,
    Error,
}

/// Resolved disposition of one tool call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolOutcome {
    pub call_id: String,
    pub tool_name: String,
    /// How the call ended; decides which notice the model sees.
    pub status: OutcomeStatus,
    /// Tool output on approval, the error text on failure, empty otherwise.
    pub payload: String,
}

impl ToolOutcome {
    pub fn approved(call: &ToolCall, payload: impl Into<String>) -> Self {
        Self::with_status(call, OutcomeStatus::Approved, payload.into())
    }

    pub fn rejected(call: &ToolCall) -> Self {
        Self::with_status(call, OutcomeStatus::Rejected, String::new())
    }

    pub fn timeout(call: &ToolCall) -> Self {
        Self::with_status(call, OutcomeStatus::Timeout, String::new())
    }

    pub fn error(call: &ToolCall, message: impl Into<String>) -> Self {
        Self::with_status(call, OutcomeStatus::Error, message.into())
    }

    fn with_status(call: &ToolCall, status: OutcomeStatus, payload: String) -> Self {
        Self {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            status,
            payload,
        }
    }
}

/// Callback invoked when a request is published.
pub type ApprovalNotifier = Arc<dyn Fn(ApprovalRequest) + Send + Sync>;

struct PendingSlot {
    request: ApprovalRequest,
    sender: oneshot::Sender<ApprovalReply>,
}

#[derive(Default)]
struct Slots {
    /// Writer side; removed by the first report or by the timeout.
    pending: HashMap<String, PendingSlot>,
    /// Reader side; taken by `await_outcome`.
    waiters: HashMap<String, oneshot::Receiver<ApprovalReply>>,
}

struct GatewayInner {
    slots: Mutex<Slots>,
    notifier: Option<ApprovalNotifier>,
    requests: broadcast::Sender<ApprovalRequest>,
}

/// Cloneable handle; every clone shares the same pending slots.
#[derive(Clone)]
pub struct ToolCallGateway {
    inner: Arc<GatewayInner>,
}

impl Default for ToolCallGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolCallGateway {
    /// A gateway announced only through [`subscribe`](Self::subscribe).
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Also call `notifier` synchronously for each new request.
    pub fn with_notifier(notifier: ApprovalNotifier) -> Self {
        Self::build(Some(notifier))
    }

    fn build(notifier: Option<ApprovalNotifier>) -> Self {
        let (requests, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            inner: Arc::new(GatewayInner {
                slots: Mutex::new(Slots::default()),
                notifier,
                requests,
            }),
        }
    }

    fn slots(&self) -> MutexGuard<'_, Slots> {
        self.inner
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Requests published after this call. Lagging subscribers skip ahead.
    pub fn subscribe(&self) -> BroadcastStream<ApprovalRequest> {
        BroadcastStream::new(self.inner.requests.subscribe())
    }

    /// Arm a slot for `call` and notify observers.
    ///
    /// The slot exists before anyone is told about it, so an actor that
    /// answers from inside the notifier is never lost.
    pub fn request(&self, call: &ToolCall) -> Result<ApprovalRequest> {
        let request = ApprovalRequest::from(call);
        {
            let mut slots = self.slots();
            if slots.pending.contains_key(&call.id) || slots.waiters.contains_key(&call.id) {
                return Err(DasiError::InvalidState(format!(
                    "tool call {} already awaits approval",
                    call.id
                )));
            }
            let (sender, receiver) = oneshot::channel();
            slots.pending.insert(
                call.id.clone(),
                PendingSlot {
                    request: request.clone(),
                    sender,
                },
            );
            slots.waiters.insert(call.id.clone(), receiver);
        }

        info!(call_id = %request.call_id, tool = %request.name, "tool call awaiting approval");
        if let Some(notifier) = &self.inner.notifier {
            notifier(request.clone());
        }
        // No subscribers is fine.
        let _ = self.inner.requests.send(request.clone());
        Ok(request)
    }

    /// Suspend until the call is reported or `timeout` elapses. `None` means
    /// the timeout fired; the slot is gone afterwards either way.
    pub async fn await_outcome(
        &self,
        call_id: &str,
        timeout: Duration,
    ) -> Result<Option<ApprovalReply>> {
        let mut receiver = self.slots().waiters.remove(call_id).ok_or_else(|| {
            DasiError::InvalidState(format!(
                "no approval request for tool call {call_id}, or it is already awaited"
            ))
        })?;

        match tokio::time::timeout(timeout, &mut receiver).await {
            Ok(Ok(reply)) => {
                debug!(call_id, decision = ?reply.decision, "approval reported");
                Ok(Some(reply))
            }
            // Sender dropped without a reply: treat like no answer.
            Ok(Err(_)) => Ok(None),
            Err(_) => {
                let removed = self.slots().pending.remove(call_id).is_some();
                if removed {
                    info!(call_id, secs = timeout.as_secs(), "approval timed out");
                    return Ok(None);
                }
                // A report took the sender between the timer firing and the
                // lock; its reply is already in the channel.
                Ok(receiver.try_recv().ok())
            }
        }
    }

    /// Resolve a pending call. Returns `false` (and does nothing) when the
    /// call is unknown or already resolved.
    pub fn report(
        &self,
        call_id: &str,
        decision: ApprovalDecision,
        result: Option<serde_json::Value>,
    ) -> bool {
        let mut slots = self.slots();
        let Some(slot) = slots.pending.remove(call_id) else {
            debug!(call_id, "ignoring report for a call that is not pending");
            return false;
        };
        let delivered = slot.sender.send(ApprovalReply { decision, result }).is_ok();
        drop(slots);
        if !delivered {
            warn!(call_id, "approval reported after the waiter went away");
        }
        delivered
    }

    /// Approve and let the executor run the tool. Returns `false` when the
    /// call is unknown or already decided.
    pub fn approve(&self, call_id: &str) -> bool {
        self.report(call_id, ApprovalDecision::Approve, None)
    }

    /// Reject the call; the tool never runs. Same return as [`approve`](Self::approve).
    pub fn reject(&self, call_id: &str) -> bool {
        self.report(call_id, ApprovalDecision::Reject, None)
    }

    /// Requests still waiting for a decision.
    pub fn pending(&self) -> Vec<ApprovalRequest> {
        self.slots()
            .pending
            .values()
            .map(|slot| slot.request.clone())
            .collect()
    }

    pub fn is_pending(&self, call_id: &str) -> bool {
        self.slots().pending.contains_key(call_id)
    }

    /// Drop both sides of a request without resolving it.
    pub(crate) fn cancel(&self, call_id: &str) {
        let mut slots = self.slots();
        slots.pending.remove(call_id);
        slots.waiters.remove(call_id);
    }
}

impl std::fmt::Debug for ToolCallGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolCallGateway")
            .field("pending", &self.slots().pending.len())
            .field("notifier", &self.inner.notifier.is_some())
            .finish()
    }
}
