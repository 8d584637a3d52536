//! The turn loop: prepare, generate, detect, await approval, execute, merge,
//! and repeat until the model answers without requesting a tool.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{DasiConfig, DEFAULT_APPROVAL_TIMEOUT_SECS, DEFAULT_MAX_TOOL_TURNS};
use crate::error::{DasiError, ErrorCategory};
use crate::history::HistoryStore;
use crate::prompts::{self, BUDGET_EXHAUSTED_NOTICE, REJECTION_NOTICE, TIMEOUT_NOTICE};
use crate::provider::{ModelProvider, ProviderRequest, ToolDefinition};
use crate::sidechannel::{VisionResolver, WebSearchResolver};
use crate::tools::{ExecutionReport, ToolExecutor};
use crate::types::{
    GenerationSettings, ModelMessage, Role, StreamEventType, StructuredToolCalls, ToolCall,
};

use super::assembler::PromptAssembler;
use super::compose::extract_block;
use super::detector::ToolCallDetector;
use super::events::{TurnEventEmitter, TurnEventPayload, TurnEventSink, TurnPhase};
use super::filename::suggest_filename;
use super::gateway::{ApprovalDecision, ApprovalReply, OutcomeStatus, ToolCallGateway, ToolOutcome};
use super::state::{ConversationState, Mode, TurnInput};

/// Final result of a turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TurnResponse {
    pub turn_id: Uuid,
    pub session_id: String,
    /// Final answer, unwrapped from its fence in compose mode.
    pub text: String,
    /// Language tag of the unwrapped block in compose mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub tool_outcomes: Vec<ToolOutcome>,
    /// Number of model calls made.
    pub iterations: usize,
}

/// A model gateway failure. Text produced before the failure is kept.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct TurnError {
    #[source]
    pub error: DasiError,
    pub partial_text: String,
}

impl TurnError {
    /// The single labeled string to show an end user.
    pub fn user_message(&self) -> String {
        let detail = match (&self.error, self.error.category()) {
            (DasiError::Api { status: 404, .. }, _) => {
                "The selected model is not available. Please check the model ID in settings.".to_string()
            }
            (_, ErrorCategory::Authentication) => {
                "Invalid API key. Please check your API key in settings.".to_string()
            }
            (_, ErrorCategory::RateLimit) => {
                "Rate limit exceeded. Please try again in a moment.".to_string()
            }
            (_, ErrorCategory::Server) => {
                "Service is currently unavailable. Please try again later.".to_string()
            }
            (DasiError::Network(_), _) => {
                "Could not connect to the API server. Please check your internet connection and the base URL in settings.".to_string()
            }
            (error, _) => error.to_string(),
        };
        format!("⚠️ Error: {detail}")
    }
}

/// One model call's collected output.
struct Generation {
    text: String,
    tool_calls: Option<StructuredToolCalls>,
}

/// Drives a turn from query to final answer. Collaborators are passed in;
/// the loop holds no global state, so one instance can serve many sessions.
pub struct TurnLoop {
    provider: Arc<dyn ModelProvider>,
    history: Arc<dyn HistoryStore>,
    gateway: ToolCallGateway,
    executor: ToolExecutor,
    detector: ToolCallDetector,
    assembler: PromptAssembler,
    settings: GenerationSettings,
    approval_timeout: Duration,
    max_tool_turns: usize,
}

impl TurnLoop {
    /// Defaults: 120 s approval timeout, five tool calls per turn, provider
    /// default generation settings.
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        history: Arc<dyn HistoryStore>,
        gateway: ToolCallGateway,
        executor: ToolExecutor,
    ) -> Self {
        Self {
            provider,
            history,
            gateway,
            executor,
            detector: ToolCallDetector::new(),
            assembler: PromptAssembler::new(),
            settings: GenerationSettings::default(),
            approval_timeout: Duration::from_secs(DEFAULT_APPROVAL_TIMEOUT_SECS),
            max_tool_turns: DEFAULT_MAX_TOOL_TURNS,
        }
    }

    /// Apply timeouts, limits, temperature and custom instructions from config.
    pub fn with_config(mut self, config: &DasiConfig) -> Self {
        self.approval_timeout = config.approval_timeout();
        self.max_tool_turns = config.max_tool_turns;
        self.settings.temperature = Some(config.temperature);
        self.assembler = self
            .assembler
            .with_history_limit(config.history_limit)
            .with_custom_instructions(config.custom_instructions.clone());
        self
    }

    /// Resolver used when the query asks for the web.
    pub fn with_web_search(mut self, web: WebSearchResolver) -> Self {
        self.assembler = self.assembler.with_web_search(web);
        self
    }

    /// Describe attached images with a separate vision model instead of
    /// sending them to the chat model.
    pub fn with_vision(mut self, vision: VisionResolver) -> Self {
        self.assembler = self.assembler.with_vision(vision);
        self
    }

    pub fn with_settings(mut self, settings: GenerationSettings) -> Self {
        self.settings = settings;
        self
    }

    /// How long a tool request waits for a decision before it times out.
    pub fn with_approval_timeout(mut self, timeout: Duration) -> Self {
        self.approval_timeout = timeout;
        self
    }

    /// Tool calls allowed per turn. Further requests are answered with a
    /// budget notice and tools are withdrawn.
    pub fn with_max_tool_turns(mut self, turns: usize) -> Self {
        self.max_tool_turns = turns;
        self
    }

    /// Gateway approval actors report to.
    pub fn gateway(&self) -> &ToolCallGateway {
        &self.gateway
    }

    pub fn assembler(&self) -> &PromptAssembler {
        &self.assembler
    }

    /// Suggest a filename for `content` from this session. The most recent
    /// user entry in history is the query context; `language` is usually
    /// [`TurnResponse::language`].
    pub async fn suggest_filename(
        &self,
        content: &str,
        session_id: &str,
        language: Option<&str>,
    ) -> String {
        let recent_query = match self.history.read(session_id, None).await {
            Ok(entries) => entries
                .iter()
                .rev()
                .find(|entry| entry.message.role == Role::User)
                .map(|entry| entry.message.text())
                .unwrap_or_default(),
            Err(e) => {
                warn!(session_id, error = %e, "history unavailable for filename suggestion");
                String::new()
            }
        };
        suggest_filename(self.provider.as_ref(), content, &recent_query, language).await
    }

    /// Run one turn. Only model gateway failures are returned as errors;
    /// everything else becomes conversation content.
    pub async fn run(
        &self,
        input: TurnInput,
        sink: Option<TurnEventSink>,
    ) -> Result<TurnResponse, TurnError> {
        let mut state = ConversationState::new(input);
        let emitter = TurnEventEmitter::new(state.turn_id, sink);
        emitter.phase(TurnPhase::Init);
        info!(
            turn_id = %state.turn_id,
            session_id = %state.session_id,
            mode = %state.mode,
            model = self.provider.model_id(),
            "turn started"
        );

        let definitions = self.executor.registry().definitions();
        let mut iterations = 0usize;

        loop {
            emitter.phase(TurnPhase::Prepare);
            let offered: &[ToolDefinition] = if state.tools_withheld {
                &[]
            } else {
                &definitions
            };
            let messages = self
                .assembler
                .prepare(&mut state, self.history.as_ref(), offered, &emitter)
                .await;

            emitter.phase(TurnPhase::Generate);
            iterations += 1;
            let request = ProviderRequest {
                messages,
                settings: self.settings.clone(),
                tools: (!offered.is_empty()).then(|| offered.to_vec()),
            };
            let generation = match self.generate(&request, &emitter).await {
                Ok(generation) => generation,
                Err((error, partial)) => {
                    state.append_text(&partial);
                    return Err(self.fail(state, error, &emitter));
                }
            };

            let detection = self
                .detector
                .detect(&generation.text, generation.tool_calls.as_ref());
            state.append_text(&detection.text);

            let call = match detection.call {
                Some(_) if state.tools_withheld => {
                    warn!(turn_id = %state.turn_id, "tool requested after the budget was spent; treating text as final");
                    None
                }
                call => call,
            };
            let Some(call) = call else {
                emitter.phase(TurnPhase::DetectNone);
                return Ok(self.finish(state, iterations, &emitter).await);
            };

            emitter.phase(TurnPhase::DetectCall);
            let call = match state.set_pending(call).map(Clone::clone) {
                Ok(call) => call,
                Err(error) => return Err(self.fail(state, error, &emitter)),
            };
            state
                .turn_messages
                .push(ModelMessage::assistant_with_call(detection.text, call.clone()));

            if state.tool_turns >= self.max_tool_turns {
                state.take_pending();
                warn!(
                    turn_id = %state.turn_id,
                    tool = %call.name,
                    limit = self.max_tool_turns,
                    "tool budget exhausted; asking for a final answer"
                );
                let outcome = ToolOutcome::error(&call, BUDGET_EXHAUSTED_NOTICE);
                emitter.emit(TurnEventPayload::ToolCallResolved {
                    outcome: outcome.clone(),
                });
                emitter.phase(TurnPhase::Merge);
                self.merge_with(&mut state, outcome, BUDGET_EXHAUSTED_NOTICE.to_string())
                    .await;
                state.tools_withheld = true;
                continue;
            }

            state.tool_turns += 1;
            // Cleared before dispatch; a call is never retried.
            state.take_pending();
            let outcome = self.resolve_call(&call, &state.session_id, &emitter).await;
            emitter.emit(TurnEventPayload::ToolCallResolved {
                outcome: outcome.clone(),
            });
            state.set_outcome(outcome);

            emitter.phase(TurnPhase::Merge);
            self.merge(&mut state).await;
        }
    }

    /// GENERATE: stream one completion, forwarding text deltas. On failure
    /// the text received so far comes back with the error.
    async fn generate(
        &self,
        request: &ProviderRequest,
        emitter: &TurnEventEmitter,
    ) -> Result<Generation, (DasiError, String)> {
        let mut stream = self
            .provider
            .stream_text(request)
            .await
            .map_err(|e| (e, String::new()))?;

        let mut text = String::new();
        let mut tool_calls = None;
        while let Some(delta) = stream.next().await {
            let delta = match delta {
                Ok(delta) => delta,
                Err(e) => return Err((e, text)),
            };
            if !delta.text.is_empty() {
                text.push_str(&delta.text);
                emitter.emit(TurnEventPayload::TextDelta { text: delta.text });
            }
            if delta.tool_calls.is_some() {
                tool_calls = delta.tool_calls;
            }
            if delta.event_type == StreamEventType::Done {
                break;
            }
        }

        debug!(
            chars = text.len(),
            structured_call = tool_calls.is_some(),
            "generation finished"
        );
        Ok(Generation { text, tool_calls })
    }

    /// AWAIT_APPROVAL then EXECUTE / REJECTED / TIMEOUT.
    async fn resolve_call(
        &self,
        call: &ToolCall,
        session_id: &str,
        emitter: &TurnEventEmitter,
    ) -> ToolOutcome {
        emitter.phase(TurnPhase::AwaitApproval);
        let request = match self.gateway.request(call) {
            Ok(request) => request,
            Err(e) => return ToolOutcome::error(call, e.to_string()),
        };
        emitter.emit(TurnEventPayload::ToolCallRequested { request });

        let reply = match self.gateway.await_outcome(&call.id, self.approval_timeout).await {
            Ok(reply) => reply,
            Err(e) => {
                self.gateway.cancel(&call.id);
                return ToolOutcome::error(call, e.to_string());
            }
        };

        match reply {
            None => {
                emitter.phase(TurnPhase::Timeout);
                info!(call_id = %call.id, tool = %call.name, "no approval in time; continuing without the tool");
                ToolOutcome::timeout(call)
            }
            Some(ApprovalReply {
                decision: ApprovalDecision::Reject,
                ..
            }) => {
                emitter.phase(TurnPhase::Rejected);
                info!(call_id = %call.id, tool = %call.name, "tool call rejected");
                ToolOutcome::rejected(call)
            }
            Some(ApprovalReply {
                decision: ApprovalDecision::Approve,
                result,
            }) => {
                emitter.phase(TurnPhase::Execute);
                let report = match result {
                    Some(value) => {
                        debug!(call_id = %call.id, "using result supplied with the approval");
                        ExecutionReport::from_value(value)
                    }
                    None => self.executor.run(call, session_id).await,
                };
                outcome_from_report(call, report)
            }
        }
    }

    /// MERGE: turn the outcome into a tool entry, persist it, clear the slot.
    async fn merge(&self, state: &mut ConversationState) {
        let Some(outcome) = state.take_outcome() else {
            return;
        };
        let content = tool_entry_content(&outcome);
        self.merge_with(state, outcome, content).await;
    }

    async fn merge_with(&self, state: &mut ConversationState, outcome: ToolOutcome, content: String) {
        let entry = ModelMessage::tool_result(
            outcome.call_id.clone(),
            outcome.tool_name.clone(),
            content,
            outcome.status != OutcomeStatus::Approved,
        );
        self.persist_human(state).await;
        self.persist(state, entry.clone()).await;
        state.turn_messages.push(entry);
        debug!(call_id = %outcome.call_id, status = ?outcome.status, "tool outcome merged");
        state.outcomes.push(outcome);
    }

    /// DONE: persist, post-process, report.
    async fn finish(
        &self,
        mut state: ConversationState,
        iterations: usize,
        emitter: &TurnEventEmitter,
    ) -> TurnResponse {
        emitter.phase(TurnPhase::Done);
        let final_text = std::mem::take(&mut state.accumulated_text);
        let (text, language) = match state.mode {
            Mode::Compose => extract_block(&final_text),
            Mode::Chat => (final_text, None),
        };

        self.persist_human(&mut state).await;
        self.persist(&mut state, ModelMessage::assistant(text.clone())).await;

        let response = TurnResponse {
            turn_id: state.turn_id,
            session_id: state.session_id,
            text,
            language,
            tool_outcomes: state.outcomes,
            iterations,
        };
        info!(
            turn_id = %response.turn_id,
            iterations,
            tools = response.tool_outcomes.len(),
            "turn completed"
        );
        emitter.emit(TurnEventPayload::Completed {
            response: response.clone(),
        });
        response
    }

    fn fail(
        &self,
        state: ConversationState,
        error: DasiError,
        emitter: &TurnEventEmitter,
    ) -> TurnError {
        warn!(turn_id = %state.turn_id, error = %error, "turn failed");
        emitter.emit(TurnEventPayload::Failed {
            error: error.to_string(),
        });
        TurnError {
            error,
            partial_text: state.accumulated_text,
        }
    }

    async fn persist_human(&self, state: &mut ConversationState) {
        if state.human_persisted {
            return;
        }
        let entry = self.assembler.human_entry(state);
        self.persist(state, entry).await;
        state.human_persisted = true;
    }

    /// History failures are logged, not fatal.
    async fn persist(&self, state: &mut ConversationState, message: ModelMessage) {
        match self.history.append(&state.session_id, message).await {
            Ok(entry) => state.persisted_ids.push(entry.id),
            Err(e) => warn!(session_id = %state.session_id, error = %e, "failed to persist history entry"),
        }
    }
}

fn outcome_from_report(call: &ToolCall, report: ExecutionReport) -> ToolOutcome {
    if report.is_success() {
        ToolOutcome::approved(call, report.data)
    } else {
        warn!(call_id = %call.id, tool = %call.name, error = %report.data, "tool execution failed");
        ToolOutcome::error(call, report.data)
    }
}

/// Text of the tool entry the model sees for an outcome.
fn tool_entry_content(outcome: &ToolOutcome) -> String {
    match outcome.status {
        OutcomeStatus::Approved => prompts::tool_result_content(&outcome.tool_name, &outcome.payload),
        OutcomeStatus::Rejected => REJECTION_NOTICE.to_string(),
        OutcomeStatus::Timeout => TIMEOUT_NOTICE.to_string(),
        OutcomeStatus::Error => prompts::tool_error_notice(&outcome.tool_name, &outcome.payload),
    }
}

impl std::fmt::Debug for TurnLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnLoop")
            .field("provider", &self.provider.provider_name())
            .field("model", &self.provider.model_id())
            .field("tools", self.executor.registry())
            .field("approval_timeout", &self.approval_timeout)
            .field("max_tool_turns", &self.max_tool_turns)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call() -> ToolCall {
        ToolCall {
            id: "call_1".into(),
            name: "web_search".into(),
            arguments: serde_json::json!({}),
        }
    }

    #[test]
    fn tool_entries_name_the_outcome() {
        assert_eq!(
            tool_entry_content(&ToolOutcome::approved(&call(), "15°C, cloudy")),
            "Result from web_search tool:\n\n15°C, cloudy"
        );
        assert_eq!(tool_entry_content(&ToolOutcome::rejected(&call())), REJECTION_NOTICE);
        assert_eq!(tool_entry_content(&ToolOutcome::timeout(&call())), TIMEOUT_NOTICE);
        assert!(tool_entry_content(&ToolOutcome::error(&call(), "boom")).contains("boom"));
    }

    #[test]
    fn failed_reports_become_error_outcomes() {
        let outcome = outcome_from_report(&call(), ExecutionReport::error("exit code 2"));
        assert_eq!(outcome.status, OutcomeStatus::Error);
        assert_eq!(outcome.payload, "exit code 2");
    }

    #[test]
    fn user_messages_are_labeled() {
        let err = TurnError {
            error: DasiError::api(401, "bad key"),
            partial_text: String::new(),
        };
        assert_eq!(
            err.user_message(),
            "⚠️ Error: Invalid API key. Please check your API key in settings."
        );

        let err = TurnError {
            error: DasiError::Stream("connection reset".into()),
            partial_text: "Partial".into(),
        };
        assert_eq!(err.user_message(), "⚠️ Error: Stream error: connection reset");
        assert_eq!(err.partial_text, "Partial");
    }
}
