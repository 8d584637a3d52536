//! Builds the ordered message list for each model call.
//!
//! The prompt is rebuilt from scratch on every iteration: durable history
//! (minus whatever this turn already persisted) followed by the user turn
//! and the turn's own unpersisted entries. Nothing is mutated in place.

use tracing::{debug, warn};

use crate::history::{HistoryEntry, HistoryStore};
use crate::prompts::{self, BASE_SYSTEM_PROMPT, CHAT_MODE_INSTRUCTION, COMPOSE_MODE_INSTRUCTION};
use crate::provider::ToolDefinition;
use crate::sidechannel::{QueryContext, VisionResolver, WebSearchResolver};
use crate::types::{ModelMessage, Role};

use super::events::{TurnEventEmitter, TurnEventPayload};
use super::gateway::OutcomeStatus;
use super::state::{ConversationState, Mode, SideChannels};

const VISION_FAILURE_NOTE: &str =
    "(Failed to process the provided visual input using the configured vision model.)";

#[derive(Debug, Clone)]
pub struct PromptAssembler {
    web: WebSearchResolver,
    vision: VisionResolver,
    custom_instructions: Option<String>,
    history_limit: usize,
}

impl Default for PromptAssembler {
    fn default() -> Self {
        Self {
            web: WebSearchResolver::unconfigured(),
            vision: VisionResolver::default(),
            custom_instructions: None,
            history_limit: crate::config::DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl PromptAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_web_search(mut self, web: WebSearchResolver) -> Self {
        self.web = web;
        self
    }

    pub fn with_vision(mut self, vision: VisionResolver) -> Self {
        self.vision = vision;
        self
    }

    /// Appended to the system prompt when set.
    pub fn with_custom_instructions(mut self, instructions: Option<String>) -> Self {
        self.custom_instructions = instructions.filter(|i| !i.trim().is_empty());
        self
    }

    /// Most recent history entries included in each prompt.
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    /// PREPARE: resolve side channels (first call only), read history and
    /// assemble. Side-channel and history failures degrade the prompt; they
    /// never fail the turn.
    pub(crate) async fn prepare(
        &self,
        state: &mut ConversationState,
        history: &dyn HistoryStore,
        tools: &[ToolDefinition],
        emitter: &TurnEventEmitter,
    ) -> Vec<ModelMessage> {
        if state.side_channels.is_none() {
            let channels = self.resolve_side_channels(state).await;
            for note in failure_notes(&channels) {
                emitter.emit(TurnEventPayload::SideChannelNote { note });
            }
            state.side_channels = Some(channels);
        }

        // Over-read by what this turn persisted so the window stays full.
        let limit = self.history_limit + state.persisted_ids.len();
        let entries = match history.read(&state.session_id, Some(limit)).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(session_id = %state.session_id, error = %e, "history unavailable; continuing without it");
                Vec::new()
            }
        };
        self.assemble(state, &entries, tools)
    }

    /// Run the web and vision resolvers the turn calls for. Failures come
    /// back as error outcomes, never as `Err`.
    pub async fn resolve_side_channels(&self, state: &ConversationState) -> SideChannels {
        let ctx = QueryContext::detect(&state.query, state.web_search);
        let web = if ctx.needs_web() {
            Some(self.web.resolve(&ctx).await)
        } else {
            None
        };

        let vision = match &state.image {
            Some(image) => self.vision.resolve(image, &state.query).await,
            None => None,
        };

        SideChannels {
            web_context: Some(ctx),
            web,
            vision,
        }
    }

    /// Order: system prompt, mode instruction, side-channel instruction,
    /// tool-result instruction, history, user turn, this turn's entries.
    pub fn assemble(
        &self,
        state: &ConversationState,
        history: &[HistoryEntry],
        tools: &[ToolDefinition],
    ) -> Vec<ModelMessage> {
        let mut messages = Vec::with_capacity(history.len() + state.turn_messages.len() + 5);
        messages.push(ModelMessage::system(self.system_prompt(tools)));
        messages.push(ModelMessage::system(match state.mode {
            Mode::Chat => CHAT_MODE_INSTRUCTION,
            Mode::Compose => COMPOSE_MODE_INSTRUCTION,
        }));

        let channels = state.side_channels.as_ref();
        if let Some(note) = channels
            .and_then(|c| c.web.as_ref())
            .filter(|web| web.is_success())
            .and_then(|web| web.system_note.as_deref())
        {
            messages.push(ModelMessage::system(note));
        }

        if let Some(outcome) = state
            .outcomes
            .last()
            .filter(|o| o.status == OutcomeStatus::Approved)
        {
            messages.push(ModelMessage::system(prompts::tool_result_instruction(
                &outcome.tool_name,
            )));
        }

        let before = messages.len();
        messages.extend(
            history
                .iter()
                .filter(|entry| !state.persisted_ids.contains(&entry.id))
                .filter(|entry| entry.message.role != Role::System)
                .map(|entry| entry.message.clone()),
        );
        debug!(
            session_id = %state.session_id,
            history = messages.len() - before,
            turn_entries = state.turn_messages.len(),
            "prompt assembled"
        );

        messages.push(self.user_turn(state));
        messages.extend(state.turn_messages.iter().cloned());
        messages
    }

    fn system_prompt(&self, tools: &[ToolDefinition]) -> String {
        let mut prompt = BASE_SYSTEM_PROMPT.to_string();
        if let Some(instructions) = &self.custom_instructions {
            prompt.push_str("\n\n=====CUSTOM_INSTRUCTIONS=====<user-defined instructions>\n");
            prompt.push_str(instructions.trim());
            prompt.push_str("\n=======================");
        }
        if !tools.is_empty() {
            prompt.push_str("\n\n");
            prompt.push_str(&prompts::tool_protocol(tools));
        }
        prompt
    }

    /// The human entry written to history: the query plus any selection.
    /// Web results and images are prompt-only.
    pub fn human_entry(&self, state: &ConversationState) -> ModelMessage {
        ModelMessage::user(with_selection(state.query.clone(), state))
    }

    fn user_turn(&self, state: &ConversationState) -> ModelMessage {
        let channels = state.side_channels.as_ref();

        let base = match (channels.and_then(|c| c.web.as_ref()), channels.and_then(|c| c.web_context.as_ref())) {
            (Some(web), _) if web.is_success() => web.data.clone(),
            (Some(web), Some(ctx)) => ctx.failure_query(&web.data),
            _ => state.query.clone(),
        };
        let text = with_selection(base, state);

        match (channels.and_then(|c| c.vision.as_ref()), &state.image) {
            (Some(vision), _) if vision.is_success() => ModelMessage::user(format!(
                "{text}\n\n{}",
                prompts::visual_description_block(&vision.data)
            )),
            (Some(_), _) => ModelMessage::user(format!(
                "{text}\n\n{}",
                prompts::system_note_block(VISION_FAILURE_NOTE)
            )),
            (None, Some(image)) => ModelMessage::user_with_image(text, image.clone()),
            (None, None) => ModelMessage::user(text),
        }
    }
}

fn with_selection(mut text: String, state: &ConversationState) -> String {
    if let Some(selected) = &state.selected_text {
        if !text.contains("=====SELECTED_TEXT=====") {
            text.push_str("\n\n");
            text.push_str(&prompts::selected_text_block(selected));
        }
    }
    text
}

fn failure_notes(channels: &SideChannels) -> Vec<String> {
    [channels.web.as_ref(), channels.vision.as_ref()]
        .into_iter()
        .flatten()
        .filter(|outcome| !outcome.is_success())
        .map(|outcome| outcome.data.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    use crate::conversation::gateway::ToolOutcome;
    use crate::conversation::state::TurnInput;
    use crate::error::{DasiError, Result};
    use crate::history::InMemoryHistoryStore;
    use crate::sidechannel::{ScrapedPage, SearchHit, SearchProvider, VisionDescriber};
    use crate::types::{ContentPart, ImageContent, ToolCall};

    fn state(input: TurnInput) -> ConversationState {
        ConversationState::new(input)
    }

    fn roles(messages: &[ModelMessage]) -> Vec<Role> {
        messages.iter().map(|m| m.role).collect()
    }

    fn tool_def() -> ToolDefinition {
        ToolDefinition {
            name: "web_search".into(),
            description: "Search the web".into(),
            parameters: serde_json::json!({"type": "object"}),
        }
    }

    struct FixedSearch;

    #[async_trait]
    impl SearchProvider for FixedSearch {
        async fn search(&self, _query: &str, _max: usize) -> Result<Vec<SearchHit>> {
            Ok(vec![SearchHit {
                title: "Paris weather".into(),
                link: "https://weather.example/paris".into(),
                snippet: "15°C, cloudy".into(),
            }])
        }

        async fn scrape(&self, _urls: &[String]) -> Result<Vec<ScrapedPage>> {
            Ok(Vec::new())
        }
    }

    struct BrokenVision;

    #[async_trait]
    impl VisionDescriber for BrokenVision {
        async fn describe(&self, _image: &ImageContent, _hint: &str) -> Result<String> {
            Err(DasiError::api(500, "vision down"))
        }
    }

    #[test]
    fn plain_turn_layout() {
        let state = state(TurnInput::builder().query("What's 2+2?").build());
        let messages = PromptAssembler::new().assemble(&state, &[], &[]);

        assert_eq!(roles(&messages), vec![Role::System, Role::System, Role::User]);
        assert_eq!(messages[1].text(), CHAT_MODE_INSTRUCTION);
        assert_eq!(messages[2].text(), "What's 2+2?");
        assert!(!messages[0].text().contains("=====TOOLS====="));
    }

    #[test]
    fn tools_and_custom_instructions_extend_the_system_prompt() {
        let state = state(TurnInput::builder().query("hi").mode(Mode::Compose).build());
        let messages = PromptAssembler::new()
            .with_custom_instructions(Some("Answer in French.".into()))
            .assemble(&state, &[], &[tool_def()]);

        let system = messages[0].text();
        assert!(system.starts_with(BASE_SYSTEM_PROMPT));
        assert!(system.contains("Answer in French."));
        assert!(system.contains("- web_search: Search the web"));
        assert_eq!(messages[1].text(), COMPOSE_MODE_INSTRUCTION);
    }

    #[test]
    fn selected_text_is_appended_once() {
        let state = state(
            TurnInput::builder()
                .query("explain this")
                .selected_text("fn main() {}")
                .build(),
        );
        let assembler = PromptAssembler::new();
        let messages = assembler.assemble(&state, &[], &[]);
        let user = messages.last().unwrap().text();
        assert_eq!(user.matches("=====SELECTED_TEXT=====").count(), 1);
        assert!(user.contains("fn main() {}"));
        assert_eq!(assembler.human_entry(&state).text(), user);
    }

    #[tokio::test]
    async fn history_comes_before_the_user_turn_and_turn_entries_after() {
        let store = InMemoryHistoryStore::new();
        store.append("s", ModelMessage::user("earlier question")).await.unwrap();
        store.append("s", ModelMessage::assistant("earlier answer")).await.unwrap();

        let mut state = state(TurnInput::builder().query("weather?").session_id("s").build());
        let call = ToolCall {
            id: "call_1".into(),
            name: "web_search".into(),
            arguments: serde_json::json!({"query": "weather"}),
        };
        state.turn_messages.push(ModelMessage::assistant_with_call("", call.clone()));
        let tool_entry = ModelMessage::tool_result("call_1", "web_search", "Result from web_search tool:\n\n15°C", false);
        let persisted = store.append("s", ModelMessage::user("weather?")).await.unwrap();
        let persisted_tool = store.append("s", tool_entry.clone()).await.unwrap();
        state.persisted_ids = vec![persisted.id, persisted_tool.id];
        state.turn_messages.push(tool_entry);
        state.outcomes.push(ToolOutcome::approved(&call, "15°C"));

        let history = store.read("s", None).await.unwrap();
        let messages = PromptAssembler::new().assemble(&state, &history, &[]);

        assert_eq!(
            roles(&messages),
            vec![
                Role::System,
                Role::System,
                Role::System,
                Role::User,
                Role::Assistant,
                Role::User,
                Role::Assistant,
                Role::Tool,
            ]
        );
        assert_eq!(
            messages[2].text(),
            prompts::tool_result_instruction("web_search")
        );
        assert_eq!(messages[3].text(), "earlier question");
        assert_eq!(messages[5].text(), "weather?");
        assert_eq!(messages.last().unwrap().role, Role::Tool);
    }

    #[tokio::test]
    async fn web_results_replace_the_query_and_add_an_instruction() {
        let assembler = PromptAssembler::new().with_web_search(WebSearchResolver::new(Arc::new(FixedSearch)));
        let mut state = state(TurnInput::builder().query("#web weather in Paris").build());
        state.side_channels = Some(assembler.resolve_side_channels(&state).await);

        let messages = assembler.assemble(&state, &[], &[]);
        assert_eq!(messages[2].text(), prompts::WEB_SEARCH_RESULTS_INSTRUCTION);
        let user = messages.last().unwrap().text();
        assert!(user.starts_with("=====WEB_SEARCH_RESULTS====="));
        assert!(user.contains("15°C, cloudy"));
    }

    #[tokio::test]
    async fn failed_web_lookup_rewrites_the_query() {
        let assembler = PromptAssembler::new();
        let mut state = state(
            TurnInput::builder()
                .query("latest rust release")
                .web_search(true)
                .build(),
        );
        state.side_channels = Some(assembler.resolve_side_channels(&state).await);

        let messages = assembler.assemble(&state, &[], &[]);
        assert_eq!(roles(&messages), vec![Role::System, Role::System, Role::User]);
        let user = messages.last().unwrap().text();
        assert!(user.starts_with("I tried to perform a web search based on the query 'latest rust release'"));
    }

    #[tokio::test]
    async fn image_without_describer_is_sent_inline() {
        let assembler = PromptAssembler::new();
        let mut state = state(
            TurnInput::builder()
                .query("what is this?")
                .image(ImageContent::from_base64("data:image/png;base64,QUJD"))
                .build(),
        );
        state.side_channels = Some(assembler.resolve_side_channels(&state).await);

        let messages = assembler.assemble(&state, &[], &[]);
        let user = messages.last().unwrap();
        assert!(user.has_image());
        assert!(matches!(&user.content[1], ContentPart::Image(img) if img.data == "QUJD"));
    }

    #[tokio::test]
    async fn failed_description_becomes_a_system_note() {
        let assembler = PromptAssembler::new().with_vision(VisionResolver::new(Arc::new(BrokenVision)));
        let mut state = state(
            TurnInput::builder()
                .query("what is this?")
                .image(ImageContent::from_base64("QUJD"))
                .build(),
        );
        state.side_channels = Some(assembler.resolve_side_channels(&state).await);

        let messages = assembler.assemble(&state, &[], &[]);
        let user = messages.last().unwrap();
        assert!(!user.has_image());
        assert!(user.text().contains("=====SYSTEM_NOTE====="));
        assert_eq!(failure_notes(state.side_channels.as_ref().unwrap()).len(), 1);
    }
}
