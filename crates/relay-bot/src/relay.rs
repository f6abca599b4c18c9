//! Per-turn orchestration: history, request building and the stream driver.

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use relay_core::{
    ChatStream, CompletionRequest, HistoryStore, Message, MessageSink, Role, StreamDriver,
    TurnOutcome,
};

use crate::config::Config;

/// Request parameters shared by every turn.
#[derive(Debug, Clone, Default)]
pub struct RequestDefaults {
    pub system_prompt: String,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub extra: HashMap<String, serde_json::Value>,
}

impl RequestDefaults {
    pub fn from_config(config: &Config) -> Self {
        Self {
            system_prompt: config.system_prompt.clone(),
            model: config.provider.model.clone(),
            max_tokens: config.provider.max_tokens,
            temperature: config.provider.temperature,
            extra: config.provider.parameters.clone(),
        }
    }

    fn build(&self, history: Vec<Message>) -> CompletionRequest {
        let mut messages = Vec::with_capacity(history.len() + 1);
        if !self.system_prompt.is_empty() {
            messages.push(Message::system(self.system_prompt.clone()));
        }
        messages.extend(history);

        let mut request = CompletionRequest::new(messages).with_extra(self.extra.clone());
        request.model = self.model.clone();
        request.max_tokens = self.max_tokens;
        request.temperature = self.temperature;
        request
    }
}

/// Everything a turn needs; shared by all chats.
pub struct Relay {
    driver: StreamDriver,
    provider: Arc<dyn ChatStream>,
    history: HistoryStore,
    defaults: RequestDefaults,
    shutdown: CancellationToken,
}

impl Relay {
    pub fn new(
        driver: StreamDriver,
        provider: Arc<dyn ChatStream>,
        history: HistoryStore,
        defaults: RequestDefaults,
    ) -> Self {
        Self {
            driver,
            provider,
            history,
            defaults,
            shutdown: CancellationToken::new(),
        }
    }

    /// Cancelling this token finalizes every in-flight turn.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    /// Answer one user message into `sink`.
    ///
    /// The user's conversation stays locked for the whole turn. The answer is
    /// recorded only when the turn succeeded and the user saw it; otherwise the
    /// user message is rolled back so a retry does not duplicate it.
    pub async fn handle_text(&self, user_id: &str, text: &str, sink: &dyn MessageSink) -> TurnOutcome {
        let mut conversation = self.history.lock(user_id).await;
        conversation.append(Role::User, text);

        let request = self.defaults.build(conversation.messages());
        info!(
            user_id,
            provider = self.provider.name(),
            history = conversation.len(),
            "Processing message"
        );

        let outcome = self
            .driver
            .run(self.provider.as_ref(), request, sink, &self.shutdown)
            .await;

        if outcome.is_success() {
            conversation.append(Role::Assistant, outcome.answer.clone());
            info!(user_id, slots = outcome.slots, "Successfully processed message");
        } else {
            conversation.rollback(Role::User);
            match &outcome.error {
                Some(e) if e.is_auth_error() => {
                    error!(user_id, error = %e, "Provider rejected credentials, check provider.api_key")
                }
                Some(e) => warn!(
                    user_id,
                    state = %outcome.state,
                    upstream = e.is_upstream(),
                    retryable = e.is_retryable(),
                    error = %e,
                    "Turn failed"
                ),
                None => warn!(user_id, state = %outcome.state, "Turn failed"),
            }
        }

        outcome
    }

    pub async fn reset(&self, user_id: &str) {
        self.history.clear(user_id).await;
        info!(user_id, "Conversation cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::testing::{MockChatStream, RecordingSink};
    use relay_core::{DisplayConfig, Error, StreamChunk};

    fn relay_with(source: Arc<MockChatStream>) -> Relay {
        let defaults = RequestDefaults {
            system_prompt: "be helpful".to_string(),
            model: Some("deepseek-r1".to_string()),
            max_tokens: Some(5120),
            ..Default::default()
        };
        Relay::new(
            StreamDriver::new(DisplayConfig::default()),
            source,
            HistoryStore::new(4),
            defaults,
        )
    }

    #[tokio::test]
    async fn test_successful_turn_records_both_sides() {
        let source = Arc::new(MockChatStream::new());
        source.queue_chunks(vec![StreamChunk::delta("Hi there")]);
        let relay = relay_with(source.clone());
        let sink = RecordingSink::new();

        let outcome = relay.handle_text("42", "hello", &sink).await;

        assert!(outcome.is_success());
        assert_eq!(
            relay.history().get("42").await,
            vec![Message::user("hello"), Message::assistant("Hi there")]
        );

        let request = source.last_request().unwrap();
        assert_eq!(request.messages[0], Message::system("be helpful"));
        assert_eq!(request.messages[1], Message::user("hello"));
        assert_eq!(request.model.as_deref(), Some("deepseek-r1"));
        assert_eq!(request.max_tokens, Some(5120));
    }

    #[tokio::test]
    async fn test_history_is_sent_on_next_turn() {
        let source = Arc::new(MockChatStream::new());
        source.queue_chunks(vec![StreamChunk::delta("first answer")]);
        source.queue_chunks(vec![StreamChunk::delta("second answer")]);
        let relay = relay_with(source.clone());
        let sink = RecordingSink::new();

        relay.handle_text("7", "one", &sink).await;
        relay.handle_text("7", "two", &sink).await;

        let contents: Vec<_> = source
            .last_request()
            .unwrap()
            .messages
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(contents, vec!["be helpful", "one", "first answer", "two"]);
    }

    #[tokio::test]
    async fn test_failed_turn_rolls_back_user_message() {
        let source = Arc::new(MockChatStream::new());
        source.queue_open_error(Error::network("connection refused"));
        let relay = relay_with(source);
        let sink = RecordingSink::new();

        let outcome = relay.handle_text("42", "hello", &sink).await;

        assert!(!outcome.is_success());
        assert!(relay.history().get("42").await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_answer_never_displayed_is_not_recorded() {
        let source = Arc::new(MockChatStream::new());
        source.queue_chunks(vec![StreamChunk::delta("Hello")]);
        let relay = relay_with(source);
        let sink = RecordingSink::new();
        sink.stall_edits();

        let outcome = relay.handle_text("42", "hello", &sink).await;

        assert_eq!(outcome.answer, "Hello");
        assert!(!outcome.converged);
        assert!(!outcome.is_success());
        assert!(relay.history().get("42").await.is_empty());
    }

    #[tokio::test]
    async fn test_each_turn_opens_one_stream() {
        let source = Arc::new(MockChatStream::new());
        source.queue_chunks(vec![StreamChunk::delta("a")]);
        source.queue_open_error(Error::rate_limit("slow down"));
        let relay = relay_with(source.clone());
        let sink = RecordingSink::new();

        relay.handle_text("1", "x", &sink).await;
        let outcome = relay.handle_text("1", "y", &sink).await;

        assert_eq!(source.request_count(), 2);
        assert!(outcome.error.as_ref().is_some_and(|e| e.is_retryable()));
        assert_eq!(relay.history().get("1").await.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_answer_is_not_recorded() {
        let source = Arc::new(MockChatStream::new());
        source.queue_chunks(vec![StreamChunk::thinking("only thoughts")]);
        let relay = relay_with(source);
        let sink = RecordingSink::new();

        let outcome = relay.handle_text("42", "hello", &sink).await;

        assert!(matches!(outcome.error, Some(Error::EmptyResponse)));
        assert!(relay.history().get("42").await.is_empty());
    }

    #[tokio::test]
    async fn test_reset_clears_only_that_user() {
        let source = Arc::new(MockChatStream::new());
        source.queue_chunks(vec![StreamChunk::delta("a")]);
        source.queue_chunks(vec![StreamChunk::delta("b")]);
        let relay = relay_with(source);
        let sink = RecordingSink::new();

        relay.handle_text("1", "x", &sink).await;
        relay.handle_text("2", "y", &sink).await;
        relay.reset("1").await;

        assert!(relay.history().get("1").await.is_empty());
        assert_eq!(relay.history().get("2").await.len(), 2);
    }

    #[tokio::test]
    async fn test_history_bound_applies() {
        let source = Arc::new(MockChatStream::new());
        for i in 0..3 {
            source.queue_chunks(vec![StreamChunk::delta(format!("answer {i}"))]);
        }
        let relay = relay_with(source);
        let sink = RecordingSink::new();

        for i in 0..3 {
            relay.handle_text("1", &format!("question {i}"), &sink).await;
        }

        let contents: Vec<_> = relay
            .history()
            .get("1")
            .await
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(contents, vec!["question 1", "answer 1", "question 2", "answer 2"]);
    }
}
