use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, trace, warn};

use relay_core::{
    ChatStream, CompletionRequest, Error, Message, StreamChunk, StreamResult, Usage,
};

use crate::think::ThinkTagSplitter;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Streaming client for any OpenAI-compatible `/chat/completions` endpoint.
///
/// Reasoning arrives either in `delta.reasoning_content` (DeepSeek, Ark) or
/// wrapped in `<think>` tags inside the content; both become
/// [`StreamChunk::ThinkingDelta`].
pub struct OpenAICompatStream {
    client: Client,
    api_key: String,
    base_url: String,
    default_model: Option<String>,
}

impl OpenAICompatStream {
    pub fn new(api_key: impl Into<String>) -> Self {
        // HTTP/1.1 and no transparent decompression, both of which can
        // buffer an SSE response until it completes.
        let client = Client::builder()
            .http1_only()
            .no_gzip()
            .no_brotli()
            .no_deflate()
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            default_model: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn build_request(&self, request: &CompletionRequest) -> ChatRequest {
        // request > provider default; with neither the server picks
        let model = request
            .model
            .clone()
            .or_else(|| self.default_model.clone());

        ChatRequest {
            model,
            messages: request.messages.iter().map(ChatMessage::from).collect(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: true,
            stream_options: StreamOptions {
                include_usage: true,
            },
            extra: request.extra.clone(),
        }
    }

    fn parse_error(&self, status: u16, body: &str) -> Error {
        match serde_json::from_str::<ErrorResponse>(body) {
            Ok(err) => match status {
                401 | 403 => Error::auth(err.error.message),
                429 => Error::rate_limit(err.error.message),
                400 => Error::invalid_request(err.error.message),
                _ => Error::api(status, err.error.message),
            },
            Err(_) => Error::api(status, body.to_string()),
        }
    }
}

#[async_trait]
impl ChatStream for OpenAICompatStream {
    fn name(&self) -> &str {
        "openai"
    }

    fn default_model(&self) -> Option<&str> {
        self.default_model.as_deref()
    }

    async fn open(&self, request: CompletionRequest) -> Result<StreamResult, Error> {
        let api_request = self.build_request(&request);
        debug!(
            model = api_request.model.as_deref().unwrap_or("<server default>"),
            messages = api_request.messages.len(),
            "Opening chat stream"
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .header("Accept", "text/event-stream")
            .header("Accept-Encoding", "identity")
            .header("Cache-Control", "no-cache")
            .json(&api_request)
            .send()
            .await
            .map_err(|e| Error::network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(self.parse_error(status.as_u16(), &error_text));
        }

        let (tx, rx) = mpsc::channel::<Result<StreamChunk, Error>>(100);

        tokio::spawn(async move {
            let mut response = response;
            let mut decoder = SseDecoder::default();
            let mut splitter = ThinkTagSplitter::new();
            let mut usage = None;
            let mut started = false;

            loop {
                let bytes = match response.chunk().await {
                    Ok(Some(bytes)) => bytes,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "Chat stream interrupted");
                        let _ = tx.send(Err(Error::stream(e.to_string()))).await;
                        return;
                    }
                };
                trace!(bytes = bytes.len(), "SSE bytes received");

                for data in decoder.push(&bytes) {
                    let event = parse_sse_data(&data, &mut splitter);
                    if !started {
                        if let Some(model) = event.model {
                            started = true;
                            let _ = tx.send(Ok(StreamChunk::Start { model })).await;
                        }
                    }
                    if event.usage.is_some() {
                        usage = event.usage;
                    }
                    for chunk in event.chunks {
                        if tx.send(Ok(chunk)).await.is_err() {
                            debug!("Chat stream receiver dropped");
                            return;
                        }
                    }
                    if event.done {
                        let _ = tx.send(Ok(StreamChunk::Done { usage })).await;
                        return;
                    }
                }
            }

            // Connection closed without [DONE]
            for chunk in splitter.finish() {
                if tx.send(Ok(chunk)).await.is_err() {
                    return;
                }
            }
            let _ = tx.send(Ok(StreamChunk::Done { usage })).await;
        });

        Ok(Box::pin(ReceiverStream::new(rx)) as StreamResult)
    }
}

/// Reassembles `data:` payloads from arbitrarily split SSE bytes.
#[derive(Debug, Default)]
struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    /// Feed bytes, returning the payload of every complete `data:` line.
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut payloads = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = match std::str::from_utf8(&line) {
                Ok(line) => line.trim_end_matches(['\n', '\r']),
                Err(e) => {
                    error!(error = %e, "Invalid UTF-8 in SSE stream");
                    continue;
                }
            };
            if let Some(data) = line.strip_prefix("data:") {
                payloads.push(data.strip_prefix(' ').unwrap_or(data).to_string());
            }
        }

        payloads
    }
}

/// What one SSE payload contributes to the stream.
#[derive(Debug, Default, PartialEq)]
struct SseEvent {
    model: Option<String>,
    chunks: Vec<StreamChunk>,
    usage: Option<Usage>,
    done: bool,
}

/// Interpret one `data:` payload.
///
/// Unparseable payloads are logged and skipped; an error object becomes a
/// [`StreamChunk::Error`] and ends the stream.
fn parse_sse_data(data: &str, splitter: &mut ThinkTagSplitter) -> SseEvent {
    let mut event = SseEvent::default();

    if data == "[DONE]" {
        event.chunks = splitter.finish();
        event.done = true;
        return event;
    }

    let response = match serde_json::from_str::<StreamResponse>(data) {
        Ok(response) => response,
        Err(e) => {
            error!(error = %e, data, "Failed to parse SSE message");
            return event;
        }
    };

    if let Some(err) = response.error {
        event.chunks.push(StreamChunk::Error {
            message: err.message,
        });
        event.done = true;
        return event;
    }

    event.model = response.model;
    for choice in response.choices {
        if let Some(reasoning) = choice.delta.reasoning_content {
            if !reasoning.is_empty() {
                event.chunks.push(StreamChunk::thinking(reasoning));
            }
        }
        if let Some(content) = choice.delta.content {
            event.chunks.extend(splitter.push(&content));
        }
        if let Some(reason) = choice.finish_reason {
            debug!(finish_reason = %reason, "Choice finished");
        }
    }

    event.usage = response
        .usage
        .map(|u| Usage::new(u.prompt_tokens, u.completion_tokens));
    event
}

// Wire types

#[derive(Debug, Serialize)]
struct ChatRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<String>,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
    stream_options: StreamOptions,
    /// Passthrough parameters (reasoning_effort, thinking, ...)
    #[serde(flatten)]
    extra: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

impl From<&Message> for ChatMessage {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role.to_string(),
            content: message.content.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

#[derive(Debug, Deserialize)]
struct StreamResponse {
    model: Option<String>,
    #[serde(default)]
    choices: Vec<StreamChoice>,
    usage: Option<WireUsage>,
    error: Option<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    content: Option<String>,
    reasoning_content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}
