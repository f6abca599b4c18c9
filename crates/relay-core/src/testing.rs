//! Test utilities shared across the workspace.
//! Only compiled when running tests or with the `testing` feature.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;

use crate::error::{Error, SinkError};
use crate::message::StreamChunk;
use crate::provider::{ChatStream, CompletionRequest, StreamResult};
use crate::sink::{MessageSink, SlotHandle};

type ScriptedItem = (Duration, Result<StreamChunk, Error>);

struct Script {
    items: Vec<ScriptedItem>,
    hang: bool,
}

/// A chat stream that replays pre-configured chunk sequences.
pub struct MockChatStream {
    scripts: Mutex<Vec<Result<Script, Error>>>,
    /// Captured requests (for assertion).
    pub captured_requests: Mutex<Vec<CompletionRequest>>,
    pub name: String,
    pub default_model: Option<String>,
}

impl MockChatStream {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(Vec::new()),
            captured_requests: Mutex::new(Vec::new()),
            name: "mock".to_string(),
            default_model: None,
        }
    }

    /// Queue a stream yielding `chunks` back to back.
    /// Streams are returned in FIFO order (first queued = first opened).
    pub fn queue_chunks(&self, chunks: Vec<StreamChunk>) {
        self.queue_items(chunks.into_iter().map(Ok).collect());
    }

    /// Queue a stream that may contain mid-stream errors.
    pub fn queue_items(&self, items: Vec<Result<StreamChunk, Error>>) {
        let items = items.into_iter().map(|c| (Duration::ZERO, c)).collect();
        self.push(Ok(Script { items, hang: false }));
    }

    /// Queue a stream where each chunk arrives after the given delay.
    pub fn queue_timed(&self, items: Vec<(Duration, StreamChunk)>) {
        let items = items.into_iter().map(|(d, c)| (d, Ok(c))).collect();
        self.push(Ok(Script { items, hang: false }));
    }

    /// Queue a stream that never ends after yielding `chunks`.
    pub fn queue_hanging(&self, chunks: Vec<StreamChunk>) {
        let items = chunks.into_iter().map(|c| (Duration::ZERO, Ok(c))).collect();
        self.push(Ok(Script { items, hang: true }));
    }

    /// Make the next `open` call fail.
    pub fn queue_open_error(&self, error: Error) {
        self.push(Err(error));
    }

    pub fn request_count(&self) -> usize {
        self.captured_requests.lock().unwrap().len()
    }

    pub fn last_request(&self) -> Option<CompletionRequest> {
        self.captured_requests.lock().unwrap().last().cloned()
    }

    fn push(&self, script: Result<Script, Error>) {
        self.scripts.lock().unwrap().insert(0, script);
    }
}

impl Default for MockChatStream {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatStream for MockChatStream {
    fn name(&self) -> &str {
        &self.name
    }

    fn default_model(&self) -> Option<&str> {
        self.default_model.as_deref()
    }

    async fn open(&self, request: CompletionRequest) -> Result<StreamResult, Error> {
        self.captured_requests.lock().unwrap().push(request);
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(|| Err(Error::stream("No mock stream queued")))?;

        let items = futures::stream::iter(script.items).then(|(delay, item)| async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            item
        });

        if script.hang {
            Ok(Box::pin(items.chain(futures::stream::pending())) as StreamResult)
        } else {
            Ok(Box::pin(items) as StreamResult)
        }
    }
}

/// An operation attempted against a [`RecordingSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkOp {
    Send { text: String },
    Edit { handle: SlotHandle, text: String },
    Delete { handle: SlotHandle },
}

#[derive(Default)]
struct SinkState {
    next_id: i64,
    messages: BTreeMap<i64, String>,
    ops: Vec<SinkOp>,
    send_failures: VecDeque<SinkError>,
    edit_failures: VecDeque<SinkError>,
    delete_failures: VecDeque<SinkError>,
    outage: Option<SinkError>,
    stalled_edits: bool,
}

/// A message sink that keeps messages in memory and records every attempt.
///
/// Like Telegram, it rejects blank message text.
#[derive(Default)]
pub struct RecordingSink {
    state: Mutex<SinkState>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All attempted operations, failed ones included.
    pub fn ops(&self) -> Vec<SinkOp> {
        self.state.lock().unwrap().ops.clone()
    }

    /// Texts of the messages currently shown, oldest first.
    pub fn visible(&self) -> Vec<String> {
        self.state.lock().unwrap().messages.values().cloned().collect()
    }

    pub fn fail_next_send(&self, error: SinkError) {
        self.state.lock().unwrap().send_failures.push_back(error);
    }

    pub fn fail_next_edit(&self, error: SinkError) {
        self.state.lock().unwrap().edit_failures.push_back(error);
    }

    pub fn fail_next_delete(&self, error: SinkError) {
        self.state.lock().unwrap().delete_failures.push_back(error);
    }

    /// Fail every operation from now on.
    pub fn set_outage(&self, error: SinkError) {
        self.state.lock().unwrap().outage = Some(error);
    }

    /// Make every later edit hang forever after being recorded.
    pub fn stall_edits(&self) {
        self.state.lock().unwrap().stalled_edits = true;
    }
}

fn check_text(text: &str) -> Result<(), SinkError> {
    if text.trim().is_empty() {
        return Err(SinkError::rejected("message text is empty"));
    }
    Ok(())
}

#[async_trait]
impl MessageSink for RecordingSink {
    async fn send(&self, text: &str) -> Result<SlotHandle, SinkError> {
        let mut state = self.state.lock().unwrap();
        state.ops.push(SinkOp::Send {
            text: text.to_string(),
        });
        if let Some(err) = state.outage.clone() {
            return Err(err);
        }
        if let Some(err) = state.send_failures.pop_front() {
            return Err(err);
        }
        check_text(text)?;
        state.next_id += 1;
        let id = state.next_id;
        state.messages.insert(id, text.to_string());
        Ok(SlotHandle(id))
    }

    async fn edit(&self, handle: &SlotHandle, text: &str) -> Result<(), SinkError> {
        let stalled = {
            let mut state = self.state.lock().unwrap();
            state.ops.push(SinkOp::Edit {
                handle: *handle,
                text: text.to_string(),
            });
            state.stalled_edits
        };
        if stalled {
            futures::future::pending::<()>().await;
        }

        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.outage.clone() {
            return Err(err);
        }
        if let Some(err) = state.edit_failures.pop_front() {
            return Err(err);
        }
        check_text(text)?;
        match state.messages.get_mut(&handle.0) {
            Some(existing) if existing.as_str() == text => Err(SinkError::NotModified),
            Some(existing) => {
                *existing = text.to_string();
                Ok(())
            }
            None => Err(SinkError::NotFound),
        }
    }

    async fn delete(&self, handle: &SlotHandle) -> Result<(), SinkError> {
        let mut state = self.state.lock().unwrap();
        state.ops.push(SinkOp::Delete { handle: *handle });
        if let Some(err) = state.outage.clone() {
            return Err(err);
        }
        if let Some(err) = state.delete_failures.pop_front() {
            return Err(err);
        }
        state
            .messages
            .remove(&handle.0)
            .map(|_| ())
            .ok_or(SinkError::NotFound)
    }
}
