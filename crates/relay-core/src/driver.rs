//! Control loop for one streamed turn.
//!
//! The driver reads the chat stream as fast as it produces chunks and throttles
//! only the display: on each chunk arrival it compares a logical clock against
//! the last flush and, when due, composes, paginates and reconciles the buffers
//! onto the message sink. Flushes are awaited inline, so at most one is ever in
//! flight for a turn. When the stream ends, fails or is cancelled, a final flush
//! bounded in time brings the display to the final text.

use futures::StreamExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::accumulator::ContentAccumulator;
use crate::classifier::{Chunk, ChunkClassifier};
use crate::config::DisplayConfig;
use crate::error::{Error, SinkError};
use crate::message::{StreamChunk, Usage};
use crate::paginator::paginate;
use crate::provider::{ChatStream, CompletionRequest};
use crate::reconciler::{FlushReport, ReconciliationState, Slot};
use crate::sink::MessageSink;

/// Lifecycle of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Streaming,
    Flushing,
    Finalizing,
    Done,
    Errored,
}

impl std::fmt::Display for TurnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TurnState::Idle => "idle",
            TurnState::Streaming => "streaming",
            TurnState::Flushing => "flushing",
            TurnState::Finalizing => "finalizing",
            TurnState::Done => "done",
            TurnState::Errored => "errored",
        };
        f.write_str(name)
    }
}

/// Result of [`StreamDriver::run`].
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// `Done` or `Errored`.
    pub state: TurnState,
    pub answer: String,
    pub reasoning: String,
    /// Messages showing the reply when the turn ended.
    pub slots: usize,
    pub flushes: usize,
    /// The final flush brought the display to the final text.
    pub converged: bool,
    /// Token usage reported by the stream, if any.
    pub usage: Option<Usage>,
    pub error: Option<Error>,
}

impl TurnOutcome {
    /// The turn produced an answer that reached the display.
    pub fn is_success(&self) -> bool {
        self.state == TurnState::Done && self.converged && self.error.is_none()
    }
}

/// Renders a streamed completion into editable messages.
#[derive(Debug, Clone)]
pub struct StreamDriver {
    config: DisplayConfig,
    classifier: ChunkClassifier,
}

impl Default for StreamDriver {
    fn default() -> Self {
        Self::new(DisplayConfig::default())
    }
}

impl StreamDriver {
    pub fn new(config: DisplayConfig) -> Self {
        let classifier = ChunkClassifier::from_config(&config);
        Self { config, classifier }
    }

    pub fn config(&self) -> &DisplayConfig {
        &self.config
    }

    /// Run one turn to completion. Never fails: every error is either recovered
    /// locally or reported once to the user and in the returned outcome.
    pub async fn run(
        &self,
        source: &dyn ChatStream,
        request: CompletionRequest,
        sink: &dyn MessageSink,
        cancel: &CancellationToken,
    ) -> TurnOutcome {
        let mut turn = Turn::new(&self.config, sink);
        turn.send_placeholder().await;

        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            opened = source.open(request) => opened,
        };

        let mut stream = match opened {
            Ok(stream) => stream,
            Err(e) => {
                error!(provider = source.name(), error = %e, "Failed to open chat stream");
                return turn.finish(Some(e)).await;
            }
        };

        let mut failure = None;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Turn cancelled, finalizing partial reply");
                    failure = Some(Error::Cancelled);
                    break;
                }
                next = stream.next() => next,
            };

            match next {
                Some(Ok(StreamChunk::Error { message })) => {
                    failure = Some(Error::stream(message));
                    break;
                }
                Some(Ok(StreamChunk::Start { model })) => {
                    debug!(model = %model, "Stream started");
                }
                Some(Ok(StreamChunk::Done { usage })) => {
                    if usage.is_some() {
                        turn.usage = usage;
                    }
                }
                Some(Ok(event)) => {
                    if let Some(chunk) = self.classifier.classify(event) {
                        turn.on_chunk(&chunk);
                        if turn.flush_due(Instant::now()) {
                            let text = turn.accumulator.compose();
                            turn.flush(&text).await;
                        }
                    }
                }
                Some(Err(e)) => {
                    failure = Some(e);
                    break;
                }
                None => break,
            }
        }

        if let Some(ref e) = failure {
            warn!(error = %e, "Chat stream ended abnormally");
        }
        turn.finish(failure).await
    }
}

/// Mutable state of one in-flight turn.
struct Turn<'a> {
    config: &'a DisplayConfig,
    sink: &'a dyn MessageSink,
    accumulator: ContentAccumulator,
    display: ReconciliationState,
    state: TurnState,
    last_flush: Instant,
    backoff_until: Option<Instant>,
    last_sink_error: Option<SinkError>,
    flushes: usize,
    usage: Option<Usage>,
}

impl<'a> Turn<'a> {
    fn new(config: &'a DisplayConfig, sink: &'a dyn MessageSink) -> Self {
        Self {
            config,
            sink,
            accumulator: ContentAccumulator::from_config(config),
            display: ReconciliationState::new(),
            state: TurnState::Idle,
            last_flush: Instant::now(),
            backoff_until: None,
            last_sink_error: None,
            flushes: 0,
            usage: None,
        }
    }

    fn transition(&mut self, next: TurnState) {
        if self.state != next {
            trace!(from = %self.state, to = %next, "Turn state change");
            self.state = next;
        }
    }

    async fn send_placeholder(&mut self) {
        match self.sink.send(&self.config.placeholder).await {
            Ok(handle) => self
                .display
                .push(Slot::new(handle, self.config.placeholder.clone())),
            Err(e) => {
                warn!(error = %e, "Failed to send placeholder");
                if let Some(retry_after) = e.retry_after() {
                    self.backoff_until = Some(Instant::now() + retry_after);
                }
                self.last_sink_error = Some(e);
            }
        }
        self.last_flush = Instant::now();
    }

    fn on_chunk(&mut self, chunk: &Chunk) {
        if self.state == TurnState::Idle {
            self.transition(TurnState::Streaming);
        }
        self.accumulator.append(chunk);
    }

    /// The flush clock and the error backoff are independent: both must allow it.
    fn flush_due(&self, now: Instant) -> bool {
        let interval_elapsed = now.duration_since(self.last_flush) >= self.config.flush_interval();
        let backoff_over = self.backoff_until.map_or(true, |until| now >= until);
        interval_elapsed && backoff_over
    }

    async fn flush(&mut self, text: &str) -> FlushReport {
        let resume = self.state;
        self.transition(TurnState::Flushing);

        // Telegram rejects blank messages.
        let segments = if text.trim().is_empty() {
            vec![self.config.placeholder.clone()]
        } else {
            paginate(text, self.config.max_segment_length)
        };

        let report = self.display.apply(self.sink, &segments).await;
        let now = Instant::now();
        self.flushes += 1;
        self.last_flush = now;
        if let Some(e) = &report.last_error {
            self.last_sink_error = Some(e.clone());
        }
        if report.rate_limited {
            let delay = report.retry_after.unwrap_or_else(|| self.config.error_backoff());
            debug!(delay_ms = delay.as_millis() as u64, "Display rate limited, backing off");
            self.backoff_until = Some(now + delay);
        }

        self.transition(resume);
        report
    }

    async fn wait_backoff(&self) {
        if let Some(until) = self.backoff_until {
            if until > Instant::now() {
                tokio::time::sleep_until(until).await;
            }
        }
    }

    fn final_text(&self, failure: Option<&Error>) -> String {
        match failure {
            None => self
                .accumulator
                .compose_final(&self.config.empty_response_message),
            Some(_) if self.accumulator.has_answer() => format!(
                "{}\n\n{}",
                self.accumulator.compose_final(""),
                self.config.error_message
            ),
            Some(_) => self.accumulator.compose_final(&self.config.error_message),
        }
    }

    /// Bounded final flush; fails when the display did not reach `text`.
    async fn final_flush(&mut self, text: &str) -> Result<(), Error> {
        let attempts = self.config.final_flush_attempts.max(1);
        let timeout = self.config.final_flush_timeout();

        let result = tokio::time::timeout(timeout, async {
            for attempt in 1..=attempts {
                self.wait_backoff().await;
                let report = self.flush(text).await;
                if report.converged {
                    return true;
                }
                debug!(attempt, failed = report.failed, "Final flush incomplete");
            }
            false
        })
        .await;

        match result {
            Ok(true) => Ok(()),
            Ok(false) => {
                let cause = self
                    .last_sink_error
                    .clone()
                    .unwrap_or_else(|| SinkError::transport("final flush incomplete"));
                Err(Error::Sink(cause))
            }
            Err(_) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "Final flush timed out");
                Err(Error::timeout(format!(
                    "final flush exceeded {}ms",
                    timeout.as_millis()
                )))
            }
        }
    }

    async fn finish(mut self, failure: Option<Error>) -> TurnOutcome {
        self.transition(TurnState::Finalizing);

        let text = self.final_text(failure.as_ref());
        let flushed = self.final_flush(&text).await;
        let converged = flushed.is_ok();

        let mut error = match failure {
            Some(e) => Some(e),
            None if !self.accumulator.has_answer() => Some(Error::EmptyResponse),
            None => None,
        };

        if let Err(e) = flushed {
            warn!(slots = self.display.len(), error = %e, "Display did not reach the final text");
            // The final text never reached the user.
            if matches!(error, None | Some(Error::EmptyResponse)) {
                error = Some(e);
            }
        }

        if self.display.is_empty() {
            // Nothing reached the user at all; one last plain notice.
            error!("Message sink unavailable for the whole turn");
            if let Err(e) = self.sink.send(&self.config.error_message).await {
                warn!(error = %e, "Failed to deliver error notice");
            }
        }

        let state = match &error {
            None | Some(Error::EmptyResponse) if !self.display.is_empty() => TurnState::Done,
            _ => TurnState::Errored,
        };
        self.transition(state);

        if let Some(usage) = &self.usage {
            debug!(
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                total_tokens = usage.total_tokens,
                "Token usage"
            );
        }
        info!(
            state = %state,
            converged,
            answer_chars = self.accumulator.answer().chars().count(),
            reasoning_chars = self.accumulator.reasoning().chars().count(),
            slots = self.display.len(),
            flushes = self.flushes,
            "Turn finished"
        );

        TurnOutcome {
            state,
            answer: self.accumulator.answer().to_string(),
            reasoning: self.accumulator.reasoning().to_string(),
            slots: self.display.len(),
            flushes: self.flushes,
            converged,
            usage: self.usage,
            error,
        }
    }
}
