//! Display settings for streamed replies.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for how a streamed turn is rendered into messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayConfig {
    /// Maximum characters (Unicode scalar values) per message segment. Platforms
    /// that count UTF-16 units, like Telegram, need headroom for emoji.
    #[serde(default = "default_max_segment_length")]
    pub max_segment_length: usize,

    /// Minimum time between two periodic flushes (milliseconds).
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    /// Pause after a rate-limited flush when the platform gives no hint (milliseconds).
    #[serde(default = "default_error_backoff_ms")]
    pub error_backoff_ms: u64,

    /// Upper bound for the final flush, retries included (milliseconds).
    #[serde(default = "default_final_flush_timeout_ms")]
    pub final_flush_timeout_ms: u64,

    /// Attempts made by the final flush before giving up.
    #[serde(default = "default_final_flush_attempts")]
    pub final_flush_attempts: u32,

    /// Text shown while nothing has been streamed yet.
    #[serde(default = "default_placeholder")]
    pub placeholder: String,

    /// Shown when the stream finished without answer content.
    #[serde(default = "default_empty_response_message")]
    pub empty_response_message: String,

    /// Shown once when the turn failed.
    #[serde(default = "default_error_message")]
    pub error_message: String,

    #[serde(default = "default_reasoning_label")]
    pub reasoning_label: String,

    #[serde(default = "default_answer_label")]
    pub answer_label: String,

    /// Prefix marking a raw delta as reasoning; stripped before storage.
    #[serde(default = "default_reasoning_marker")]
    pub reasoning_marker: String,

    /// Prefix marking a raw delta as answer; stripped before storage.
    #[serde(default = "default_answer_marker")]
    pub answer_marker: String,
}

fn default_max_segment_length() -> usize {
    4000 // Telegram allows 4096
}

fn default_flush_interval_ms() -> u64 {
    1500
}

fn default_error_backoff_ms() -> u64 {
    3000
}

fn default_final_flush_timeout_ms() -> u64 {
    10_000
}

fn default_final_flush_attempts() -> u32 {
    3
}

fn default_placeholder() -> String {
    "Thinking...".to_string()
}

fn default_empty_response_message() -> String {
    "Sorry, I was unable to produce a reply.".to_string()
}

fn default_error_message() -> String {
    "Sorry, something went wrong. Please try again.".to_string()
}

fn default_reasoning_label() -> String {
    "Reasoning:".to_string()
}

fn default_answer_label() -> String {
    "Answer:".to_string()
}

fn default_reasoning_marker() -> String {
    "reasoning: ".to_string()
}

fn default_answer_marker() -> String {
    "answer: ".to_string()
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            max_segment_length: default_max_segment_length(),
            flush_interval_ms: default_flush_interval_ms(),
            error_backoff_ms: default_error_backoff_ms(),
            final_flush_timeout_ms: default_final_flush_timeout_ms(),
            final_flush_attempts: default_final_flush_attempts(),
            placeholder: default_placeholder(),
            empty_response_message: default_empty_response_message(),
            error_message: default_error_message(),
            reasoning_label: default_reasoning_label(),
            answer_label: default_answer_label(),
            reasoning_marker: default_reasoning_marker(),
            answer_marker: default_answer_marker(),
        }
    }
}

impl DisplayConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_segment_length(mut self, max_segment_length: usize) -> Self {
        self.max_segment_length = max_segment_length;
        self
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff_ms = backoff.as_millis() as u64;
        self
    }

    pub fn with_final_flush_timeout(mut self, timeout: Duration) -> Self {
        self.final_flush_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_final_flush_attempts(mut self, attempts: u32) -> Self {
        self.final_flush_attempts = attempts;
        self
    }

    pub fn with_placeholder(mut self, placeholder: impl Into<String>) -> Self {
        self.placeholder = placeholder.into();
        self
    }

    pub fn with_empty_response_message(mut self, message: impl Into<String>) -> Self {
        self.empty_response_message = message.into();
        self
    }

    pub fn with_error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = message.into();
        self
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    pub fn final_flush_timeout(&self) -> Duration {
        Duration::from_millis(self.final_flush_timeout_ms)
    }
}
