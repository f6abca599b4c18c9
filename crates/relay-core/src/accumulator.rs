//! Per-turn reasoning and answer buffers.

use crate::classifier::{Chunk, ChunkKind};
use crate::config::DisplayConfig;

/// Growing buffers for one in-flight turn.
///
/// Buffers only ever grow; empty chunks are ignored.
#[derive(Debug, Clone)]
pub struct ContentAccumulator {
    reasoning: String,
    answer: String,
    reasoning_label: String,
    answer_label: String,
    placeholder: String,
}

impl Default for ContentAccumulator {
    fn default() -> Self {
        Self::from_config(&DisplayConfig::default())
    }
}

impl ContentAccumulator {
    pub fn from_config(config: &DisplayConfig) -> Self {
        Self {
            reasoning: String::new(),
            answer: String::new(),
            reasoning_label: config.reasoning_label.clone(),
            answer_label: config.answer_label.clone(),
            placeholder: config.placeholder.clone(),
        }
    }

    pub fn append(&mut self, chunk: &Chunk) {
        match chunk.kind {
            ChunkKind::Reasoning => self.reasoning.push_str(&chunk.text),
            ChunkKind::Answer => self.answer.push_str(&chunk.text),
        }
    }

    pub fn reasoning(&self) -> &str {
        &self.reasoning
    }

    pub fn answer(&self) -> &str {
        &self.answer
    }

    pub fn is_empty(&self) -> bool {
        self.reasoning.is_empty() && self.answer.is_empty()
    }

    /// Whitespace alone does not count as an answer.
    pub fn has_answer(&self) -> bool {
        !self.answer.trim().is_empty()
    }

    /// Current display text, or the placeholder while nothing has arrived.
    pub fn compose(&self) -> String {
        if self.is_empty() {
            return self.placeholder.clone();
        }
        self.render(&self.answer)
    }

    /// Display text for the end of a turn; a missing answer shows `fallback`.
    pub fn compose_final(&self, fallback: &str) -> String {
        if !self.has_answer() {
            self.render(fallback)
        } else {
            self.render(&self.answer)
        }
    }

    fn render(&self, answer: &str) -> String {
        if self.reasoning.is_empty() {
            return answer.to_string();
        }

        // The reasoning block is always followed by a blank separator line.
        let mut out = format!("{}\n{}\n\n", self.reasoning_label, self.reasoning);
        if !answer.is_empty() {
            out.push_str(&self.answer_label);
            out.push('\n');
            out.push_str(answer);
        }
        out
    }
}
