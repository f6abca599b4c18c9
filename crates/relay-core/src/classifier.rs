//! Tagging of streamed deltas as reasoning or answer content.

use crate::config::DisplayConfig;
use crate::message::StreamChunk;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChunkKind {
    Reasoning,
    Answer,
}

/// A unit of streamed text with its content kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub kind: ChunkKind,
    pub text: String,
}

impl Chunk {
    pub fn reasoning(text: impl Into<String>) -> Self {
        Self {
            kind: ChunkKind::Reasoning,
            text: text.into(),
        }
    }

    pub fn answer(text: impl Into<String>) -> Self {
        Self {
            kind: ChunkKind::Answer,
            text: text.into(),
        }
    }
}

/// Turns stream events into [`Chunk`]s.
///
/// An explicit tag from the upstream adapter (`ThinkingDelta` vs `Delta`) decides
/// the kind. A marker prefix at the start of a delta is stripped once; on an
/// untagged delta the reasoning marker also selects the reasoning kind.
#[derive(Debug, Clone)]
pub struct ChunkClassifier {
    reasoning_marker: String,
    answer_marker: String,
}

impl Default for ChunkClassifier {
    fn default() -> Self {
        Self::from_config(&DisplayConfig::default())
    }
}

impl ChunkClassifier {
    pub fn new(reasoning_marker: impl Into<String>, answer_marker: impl Into<String>) -> Self {
        Self {
            reasoning_marker: reasoning_marker.into(),
            answer_marker: answer_marker.into(),
        }
    }

    pub fn from_config(config: &DisplayConfig) -> Self {
        Self::new(&config.reasoning_marker, &config.answer_marker)
    }

    /// Classify a stream event. Non-text events and empty payloads yield `None`.
    pub fn classify(&self, event: StreamChunk) -> Option<Chunk> {
        let chunk = match event {
            StreamChunk::ThinkingDelta { content } => Chunk {
                text: strip(&content, &self.reasoning_marker).to_string(),
                kind: ChunkKind::Reasoning,
            },
            StreamChunk::Delta { content } => self.classify_text(&content),
            StreamChunk::Start { .. } | StreamChunk::Done { .. } | StreamChunk::Error { .. } => {
                return None
            }
        };

        if chunk.text.is_empty() {
            None
        } else {
            Some(chunk)
        }
    }

    /// Classify an untagged delta by its marker prefix.
    pub fn classify_text(&self, raw: &str) -> Chunk {
        if let Some(payload) = strip_marker(raw, &self.reasoning_marker) {
            return Chunk::reasoning(payload);
        }
        Chunk::answer(strip(raw, &self.answer_marker))
    }
}

fn strip_marker<'a>(raw: &'a str, marker: &str) -> Option<&'a str> {
    if marker.is_empty() {
        return None;
    }
    raw.strip_prefix(marker)
}

fn strip<'a>(raw: &'a str, marker: &str) -> &'a str {
    strip_marker(raw, marker).unwrap_or(raw)
}
