//! Routing of `<think>...</think>` spans embedded in answer content.
//!
//! Some OpenAI-compatible servers (vLLM, Ollama serving R1 distills) never fill
//! `reasoning_content` and inline the reasoning into `content` instead. Tags may
//! be split across deltas, so the splitter holds back any tail that could be
//! the start of a tag until the next delta decides it.

use relay_core::StreamChunk;

const OPEN_TAG: &str = "<think>";
const CLOSE_TAG: &str = "</think>";

#[derive(Debug, Default)]
pub struct ThinkTagSplitter {
    in_think: bool,
    pending: String,
}

impl ThinkTagSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one content delta, returning the chunks that are now certain.
    pub fn push(&mut self, content: &str) -> Vec<StreamChunk> {
        self.pending.push_str(content);
        let mut chunks = Vec::new();

        loop {
            let tag = if self.in_think { CLOSE_TAG } else { OPEN_TAG };
            match self.pending.find(tag) {
                Some(pos) => {
                    let before: String = self.pending.drain(..pos).collect();
                    self.pending.drain(..tag.len());
                    self.emit(&mut chunks, before);
                    self.in_think = !self.in_think;
                }
                None => {
                    let keep = partial_tag_len(&self.pending, tag);
                    let ready: String = self
                        .pending
                        .drain(..self.pending.len() - keep)
                        .collect();
                    self.emit(&mut chunks, ready);
                    break;
                }
            }
        }

        chunks
    }

    /// Release whatever is still held back at end of stream.
    pub fn finish(&mut self) -> Vec<StreamChunk> {
        let rest = std::mem::take(&mut self.pending);
        let mut chunks = Vec::new();
        self.emit(&mut chunks, rest);
        chunks
    }

    fn emit(&self, chunks: &mut Vec<StreamChunk>, text: String) {
        if text.is_empty() {
            return;
        }
        chunks.push(if self.in_think {
            StreamChunk::thinking(text)
        } else {
            StreamChunk::delta(text)
        });
    }
}

/// Length of the longest suffix of `text` that is a proper prefix of `tag`.
fn partial_tag_len(text: &str, tag: &str) -> usize {
    (1..tag.len())
        .rev()
        .find(|&n| text.ends_with(&tag[..n]))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(deltas: &[&str]) -> Vec<StreamChunk> {
        let mut splitter = ThinkTagSplitter::new();
        let mut chunks: Vec<_> = deltas.iter().flat_map(|d| splitter.push(d)).collect();
        chunks.extend(splitter.finish());
        chunks
    }

    #[test]
    fn test_plain_content_passes_through() {
        assert_eq!(collect(&["Hello", " world"]), vec![
            StreamChunk::delta("Hello"),
            StreamChunk::delta(" world"),
        ]);
    }

    #[test]
    fn test_think_span_in_one_delta() {
        assert_eq!(collect(&["<think>hmm</think>Hi"]), vec![
            StreamChunk::thinking("hmm"),
            StreamChunk::delta("Hi"),
        ]);
    }

    #[test]
    fn test_tag_split_across_deltas() {
        assert_eq!(collect(&["<thi", "nk>a", "b</th", "ink>c"]), vec![
            StreamChunk::thinking("a"),
            StreamChunk::thinking("b"),
            StreamChunk::delta("c"),
        ]);
    }

    #[test]
    fn test_lone_angle_bracket_released_at_finish() {
        assert_eq!(collect(&["a <"]), vec![
            StreamChunk::delta("a "),
            StreamChunk::delta("<"),
        ]);
    }

    #[test]
    fn test_unclosed_think_stays_reasoning() {
        assert_eq!(collect(&["<think>still going"]), vec![StreamChunk::thinking("still going")]);
    }

    #[test]
    fn test_partial_tag_len() {
        assert_eq!(partial_tag_len("abc<th", OPEN_TAG), 3);
        assert_eq!(partial_tag_len("abc", OPEN_TAG), 0);
        assert_eq!(partial_tag_len("x<", CLOSE_TAG), 1);
        assert_eq!(partial_tag_len("x</", CLOSE_TAG), 2);
    }
}
