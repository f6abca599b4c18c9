//! relay-core: streaming display engine for chat relays
//!
//! This crate turns a stream of completion chunks into a set of editable
//! chat messages: it classifies chunks into reasoning and answer text,
//! paginates the composed reply and reconciles it onto a message sink with
//! minimal edits, throttled and bounded so a slow or failing sink never
//! stalls the stream.

pub mod accumulator;
pub mod classifier;
pub mod config;
pub mod driver;
pub mod error;
pub mod history;
pub mod message;
pub mod paginator;
pub mod provider;
pub mod reconciler;
pub mod sink;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use accumulator::ContentAccumulator;
pub use classifier::{Chunk, ChunkClassifier, ChunkKind};
pub use config::DisplayConfig;
pub use driver::{StreamDriver, TurnOutcome, TurnState};
pub use error::{Error, SinkError};
pub use history::{Conversation, ConversationGuard, HistoryStore, DEFAULT_MAX_ENTRIES};
pub use message::{Message, Role, StreamChunk, Usage};
pub use paginator::paginate;
pub use provider::{ChatStream, CompletionRequest, StreamResult};
pub use reconciler::{reconcile, FlushReport, ReconciliationState, Slot, SlotAction};
pub use sink::{MessageSink, SlotHandle};

pub type Result<T> = std::result::Result<T, Error>;
