use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SinkError;

/// Identity of one message owned by a [`MessageSink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotHandle(pub i64);

impl std::fmt::Display for SlotHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Edit-in-place message surface of a messaging platform.
///
/// Every operation may fail on its own; callers are expected to recover per
/// operation rather than abort.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn send(&self, text: &str) -> Result<SlotHandle, SinkError>;

    async fn edit(&self, handle: &SlotHandle, text: &str) -> Result<(), SinkError>;

    async fn delete(&self, handle: &SlotHandle) -> Result<(), SinkError>;
}
