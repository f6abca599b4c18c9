//! In-memory per-user conversation history.
//!
//! The store hands out one lock per user. A turn holds its user's lock from the
//! moment the user message is appended until the reply is recorded, so two
//! messages from the same user never interleave their history.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::message::{Message, Role};

/// Default number of entries kept per user.
pub const DEFAULT_MAX_ENTRIES: usize = 10;

/// Exclusive access to one user's conversation.
pub type ConversationGuard = OwnedMutexGuard<Conversation>;

/// Bounded message history of a single user.
#[derive(Debug, Clone)]
pub struct Conversation {
    messages: VecDeque<Message>,
    /// Zero means unbounded.
    max_entries: usize,
}

impl Conversation {
    pub fn new(max_entries: usize) -> Self {
        Self {
            messages: VecDeque::new(),
            max_entries,
        }
    }

    pub fn append(&mut self, role: Role, content: impl Into<String>) {
        self.push(Message::new(role, content));
    }

    /// Add a message, dropping the oldest entries beyond the bound.
    pub fn push(&mut self, message: Message) {
        self.messages.push_back(message);
        if self.max_entries > 0 && self.messages.len() > self.max_entries {
            let excess = self.messages.len() - self.max_entries;
            self.messages.drain(..excess);
            debug!(dropped = excess, "Trimmed conversation history");
        }
    }

    /// Remove the newest message if it has the given role.
    pub fn rollback(&mut self, role: Role) -> Option<Message> {
        if self.messages.back().map(|m| m.role) == Some(role) {
            self.messages.pop_back()
        } else {
            None
        }
    }

    pub fn messages(&self) -> Vec<Message> {
        self.messages.iter().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

/// Shared handle to all users' conversations.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    conversations: Arc<Mutex<HashMap<String, Arc<Mutex<Conversation>>>>>,
    max_entries: usize,
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

impl HistoryStore {
    pub fn new(max_entries: usize) -> Self {
        Self {
            conversations: Arc::new(Mutex::new(HashMap::new())),
            max_entries,
        }
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Wait for exclusive access to `user_id`'s conversation, creating it if needed.
    pub async fn lock(&self, user_id: &str) -> ConversationGuard {
        let conversation = {
            let mut map = self.conversations.lock().await;
            Arc::clone(map.entry(user_id.to_string()).or_insert_with(|| {
                debug!(user_id, "Initializing new conversation");
                Arc::new(Mutex::new(Conversation::new(self.max_entries)))
            }))
        };
        conversation.lock_owned().await
    }

    pub async fn get(&self, user_id: &str) -> Vec<Message> {
        self.lock(user_id).await.messages()
    }

    pub async fn append(&self, user_id: &str, role: Role, content: impl Into<String>) {
        self.lock(user_id).await.append(role, content);
    }

    pub async fn clear(&self, user_id: &str) {
        self.lock(user_id).await.clear();
    }

    pub async fn user_count(&self) -> usize {
        self.conversations.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_conversation_trims_oldest() {
        let mut conversation = Conversation::new(3);
        for i in 0..5 {
            conversation.append(Role::User, format!("m{i}"));
        }
        let contents: Vec<_> = conversation.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m2", "m3", "m4"]);
    }

    #[test]
    fn test_zero_bound_is_unbounded() {
        let mut conversation = Conversation::new(0);
        for i in 0..50 {
            conversation.append(Role::User, format!("m{i}"));
        }
        assert_eq!(conversation.len(), 50);
    }

    #[test]
    fn test_rollback_only_matching_role() {
        let mut conversation = Conversation::new(10);
        conversation.append(Role::User, "hi");
        assert!(conversation.rollback(Role::Assistant).is_none());
        assert_eq!(conversation.rollback(Role::User), Some(Message::user("hi")));
        assert!(conversation.is_empty());
    }

    #[tokio::test]
    async fn test_store_keeps_users_apart() {
        let store = HistoryStore::default();
        store.append("alice", Role::User, "hello").await;
        store.append("bob", Role::User, "hey").await;
        store.append("alice", Role::Assistant, "hi alice").await;

        assert_eq!(store.get("alice").await.len(), 2);
        assert_eq!(store.get("bob").await, vec![Message::user("hey")]);
        assert_eq!(store.user_count().await, 2);

        store.clear("alice").await;
        assert!(store.get("alice").await.is_empty());
    }

    #[tokio::test]
    async fn test_lock_serializes_same_user() {
        let store = HistoryStore::default();
        let guard = store.lock("alice").await;

        let other = store.clone();
        let waiter = tokio::spawn(async move {
            let mut conversation = other.lock("alice").await;
            conversation.append(Role::User, "second");
            conversation.len()
        });

        // Another user is not blocked while alice is locked.
        store.append("bob", Role::User, "independent").await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        let mut guard = guard;
        guard.append(Role::User, "first");
        drop(guard);

        assert_eq!(waiter.await.unwrap(), 2);
        let contents: Vec<_> = store
            .get("alice")
            .await
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(contents, vec!["first", "second"]);
    }
}
