//! Minimal-diff mapping of segments onto live message slots.

use std::time::Duration;

use tracing::{debug, warn};

use crate::error::SinkError;
use crate::sink::{MessageSink, SlotHandle};

/// One live message and the text it currently shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub handle: SlotHandle,
    pub text: String,
}

impl Slot {
    pub fn new(handle: SlotHandle, text: impl Into<String>) -> Self {
        Self {
            handle,
            text: text.into(),
        }
    }
}

/// A single platform operation needed to converge slots with segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotAction {
    Edit { index: usize, text: String },
    Create { text: String },
    Delete { index: usize },
}

/// Diff `slots` against `segments`.
///
/// Unchanged slots produce nothing, extra segments are created in order and
/// surplus slots are deleted highest index first.
pub fn reconcile(slots: &[Slot], segments: &[String]) -> Vec<SlotAction> {
    let mut actions = Vec::new();

    for (index, (slot, segment)) in slots.iter().zip(segments).enumerate() {
        if slot.text != *segment {
            actions.push(SlotAction::Edit {
                index,
                text: segment.clone(),
            });
        }
    }

    if segments.len() > slots.len() {
        actions.extend(
            segments[slots.len()..]
                .iter()
                .map(|text| SlotAction::Create { text: text.clone() }),
        );
    }

    if slots.len() > segments.len() {
        actions.extend(
            (segments.len()..slots.len())
                .rev()
                .map(|index| SlotAction::Delete { index }),
        );
    }

    actions
}

/// Outcome of applying one diff to the sink.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub attempted: usize,
    pub failed: usize,
    /// Slots equal the segments after the flush.
    pub converged: bool,
    pub rate_limited: bool,
    /// Largest retry hint returned by the sink.
    pub retry_after: Option<Duration>,
    pub last_error: Option<SinkError>,
}

impl FlushReport {
    fn record_failure(&mut self, err: &SinkError) {
        self.failed += 1;
        self.last_error = Some(err.clone());
        if let SinkError::RateLimited { retry_after } = err {
            self.rate_limited = true;
            self.retry_after = match (self.retry_after, *retry_after) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => a.or(b),
            };
        }
    }
}

/// Display state of one turn: the slots as last successfully observed.
#[derive(Debug, Clone, Default)]
pub struct ReconciliationState {
    slots: Vec<Slot>,
}

impl ReconciliationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Register a message sent outside of [`apply`](Self::apply), e.g. a placeholder.
    pub fn push(&mut self, slot: Slot) {
        self.slots.push(slot);
    }

    pub fn matches(&self, segments: &[String]) -> bool {
        self.slots.len() == segments.len()
            && self.slots.iter().zip(segments).all(|(s, seg)| s.text == *seg)
    }

    /// Converge the sink with `segments`, recovering from each failure locally.
    ///
    /// A failed edit leaves the slot as it was. A failed create or delete stops
    /// the remaining operations of that kind so the slots stay contiguous; the
    /// next call recomputes the diff from what actually succeeded.
    pub async fn apply(&mut self, sink: &dyn MessageSink, segments: &[String]) -> FlushReport {
        let actions = reconcile(&self.slots, segments);
        let mut report = FlushReport::default();
        let mut creates_blocked = false;
        let mut deletes_blocked = false;

        for action in actions {
            match action {
                SlotAction::Edit { index, text } => {
                    report.attempted += 1;
                    let handle = self.slots[index].handle;
                    match sink.edit(&handle, &text).await {
                        Ok(()) | Err(SinkError::NotModified) => self.slots[index].text = text,
                        Err(e) => {
                            warn!(slot = index, message_id = %handle, error = %e, "Edit failed");
                            report.record_failure(&e);
                        }
                    }
                }
                SlotAction::Create { text } => {
                    if creates_blocked {
                        continue;
                    }
                    report.attempted += 1;
                    match sink.send(&text).await {
                        Ok(handle) => self.slots.push(Slot::new(handle, text)),
                        Err(e) => {
                            warn!(slot = self.slots.len(), error = %e, "Send failed");
                            report.record_failure(&e);
                            creates_blocked = true;
                        }
                    }
                }
                SlotAction::Delete { index } => {
                    if deletes_blocked {
                        continue;
                    }
                    report.attempted += 1;
                    let handle = self.slots[index].handle;
                    match sink.delete(&handle).await {
                        Ok(()) | Err(SinkError::NotFound) => self.slots.truncate(index),
                        Err(e) => {
                            warn!(slot = index, message_id = %handle, error = %e, "Delete failed");
                            report.record_failure(&e);
                            deletes_blocked = true;
                        }
                    }
                }
            }
        }

        report.converged = self.matches(segments);
        debug!(
            attempted = report.attempted,
            failed = report.failed,
            slots = self.slots.len(),
            converged = report.converged,
            "Reconciled slots"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingSink, SinkOp};

    fn slots(texts: &[&str]) -> Vec<Slot> {
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| Slot::new(SlotHandle(i as i64 + 1), *t))
            .collect()
    }

    fn segs(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_unchanged_segments_produce_no_actions() {
        let current = slots(&["a", "b"]);
        assert!(reconcile(&current, &segs(&["a", "b"])).is_empty());
    }

    #[test]
    fn test_last_segment_change_is_single_edit() {
        let current = slots(&["a", "b", "c"]);
        let actions = reconcile(&current, &segs(&["a", "b", "c!"]));
        assert_eq!(
            actions,
            vec![SlotAction::Edit {
                index: 2,
                text: "c!".to_string()
            }]
        );
    }

    #[test]
    fn test_growth_edits_then_creates() {
        let current = slots(&["Thinking..."]);
        let actions = reconcile(&current, &segs(&["seg0", "seg1"]));
        assert_eq!(
            actions,
            vec![
                SlotAction::Edit {
                    index: 0,
                    text: "seg0".to_string()
                },
                SlotAction::Create {
                    text: "seg1".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_shrink_deletes_in_reverse() {
        let current = slots(&["s0", "s1", "s2"]);
        let actions = reconcile(&current, &segs(&["seg0"]));
        assert_eq!(
            actions,
            vec![
                SlotAction::Edit {
                    index: 0,
                    text: "seg0".to_string()
                },
                SlotAction::Delete { index: 2 },
                SlotAction::Delete { index: 1 },
            ]
        );
    }

    #[test]
    fn test_empty_slots_create_everything() {
        let actions = reconcile(&[], &segs(&["x", "y"]));
        assert_eq!(actions.len(), 2);
        assert!(actions
            .iter()
            .all(|a| matches!(a, SlotAction::Create { .. })));
    }

    #[tokio::test]
    async fn test_apply_twice_is_idempotent() {
        let sink = RecordingSink::new();
        let mut state = ReconciliationState::new();
        let segments = segs(&["one", "two"]);

        let report = state.apply(&sink, &segments).await;
        assert!(report.converged);
        assert_eq!(report.attempted, 2);

        let report = state.apply(&sink, &segments).await;
        assert_eq!(report.attempted, 0);
        assert_eq!(sink.ops().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_edit_is_retried_next_flush() {
        let sink = RecordingSink::new();
        let mut state = ReconciliationState::new();
        state.apply(&sink, &segs(&["draft"])).await;

        sink.fail_next_edit(SinkError::rate_limited(Some(Duration::from_secs(2))));
        let report = state.apply(&sink, &segs(&["final"])).await;
        assert!(!report.converged);
        assert!(report.rate_limited);
        assert_eq!(report.retry_after, Some(Duration::from_secs(2)));
        assert_eq!(state.slots()[0].text, "draft");

        let report = state.apply(&sink, &segs(&["final"])).await;
        assert!(report.converged);
        assert_eq!(sink.visible(), vec!["final".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_create_stops_later_creates() {
        let sink = RecordingSink::new();
        let mut state = ReconciliationState::new();
        sink.fail_next_send(SinkError::transport("connection reset"));

        let segments = segs(&["a", "b", "c"]);
        let report = state.apply(&sink, &segments).await;
        assert_eq!(report.attempted, 1);
        assert_eq!(report.failed, 1);
        assert!(state.is_empty());

        let report = state.apply(&sink, &segments).await;
        assert!(report.converged);
        assert_eq!(sink.visible(), segments);
    }

    #[tokio::test]
    async fn test_not_modified_and_not_found_count_as_success() {
        let sink = RecordingSink::new();
        let mut state = ReconciliationState::new();
        state.apply(&sink, &segs(&["a", "b"])).await;

        sink.fail_next_edit(SinkError::NotModified);
        sink.fail_next_delete(SinkError::NotFound);
        let report = state.apply(&sink, &segs(&["a2"])).await;
        assert_eq!(report.failed, 0);
        assert!(report.converged);
        assert_eq!(state.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_delete_keeps_slot() {
        let sink = RecordingSink::new();
        let mut state = ReconciliationState::new();
        state.apply(&sink, &segs(&["a", "b", "c"])).await;

        sink.fail_next_delete(SinkError::rejected("forbidden"));
        let report = state.apply(&sink, &segs(&["a"])).await;
        assert_eq!(report.failed, 1);
        assert_eq!(state.len(), 3);
        assert!(matches!(
            sink.ops().last(),
            Some(SinkOp::Delete { .. })
        ));

        let report = state.apply(&sink, &segs(&["a"])).await;
        assert!(report.converged);
        assert_eq!(sink.visible(), segs(&["a"]));
    }
}
