// SPDX-License-Identifier: MIT OR Apache-2.0
//! Building [`EventEnvelope`]s with a monotonically increasing `seq`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use serde_json::Value as Json;

use crate::envelope::{Event, EventEnvelope, EventExtensions, EventKind, EVENT_SCHEMA};
use crate::redact::RedactionMode;

/// Stamps every event it builds with the same `run_id`, a shared,
/// monotonically increasing `seq` (§5: "totally ordered by a
/// monotonically increasing `seq`"), and the current wall-clock time.
///
/// Cheap to clone — the sequence counter is shared via `Arc` so every
/// clone of an `EventSink` still participates in the same ordering.
#[derive(Debug, Clone)]
pub struct EventSink {
    run_id: String,
    seq: Arc<AtomicU64>,
    redaction_mode: RedactionMode,
}

impl EventSink {
    /// Create a sink for `run_id` starting its sequence at zero.
    #[must_use]
    pub fn new(run_id: impl Into<String>, redaction_mode: RedactionMode) -> Self {
        Self { run_id: run_id.into(), seq: Arc::new(AtomicU64::new(0)), redaction_mode }
    }

    /// Resume a sink whose sequence counter must continue from a
    /// checkpointed value rather than restart at zero.
    #[must_use]
    pub fn resume(run_id: impl Into<String>, redaction_mode: RedactionMode, next_seq: u64) -> Self {
        Self { run_id: run_id.into(), seq: Arc::new(AtomicU64::new(next_seq)), redaction_mode }
    }

    /// Build an envelope for `kind`/`data`, with no associated node.
    #[must_use]
    pub fn emit(&self, kind: EventKind, data: Json) -> EventEnvelope {
        self.envelope(Event::new(kind, data))
    }

    /// Build an envelope for `kind`/`data`, associated with `node_id`.
    #[must_use]
    pub fn emit_for_node(&self, kind: EventKind, node_id: impl Into<String>, data: Json) -> EventEnvelope {
        self.envelope(Event::for_node(kind, node_id, data))
    }

    fn envelope(&self, event: Event) -> EventEnvelope {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        EventEnvelope {
            schema: EVENT_SCHEMA.to_string(),
            run_id: self.run_id.clone(),
            seq,
            ts: Utc::now(),
            event,
            extensions: EventExtensions { redaction_mode: self.redaction_mode },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sequence_increases_monotonically_across_emits() {
        let sink = EventSink::new("run-1", RedactionMode::Default);
        let a = sink.emit(EventKind::PlanReady, json!({}));
        let b = sink.emit_for_node(EventKind::NodeReady, "swap1", json!({}));
        assert_eq!(a.seq, 0);
        assert_eq!(b.seq, 1);
        assert_eq!(b.event.node_id.as_deref(), Some("swap1"));
    }

    #[test]
    fn clones_share_the_same_counter() {
        let sink = EventSink::new("run-1", RedactionMode::Off);
        let clone = sink.clone();
        let a = sink.emit(EventKind::PlanReady, json!({}));
        let b = clone.emit(EventKind::PlanReady, json!({}));
        assert_eq!((a.seq, b.seq), (0, 1));
    }

    #[test]
    fn resume_continues_from_a_checkpointed_seq() {
        let sink = EventSink::resume("run-1", RedactionMode::Default, 7);
        let e = sink.emit(EventKind::CheckpointSaved, json!({}));
        assert_eq!(e.seq, 7);
    }
}
