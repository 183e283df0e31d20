// SPDX-License-Identifier: MIT OR Apache-2.0
//! The checkpoint envelope: enough state to resume a run exactly where it
//! left off, including idempotent command replay.

use crate::plan::PlanDag;
use crate::runtime::RuntimeRoot;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Schema string for a checkpoint document.
pub const CHECKPOINT_SCHEMA: &str = "ais-engine-checkpoint/0.0.2";

/// Poll/retry progress for a single node with an `until` clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
pub struct PollState {
    /// Attempts made so far.
    pub attempts: u32,
    /// Wall-clock ms when polling started.
    pub started_at_ms: u64,
    /// Wall-clock ms of the next scheduled attempt, if still pending.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_attempt_at_ms: Option<u64>,
}

/// Why and when a node was paused awaiting a `user_confirm` command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PauseState {
    /// Human-readable pause reason.
    pub reason: String,
    /// Structured details (e.g. the compiled confirmation template).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    /// Wall-clock ms when the node paused.
    pub paused_at_ms: u64,
}

/// Extension data carried in the checkpoint envelope for forward
/// compatibility and idempotent command replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
pub struct CheckpointExtensions {
    /// Idempotency state for the command channel.
    #[serde(default)]
    pub runner_command_state: RunnerCommandState,
}

/// Command ids already applied, so replaying the same command stream after
/// a resume is a no-op for commands already processed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
pub struct RunnerCommandState {
    /// Command ids processed so far, in the order they were accepted.
    #[serde(default)]
    pub processed_command_ids: Vec<String>,
}

impl RunnerCommandState {
    /// Whether `id` has already been processed.
    #[must_use]
    pub fn has_processed(&self, id: &str) -> bool {
        self.processed_command_ids.iter().any(|seen| seen == id)
    }

    /// Record `id` as processed.
    pub fn mark_processed(&mut self, id: impl Into<String>) {
        self.processed_command_ids.push(id.into());
    }
}

/// A schema-versioned snapshot of an in-flight run, sufficient to resume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Checkpoint {
    /// Always [`CHECKPOINT_SCHEMA`].
    pub schema: String,
    /// The compiled plan this run is executing.
    pub plan: PlanDag,
    /// The Runtime Root at the moment of checkpointing.
    pub runtime: RuntimeRoot,
    /// Node ids that have reached `completed`.
    #[serde(default)]
    pub completed_node_ids: BTreeSet<String>,
    /// Poll state for nodes currently retrying.
    #[serde(default)]
    pub poll_state_by_node_id: BTreeMap<String, PollState>,
    /// Pause state for nodes currently paused.
    #[serde(default)]
    pub paused_by_node_id: BTreeMap<String, PauseState>,
    /// Forward-compatible extension bag.
    #[serde(default)]
    pub extensions: CheckpointExtensions,
}

impl Checkpoint {
    /// Construct a fresh checkpoint for a plan that has not yet begun
    /// executing.
    #[must_use]
    pub fn new(plan: PlanDag, runtime: RuntimeRoot) -> Self {
        Self {
            schema: CHECKPOINT_SCHEMA.to_string(),
            plan,
            runtime,
            completed_node_ids: BTreeSet::new(),
            poll_state_by_node_id: BTreeMap::new(),
            paused_by_node_id: BTreeMap::new(),
            extensions: CheckpointExtensions::default(),
        }
    }

    /// Whether this checkpoint's schema string matches the version this
    /// crate understands.
    #[must_use]
    pub fn schema_supported(&self) -> bool {
        self.schema == CHECKPOINT_SCHEMA
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::PlanDag;

    #[test]
    fn new_checkpoint_has_expected_schema_and_empty_state() {
        let cp = Checkpoint::new(PlanDag::new(vec![]), RuntimeRoot::new());
        assert_eq!(cp.schema, CHECKPOINT_SCHEMA);
        assert!(cp.schema_supported());
        assert!(cp.completed_node_ids.is_empty());
        assert!(cp.poll_state_by_node_id.is_empty());
        assert!(cp.paused_by_node_id.is_empty());
        assert!(cp.extensions.runner_command_state.processed_command_ids.is_empty());
    }

    #[test]
    fn schema_supported_false_for_foreign_schema() {
        let mut cp = Checkpoint::new(PlanDag::new(vec![]), RuntimeRoot::new());
        cp.schema = "ais-engine-checkpoint/0.0.1".to_string();
        assert!(!cp.schema_supported());
    }

    #[test]
    fn runner_command_state_tracks_processed_ids() {
        let mut state = RunnerCommandState::default();
        assert!(!state.has_processed("cmd-1"));
        state.mark_processed("cmd-1");
        assert!(state.has_processed("cmd-1"));
        assert!(!state.has_processed("cmd-2"));
    }

    #[test]
    fn checkpoint_roundtrips_through_json() {
        let cp = Checkpoint::new(PlanDag::new(vec![]), RuntimeRoot::new());
        let json = serde_json::to_string(&cp).unwrap();
        let back: Checkpoint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cp);
    }
}
