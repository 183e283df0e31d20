// SPDX-License-Identifier: MIT OR Apache-2.0
//! The event and command envelopes carried over the JSONL streams.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use ais_core::RuntimePatch;

use crate::redact::RedactionMode;

/// Schema tag stamped on every [`EventEnvelope`].
pub const EVENT_SCHEMA: &str = "ais-engine-event/0.0.3";

/// The closed set of event types the engine emits.
///
/// Serializes to its `snake_case` wire form (e.g. `"need_user_confirm"`).
/// Adding a variant here is a wire-format change, not a detail left to
/// whatever strings a call site happens to pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// The plan DAG compiled successfully and scheduling may begin.
    PlanReady,
    /// A node's dependencies are satisfied; it has entered the ready queue.
    NodeReady,
    /// A node cannot proceed: an unresolved `ref`, failed `cel`, or
    /// unsupported `detect`.
    NodeBlocked,
    /// A node is paused pending user confirmation.
    NodePaused,
    /// The solver resolved a blocked node and a value was written back.
    SolverApplied,
    /// A query executor returned a result.
    QueryResult,
    /// A write executor prepared a transaction/instruction but has not sent it.
    TxPrepared,
    /// Policy requires interactive approval before a write proceeds.
    NeedUserConfirm,
    /// A prepared transaction/instruction was broadcast.
    TxSent,
    /// A broadcast transaction/instruction reached its expected confirmation state.
    TxConfirmed,
    /// A retrying read-kind node is waiting before its next attempt.
    NodeWaiting,
    /// The engine paused scheduling (cancellation or exhausted readiness).
    EnginePaused,
    /// A node was skipped because its `condition` evaluated false.
    Skipped,
    /// A node failed terminally.
    Error,
    /// A checkpoint was written to durable storage.
    CheckpointSaved,
    /// A command envelope was accepted and applied.
    CommandAccepted,
    /// A command envelope was rejected.
    CommandRejected,
    /// A runtime patch was applied.
    PatchApplied,
    /// A runtime patch was rejected by the patch guard.
    PatchRejected,
}

/// The inner event payload: a closed `type` tag, an optional originating
/// node, and a free-form `data` body whose shape is determined by `kind`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// The event's type tag.
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// The plan node this event concerns, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    /// Event-specific data. Shape depends on `kind`.
    #[serde(default)]
    pub data: Json,
}

impl Event {
    /// Construct an event with the given kind and data, with no associated node.
    #[must_use]
    pub fn new(kind: EventKind, data: Json) -> Self {
        Self { kind, node_id: None, data }
    }

    /// Construct an event associated with `node_id`.
    #[must_use]
    pub fn for_node(kind: EventKind, node_id: impl Into<String>, data: Json) -> Self {
        Self { kind, node_id: Some(node_id.into()), data }
    }
}

/// Forwards-compatible extension fields carried on an [`EventEnvelope`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventExtensions {
    /// The redaction mode applied to this event's `data` before it was
    /// written to the stream.
    #[serde(default)]
    pub redaction_mode: RedactionMode,
}

/// The full JSONL event envelope: `{schema, run_id, seq, ts, event,
/// extensions}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Always [`EVENT_SCHEMA`] for events produced by this crate.
    pub schema: String,
    /// The run this event belongs to.
    pub run_id: String,
    /// Monotonically increasing sequence number, unique per run.
    pub seq: u64,
    /// Wall-clock time the event was emitted.
    pub ts: DateTime<Utc>,
    /// The event payload.
    pub event: Event,
    /// Forwards-compatible extensions.
    #[serde(default)]
    pub extensions: EventExtensions,
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// The four kinds of command the control channel accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    /// Apply a batch of runtime patches.
    ApplyPatches,
    /// Approve or reject a paused node's pending confirmation.
    UserConfirm,
    /// Resolve a `detect` value-ref with an explicit provider choice.
    SelectProvider,
    /// Cancel the run, or a single node within it.
    Cancel,
}

/// Payload for [`CommandKind::ApplyPatches`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyPatchesPayload {
    /// The patches to apply, in order.
    pub patches: Vec<RuntimePatch>,
}

/// Payload for [`CommandKind::UserConfirm`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserConfirmPayload {
    /// The paused node this confirmation is for.
    pub node_id: String,
    /// Whether the user approved the pending action. Only `true` triggers a
    /// re-run; `false` leaves the node paused.
    pub approve: bool,
}

/// Payload for [`CommandKind::SelectProvider`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectProviderPayload {
    /// The node whose `detect` the override applies to, if scoped to one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    /// The `detect` kind being resolved (e.g. `"choose_one"`).
    pub detect_kind: String,
    /// The provider the user selected.
    pub provider: String,
    /// The chain this override is scoped to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain: Option<String>,
}

/// Payload for [`CommandKind::Cancel`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelPayload {
    /// The node to cancel, or the whole run if absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    /// Human-readable cancellation reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// A command's kind and its correspondingly typed payload.
///
/// Not derived on [`CommandEnvelope`] directly (an externally-tagged enum
/// combined with `#[serde(flatten)]` has well-known rough edges in
/// `serde`'s adjacently-tagged-enum support); instead the envelope keeps
/// `kind`/`payload` as plain fields — which also preserves the raw
/// `payload` JSON untouched for the command's audit hash — and
/// [`CommandEnvelope::command`] decodes it into this type on demand.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum Command {
    /// See [`ApplyPatchesPayload`].
    ApplyPatches(ApplyPatchesPayload),
    /// See [`UserConfirmPayload`].
    UserConfirm(UserConfirmPayload),
    /// See [`SelectProviderPayload`].
    SelectProvider(SelectProviderPayload),
    /// See [`CancelPayload`].
    Cancel(CancelPayload),
}

impl Command {
    /// The [`CommandKind`] this command carries.
    #[must_use]
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::ApplyPatches(_) => CommandKind::ApplyPatches,
            Self::UserConfirm(_) => CommandKind::UserConfirm,
            Self::SelectProvider(_) => CommandKind::SelectProvider,
            Self::Cancel(_) => CommandKind::Cancel,
        }
    }
}

/// The full command-channel envelope: `{id, ts, kind, payload,
/// extensions?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandEnvelope {
    /// Unique id used for duplicate suppression across replay.
    pub id: String,
    /// When the command was issued.
    pub ts: DateTime<Utc>,
    /// The command kind.
    pub kind: CommandKind,
    /// The raw payload, kept untouched so a stable hash can be computed
    /// over exactly the bytes that arrived.
    pub payload: Json,
    /// Forwards-compatible extensions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Json>,
}

impl CommandEnvelope {
    /// Decode `kind`/`payload` into a typed [`Command`].
    ///
    /// # Errors
    ///
    /// Returns a [`serde_json::Error`] if `payload` doesn't match the
    /// shape `kind` expects.
    pub fn command(&self) -> Result<Command, serde_json::Error> {
        let tagged = serde_json::json!({ "kind": self.kind, "payload": self.payload.clone() });
        serde_json::from_value(tagged)
    }
}
