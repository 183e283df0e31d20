// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! ais-core
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The stable data model shared by every other crate in this workspace:
//! chain identifiers, the `ValueRef` binding language, the Plan DAG, the
//! Runtime Root, patch operations, checkpoints, and the document kinds
//! (`Protocol`, `Pack`, `Workflow`) the compiler consumes.
//!
//! If you only take one dependency, take this one.

/// CAIP-2 chain identifiers and chain-pattern matching.
pub mod chain;
/// The checkpoint envelope used to resume an in-flight run.
pub mod checkpoint;
/// `Protocol`, `Pack`, and `Workflow` document types.
pub mod docs;
/// Patch operations against the Runtime Root, and the guard restricting
/// which paths they may target.
pub mod patch;
/// The compiled Plan DAG: `PlanNode`, `ExecutionSpec`, write targets.
pub mod plan;
/// The Runtime Root, the in-memory tree every node reads from and writes
/// to.
pub mod runtime;
/// The `ValueRef` binding language: `lit`, `ref`, `cel`, `detect`,
/// `object`, `array`.
pub mod value;
/// Validation and default-filling for workflow inputs.
pub mod workflow_validate;

use serde::Serialize;
use sha2::{Digest, Sha256};

pub use chain::{ChainId, ChainPattern, InvalidChainId, select_execution_key};
pub use checkpoint::{
    CHECKPOINT_SCHEMA, Checkpoint, CheckpointExtensions, PauseState, PollState,
    RunnerCommandState,
};
pub use docs::{
    Action, ActionOverride, ApprovalPolicy, CalculatedFieldSpec, DetectProviderEntry, Deployment,
    HardConstraint, PACK_SCHEMA, Pack, PackInclude, PackPolicy, PROTOCOL_SCHEMA, ParamSpec,
    PluginEntry, Protocol, ProtocolImport, ProtocolMeta, Query, TokenPolicy, WORKFLOW_SCHEMA,
    Workflow, WorkflowInputSpec, WorkflowMeta, WorkflowNode,
};
pub use patch::{DEFAULT_ALLOWED_ROOTS, PatchGuard, PatchOp, PatchRejection, RuntimePatch};
pub use plan::{
    BackoffKind, CompositeStep, ExecutionSpec, PLAN_SCHEMA, PlanDag, PlanNode, PlanNodeKind,
    PlanNodeSource, PlanWrite, RetrySpec, WriteMode,
};
pub use runtime::{ROOT_CHILDREN, RootPathError, RuntimeRoot};
pub use value::{DetectSpec, ValueRef};
pub use workflow_validate::{WorkflowValidator, WorkflowWarning, resolve_inputs};

/// Error serializing a value to its canonical JSON form.
#[derive(Debug, thiserror::Error)]
pub enum CanonicalizeError {
    /// JSON serialization failed.
    #[error("failed to serialize JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Produce a deterministic JSON string for hashing.
///
/// Not a full JCS implementation, but stable for the types in this crate:
/// keys are sorted (`serde_json::Map` is a `BTreeMap` by default) and
/// numbers serialize consistently.
///
/// # Errors
///
/// Returns [`CanonicalizeError::Json`] if `value` cannot be serialized.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, CanonicalizeError> {
    let v = serde_json::to_value(value)?;
    Ok(serde_json::to_string(&v)?)
}

/// Compute the hex-encoded SHA-256 digest of `bytes`.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Compute a stable hash over a [`RuntimePatch`] batch, as surfaced in a
/// command channel's `patch_summary` audit field.
///
/// # Errors
///
/// Returns [`CanonicalizeError::Json`] if the patches cannot be serialized.
pub fn patch_batch_hash(patches: &[RuntimePatch]) -> Result<String, CanonicalizeError> {
    let json = canonical_json(&patches)?;
    Ok(sha256_hex(json.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_json_sorts_keys() {
        let v = json!({"b": 1, "a": 2});
        let s = canonical_json(&v).unwrap();
        assert_eq!(s, r#"{"a":2,"b":1}"#);
    }

    #[test]
    fn sha256_hex_is_stable() {
        assert_eq!(
            sha256_hex(b"hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn patch_batch_hash_is_deterministic() {
        let patches = vec![RuntimePatch::set("ctx.x", json!(1))];
        let h1 = patch_batch_hash(&patches).unwrap();
        let h2 = patch_batch_hash(&patches).unwrap();
        assert_eq!(h1, h2);
    }

    #[test]
    fn patch_batch_hash_differs_for_different_batches() {
        let a = vec![RuntimePatch::set("ctx.x", json!(1))];
        let b = vec![RuntimePatch::set("ctx.x", json!(2))];
        assert_ne!(patch_batch_hash(&a).unwrap(), patch_batch_hash(&b).unwrap());
    }
}
