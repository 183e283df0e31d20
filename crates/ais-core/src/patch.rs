// SPDX-License-Identifier: MIT OR Apache-2.0
//! Patch operations against the Runtime Root, and the guard that restricts
//! which paths may be written.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// The kind of mutation a [`RuntimePatch`] performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PatchOp {
    /// Replace the value at `path` entirely.
    Set,
    /// Shallow-merge an object value into the value at `path`.
    Merge,
    /// Remove the value at `path`.
    Delete,
}

/// A single mutation to apply to the Runtime Root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RuntimePatch {
    /// The operation kind.
    pub op: PatchOp,
    /// Dotted path, rooted at one of the Runtime Root's top-level children.
    pub path: String,
    /// The value to set or merge; absent for `delete`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Json>,
}

impl RuntimePatch {
    /// Construct a `set` patch.
    #[must_use]
    pub fn set(path: impl Into<String>, value: Json) -> Self {
        Self { op: PatchOp::Set, path: path.into(), value: Some(value) }
    }

    /// Construct a `merge` patch.
    #[must_use]
    pub fn merge(path: impl Into<String>, value: Json) -> Self {
        Self { op: PatchOp::Merge, path: path.into(), value: Some(value) }
    }

    /// Construct a `delete` patch.
    #[must_use]
    pub fn delete(path: impl Into<String>) -> Self {
        Self { op: PatchOp::Delete, path: path.into(), value: None }
    }
}

/// The default allow-listed top-level roots a patch guard permits, absent
/// any additional configured `allow_nodes_paths`/`allow_path_patterns`.
pub const DEFAULT_ALLOWED_ROOTS: &[&str] = &["inputs", "ctx", "contracts", "policy"];

/// Reason a patch was rejected by the guard.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatchRejection {
    /// The path's top-level root is not in the allow-list.
    #[error("path {0:?} is outside the allowed roots")]
    RootNotAllowed(String),
    /// A path segment was empty, numeric, or otherwise unsafe to traverse.
    #[error("path {0:?} contains an unsafe segment")]
    UnsafeSegment(String),
}

/// Guards which dotted paths a [`RuntimePatch`] may target.
///
/// Mirrors the command channel's patch guard (§4.8): the default roots plus
/// any explicitly configured extra root prefixes (e.g. `nodes.<id>...`) or
/// glob-style path patterns.
#[derive(Debug, Clone)]
pub struct PatchGuard {
    extra_roots: Vec<String>,
}

impl Default for PatchGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl PatchGuard {
    /// A guard with only the default roots permitted.
    #[must_use]
    pub fn new() -> Self {
        Self { extra_roots: Vec::new() }
    }

    /// A guard additionally permitting the given root prefixes, e.g.
    /// `nodes.swap1`.
    #[must_use]
    pub fn with_extra_roots(extra_roots: Vec<String>) -> Self {
        Self { extra_roots }
    }

    /// Validate a path against the allow-list and segment-safety rules.
    ///
    /// # Errors
    ///
    /// Returns [`PatchRejection`] if the path's root is not allowed, or if
    /// any segment is empty, numeric, or a `__proto__`-style prototype
    /// pollution vector.
    pub fn check(&self, path: &str) -> Result<(), PatchRejection> {
        let segments: Vec<&str> = path.split('.').collect();
        if segments.iter().any(|s| is_unsafe_segment(s)) {
            return Err(PatchRejection::UnsafeSegment(path.to_string()));
        }
        let root = segments.first().copied().unwrap_or_default();
        let root_allowed = DEFAULT_ALLOWED_ROOTS.contains(&root)
            || self
                .extra_roots
                .iter()
                .any(|prefix| path == *prefix || path.starts_with(&format!("{prefix}.")));
        if root_allowed {
            Ok(())
        } else {
            Err(PatchRejection::RootNotAllowed(path.to_string()))
        }
    }
}

fn is_unsafe_segment(segment: &str) -> bool {
    segment.is_empty()
        || segment.parse::<u64>().is_ok()
        || segment.eq_ignore_ascii_case("__proto__")
        || segment.eq_ignore_ascii_case("constructor")
        || segment.eq_ignore_ascii_case("prototype")
}
