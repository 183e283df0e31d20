// SPDX-License-Identifier: MIT OR Apache-2.0
//! The Runtime Root: the in-memory tree every plan node reads from and
//! (through the patch protocol only) writes to.

use crate::patch::{PatchGuard, PatchOp, PatchRejection, RuntimePatch};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

/// The fixed top-level children of the Runtime Root.
pub const ROOT_CHILDREN: &[&str] =
    &["inputs", "ctx", "contracts", "calculated", "nodes", "policy", "query"];

/// Error resolving or mutating a dotted path against the Runtime Root.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RootPathError {
    /// A `ref` path resolved to nothing.
    #[error("missing ref: {0}")]
    MissingRef(String),
    /// A patch targeted a path the guard rejects.
    #[error(transparent)]
    Rejected(#[from] PatchRejection),
}

/// The Runtime Root: the single shared, patch-mutated tree.
///
/// Constructed empty with the seven fixed children present as empty
/// objects, then populated by `inputs` coercion and, thereafter, solely
/// through [`RuntimeRoot::apply_patch`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RuntimeRoot {
    inner: Map<String, Json>,
}

impl Default for RuntimeRoot {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeRoot {
    /// An empty Runtime Root with all fixed top-level children present.
    #[must_use]
    pub fn new() -> Self {
        let mut inner = Map::new();
        for child in ROOT_CHILDREN {
            inner.insert((*child).to_string(), Json::Object(Map::new()));
        }
        Self { inner }
    }

    /// Populate `inputs` from coerced workflow input values. Intended to run
    /// once, before any node executes.
    pub fn set_inputs(&mut self, inputs: Map<String, Json>) {
        self.inner.insert("inputs".to_string(), Json::Object(inputs));
    }

    /// Read-only view as a [`serde_json::Value`] tree.
    #[must_use]
    pub fn as_json(&self) -> Json {
        Json::Object(self.inner.clone())
    }

    /// Resolve a dotted path, returning `None` if any segment is missing.
    ///
    /// Numeric-looking segments index arrays; all other segments index
    /// objects by key.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<Json> {
        let mut current = Json::Object(self.inner.clone());
        for segment in path.split('.') {
            current = match current {
                Json::Object(map) => map.get(segment)?.clone(),
                Json::Array(arr) => {
                    let idx: usize = segment.parse().ok()?;
                    arr.get(idx)?.clone()
                }
                _ => return None,
            };
        }
        Some(current)
    }

    /// Resolve a dotted path, producing a typed [`RootPathError::MissingRef`]
    /// carrying the original path when absent — the evaluator's `ref`
    /// failure mode.
    ///
    /// # Errors
    ///
    /// Returns [`RootPathError::MissingRef`] if the path does not resolve.
    pub fn get_required(&self, path: &str) -> Result<Json, RootPathError> {
        self.get(path)
            .ok_or_else(|| RootPathError::MissingRef(path.to_string()))
    }

    /// Apply a single patch, guarded by `guard`.
    ///
    /// # Errors
    ///
    /// Returns [`RootPathError::Rejected`] if the guard rejects `patch.path`.
    pub fn apply_patch(
        &mut self,
        patch: &RuntimePatch,
        guard: &PatchGuard,
    ) -> Result<(), RootPathError> {
        guard.check(&patch.path)?;
        match patch.op {
            PatchOp::Set => {
                let value = patch.value.clone().unwrap_or(Json::Null);
                self.set_path(&patch.path, value);
            }
            PatchOp::Merge => {
                let existing = self.get(&patch.path).unwrap_or(Json::Object(Map::new()));
                let merged = shallow_merge(existing, patch.value.clone().unwrap_or(Json::Null));
                self.set_path(&patch.path, merged);
            }
            PatchOp::Delete => {
                self.delete_path(&patch.path);
            }
        }
        Ok(())
    }

    fn set_path(&mut self, path: &str, value: Json) {
        let segments: Vec<&str> = path.split('.').collect();
        set_recursive(&mut self.inner, &segments, value);
    }

    fn delete_path(&mut self, path: &str) {
        let segments: Vec<&str> = path.split('.').collect();
        delete_recursive(&mut self.inner, &segments);
    }
}

fn set_recursive(map: &mut Map<String, Json>, segments: &[&str], value: Json) {
    let Some((head, tail)) = segments.split_first() else { return };
    if tail.is_empty() {
        map.insert((*head).to_string(), value);
        return;
    }
    let entry = map
        .entry((*head).to_string())
        .or_insert_with(|| Json::Object(Map::new()));
    if !entry.is_object() {
        *entry = Json::Object(Map::new());
    }
    if let Json::Object(child) = entry {
        set_recursive(child, tail, value);
    }
}

fn delete_recursive(map: &mut Map<String, Json>, segments: &[&str]) {
    let Some((head, tail)) = segments.split_first() else { return };
    if tail.is_empty() {
        map.remove(*head);
        return;
    }
    if let Some(Json::Object(child)) = map.get_mut(*head) {
        delete_recursive(child, tail);
    }
}

fn shallow_merge(existing: Json, incoming: Json) -> Json {
    match (existing, incoming) {
        (Json::Object(mut base), Json::Object(overlay)) => {
            for (k, v) in overlay {
                base.insert(k, v);
            }
            Json::Object(base)
        }
        (_, incoming) => incoming,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_root_has_all_fixed_children_empty() {
        let root = RuntimeRoot::new();
        for child in ROOT_CHILDREN {
            assert_eq!(root.get(child), Some(json!({})));
        }
    }

    #[test]
    fn set_inputs_populates_inputs() {
        let mut root = RuntimeRoot::new();
        root.set_inputs(Map::from_iter([("amount".to_string(), json!(10))]));
        assert_eq!(root.get("inputs.amount"), Some(json!(10)));
    }

    #[test]
    fn get_missing_path_is_none() {
        let root = RuntimeRoot::new();
        assert_eq!(root.get("inputs.nope"), None);
    }

    #[test]
    fn get_required_errors_on_missing() {
        let root = RuntimeRoot::new();
        assert_eq!(
            root.get_required("inputs.nope"),
            Err(RootPathError::MissingRef("inputs.nope".to_string()))
        );
    }

    #[test]
    fn get_indexes_arrays_by_numeric_segment() {
        let mut root = RuntimeRoot::new();
        root.set_inputs(Map::from_iter([("list".to_string(), json!([1, 2, 3]))]));
        assert_eq!(root.get("inputs.list.1"), Some(json!(2)));
    }

    #[test]
    fn apply_set_patch_writes_nested_path() {
        let mut root = RuntimeRoot::new();
        let guard = PatchGuard::new();
        root.apply_patch(&RuntimePatch::set("ctx.chain", json!("eip155:1")), &guard)
            .unwrap();
        assert_eq!(root.get("ctx.chain"), Some(json!("eip155:1")));
    }

    #[test]
    fn apply_merge_patch_shallow_merges_object() {
        let mut root = RuntimeRoot::new();
        let guard = PatchGuard::new();
        root.apply_patch(
            &RuntimePatch::merge("contracts", json!({"router": "0xabc"})),
            &guard,
        )
        .unwrap();
        root.apply_patch(
            &RuntimePatch::merge("contracts", json!({"token": "0xdef"})),
            &guard,
        )
        .unwrap();
        assert_eq!(
            root.get("contracts"),
            Some(json!({"router": "0xabc", "token": "0xdef"}))
        );
    }

    #[test]
    fn apply_delete_patch_removes_path() {
        let mut root = RuntimeRoot::new();
        let guard = PatchGuard::new();
        root.apply_patch(&RuntimePatch::set("ctx.x", json!(1)), &guard).unwrap();
        root.apply_patch(&RuntimePatch::delete("ctx.x"), &guard).unwrap();
        assert_eq!(root.get("ctx.x"), None);
    }

    #[test]
    fn apply_patch_rejects_disallowed_root() {
        let mut root = RuntimeRoot::new();
        let guard = PatchGuard::new();
        let err = root
            .apply_patch(&RuntimePatch::set("query.x", json!(1)), &guard)
            .unwrap_err();
        assert!(matches!(err, RootPathError::Rejected(_)));
    }

    #[test]
    fn node_outputs_writable_via_extra_root() {
        let mut root = RuntimeRoot::new();
        let guard = PatchGuard::with_extra_roots(vec!["nodes.swap1".to_string()]);
        root.apply_patch(
            &RuntimePatch::set("nodes.swap1.outputs", json!({"amount_out": 5})),
            &guard,
        )
        .unwrap();
        assert_eq!(root.get("nodes.swap1.outputs.amount_out"), Some(json!(5)));
    }
}
