// SPDX-License-Identifier: MIT OR Apache-2.0
//! Loading the Workflow/Pack/Protocol documents a run needs.
//!
//! Document loading and schema validation beyond what `serde` gives for
//! free are an explicit non-goal of this workspace; these helpers are a
//! thin `read_to_string` + `serde_json::from_str` with path context on
//! failure, nothing more.

use std::collections::BTreeMap;
use std::path::Path;

use ais_core::{Pack, Protocol, Workflow};
use anyhow::{Context, Result};

/// Read and parse a JSON document of type `T` from `path`.
fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).with_context(|| format!("read '{}'", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parse '{}'", path.display()))
}

/// Load a Workflow document.
pub fn load_workflow(path: &Path) -> Result<Workflow> {
    load_json(path)
}

/// Load a Pack document.
pub fn load_pack(path: &Path) -> Result<Pack> {
    load_json(path)
}

/// Load every Protocol document in `paths`, keyed by `meta.protocol` — the
/// same key a `WorkflowNode.protocol` field names.
pub fn load_protocols(paths: &[std::path::PathBuf]) -> Result<BTreeMap<String, Protocol>> {
    let mut protocols = BTreeMap::new();
    for path in paths {
        let protocol: Protocol = load_json(path)?;
        protocols.insert(protocol.meta.protocol.clone(), protocol);
    }
    Ok(protocols)
}

/// Load the optional `--input` JSON file (an object of supplied workflow
/// inputs), defaulting to an empty object when absent.
pub fn load_inputs(path: Option<&Path>) -> Result<serde_json::Map<String, serde_json::Value>> {
    match path {
        Some(p) => {
            let value: serde_json::Value = load_json(p)?;
            match value {
                serde_json::Value::Object(map) => Ok(map),
                other => anyhow::bail!("'{}' must contain a JSON object, got {other}", p.display()),
            }
        }
        None => Ok(serde_json::Map::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_workflow_reports_the_path_on_a_missing_file() {
        let err = load_workflow(Path::new("/nonexistent/workflow.json")).unwrap_err();
        assert!(err.to_string().contains("workflow.json"));
    }

    #[test]
    fn load_inputs_defaults_to_empty_when_absent() {
        let inputs = load_inputs(None).unwrap();
        assert!(inputs.is_empty());
    }

    #[test]
    fn load_inputs_rejects_a_non_object_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inputs.json");
        std::fs::write(&path, "[1, 2, 3]").unwrap();
        let err = load_inputs(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("JSON object"));
    }

    #[test]
    fn load_protocols_keys_by_meta_protocol_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("demo.json");
        std::fs::write(
            &path,
            serde_json::json!({
                "schema": ais_core::PROTOCOL_SCHEMA,
                "meta": {"protocol": "demo-amm", "version": "1.0.0"},
                "deployments": [],
                "actions": {},
                "queries": {}
            })
            .to_string(),
        )
        .unwrap();
        let protocols = load_protocols(&[path]).unwrap();
        assert!(protocols.contains_key("demo-amm"));
    }
}
