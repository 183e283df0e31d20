// SPDX-License-Identifier: MIT OR Apache-2.0
//! Black-box tests against the `ais` binary, exercising `validate`, `schema`,
//! `inspect`, and a full `run` against a minimal fixture workflow.

use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;

fn bin() -> Command {
    Command::cargo_bin("ais").unwrap()
}

fn write(dir: &Path, name: &str, value: &serde_json::Value) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, serde_json::to_string_pretty(value).unwrap()).unwrap();
    path
}

/// A single-node workflow ("balance" query against an `eip155:1` read) plus
/// the pack and protocol it depends on, the smallest document trio that
/// compiles and runs end to end against the mock executors.
fn fixture_protocol() -> serde_json::Value {
    serde_json::json!({
        "schema": "ais/0.0.2",
        "meta": {"protocol": "demo-amm", "version": "1.0.0"},
        "deployments": [],
        "actions": {},
        "queries": {
            "balance": {
                "params": [],
                "returns": [],
                "execution": {
                    "eip155:*": {"type": "evm_read", "fields": {}}
                }
            }
        }
    })
}

fn fixture_pack() -> serde_json::Value {
    serde_json::json!({
        "schema": "ais-pack/0.0.2",
        "includes": [{"protocol": "demo-amm", "version": "1.0.0"}],
        "policy": {
            "approvals": {
                "auto_execute_max_risk_level": "low",
                "require_approval_min_risk_level": "high"
            },
            "hard_constraints_defaults": []
        },
        "token_policy": {"allowlist": [], "resolution": "best_effort"}
    })
}

fn fixture_workflow() -> serde_json::Value {
    serde_json::json!({
        "schema": "ais-flow/0.0.3",
        "meta": {"name": "check-balance"},
        "default_chain": "eip155:1",
        "inputs": {},
        "nodes": [
            {"id": "q1", "protocol": "demo-amm", "query": "balance"}
        ],
        "outputs": {}
    })
}

#[test]
fn validate_accepts_the_fixture_workflow() {
    let dir = tempfile::tempdir().unwrap();
    let workflow = write(dir.path(), "workflow.json", &fixture_workflow());

    bin()
        .args(["validate", "--workflow"])
        .arg(&workflow)
        .assert()
        .success()
        .stdout(predicate::str::contains("valid"));
}

#[test]
fn validate_rejects_a_workflow_with_no_nodes() {
    let dir = tempfile::tempdir().unwrap();
    let mut empty = fixture_workflow();
    empty["nodes"] = serde_json::json!([]);
    let workflow = write(dir.path(), "workflow.json", &empty);

    bin()
        .args(["validate", "--workflow"])
        .arg(&workflow)
        .assert()
        .failure()
        .code(1);
}

#[test]
fn validate_reports_an_undeclared_supplied_input() {
    let dir = tempfile::tempdir().unwrap();
    let workflow = write(dir.path(), "workflow.json", &fixture_workflow());
    let input = write(dir.path(), "input.json", &serde_json::json!({"extra": 1}));

    bin()
        .args(["validate", "--workflow"])
        .arg(&workflow)
        .arg("--input")
        .arg(&input)
        .assert()
        .success()
        .stdout(predicate::str::contains("not declared"));
}

#[test]
fn schema_prints_each_document_kind() {
    for kind in ["workflow", "pack", "protocol", "engine-config"] {
        bin()
            .args(["schema", kind])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"$schema\""));
    }
}

#[test]
fn run_compiles_and_completes_the_fixture_workflow() {
    let dir = tempfile::tempdir().unwrap();
    let workflow = write(dir.path(), "workflow.json", &fixture_workflow());
    let pack = write(dir.path(), "pack.json", &fixture_pack());
    let protocol = write(dir.path(), "protocol.json", &fixture_protocol());
    let events_path = dir.path().join("events.jsonl");

    bin()
        .arg("run")
        .arg("--workflow").arg(&workflow)
        .arg("--pack").arg(&pack)
        .arg("--protocol").arg(&protocol)
        .arg("--events-jsonl").arg(&events_path)
        .assert()
        .success();

    let events = std::fs::read_to_string(&events_path).unwrap();
    assert!(events.lines().count() > 0);
    assert!(events.lines().all(|line| serde_json::from_str::<serde_json::Value>(line).is_ok()));
}

#[test]
fn run_without_a_signer_refuses_to_broadcast() {
    let dir = tempfile::tempdir().unwrap();
    let workflow = write(dir.path(), "workflow.json", &fixture_workflow());
    let pack = write(dir.path(), "pack.json", &fixture_pack());
    let protocol = write(dir.path(), "protocol.json", &fixture_protocol());

    bin()
        .arg("run")
        .arg("--workflow").arg(&workflow)
        .arg("--pack").arg(&pack)
        .arg("--protocol").arg(&protocol)
        .arg("--broadcast")
        .env_remove("AIS_SIGNER_KEY")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("AIS_SIGNER_KEY"));
}

#[test]
fn run_rejects_a_malformed_workflow_document() {
    let dir = tempfile::tempdir().unwrap();
    let workflow = dir.path().join("workflow.json");
    std::fs::write(&workflow, "not json").unwrap();
    let pack = write(dir.path(), "pack.json", &fixture_pack());

    bin()
        .arg("run")
        .arg("--workflow").arg(&workflow)
        .arg("--pack").arg(&pack)
        .assert()
        .failure();
}

#[test]
fn inspect_summarizes_a_freshly_saved_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.checkpoint.json");

    let checkpoint = ais_core::Checkpoint::new(ais_core::PlanDag::new(vec![]), ais_core::RuntimeRoot::new());
    let runtime = tokio::runtime::Runtime::new().unwrap();
    runtime.block_on(async {
        use ais_checkpoint::CheckpointStore as _;
        let store = ais_checkpoint::FileCheckpointStore::new();
        store.save(&path, &checkpoint).await.unwrap();
    });

    bin()
        .arg("inspect")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("nodes total:").and(predicate::str::contains("0")))
        .stdout(predicate::str::contains("completed:"));
}

#[test]
fn inspect_fails_on_a_missing_checkpoint_file() {
    bin().arg("inspect").arg("/nonexistent/checkpoint.json").assert().failure();
}
