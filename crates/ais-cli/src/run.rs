// SPDX-License-Identifier: MIT OR Apache-2.0
//! Compiling and driving one engine run end to end.
//!
//! Owns the whole lifecycle: load documents, validate and resolve inputs,
//! compile a plan, bridge the run-configuration file into
//! [`ais_engine::EngineConfig`], build an executor chain from the mock
//! EVM/Solana RPC clients, and drive [`Engine::run`] to a terminal outcome
//! while a background task drains its event bus to `--events-jsonl` and
//! (optionally) another feeds decoded commands from stdin back in.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ais_capability::CapabilitySet;
use ais_checkpoint::{CheckpointStore, FileCheckpointStore};
use ais_core::{Workflow, WorkflowValidator, resolve_inputs};
use ais_engine::{Engine, EngineConfig, RunOutcome};
use ais_executor::{EvmExecutor, ExecutorChain, MockEvmRpcClient, MockSolanaRpcClient, SolanaExecutor};
use ais_protocol::{EventEnvelope, RedactionMode};
use ais_queue::ChainLimits;
use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::mpsc;
use tracing::info;

use crate::docs;
use crate::stream;

/// Every flag `ais run` accepts, already parsed by the time this module sees it.
pub struct RunArgs {
    /// Path to the Workflow document.
    pub workflow: PathBuf,
    /// Path to the Pack document.
    pub pack: PathBuf,
    /// Paths to every Protocol document the workflow imports.
    pub protocols: Vec<PathBuf>,
    /// Optional JSON document of supplied workflow inputs.
    pub input: Option<PathBuf>,
    /// Optional run-configuration TOML file.
    pub config: Option<PathBuf>,
    /// `--broadcast`: actually send write-kind transactions/instructions.
    pub broadcast: bool,
    /// `--yes`: auto-approve every pending confirmation.
    pub yes: bool,
    /// `--checkpoint`: where to persist a checkpoint after each transition.
    pub checkpoint: Option<String>,
    /// `--resume`: a checkpoint file to resume this run from.
    pub resume: Option<String>,
    /// `--trace-redact`: redaction applied to `--events-jsonl` output.
    pub trace_redact: Option<ais_config::RedactionMode>,
    /// `--events-jsonl`: where the event stream is written (`-` for stdout).
    pub events_jsonl: Option<String>,
    /// `--commands-stdin-jsonl`: read control commands from stdin.
    pub commands_stdin_jsonl: bool,
    /// `--write-outputs`: where to write the workflow's evaluated outputs.
    pub write_outputs: Option<String>,
}

/// Compile and drive one run, returning the process exit code (`0` clean
/// completion, `1` everything else) per the CLI's exit-code contract.
pub async fn execute(args: RunArgs) -> Result<i32> {
    let workflow = docs::load_workflow(&args.workflow)?;
    let pack = docs::load_pack(&args.pack)?;
    let protocols = docs::load_protocols(&args.protocols)?;
    let supplied_inputs = docs::load_inputs(args.input.as_deref())?;

    let warnings = WorkflowValidator::new().validate(&workflow, &supplied_inputs);
    for warning in &warnings {
        eprintln!("{:?} {}: {}", warning.severity, warning.field, warning.message);
    }
    if WorkflowValidator::has_errors(&warnings) {
        return Ok(1);
    }

    let plan = match ais_compiler::compile(&workflow, &protocols) {
        Ok(plan) => plan,
        Err(error) => {
            eprintln!("failed to compile workflow: {error}");
            return Ok(1);
        }
    };

    let file_cfg = ais_config::load_config(args.config.as_deref()).context("load run configuration")?;
    let overrides = ais_config::CliOverrides {
        max_concurrency: None,
        broadcast: Some(args.broadcast),
        trace_redact: args.trace_redact,
        checkpoint_path: args.checkpoint.clone(),
        auto_approve: Some(args.yes),
    };
    let run_cfg = ais_config::apply_cli_overrides(file_cfg, &overrides);
    match ais_config::validate_config(&run_cfg) {
        Ok(cfg_warnings) => {
            for warning in &cfg_warnings {
                eprintln!("config warning: {warning}");
            }
        }
        Err(error) => {
            eprintln!("invalid run configuration: {error}");
            return Ok(1);
        }
    }

    if run_cfg.broadcast && std::env::var("AIS_SIGNER_KEY").is_err() {
        eprintln!("--broadcast requires a signer; set AIS_SIGNER_KEY or omit --broadcast");
        return Ok(1);
    }

    let resolved_inputs = resolve_inputs(&workflow, &supplied_inputs);
    let engine_config = build_engine_config(&run_cfg);
    let trace_mode = to_protocol_redaction(run_cfg.trace_redact);

    let executors = build_executor_chain();
    let checkpoint_store: Arc<dyn CheckpointStore> = Arc::new(FileCheckpointStore::new());
    let run_id = format!("{}-{}", workflow.meta.name, Utc::now().timestamp_millis());

    let mut engine = match &args.resume {
        Some(resume_path) => {
            let checkpoint = checkpoint_store
                .load(Path::new(resume_path))
                .await
                .with_context(|| format!("load checkpoint '{resume_path}'"))?;
            let next_seq = recover_next_seq(args.events_jsonl.as_deref());
            Engine::resume(checkpoint, pack, protocols, executors, engine_config, run_id, trace_mode, next_seq, checkpoint_store)
        }
        None => Engine::new(plan, pack, protocols, executors, engine_config, run_id, trace_mode, checkpoint_store, resolved_inputs),
    };

    let event_drain = args.events_jsonl.as_ref().map(|path| {
        let subscription = engine.subscribe();
        let path = path.clone();
        tokio::spawn(async move {
            if let Err(error) = stream::drain_events(subscription, &path, trace_mode).await {
                eprintln!("event stream writer stopped: {error}");
            }
        })
    });

    let mut commands_rx = if args.commands_stdin_jsonl {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            if let Err(error) = stream::read_commands_from_stdin(tx).await {
                eprintln!("command stream reader stopped: {error}");
            }
        });
        Some(rx)
    } else {
        None
    };

    let outcome = loop {
        let outcome = engine.run().await;
        match outcome {
            RunOutcome::EnginePaused => {
                let Some(rx) = commands_rx.as_mut() else { break outcome };
                match rx.recv().await {
                    Some(command) => engine.handle_command(command).await,
                    None => break outcome,
                }
                while let Ok(command) = rx.try_recv() {
                    engine.handle_command(command).await;
                }
            }
            other => break other,
        }
    };

    if matches!(outcome, RunOutcome::Completed) {
        if let Some(path) = args.write_outputs.as_deref() {
            write_outputs_to(path, &workflow, engine.root())?;
        }
    }

    if let Some(handle) = event_drain {
        drop(engine);
        let _ = handle.await;
    }

    report_outcome(&outcome)
}

fn build_executor_chain() -> ExecutorChain {
    ExecutorChain::builder()
        .with_executor(Arc::new(EvmExecutor::new(Arc::new(MockEvmRpcClient::default()))))
        .with_executor(Arc::new(SolanaExecutor::new(Arc::new(MockSolanaRpcClient::default()))))
        .build()
}

fn build_engine_config(cfg: &ais_config::EngineConfig) -> EngineConfig {
    let chain_limits: BTreeMap<String, ChainLimits> = cfg
        .chain_concurrency
        .iter()
        .map(|(chain, limits)| {
            (
                chain.clone(),
                ChainLimits { max_read_concurrency: limits.max_read_concurrency, max_write_concurrency: limits.max_write_concurrency },
            )
        })
        .collect();

    EngineConfig {
        max_concurrency: cfg.max_concurrency,
        chain_limits,
        default_chain_limits: ChainLimits::default(),
        capabilities: CapabilitySet::new(),
        locale: "en-US".to_string(),
        broadcast_enabled: cfg.broadcast,
        auto_fill_contracts: true,
        max_executor_retries: 2,
        checkpoint_path: cfg.checkpoint_path.as_ref().map(PathBuf::from),
    }
}

fn to_protocol_redaction(mode: ais_config::RedactionMode) -> RedactionMode {
    match mode {
        ais_config::RedactionMode::Off => RedactionMode::Off,
        ais_config::RedactionMode::Audit => RedactionMode::Audit,
        ais_config::RedactionMode::Default => RedactionMode::Default,
    }
}

/// A `--resume`'d run needs its event sequence counter to continue past
/// whatever the prior run already wrote; this reads the last line of the
/// previous `--events-jsonl` trace (if any) to recover it.
fn recover_next_seq(events_jsonl: Option<&str>) -> u64 {
    let Some(path) = events_jsonl else { return 0 };
    if path == "-" {
        return 0;
    }
    let Ok(content) = std::fs::read_to_string(path) else { return 0 };
    let Some(last_line) = content.lines().rev().find(|l| !l.trim().is_empty()) else { return 0 };
    match serde_json::from_str::<EventEnvelope>(last_line) {
        Ok(envelope) => envelope.seq + 1,
        Err(_) => 0,
    }
}

fn report_outcome(outcome: &RunOutcome) -> Result<i32> {
    match outcome {
        RunOutcome::Completed => Ok(0),
        RunOutcome::EnginePaused => {
            eprintln!("run paused with no pending command source to unblock it");
            Ok(1)
        }
        RunOutcome::Failed { node_id, error } => {
            eprintln!("node '{node_id}' failed: {}", error.message);
            Ok(1)
        }
        RunOutcome::Cancelled { reason } => {
            eprintln!("run cancelled: {reason:?}");
            Ok(1)
        }
    }
}

fn write_outputs_to(path: &str, workflow: &Workflow, root: &ais_core::RuntimeRoot) -> Result<()> {
    let mut outputs = serde_json::Map::new();
    for (name, value_ref) in &workflow.outputs {
        let value = ais_eval::evaluate(value_ref, root, &ais_eval::EvalOptions::default())
            .with_context(|| format!("evaluate output '{name}'"))?;
        outputs.insert(name.clone(), value);
    }
    let json = serde_json::to_string_pretty(&outputs)?;
    if path == "-" {
        println!("{json}");
    } else {
        std::fs::write(path, json).with_context(|| format!("write outputs to '{path}'"))?;
    }
    info!(target: ais_telemetry::targets::CLI, path, "wrote workflow outputs");
    Ok(())
}
