// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
use std::path::PathBuf;

use ais_checkpoint::{CheckpointStore, FileCheckpointStore};
use ais_cli::run::{self, RunArgs};
use ais_cli::docs;
use ais_telemetry::{LogFormat, targets};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

/// Exit code for runtime errors.
const EXIT_RUNTIME_ERROR: i32 = 1;
/// Exit code for usage / argument errors (clap exits with 2 automatically).
#[allow(dead_code)]
const EXIT_USAGE_ERROR: i32 = 2;

#[derive(Parser, Debug)]
#[command(name = "ais", version, about = "Execution-plan runtime for cross-chain workflows")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Emit logs as JSON lines instead of plain text.
    #[arg(long)]
    log_json: bool,

    /// Enable debug logging.
    #[arg(long)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compile a workflow and drive it to completion.
    Run {
        /// Path to the Workflow document.
        #[arg(long)]
        workflow: PathBuf,

        /// Path to the Pack document.
        #[arg(long)]
        pack: PathBuf,

        /// Path to a Protocol document. Repeat for every protocol the workflow imports.
        #[arg(long = "protocol")]
        protocols: Vec<PathBuf>,

        /// JSON document of supplied workflow inputs.
        #[arg(long)]
        input: Option<PathBuf>,

        /// Run-configuration TOML file.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Actually send write-kind transactions/instructions.
        #[arg(long)]
        broadcast: bool,

        /// Auto-approve every pending confirmation.
        #[arg(long)]
        yes: bool,

        /// Persist a checkpoint to this path after each state transition.
        #[arg(long)]
        checkpoint: Option<String>,

        /// Resume a prior run from this checkpoint file.
        #[arg(long)]
        resume: Option<String>,

        /// Redaction applied to the event stream: off, audit, default.
        #[arg(long, value_enum)]
        trace_redact: Option<RedactArg>,

        /// Write the event stream as JSONL to this path (`-` for stdout).
        #[arg(long)]
        events_jsonl: Option<String>,

        /// Read control commands as JSONL from stdin.
        #[arg(long)]
        commands_stdin_jsonl: bool,

        /// Write the workflow's evaluated outputs as JSON to this path (`-` for stdout).
        #[arg(long)]
        write_outputs: Option<String>,
    },

    /// Validate a workflow document against its declared inputs.
    Validate {
        /// Path to the Workflow document.
        #[arg(long)]
        workflow: PathBuf,

        /// JSON document of supplied workflow inputs.
        #[arg(long)]
        input: Option<PathBuf>,
    },

    /// Print a JSON schema to stdout.
    Schema {
        /// Which document's schema to print.
        #[arg(value_enum)]
        kind: SchemaArg,
    },

    /// Summarize a checkpoint file.
    Inspect {
        /// Path to the checkpoint file.
        #[arg()]
        file: PathBuf,
    },
}

#[derive(Debug, Clone, ValueEnum)]
enum RedactArg {
    Off,
    Audit,
    Default,
}

impl From<RedactArg> for ais_config::RedactionMode {
    fn from(v: RedactArg) -> Self {
        match v {
            RedactArg::Off => ais_config::RedactionMode::Off,
            RedactArg::Audit => ais_config::RedactionMode::Audit,
            RedactArg::Default => ais_config::RedactionMode::Default,
        }
    }
}

#[derive(Debug, Clone, ValueEnum)]
enum SchemaArg {
    Workflow,
    Pack,
    Protocol,
    EngineConfig,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let format = if cli.log_json { LogFormat::Json } else { LogFormat::Text };
    let filter = if cli.debug { Some("ais=debug") } else { None };
    if let Err(error) = ais_telemetry::init_subscriber(format, filter) {
        eprintln!("warning: failed to initialize logging: {error}");
    }

    let outcome = match cli.command {
        Commands::Run {
            workflow,
            pack,
            protocols,
            input,
            config,
            broadcast,
            yes,
            checkpoint,
            resume,
            trace_redact,
            events_jsonl,
            commands_stdin_jsonl,
            write_outputs,
        } => {
            run::execute(RunArgs {
                workflow,
                pack,
                protocols,
                input,
                config,
                broadcast,
                yes,
                checkpoint,
                resume,
                trace_redact: trace_redact.map(Into::into),
                events_jsonl,
                commands_stdin_jsonl,
                write_outputs,
            })
            .await
        }
        Commands::Validate { workflow, input } => cmd_validate(&workflow, input.as_deref()).map(|()| 0),
        Commands::Schema { kind } => cmd_schema(kind).map(|()| 0),
        Commands::Inspect { file } => cmd_inspect(&file).await.map(|()| 0),
    };

    match outcome {
        Ok(code) => std::process::exit(code),
        Err(error) => {
            eprintln!("error: {error:#}");
            std::process::exit(EXIT_RUNTIME_ERROR);
        }
    }
}

fn cmd_validate(workflow_path: &std::path::Path, input_path: Option<&std::path::Path>) -> Result<()> {
    let workflow = docs::load_workflow(workflow_path)?;
    let supplied = docs::load_inputs(input_path)?;
    let warnings = ais_core::WorkflowValidator::new().validate(&workflow, &supplied);
    for warning in &warnings {
        println!("{:?} {}: {}", warning.severity, warning.field, warning.message);
    }
    if ais_core::WorkflowValidator::has_errors(&warnings) {
        anyhow::bail!(
            "workflow has {} error-level warning(s)",
            warnings.iter().filter(|w| matches!(w.severity, ais_core::workflow_validate::WarningSeverity::Error)).count()
        );
    }
    println!("valid");
    Ok(())
}

fn cmd_schema(kind: SchemaArg) -> Result<()> {
    let schema = match kind {
        SchemaArg::Workflow => schemars::schema_for!(ais_core::Workflow),
        SchemaArg::Pack => schemars::schema_for!(ais_core::Pack),
        SchemaArg::Protocol => schemars::schema_for!(ais_core::Protocol),
        SchemaArg::EngineConfig => schemars::schema_for!(ais_config::EngineConfig),
    };
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}

async fn cmd_inspect(file: &std::path::Path) -> Result<()> {
    let store = FileCheckpointStore::new();
    let checkpoint = store.load(file).await.with_context(|| format!("load checkpoint '{}'", file.display()))?;

    println!("schema:          {}", checkpoint.schema);
    println!("nodes total:     {}", checkpoint.plan.nodes.len());
    println!("completed:       {}", checkpoint.completed_node_ids.len());
    println!("paused nodes:    {}", checkpoint.paused_by_node_id.len());
    println!("polling nodes:   {}", checkpoint.poll_state_by_node_id.len());
    if !checkpoint.schema_supported() {
        eprintln!("warning: checkpoint schema '{}' is not supported by this build", checkpoint.schema);
        std::process::exit(EXIT_RUNTIME_ERROR);
    }
    tracing::debug!(target: targets::CLI, path = %file.display(), "inspected checkpoint");
    Ok(())
}
