// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! ais-telemetry
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! `tracing` subscriber initialization and per-run metrics collection for
//! an engine run. Every other crate in this workspace logs under a
//! `ais.<crate>` target (`ais.eval`, `ais.compiler`, `ais.engine`,
//! `ais.executor`, `ais.policy`, `ais.protocol`, `ais.checkpoint`,
//! `ais.cli`); this crate only owns subscriber setup and the metrics
//! aggregated from a run's event stream.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Canonical `tracing` target prefixes used across this workspace.
pub mod targets {
    /// `ais-eval`'s value-reference and expression evaluation.
    pub const EVAL: &str = "ais.eval";
    /// `ais-compiler`'s workflow-to-plan compilation.
    pub const COMPILER: &str = "ais.compiler";
    /// `ais-engine`'s scheduler loop.
    pub const ENGINE: &str = "ais.engine";
    /// `ais-executor`'s executor dispatch and wrapper stages.
    pub const EXECUTOR: &str = "ais.executor";
    /// `ais-policy`'s approval and hard-constraint gating.
    pub const POLICY: &str = "ais.policy";
    /// `ais-protocol`'s event/command codec.
    pub const PROTOCOL: &str = "ais.protocol";
    /// `ais-checkpoint`'s save/load.
    pub const CHECKPOINT: &str = "ais.checkpoint";
    /// `ais-cli`'s binary entry point.
    pub const CLI: &str = "ais.cli";
}

/// Output format for the process-wide tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable compact formatting (the default).
    #[default]
    Text,
    /// Newline-delimited JSON, one object per log line.
    Json,
}

/// Initialize the global `tracing` subscriber.
///
/// `env_filter` follows the usual `RUST_LOG`-style directive syntax (e.g.
/// `"ais=info,ais_engine=debug"`); pass `None` to fall back to the
/// `RUST_LOG` environment variable, defaulting to `info` when unset.
///
/// # Errors
///
/// Returns an error if a global subscriber has already been installed.
pub fn init_subscriber(format: LogFormat, env_filter: Option<&str>) -> Result<(), String> {
    let filter = match env_filter {
        Some(directives) => EnvFilter::try_new(directives).ok(),
        None => EnvFilter::try_from_default_env().ok(),
    }
    .unwrap_or_else(|| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);

    let result = match format {
        LogFormat::Text => {
            let layer = tracing_subscriber::fmt::layer().with_target(true).boxed();
            registry.with(layer).try_init()
        }
        LogFormat::Json => {
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_target(true)
                .boxed();
            registry.with(layer).try_init()
        }
    };

    result.map_err(|e| e.to_string())
}

// ---------------------------------------------------------------------------
// RunMetrics
// ---------------------------------------------------------------------------

/// Metrics aggregated from a single engine run's event stream.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RunMetrics {
    /// Workflow name the run executed.
    pub workflow_name: String,
    /// Wall-clock duration in milliseconds, from `engine_started` to the
    /// terminal event.
    pub duration_ms: u64,
    /// Total number of JSONL events emitted.
    pub events_emitted: u64,
    /// Number of nodes that reached `node_succeeded`.
    pub nodes_succeeded: u64,
    /// Number of nodes that reached `node_failed`.
    pub nodes_failed: u64,
    /// Number of `node_blocked` events observed (readiness/solver stalls).
    pub nodes_blocked: u64,
    /// Number of approval prompts issued.
    pub approvals_requested: u64,
    /// Number of retry attempts across all nodes.
    pub retry_attempts: u64,
    /// Number of checkpoints written.
    pub checkpoints_written: u64,
}

// ---------------------------------------------------------------------------
// RunMetricsSummary
// ---------------------------------------------------------------------------

/// Aggregated statistics across multiple recorded runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunMetricsSummary {
    /// Number of runs recorded.
    pub count: usize,
    /// Mean run duration in milliseconds.
    pub mean_duration_ms: f64,
    /// Median (p50) run duration in milliseconds.
    pub p50_duration_ms: f64,
    /// 99th-percentile run duration in milliseconds.
    pub p99_duration_ms: f64,
    /// Total nodes succeeded across all runs.
    pub total_nodes_succeeded: u64,
    /// Total nodes failed across all runs.
    pub total_nodes_failed: u64,
    /// Fraction of runs with at least one failed node.
    pub run_failure_rate: f64,
    /// Per-workflow run counts (deterministic ordering).
    pub workflow_counts: BTreeMap<String, usize>,
}

impl Default for RunMetricsSummary {
    fn default() -> Self {
        Self {
            count: 0,
            mean_duration_ms: 0.0,
            p50_duration_ms: 0.0,
            p99_duration_ms: 0.0,
            total_nodes_succeeded: 0,
            total_nodes_failed: 0,
            run_failure_rate: 0.0,
            workflow_counts: BTreeMap::new(),
        }
    }
}

/// Compute a percentile value from a **sorted** slice.
fn percentile(sorted: &[u64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if sorted.len() == 1 {
        return sorted[0] as f64;
    }
    let rank = pct / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let frac = rank - lower as f64;
    sorted[lower] as f64 * (1.0 - frac) + sorted[upper] as f64 * frac
}

// ---------------------------------------------------------------------------
// RunMetricsCollector
// ---------------------------------------------------------------------------

/// Thread-safe collector for [`RunMetrics`].
///
/// Wrap in an `Arc` to share across threads (the inner storage is already
/// behind a `Mutex`).
#[derive(Debug, Clone)]
pub struct RunMetricsCollector {
    inner: Arc<Mutex<Vec<RunMetrics>>>,
}

impl Default for RunMetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl RunMetricsCollector {
    /// Create a new, empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Record a completed run's metrics.
    pub fn record(&self, metrics: RunMetrics) {
        let mut data = self.inner.lock().expect("metrics lock poisoned");
        data.push(metrics);
    }

    /// Return all recorded run metrics.
    #[must_use]
    pub fn runs(&self) -> Vec<RunMetrics> {
        let data = self.inner.lock().expect("metrics lock poisoned");
        data.clone()
    }

    /// Number of runs recorded so far.
    #[must_use]
    pub fn len(&self) -> usize {
        let data = self.inner.lock().expect("metrics lock poisoned");
        data.len()
    }

    /// Whether the collector has no recorded runs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Compute an aggregated summary of all recorded runs.
    #[must_use]
    pub fn summary(&self) -> RunMetricsSummary {
        let data = self.inner.lock().expect("metrics lock poisoned");
        if data.is_empty() {
            return RunMetricsSummary::default();
        }

        let count = data.len();
        let mut durations: Vec<u64> = data.iter().map(|r| r.duration_ms).collect();
        durations.sort_unstable();

        let total_duration: u64 = durations.iter().sum();
        let mean_duration_ms = total_duration as f64 / count as f64;
        let p50_duration_ms = percentile(&durations, 50.0);
        let p99_duration_ms = percentile(&durations, 99.0);

        let total_nodes_succeeded: u64 = data.iter().map(|r| r.nodes_succeeded).sum();
        let total_nodes_failed: u64 = data.iter().map(|r| r.nodes_failed).sum();

        let failed_runs = data.iter().filter(|r| r.nodes_failed > 0).count();
        let run_failure_rate = failed_runs as f64 / count as f64;

        let mut workflow_counts: BTreeMap<String, usize> = BTreeMap::new();
        for r in data.iter() {
            *workflow_counts.entry(r.workflow_name.clone()).or_insert(0) += 1;
        }

        RunMetricsSummary {
            count,
            mean_duration_ms,
            p50_duration_ms,
            p99_duration_ms,
            total_nodes_succeeded,
            total_nodes_failed,
            run_failure_rate,
            workflow_counts,
        }
    }

    /// Clear all recorded metrics.
    pub fn clear(&self) {
        let mut data = self.inner.lock().expect("metrics lock poisoned");
        data.clear();
    }
}
