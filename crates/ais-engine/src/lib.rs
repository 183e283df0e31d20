// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! ais-engine
#![warn(missing_docs)]

/// Broadcast-based event bus for decoupled [`ais_protocol::EventEnvelope`] distribution.
pub mod bus;
/// Cancellation primitives for a run in progress.
pub mod cancel;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use ais_capability::CapabilitySet;
use ais_checkpoint::CheckpointStore;
use ais_core::{
    ChainId, Checkpoint, CheckpointExtensions, PatchGuard, PauseState, Pack, PlanDag, PlanNode, PollState,
    Protocol, RunnerCommandState, RuntimePatch, RuntimeRoot, ValueRef, WriteMode,
};
use ais_error::{EngineError, EngineErrorDto, ErrorCode};
use ais_eval::{AsyncDetectResolver, AsyncEvalOptions, DetectResolution, EvalOptions, RootOverrides};
use ais_executor::{ExecutorChain, ExecutorContext, ExecutorResult};
use ais_policy::ApprovalCache;
use ais_protocol::{Command, CommandEnvelope, EventEnvelope, EventKind, EventSink, RedactionMode};
use ais_queue::{ChainLimits, ConcurrencyGate, NodeClass, ReadyQueue};
use async_trait::async_trait;
use serde_json::{Value as Json, json};
use tokio::sync::Mutex as AsyncMutex;
use tracing::warn;

pub use bus::{EventBus, EventBusStats, EventSubscription, FilteredSubscription};
pub use cancel::{CancellableRun, CancellationReason, CancellationToken};

/// How many times a node's executor call is retried after a retryable
/// failure (a `timeout_ms` expiry, or `executor_failed` with
/// `retryable: true`) before the node is failed outright. This budget is
/// independent of a read-kind node's `retry`/`until` poll budget, which
/// spans whole scheduler passes rather than one executor invocation.
const DEFAULT_MAX_EXECUTOR_RETRIES: u32 = 2;

/// Fixed backoff between executor-level retries. Poll-until retries use
/// the node's own `retry.interval_ms` instead.
const EXECUTOR_RETRY_INTERVAL: Duration = Duration::from_millis(250);

/// Tunables for one [`Engine`] run. Everything here is either fixed for
/// the lifetime of the run (concurrency, capabilities) or set once from
/// the caller's flags (`broadcast_enabled`, `checkpoint_path`).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Global cap on simultaneously in-flight nodes.
    pub max_concurrency: u32,
    /// Per-chain read/write concurrency caps, keyed by `ChainId::as_str()`.
    pub chain_limits: BTreeMap<String, ChainLimits>,
    /// Limits applied to a chain with no entry in `chain_limits`.
    pub default_chain_limits: ChainLimits,
    /// Capabilities this runtime declares as supported, used when
    /// negotiating `detect` bindings.
    pub capabilities: CapabilitySet,
    /// Locale tag passed through to confirmation template prose.
    pub locale: String,
    /// Whether write-kind nodes may actually broadcast. When `false`, a
    /// write node's executor call produces a preview instead of sending.
    pub broadcast_enabled: bool,
    /// Whether a blocked node missing `contracts.<name>` should be
    /// auto-filled from the protocol's deployment addresses.
    pub auto_fill_contracts: bool,
    /// How many times a retryable executor failure is retried before the
    /// node fails outright.
    pub max_executor_retries: u32,
    /// Where to persist a checkpoint after each scheduling transition.
    /// `None` disables checkpointing entirely.
    pub checkpoint_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            chain_limits: BTreeMap::new(),
            default_chain_limits: ChainLimits::default(),
            capabilities: CapabilitySet::new(),
            locale: "en-US".to_string(),
            broadcast_enabled: false,
            auto_fill_contracts: true,
            max_executor_retries: DEFAULT_MAX_EXECUTOR_RETRIES,
            checkpoint_path: None,
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// Every node reached a terminal state (completed or skipped).
    Completed,
    /// No node is ready, none are waiting on a timer, and at least one
    /// remains blocked or paused. The run can be resumed once whatever it
    /// is waiting on (a missing input, an approval) is supplied.
    EnginePaused,
    /// A node failed in a way that is not retryable, or exhausted its
    /// retry budget.
    Failed {
        /// The node that failed.
        node_id: String,
        /// The terminal error.
        error: EngineErrorDto,
    },
    /// The run was cancelled via the command channel or an external
    /// caller holding the [`CancellableRun`] handle.
    Cancelled {
        /// Why, if a reason was recorded.
        reason: Option<CancellationReason>,
    },
}

/// Scoped per-node/per-chain `detect` resolution: consults any
/// `select_provider` command overrides registered for this node, this
/// chain, or the whole run (in that priority order), falling back to
/// `choose_one`'s first candidate. Only erroring `detect_unsupported`
/// when neither an override nor a usable `choose_one` candidate exists.
struct ScopedDetectResolver<'a> {
    overrides: &'a DetectOverrides,
    node_id: &'a str,
    chain: &'a str,
}

#[async_trait]
impl AsyncDetectResolver for ScopedDetectResolver<'_> {
    async fn resolve(
        &self,
        spec: &ais_core::DetectSpec,
        _root: &RuntimeRoot,
        _overrides: &RootOverrides,
    ) -> Result<DetectResolution, EngineError> {
        if let Some(provider) = self.overrides.provider_for(self.node_id, self.chain, &spec.kind) {
            if let Some(candidate) =
                spec.candidates.iter().find(|c| c.get("provider").and_then(Json::as_str) == Some(provider))
            {
                return Ok(DetectResolution::Value(candidate.clone()));
            }
        }
        if spec.kind == "choose_one" {
            if let Some(first) = spec.candidates.first() {
                return Ok(DetectResolution::Value(first.clone()));
            }
        }
        Err(EngineError::new(ErrorCode::DetectUnsupported, format!("no provider resolves detect kind `{}`", spec.kind))
            .with_context("kind", spec.kind.clone()))
    }
}

/// `select_provider` overrides accumulated from the command channel,
/// scoped from most to least specific: a single node, a chain, or the
/// whole run.
#[derive(Debug, Default, Clone)]
struct DetectOverrides {
    by_node: BTreeMap<(String, String), String>,
    by_chain: BTreeMap<(String, String), String>,
    global: BTreeMap<String, String>,
}

impl DetectOverrides {
    fn register(&mut self, payload: ais_protocol::SelectProviderPayload) {
        if let Some(node_id) = payload.node_id {
            self.by_node.insert((node_id, payload.detect_kind), payload.provider);
        } else if let Some(chain) = payload.chain {
            self.by_chain.insert((chain, payload.detect_kind), payload.provider);
        } else {
            self.global.insert(payload.detect_kind, payload.provider);
        }
    }

    fn provider_for(&self, node_id: &str, chain: &str, detect_kind: &str) -> Option<&str> {
        self.by_node
            .get(&(node_id.to_string(), detect_kind.to_string()))
            .or_else(|| self.by_chain.get(&(chain.to_string(), detect_kind.to_string())))
            .or_else(|| self.global.get(detect_kind))
            .map(String::as_str)
    }
}

fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Drives one plan DAG from a fresh or resumed Runtime Root to a terminal
/// [`RunOutcome`], re-checkpointing after every state transition.
///
/// Owns the scheduling state (`completed`/`poll_state`/`paused`) that a
/// [`Checkpoint`] persists; everything chain-specific (RPC clients, the
/// wrapper stack) lives behind the [`ExecutorChain`] handed to
/// [`Engine::new`]/[`Engine::resume`].
pub struct Engine {
    plan: PlanDag,
    root: RuntimeRoot,
    pack: Pack,
    protocols: BTreeMap<String, Protocol>,
    executors: Arc<ExecutorChain>,
    config: EngineConfig,
    sink: EventSink,
    bus: Arc<EventBus>,
    gate: ConcurrencyGate,
    approval_cache: Arc<AsyncMutex<ApprovalCache>>,
    checkpoint_store: Arc<dyn CheckpointStore>,
    cancel: CancellableRun,
    completed: std::collections::BTreeSet<String>,
    poll_state: BTreeMap<String, PollState>,
    paused: BTreeMap<String, PauseState>,
    command_state: RunnerCommandState,
    failed: Option<(String, EngineErrorDto)>,
    detect_overrides: DetectOverrides,
}

impl Engine {
    /// Start a fresh run against `inputs`.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        plan: PlanDag,
        pack: Pack,
        protocols: BTreeMap<String, Protocol>,
        executors: ExecutorChain,
        config: EngineConfig,
        run_id: impl Into<String>,
        redaction_mode: RedactionMode,
        checkpoint_store: Arc<dyn CheckpointStore>,
        inputs: serde_json::Map<String, Json>,
    ) -> Self {
        let mut root = RuntimeRoot::new();
        root.set_inputs(inputs);
        Self::build(
            plan,
            root,
            pack,
            protocols,
            executors,
            config,
            EventSink::new(run_id, redaction_mode),
            checkpoint_store,
            std::collections::BTreeSet::new(),
            BTreeMap::new(),
            BTreeMap::new(),
            RunnerCommandState::default(),
        )
    }

    /// Resume a run from a previously saved [`Checkpoint`].
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn resume(
        checkpoint: Checkpoint,
        pack: Pack,
        protocols: BTreeMap<String, Protocol>,
        executors: ExecutorChain,
        config: EngineConfig,
        run_id: impl Into<String>,
        redaction_mode: RedactionMode,
        next_seq: u64,
        checkpoint_store: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self::build(
            checkpoint.plan,
            checkpoint.runtime,
            pack,
            protocols,
            executors,
            config,
            EventSink::resume(run_id, redaction_mode, next_seq),
            checkpoint_store,
            checkpoint.completed_node_ids,
            checkpoint.poll_state_by_node_id,
            checkpoint.paused_by_node_id,
            checkpoint.extensions.runner_command_state,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        plan: PlanDag,
        root: RuntimeRoot,
        pack: Pack,
        protocols: BTreeMap<String, Protocol>,
        executors: ExecutorChain,
        config: EngineConfig,
        sink: EventSink,
        checkpoint_store: Arc<dyn CheckpointStore>,
        completed: std::collections::BTreeSet<String>,
        poll_state: BTreeMap<String, PollState>,
        paused: BTreeMap<String, PauseState>,
        command_state: RunnerCommandState,
    ) -> Self {
        let gate = ConcurrencyGate::new(config.max_concurrency, &config.chain_limits, config.default_chain_limits);
        Self {
            plan,
            root,
            pack,
            protocols,
            executors: Arc::new(executors),
            config,
            sink,
            bus: Arc::new(EventBus::new()),
            gate,
            approval_cache: Arc::new(AsyncMutex::new(ApprovalCache::new())),
            checkpoint_store,
            cancel: CancellableRun::new(CancellationToken::new()),
            completed,
            poll_state,
            paused,
            command_state,
            failed: None,
            detect_overrides: DetectOverrides::default(),
        }
    }

    /// A handle that can cancel this run (or inspect whether/why it has
    /// already been cancelled) from outside the [`Engine::run`] future.
    #[must_use]
    pub fn cancellation(&self) -> &CancellableRun {
        &self.cancel
    }

    /// Subscribe to this run's event stream.
    #[must_use]
    pub fn subscribe(&self) -> EventSubscription {
        self.bus.subscribe()
    }

    /// The current Runtime Root, e.g. for a caller that wants to print
    /// `--write-outputs` after the run ends.
    #[must_use]
    pub fn root(&self) -> &RuntimeRoot {
        &self.root
    }

    /// Feed one decoded command from the control channel. Duplicate `id`s
    /// (already present in the checkpointed command log) are dropped
    /// silently, matching the idempotency guarantee a replayed
    /// `--commands-stdin-jsonl` stream relies on.
    pub async fn handle_command(&mut self, envelope: CommandEnvelope) {
        if self.command_state.has_processed(&envelope.id) {
            return;
        }
        let id = envelope.id.clone();
        let Ok(command) = envelope.command() else {
            self.emit(EventKind::CommandRejected, json!({"id": id, "reason": "undecodable payload"}));
            self.command_state.mark_processed(id);
            return;
        };
        match command {
            Command::ApplyPatches(payload) => self.handle_apply_patches(&id, payload.patches),
            Command::UserConfirm(payload) => self.handle_user_confirm(&id, payload).await,
            Command::SelectProvider(payload) => {
                self.detect_overrides.register(payload);
                self.emit(EventKind::CommandAccepted, json!({"id": id}));
            }
            Command::Cancel(payload) => self.handle_cancel_command(&id, payload),
        }
        self.command_state.mark_processed(id);
    }

    fn handle_apply_patches(&mut self, id: &str, patches: Vec<RuntimePatch>) {
        let hash = ais_core::patch_batch_hash(&patches).unwrap_or_default();
        let mut all_ok = true;
        for patch in &patches {
            if self.apply_patch(patch, &[]).is_err() {
                all_ok = false;
            }
        }
        if all_ok {
            self.emit(EventKind::CommandAccepted, json!({"id": id, "patch_batch_hash": hash}));
        } else {
            self.emit(EventKind::CommandRejected, json!({"id": id, "patch_batch_hash": hash}));
        }
    }

    async fn handle_user_confirm(&mut self, id: &str, payload: ais_protocol::UserConfirmPayload) {
        let Some(pause) = self.paused.remove(&payload.node_id) else {
            self.emit(EventKind::CommandRejected, json!({"id": id, "reason": "node is not paused"}));
            return;
        };
        if !payload.approve {
            self.paused.insert(payload.node_id.clone(), pause);
            self.emit(EventKind::CommandAccepted, json!({"id": id, "node_id": payload.node_id, "approved": false}));
            return;
        }
        if let Some(node) = self.plan.node(&payload.node_id) {
            let action_key = format!("{}.{}", node.source.protocol, node.source.action.clone().unwrap_or_default());
            self.approval_cache.lock().await.approve(&node.source.node_id, &action_key);
        }
        self.emit(EventKind::CommandAccepted, json!({"id": id, "node_id": payload.node_id, "approved": true}));
    }

    fn handle_cancel_command(&mut self, id: &str, payload: ais_protocol::CancelPayload) {
        match payload.node_id {
            Some(node_id) => {
                let patch = RuntimePatch::merge("policy.runner_cancelled_by_node", json!({ node_id.clone(): true }));
                let _ = self.apply_patch(&patch, &[]);
            }
            None => self.cancel.cancel(CancellationReason::UserRequested),
        }
        if let Some(reason) = payload.reason {
            let _ = self.apply_patch(&RuntimePatch::set("policy.runner_cancel_reason", json!(reason)), &[]);
        }
        self.emit(EventKind::CommandAccepted, json!({"id": id}));
    }

    /// Run the scheduler loop to completion (or to the first point it must
    /// stop: every node terminal, nothing left ready or waiting, a node
    /// failed non-retryably, or cancellation was requested).
    pub async fn run(&mut self) -> RunOutcome {
        self.emit(EventKind::PlanReady, json!({"node_count": self.plan.nodes.len()}));
        loop {
            if self.cancel.is_cancelled() {
                self.checkpoint().await;
                self.executors.destroy().await;
                return RunOutcome::Cancelled { reason: self.cancel.reason() };
            }
            if let Some((node_id, error)) = self.failed.clone() {
                self.checkpoint().await;
                self.executors.destroy().await;
                return RunOutcome::Failed { node_id, error };
            }

            let ready = self.seed_ready().await;

            if ready.is_empty() {
                if self.all_completed() {
                    self.executors.destroy().await;
                    return RunOutcome::Completed;
                }
                if let Some(wake_at) = self.earliest_wake() {
                    let now = now_ms();
                    if wake_at > now {
                        tokio::time::sleep(Duration::from_millis(wake_at - now)).await;
                    }
                    continue;
                }
                self.emit(EventKind::EnginePaused, json!({"reason": "no ready or waiting nodes remain"}));
                self.checkpoint().await;
                self.executors.destroy().await;
                return RunOutcome::EnginePaused;
            }

            self.dispatch_batch(ready).await;
            self.checkpoint().await;
        }
    }

    fn all_completed(&self) -> bool {
        self.plan.nodes.iter().all(|n| self.completed.contains(&n.id))
    }

    fn earliest_wake(&self) -> Option<u64> {
        self.poll_state.values().filter_map(|p| p.next_attempt_at_ms).min()
    }

    fn is_cancelled_node(&self, node_id: &str) -> bool {
        self.root.get(&format!("policy.runner_cancelled_by_node.{node_id}")) == Some(json!(true))
    }

    /// One pass over the plan: classify every outstanding node, give
    /// blocked ones a solver attempt, and return the nodes now ready to
    /// dispatch in stable topo-index order.
    async fn seed_ready(&mut self) -> Vec<PlanNode> {
        let mut queue: ReadyQueue<PlanNode> = ReadyQueue::new();
        let now = now_ms();
        let nodes = self.plan.nodes.clone();

        for (idx, node) in nodes.into_iter().enumerate() {
            if self.completed.contains(&node.id) || self.paused.contains_key(&node.id) {
                continue;
            }
            if !node.deps.iter().all(|d| self.completed.contains(d)) {
                continue;
            }
            if let Some(poll) = self.poll_state.get(&node.id) {
                if poll.next_attempt_at_ms.is_some_and(|next| next > now) {
                    continue;
                }
            }
            if self.is_cancelled_node(&node.id) {
                self.fail_node(&node.id, EngineError::new(ErrorCode::Cancelled, "node cancelled via command channel"));
                continue;
            }

            match self.analyze_node(&node).await.state {
                ais_eval::ReadinessState::Ready => queue.push(idx as u64, node),
                ais_eval::ReadinessState::Skipped => self.mark_skipped(&node),
                ais_eval::ReadinessState::Blocked => self.handle_blocked(&node, idx, &mut queue).await,
            }
        }

        let mut out = Vec::new();
        while let Some(node) = queue.pop() {
            out.push(node);
        }
        out
    }

    async fn handle_blocked(&mut self, node: &PlanNode, idx: usize, queue: &mut ReadyQueue<PlanNode>) {
        let outcome = self.analyze_node(node).await;
        if self.solve_blocked(node, &outcome).await {
            let resolved = self.analyze_node(node).await;
            match resolved.state {
                ais_eval::ReadinessState::Ready => {
                    queue.push(idx as u64, node.clone());
                    return;
                }
                ais_eval::ReadinessState::Skipped => {
                    self.mark_skipped(node);
                    return;
                }
                ais_eval::ReadinessState::Blocked => {}
            }
        }
        if !self.paused.contains_key(&node.id) {
            self.emit_for_node(
                EventKind::NodeBlocked,
                &node.id,
                json!({"missing_refs": outcome.missing_refs, "needs_detect": outcome.needs_detect}),
            );
        }
    }

    async fn analyze_node(&self, node: &PlanNode) -> ais_eval::ReadinessOutcome {
        let chain = node.chain.as_str();
        let resolver = ScopedDetectResolver { overrides: &self.detect_overrides, node_id: &node.id, chain: &chain };
        let options = AsyncEvalOptions {
            root_overrides: RootOverrides::new(),
            capabilities: self.config.capabilities.clone(),
            resolver: Some(&resolver),
        };
        ais_eval::analyze_async(node, &self.root, &options).await
    }

    /// Give a blocked node one chance to become unblocked: fill a missing
    /// `contracts.<name>` from the protocol's deployment for this chain,
    /// or pause the node if it's blocked on a missing runtime input.
    /// Returns whether a patch was actually applied (the caller re-checks
    /// readiness when it has).
    async fn solve_blocked(&mut self, node: &PlanNode, outcome: &ais_eval::ReadinessOutcome) -> bool {
        let mut applied = false;
        let mut missing_inputs = Vec::new();

        for path in &outcome.missing_refs {
            if self.config.auto_fill_contracts {
                if let Some(name) = path.strip_prefix("contracts.") {
                    if let Some(address) = self.deployment_contract(node, name) {
                        let patch = RuntimePatch::merge("contracts", json!({ name: address }));
                        if self.apply_patch(&patch, &[]).is_ok() {
                            self.emit_for_node(EventKind::SolverApplied, &node.id, json!({"path": path, "contract": name}));
                            applied = true;
                        }
                        continue;
                    }
                }
            }
            if path.starts_with("inputs.") {
                missing_inputs.push(path.clone());
            }
        }

        if !missing_inputs.is_empty() {
            self.pause_node(&node.id, "missing runtime inputs".to_string(), json!({"missing_refs": missing_inputs}));
        }
        applied
    }

    fn deployment_contract(&self, node: &PlanNode, name: &str) -> Option<String> {
        self.protocols
            .get(&node.source.protocol)?
            .deployments
            .iter()
            .find(|d| d.chain == node.chain.as_str())?
            .contracts
            .get(name)
            .cloned()
    }

    /// Dispatch every ready node this pass concurrently, reserving a
    /// global and a per-chain-class permit for each before it starts, and
    /// fold every outcome back into scheduling state as it lands.
    async fn dispatch_batch(&mut self, ready: Vec<PlanNode>) {
        let mut tasks = Vec::with_capacity(ready.len());
        for node in ready {
            let class = if node.execution.is_write() { NodeClass::Write } else { NodeClass::Read };
            let chain_key = node.chain.as_str();
            let permit = self.gate.acquire(&chain_key, class).await;
            self.emit_for_node(EventKind::NodeReady, &node.id, json!({}));

            let resolved_params = self.analyze_node(&node).await.resolved_params;
            let mut root_overrides = RootOverrides::new();
            if let Some(params) = resolved_params {
                root_overrides.insert("params".to_string(), params);
            }

            let executors = Arc::clone(&self.executors);
            let root = self.root.clone();
            let pack = self.pack.clone();
            let action = self.action_for(&node).cloned();
            let protocol_name = node.source.protocol.clone();
            let action_id = node.source.action.clone().or_else(|| node.source.query.clone()).unwrap_or_default();
            let workflow_node_id = node.source.node_id.clone();
            let locale = self.config.locale.clone();
            let broadcast_enabled = self.config.broadcast_enabled;
            let approval_cache = Arc::clone(&self.approval_cache);
            let max_retries = self.config.max_executor_retries;

            tasks.push(tokio::spawn(async move {
                let _permit = permit;
                let ctx = ExecutorContext {
                    root: &root,
                    root_overrides,
                    pack: &pack,
                    action: action.as_ref(),
                    protocol_name: &protocol_name,
                    action_id: &action_id,
                    workflow_node_id: &workflow_node_id,
                    locale: &locale,
                    broadcast_enabled,
                    dry_run: false,
                    approval_cache,
                };
                let result = execute_with_retry(&executors, &node, &ctx, max_retries).await;
                (node, result)
            }));
        }

        for task in tasks {
            match task.await {
                Ok((node, result)) => self.apply_outcome(node, result).await,
                Err(join_err) => warn!(target: "ais.engine", error = %join_err, "node task panicked"),
            }
        }
    }

    fn action_for(&self, node: &PlanNode) -> Option<&ais_core::Action> {
        let action_id = node.source.action.as_ref()?;
        self.protocols.get(&node.source.protocol)?.actions.get(action_id)
    }

    /// Fold one node's executor outcome into scheduling state: merge
    /// outputs and patches, evaluate `assert`/`until`, and move the node
    /// to completed, paused, waiting, or failed.
    async fn apply_outcome(&mut self, node: PlanNode, result: Result<ExecutorResult, EngineError>) {
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(error) => {
                self.poll_state.remove(&node.id);
                self.fail_node(&node.id, error);
                return;
            }
        };

        match outcome {
            ExecutorResult::NeedUserConfirm { reason, details } => self.pause_node(&node.id, reason, details),
            ExecutorResult::Success { outputs, patches, telemetry } => {
                self.merge_success(&node, outputs, patches, telemetry);
            }
        }
    }

    fn merge_success(&mut self, node: &PlanNode, outputs: Option<Json>, patches: Vec<RuntimePatch>, telemetry: Option<Json>) {
        let extra_roots = vec![format!("nodes.{}", node.id)];

        if let Some(outputs) = &outputs {
            for write in &node.writes {
                let patch = match write.mode {
                    WriteMode::Set => RuntimePatch::set(write.path.clone(), outputs.clone()),
                    WriteMode::Merge => RuntimePatch::merge(write.path.clone(), outputs.clone()),
                };
                let _ = self.apply_patch(&patch, &extra_roots);
            }
        }
        for patch in &patches {
            let _ = self.apply_patch(patch, &extra_roots);
        }

        let event_kind = if !node.execution.is_write() {
            EventKind::QueryResult
        } else if self.config.broadcast_enabled {
            EventKind::TxConfirmed
        } else {
            EventKind::TxPrepared
        };
        self.emit_for_node(event_kind, &node.id, json!({"outputs": outputs, "telemetry": telemetry}));

        if let Some(assert) = &node.assert {
            match self.eval_bool(assert) {
                Ok(true) => {}
                Ok(false) => {
                    let message = node.assert_message.clone().unwrap_or_else(|| "assertion failed".to_string());
                    self.poll_state.remove(&node.id);
                    self.fail_node(&node.id, EngineError::new(ErrorCode::ExecutorFailed, message).with_context("retryable", false));
                    return;
                }
                Err(error) => {
                    self.poll_state.remove(&node.id);
                    self.fail_node(&node.id, error);
                    return;
                }
            }
        }

        if let Some(until) = &node.until {
            match self.eval_bool(until) {
                Ok(true) => {}
                Ok(false) => {
                    self.schedule_poll_retry(node);
                    return;
                }
                Err(error) => {
                    self.poll_state.remove(&node.id);
                    self.fail_node(&node.id, error);
                    return;
                }
            }
        }

        self.poll_state.remove(&node.id);
        self.mark_completed(&node.id);
    }

    fn eval_bool(&self, expr: &ValueRef) -> Result<bool, EngineError> {
        let value = ais_eval::evaluate(expr, &self.root, &EvalOptions::default())?;
        value
            .as_bool()
            .ok_or_else(|| EngineError::new(ErrorCode::CelEvalFailed, "expected a boolean result").with_context("value", value))
    }

    /// A read-kind node's `until` evaluated falsy: bump its shared poll
    /// budget and either schedule the next attempt or fail once
    /// `retry.max_attempts` is exhausted.
    fn schedule_poll_retry(&mut self, node: &PlanNode) {
        let retry = node
            .retry
            .clone()
            .unwrap_or(ais_core::RetrySpec { interval_ms: 1000, max_attempts: None, backoff: ais_core::BackoffKind::Fixed });
        let attempts = {
            let state = self.poll_state.entry(node.id.clone()).or_insert(PollState {
                attempts: 0,
                started_at_ms: now_ms(),
                next_attempt_at_ms: None,
            });
            state.attempts += 1;
            state.attempts
        };

        if let Some(max) = retry.max_attempts {
            if attempts > max {
                self.poll_state.remove(&node.id);
                self.fail_node(&node.id, EngineError::new(ErrorCode::ExecutorFailed, "poll retry budget exhausted").with_context("retryable", false));
                return;
            }
        }

        let next = now_ms() + retry.interval_ms;
        if let Some(state) = self.poll_state.get_mut(&node.id) {
            state.next_attempt_at_ms = Some(next);
        }
        self.emit_for_node(EventKind::NodeWaiting, &node.id, json!({"attempts": attempts, "next_attempt_at_ms": next}));
    }

    fn apply_patch(&mut self, patch: &RuntimePatch, extra_roots: &[String]) -> Result<(), ais_core::RootPathError> {
        let guard = PatchGuard::with_extra_roots(extra_roots.to_vec());
        match self.root.apply_patch(patch, &guard) {
            Ok(()) => {
                self.emit(EventKind::PatchApplied, json!({"op": format!("{:?}", patch.op), "path": patch.path}));
                Ok(())
            }
            Err(error) => {
                self.emit(EventKind::PatchRejected, json!({"path": patch.path, "reason": error.to_string()}));
                Err(error)
            }
        }
    }

    fn mark_completed(&mut self, node_id: &str) {
        self.completed.insert(node_id.to_string());
    }

    fn mark_skipped(&mut self, node: &PlanNode) {
        self.emit_for_node(EventKind::Skipped, &node.id, json!({}));
        self.mark_completed(&node.id);
    }

    fn pause_node(&mut self, node_id: &str, reason: String, details: Json) {
        self.paused.insert(
            node_id.to_string(),
            PauseState { reason: reason.clone(), details: Some(details.clone()), paused_at_ms: now_ms() },
        );
        self.emit_for_node(EventKind::NeedUserConfirm, node_id, json!({"reason": reason, "details": details}));
    }

    fn fail_node(&mut self, node_id: &str, error: EngineError) {
        let dto = EngineErrorDto::from(&error);
        self.emit_for_node(EventKind::Error, node_id, json!({"error": &dto}));
        self.failed = Some((node_id.to_string(), dto));
    }

    async fn checkpoint(&mut self) {
        let Some(path) = self.config.checkpoint_path.clone() else { return };
        let mut snapshot = Checkpoint::new(self.plan.clone(), self.root.clone());
        snapshot.completed_node_ids = self.completed.clone();
        snapshot.poll_state_by_node_id = self.poll_state.clone();
        snapshot.paused_by_node_id = self.paused.clone();
        snapshot.extensions = CheckpointExtensions { runner_command_state: self.command_state.clone() };
        match self.checkpoint_store.save(&path, &snapshot).await {
            Ok(()) => {
                self.emit(EventKind::CheckpointSaved, json!({"path": path.display().to_string()}));
            }
            Err(error) => warn!(target: "ais.engine", %error, path = %path.display(), "checkpoint save failed"),
        }
    }

    fn emit(&self, kind: EventKind, data: Json) -> EventEnvelope {
        let envelope = self.sink.emit(kind, data);
        self.bus.publish(envelope.clone());
        envelope
    }

    fn emit_for_node(&self, kind: EventKind, node_id: impl Into<String>, data: Json) -> EventEnvelope {
        let envelope = self.sink.emit_for_node(kind, node_id, data);
        self.bus.publish(envelope.clone());
        envelope
    }
}

/// Run one node's executor call, retrying a `timeout_ms` expiry or a
/// `retryable: true` executor failure up to `max_retries` times with a
/// short fixed backoff. Distinct from a read-kind node's `retry`/`until`
/// poll budget, which spans whole scheduler passes rather than looping
/// inside a single dispatch.
async fn execute_with_retry(
    executors: &ExecutorChain,
    node: &PlanNode,
    ctx: &ExecutorContext<'_>,
    max_retries: u32,
) -> Result<ExecutorResult, EngineError> {
    let mut attempt = 0u32;
    loop {
        let outcome = match node.timeout_ms {
            Some(ms) => match tokio::time::timeout(Duration::from_millis(ms), executors.execute(node, ctx)).await {
                Ok(result) => result,
                Err(_) => Err(EngineError::new(ErrorCode::ExecutorFailed, format!("node timed out after {ms}ms")).with_context("retryable", true)),
            },
            None => executors.execute(node, ctx).await,
        };

        match outcome {
            Err(ref error) if error.is_retryable() && attempt < max_retries => {
                attempt += 1;
                tokio::time::sleep(EXECUTOR_RETRY_INTERVAL).await;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ais_checkpoint::InMemoryCheckpointStore;
    use ais_core::{ExecutionSpec, PlanNodeKind, PlanNodeSource, PlanWrite};
    use ais_executor::{EvmExecutor, MockEvmRpcClient, MockSolanaRpcClient, SolanaExecutor};
    use std::collections::BTreeMap as Map;

    fn source(protocol: &str) -> PlanNodeSource {
        PlanNodeSource {
            workflow: "wf".to_string(),
            node_id: "n1".to_string(),
            protocol: protocol.to_string(),
            action: None,
            query: None,
            step_id: None,
        }
    }

    fn evm_query_node(id: &str, write_path: &str) -> PlanNode {
        PlanNode {
            id: id.to_string(),
            chain: ChainId::parse("eip155:1").unwrap(),
            kind: PlanNodeKind::QueryRef,
            deps: vec![],
            condition: None,
            assert: None,
            assert_message: None,
            until: None,
            retry: None,
            timeout_ms: None,
            params: Map::new(),
            execution: ExecutionSpec::EvmRead { fields: Map::new() },
            writes: vec![PlanWrite { path: write_path.to_string(), mode: WriteMode::Set }],
            source: source("demo"),
        }
    }

    fn test_executors() -> ExecutorChain {
        ExecutorChain::builder()
            .with_executor(Arc::new(EvmExecutor::new(Arc::new(MockEvmRpcClient::default()))))
            .with_executor(Arc::new(SolanaExecutor::new(Arc::new(MockSolanaRpcClient::default()))))
            .build()
    }

    fn test_pack() -> Pack {
        Pack {
            schema: ais_core::PACK_SCHEMA.to_string(),
            includes: vec![],
            policy: ais_core::PackPolicy {
                approvals: ais_core::ApprovalPolicy {
                    auto_execute_max_risk_level: "low".to_string(),
                    require_approval_min_risk_level: "high".to_string(),
                },
                hard_constraints_defaults: vec![],
            },
            token_policy: ais_core::TokenPolicy { allowlist: vec![], resolution: "strict".to_string() },
            providers_detect_enabled: vec![],
            plugins_execution_enabled: vec![],
            overrides_actions: BTreeMap::new(),
        }
    }

    fn test_engine(plan: PlanDag) -> Engine {
        Engine::new(
            plan,
            test_pack(),
            BTreeMap::new(),
            test_executors(),
            EngineConfig::default(),
            "test-run",
            RedactionMode::Default,
            Arc::new(InMemoryCheckpointStore::new()),
            serde_json::Map::new(),
        )
    }

    #[tokio::test]
    async fn a_single_read_node_completes() {
        let plan = PlanDag::new(vec![evm_query_node("q1", "nodes.q1.result")]);
        let mut engine = test_engine(plan);
        let outcome = engine.run().await;
        assert!(matches!(outcome, RunOutcome::Completed));
        assert!(engine.completed.contains("q1"));
    }

    #[tokio::test]
    async fn dependent_node_waits_for_its_dependency() {
        let mut second = evm_query_node("q2", "nodes.q2.result");
        second.deps = vec!["q1".to_string()];
        let plan = PlanDag::new(vec![evm_query_node("q1", "nodes.q1.result"), second]);
        let mut engine = test_engine(plan);
        let outcome = engine.run().await;
        assert!(matches!(outcome, RunOutcome::Completed));
        assert!(engine.completed.contains("q1"));
        assert!(engine.completed.contains("q2"));
    }

    #[tokio::test]
    async fn a_condition_false_node_is_skipped_not_executed() {
        let mut node = evm_query_node("skip-me", "nodes.skip-me.result");
        node.condition = Some(ValueRef::Lit(json!(false)));
        let plan = PlanDag::new(vec![node]);
        let mut engine = test_engine(plan);
        let outcome = engine.run().await;
        assert!(matches!(outcome, RunOutcome::Completed));
        assert!(engine.completed.contains("skip-me"));
        assert!(engine.root().get("nodes.skip-me.outputs").is_none());
    }

    #[tokio::test]
    async fn a_node_referencing_a_missing_input_blocks_and_pauses_the_run() {
        let mut node = evm_query_node("needs-input", "nodes.needs-input.result");
        node.params.insert("amount".to_string(), ValueRef::Ref("inputs.amount".to_string()));
        let plan = PlanDag::new(vec![node]);
        let mut engine = test_engine(plan);
        let outcome = engine.run().await;
        assert!(matches!(outcome, RunOutcome::EnginePaused));
        assert!(engine.paused.contains_key("needs-input"));
    }

    #[tokio::test]
    async fn an_until_clause_that_never_turns_true_exhausts_its_retry_budget() {
        let mut node = evm_query_node("poll1", "nodes.poll1.result");
        node.until = Some(ValueRef::Lit(json!(false)));
        node.retry = Some(ais_core::RetrySpec { interval_ms: 1, max_attempts: Some(1), backoff: ais_core::BackoffKind::Fixed });
        let plan = PlanDag::new(vec![node]);
        let mut engine = test_engine(plan);
        let outcome = engine.run().await;
        match outcome {
            RunOutcome::Failed { node_id, .. } => assert_eq!(node_id, "poll1"),
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancel_before_run_short_circuits_immediately() {
        let plan = PlanDag::new(vec![evm_query_node("q1", "nodes.q1.result")]);
        let mut engine = test_engine(plan);
        engine.cancellation().cancel(CancellationReason::UserRequested);
        let outcome = engine.run().await;
        assert!(matches!(outcome, RunOutcome::Cancelled { reason: Some(CancellationReason::UserRequested) }));
    }

    #[tokio::test]
    async fn duplicate_commands_are_dropped_idempotently() {
        let plan = PlanDag::new(vec![evm_query_node("q1", "nodes.q1.result")]);
        let mut engine = test_engine(plan);
        let envelope = CommandEnvelope {
            id: "cmd-1".to_string(),
            ts: chrono::Utc::now(),
            kind: ais_protocol::CommandKind::Cancel,
            payload: json!({"reason": "dup test"}),
            extensions: None,
        };
        engine.handle_command(envelope.clone()).await;
        assert!(engine.cancel.is_cancelled());
        engine.cancel = CancellableRun::new(CancellationToken::new());
        engine.handle_command(envelope).await;
        assert!(!engine.cancel.is_cancelled(), "second delivery of the same id must be a no-op");
    }
}
