// SPDX-License-Identifier: MIT OR Apache-2.0
//! The five wrapper stages nested around an inner chain-specific executor
//! (§4.6), outermost to innermost: [`StrictSuccessExecutor`],
//! [`BroadcastGateExecutor`], [`ActionPreflightExecutor`],
//! [`PolicyGateExecutor`], [`CalculatedFieldsExecutor`].

use std::sync::Arc;

use ais_core::{PlanNode, RuntimePatch};
use ais_eval::{EvalOptions, evaluate};
use ais_error::{EngineError, ErrorCode};
use ais_policy::{PolicyDecision, PolicyGateInput, evaluate_gate, plugin_allowed};
use async_trait::async_trait;
use serde_json::{Value as Json, json};

use crate::{Executor, ExecutorContext, ExecutorResult};

/// Topologically orders `action.calculated_fields` (edges from `inputs[]`
/// entries prefixed `calculated.`) and evaluates each expression, merging
/// results into `runtime.calculated` and `runtime.nodes.<id>.calculated`
/// before the wrapped executor runs.
///
/// Cycles fall back to source (declared key) order, the same
/// stable-tie-break idiom this workspace's plan compiler uses for its own
/// topological sort.
pub struct CalculatedFieldsExecutor {
    inner: Arc<dyn Executor>,
}

impl CalculatedFieldsExecutor {
    /// Wrap `inner`.
    #[must_use]
    pub fn new(inner: Arc<dyn Executor>) -> Self {
        Self { inner }
    }
}

fn calculated_field_order(action: &ais_core::Action) -> Vec<String> {
    fn visit(
        name: &str,
        fields: &std::collections::BTreeMap<String, ais_core::CalculatedFieldSpec>,
        visited: &mut std::collections::BTreeSet<String>,
        visiting: &mut std::collections::BTreeSet<String>,
        order: &mut Vec<String>,
    ) {
        if visited.contains(name) || visiting.contains(name) {
            return;
        }
        visiting.insert(name.to_string());
        if let Some(spec) = fields.get(name) {
            for dep in &spec.inputs {
                if let Some(dep_name) = dep.strip_prefix("calculated.") {
                    visit(dep_name, fields, visited, visiting, order);
                }
            }
        }
        visiting.remove(name);
        if visited.insert(name.to_string()) {
            order.push(name.to_string());
        }
    }

    let mut visited = std::collections::BTreeSet::new();
    let mut visiting = std::collections::BTreeSet::new();
    let mut order = Vec::with_capacity(action.calculated_fields.len());
    for name in action.calculated_fields.keys() {
        visit(name, &action.calculated_fields, &mut visited, &mut visiting, &mut order);
    }
    order
}

#[async_trait]
impl Executor for CalculatedFieldsExecutor {
    fn supports(&self, node: &PlanNode) -> bool {
        self.inner.supports(node)
    }

    async fn execute(&self, node: &PlanNode, ctx: &ExecutorContext<'_>) -> Result<ExecutorResult, EngineError> {
        let Some(action) = ctx.action else {
            return self.inner.execute(node, ctx).await;
        };
        if action.calculated_fields.is_empty() {
            return self.inner.execute(node, ctx).await;
        }

        let mut overrides = ctx.root_overrides.clone();
        let mut calculated = serde_json::Map::new();
        for name in calculated_field_order(action) {
            let Some(spec) = action.calculated_fields.get(&name) else { continue };
            let options = EvalOptions { root_overrides: overrides.clone(), ..EvalOptions::default() };
            let value = evaluate(&spec.expr, ctx.root, &options)?;
            calculated.insert(name, value);
            overrides.insert("calculated".to_string(), Json::Object(calculated.clone()));
        }

        let mut inner_ctx = ctx.clone();
        inner_ctx.root_overrides = overrides;

        let result = self.inner.execute(node, &inner_ctx).await?;
        Ok(prepend_calculated_patches(result, &node.id, Json::Object(calculated)))
    }

    async fn destroy(&self) {
        self.inner.destroy().await;
    }
}

fn prepend_calculated_patches(result: ExecutorResult, node_id: &str, calculated: Json) -> ExecutorResult {
    match result {
        ExecutorResult::Success { outputs, mut patches, telemetry } => {
            let mut merged = vec![
                RuntimePatch::merge("calculated", calculated.clone()),
                RuntimePatch::merge(format!("nodes.{node_id}.calculated"), calculated),
            ];
            merged.append(&mut patches);
            ExecutorResult::Success { outputs, patches: merged, telemetry }
        }
        other @ ExecutorResult::NeedUserConfirm { .. } => other,
    }
}

/// Evaluates the pack's policy gate (hard constraints, plugin allow-list,
/// risk/approval threshold) before letting a write through.
pub struct PolicyGateExecutor {
    inner: Arc<dyn Executor>,
}

impl PolicyGateExecutor {
    /// Wrap `inner`.
    #[must_use]
    pub fn new(inner: Arc<dyn Executor>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Executor for PolicyGateExecutor {
    fn supports(&self, node: &PlanNode) -> bool {
        self.inner.supports(node)
    }

    async fn execute(&self, node: &PlanNode, ctx: &ExecutorContext<'_>) -> Result<ExecutorResult, EngineError> {
        if !node.execution.is_write() {
            return self.inner.execute(node, ctx).await;
        }

        if let ais_core::plan::ExecutionSpec::Plugin { plugin_type, .. } = &node.execution {
            if !plugin_allowed(&ctx.pack.plugins_execution_enabled, plugin_type, &node.chain) {
                return Err(EngineError::new(
                    ErrorCode::PolicyHardBlock,
                    format!("plugin `{plugin_type}` is not allow-listed for {}", node.chain.as_str()),
                ));
            }
        }

        let Some(action) = ctx.action else {
            return self.inner.execute(node, ctx).await;
        };

        let input = PolicyGateInput {
            workflow_node_id: ctx.workflow_node_id,
            protocol_name: ctx.protocol_name,
            action_id: ctx.action_id,
            action,
            pack: ctx.pack,
            chain: &node.chain,
            root: ctx.root,
            locale: ctx.locale,
        };

        let decision = {
            let cache = ctx.approval_cache.lock().await;
            evaluate_gate(&input, &cache)?
        };

        match decision {
            PolicyDecision::Allow => self.inner.execute(node, ctx).await,
            PolicyDecision::HardBlock { reason } => Err(EngineError::new(ErrorCode::PolicyHardBlock, reason)),
            PolicyDecision::NeedsApproval { template } => Ok(ExecutorResult::NeedUserConfirm {
                reason: "policy_approval_required".to_string(),
                details: serde_json::to_value(*template).unwrap_or(Json::Null),
            }),
        }
    }

    async fn destroy(&self) {
        self.inner.destroy().await;
    }
}

/// Blocks a write node whose `requires_queries[]` aren't yet present in
/// `runtime.query`.
pub struct ActionPreflightExecutor {
    inner: Arc<dyn Executor>,
}

impl ActionPreflightExecutor {
    /// Wrap `inner`.
    #[must_use]
    pub fn new(inner: Arc<dyn Executor>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Executor for ActionPreflightExecutor {
    fn supports(&self, node: &PlanNode) -> bool {
        self.inner.supports(node)
    }

    async fn execute(&self, node: &PlanNode, ctx: &ExecutorContext<'_>) -> Result<ExecutorResult, EngineError> {
        if !node.execution.is_write() {
            return self.inner.execute(node, ctx).await;
        }

        if let Some(action) = ctx.action {
            let missing: Vec<&String> = action.requires_queries.iter().filter(|q| ctx.root.get(&format!("query.{q}")).is_none()).collect();
            if !missing.is_empty() {
                return Ok(ExecutorResult::NeedUserConfirm {
                    reason: "missing_required_queries".to_string(),
                    details: json!({"missing_queries": missing}),
                });
            }
        }

        self.inner.execute(node, ctx).await
    }

    async fn destroy(&self) {
        self.inner.destroy().await;
    }
}

/// Blocks a write unless `ctx.broadcast_enabled`; a blocked write is run in
/// `dry_run` mode so the inner executor can still compile a preview (to,
/// data, value, chain) instead of just refusing outright.
pub struct BroadcastGateExecutor {
    inner: Arc<dyn Executor>,
}

impl BroadcastGateExecutor {
    /// Wrap `inner`.
    #[must_use]
    pub fn new(inner: Arc<dyn Executor>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Executor for BroadcastGateExecutor {
    fn supports(&self, node: &PlanNode) -> bool {
        self.inner.supports(node)
    }

    async fn execute(&self, node: &PlanNode, ctx: &ExecutorContext<'_>) -> Result<ExecutorResult, EngineError> {
        if !node.execution.is_write() || ctx.broadcast_enabled {
            return self.inner.execute(node, ctx).await;
        }

        let mut preview_ctx = ctx.clone();
        preview_ctx.dry_run = true;
        match self.inner.execute(node, &preview_ctx).await? {
            ExecutorResult::Success { outputs, .. } => {
                Ok(ExecutorResult::NeedUserConfirm { reason: "broadcast_disabled".to_string(), details: outputs.unwrap_or(Json::Null) })
            }
            confirm @ ExecutorResult::NeedUserConfirm { .. } => Ok(confirm),
        }
    }

    async fn destroy(&self) {
        self.inner.destroy().await;
    }
}

/// After a genuine (non-dry-run) write's `Success`, enforces chain-specific
/// success markers: EVM `receipt.status` must not be `0|false|"0x0"`; Solana
/// `confirmation.value.err` must be null.
pub struct StrictSuccessExecutor {
    inner: Arc<dyn Executor>,
}

impl StrictSuccessExecutor {
    /// Wrap `inner`.
    #[must_use]
    pub fn new(inner: Arc<dyn Executor>) -> Self {
        Self { inner }
    }
}

fn evm_receipt_failed(outputs: &Json) -> bool {
    match outputs.get("receipt").and_then(|r| r.get("status")) {
        Some(Json::Number(n)) => n.as_i64() == Some(0),
        Some(Json::Bool(b)) => !*b,
        Some(Json::String(s)) => s == "0x0",
        _ => false,
    }
}

fn solana_confirmation_failed(outputs: &Json) -> bool {
    !matches!(outputs.get("confirmation").and_then(|c| c.get("value")).and_then(|v| v.get("err")), Some(Json::Null) | None)
}

#[async_trait]
impl Executor for StrictSuccessExecutor {
    fn supports(&self, node: &PlanNode) -> bool {
        self.inner.supports(node)
    }

    async fn execute(&self, node: &PlanNode, ctx: &ExecutorContext<'_>) -> Result<ExecutorResult, EngineError> {
        let result = self.inner.execute(node, ctx).await?;
        let ExecutorResult::Success { outputs: Some(ref outputs), .. } = result else {
            return Ok(result);
        };
        if !node.execution.is_write() || ctx.dry_run {
            return Ok(result);
        }

        let failed = match node.chain.namespace() {
            "eip155" => evm_receipt_failed(outputs),
            "solana" => solana_confirmation_failed(outputs),
            _ => false,
        };
        if failed {
            return Err(EngineError::new(ErrorCode::ExecutorFailed, "chain-specific success check failed").with_context("node_id", &node.id));
        }
        Ok(result)
    }

    async fn destroy(&self) {
        self.inner.destroy().await;
    }
}
