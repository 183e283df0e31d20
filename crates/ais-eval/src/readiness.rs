// SPDX-License-Identifier: MIT OR Apache-2.0
//! The readiness analyzer: classifies a [`PlanNode`] against the Runtime
//! Root as `ready`, `blocked`, or `skipped`, in the three phases described
//! for component (C) — condition, params, then the execution spec's bound
//! fields walked with `params` overlaid.

use crate::eval::{AsyncEvalOptions, EvalOptions, RootOverrides, evaluate, evaluate_async};
use ais_core::plan::PlanNode;
use ais_core::runtime::RuntimeRoot;
use ais_core::value::ValueRef;
use ais_error::{EngineError, EngineErrorDto, ErrorCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

/// The three readiness states a [`PlanNode`] may resolve to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessState {
    /// Every binding resolved; the node may be dispatched to an executor.
    Ready,
    /// At least one binding is missing, needs a detect resolver, or faulted.
    Blocked,
    /// `condition` evaluated to `false`; the node is bypassed entirely.
    Skipped,
}

/// Result of analyzing one [`PlanNode`] against the Runtime Root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadinessOutcome {
    /// The classified state.
    pub state: ReadinessState,
    /// Dotted `ref` paths that failed to resolve, accumulated across the
    /// params and execution-spec phases.
    #[serde(default)]
    pub missing_refs: Vec<String>,
    /// Set when a `detect` binding could not be resolved without an async
    /// resolver or a capability negotiation failed.
    #[serde(default)]
    pub needs_detect: bool,
    /// Non-missing-ref, non-detect evaluation faults (e.g. `cel_eval_failed`).
    #[serde(default)]
    pub errors: Vec<EngineErrorDto>,
    /// The fully resolved `params` object, present only when `state ==
    /// Ready`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_params: Option<Json>,
}

impl ReadinessOutcome {
    fn skipped() -> Self {
        Self { state: ReadinessState::Skipped, missing_refs: vec![], needs_detect: false, errors: vec![], resolved_params: None }
    }

    fn blocked(missing_refs: Vec<String>, needs_detect: bool, errors: Vec<EngineErrorDto>) -> Self {
        Self { state: ReadinessState::Blocked, missing_refs, needs_detect, errors, resolved_params: None }
    }

    fn ready(resolved_params: Json) -> Self {
        Self {
            state: ReadinessState::Ready,
            missing_refs: vec![],
            needs_detect: false,
            errors: vec![],
            resolved_params: Some(resolved_params),
        }
    }

    #[must_use]
    fn is_clean(&self) -> bool {
        self.missing_refs.is_empty() && !self.needs_detect && self.errors.is_empty()
    }
}

/// Bucket one evaluation failure into `missing_refs`, `needs_detect`, or
/// `errors`, per the readiness contract.
fn classify_failure(err: &EngineError, missing_refs: &mut Vec<String>, needs_detect: &mut bool, errors: &mut Vec<EngineErrorDto>) {
    match err.code {
        ErrorCode::MissingRef => {
            let path = err.context.get("path").and_then(Json::as_str).unwrap_or(&err.message).to_string();
            missing_refs.push(path);
        }
        ErrorCode::DetectUnsupported => {
            *needs_detect = true;
            errors.push(EngineErrorDto::from(err));
        }
        _ => errors.push(EngineErrorDto::from(err)),
    }
}

fn condition_outcome(condition_result: Result<Json, EngineError>) -> Result<(), ReadinessOutcome> {
    match condition_result {
        Ok(Json::Bool(false)) => Err(ReadinessOutcome::skipped()),
        Ok(Json::Bool(true)) => Ok(()),
        Ok(other) => Err(ReadinessOutcome::blocked(
            vec![],
            false,
            vec![EngineErrorDto::from(&EngineError::new(
                ErrorCode::CelEvalFailed,
                format!("condition did not evaluate to a boolean: {other}"),
            ))],
        )),
        Err(e) => {
            let mut missing_refs = Vec::new();
            let mut needs_detect = false;
            let mut errors = Vec::new();
            classify_failure(&e, &mut missing_refs, &mut needs_detect, &mut errors);
            Err(ReadinessOutcome::blocked(missing_refs, needs_detect, errors))
        }
    }
}

fn params_overrides(root_overrides: &RootOverrides, resolved_params: &Map<String, Json>) -> RootOverrides {
    let mut overrides = root_overrides.clone();
    overrides.insert("params".to_string(), Json::Object(resolved_params.clone()));
    overrides
}

/// Analyze `node`'s readiness synchronously, never consulting an async
/// detect resolver — a `detect` binding not handled by `options`'s sync
/// resolver or `choose_one` sets `needs_detect` rather than awaiting.
#[must_use]
pub fn analyze(node: &PlanNode, root: &RuntimeRoot, options: &EvalOptions<'_>) -> ReadinessOutcome {
    if let Some(condition) = &node.condition
        && let Err(outcome) = condition_outcome(evaluate(condition, root, options))
    {
        return outcome;
    }

    let mut missing_refs = Vec::new();
    let mut needs_detect = false;
    let mut errors = Vec::new();
    let mut resolved_params = Map::new();
    for (key, binding) in &node.params {
        match evaluate(binding, root, options) {
            Ok(v) => {
                resolved_params.insert(key.clone(), v);
            }
            Err(e) => classify_failure(&e, &mut missing_refs, &mut needs_detect, &mut errors),
        }
    }
    if missing_refs.is_empty() && !needs_detect && errors.is_empty() {
        let overrides = params_overrides(&options.root_overrides, &resolved_params);
        let spec_options = EvalOptions { root_overrides: overrides, capabilities: options.capabilities.clone(), resolver: options.resolver };
        for binding in node.execution.bound_fields().values() {
            if let Err(e) = evaluate(binding, root, &spec_options) {
                classify_failure(&e, &mut missing_refs, &mut needs_detect, &mut errors);
            }
        }
    }

    let outcome = ReadinessOutcome::blocked(missing_refs, needs_detect, errors);
    if outcome.is_clean() { ReadinessOutcome::ready(Json::Object(resolved_params)) } else { outcome }
}

/// Analyze `node`'s readiness, awaiting an async detect resolver where
/// `options` supplies one. Semantically equivalent to [`analyze`] for every
/// binding that does not involve `detect`.
pub async fn analyze_async(node: &PlanNode, root: &RuntimeRoot, options: &AsyncEvalOptions<'_>) -> ReadinessOutcome {
    if let Some(condition) = &node.condition {
        let result = evaluate_async(condition, root, options).await;
        if let Err(outcome) = condition_outcome(result) {
            return outcome;
        }
    }

    let mut missing_refs = Vec::new();
    let mut needs_detect = false;
    let mut errors = Vec::new();
    let mut resolved_params = Map::new();
    for (key, binding) in &node.params {
        match evaluate_async(binding, root, options).await {
            Ok(v) => {
                resolved_params.insert(key.clone(), v);
            }
            Err(e) => classify_failure(&e, &mut missing_refs, &mut needs_detect, &mut errors),
        }
    }
    if missing_refs.is_empty() && !needs_detect && errors.is_empty() {
        let overrides = params_overrides(&options.root_overrides, &resolved_params);
        let spec_options = AsyncEvalOptions { root_overrides: overrides, capabilities: options.capabilities.clone(), resolver: options.resolver };
        for binding in node.execution.bound_fields().values() {
            if let Err(e) = evaluate_async(binding, root, &spec_options).await {
                classify_failure(&e, &mut missing_refs, &mut needs_detect, &mut errors);
            }
        }
    }

    let outcome = ReadinessOutcome::blocked(missing_refs, needs_detect, errors);
    if outcome.is_clean() { ReadinessOutcome::ready(Json::Object(resolved_params)) } else { outcome }
}

/// Recursively collect every [`ValueRef`] embedded in a node's `execution`
/// bound fields, mirroring [`ValueRef::collect_node_deps`]'s walk style for
/// diagnostics (e.g. surfacing what a `plugin` exec type actually binds).
#[must_use]
pub fn bound_value_refs(node: &PlanNode) -> Vec<&ValueRef> {
    node.execution.bound_fields().values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ais_core::chain::ChainId;
    use ais_core::plan::{ExecutionSpec, PlanNodeKind, PlanNodeSource};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn base_node(execution: ExecutionSpec) -> PlanNode {
        PlanNode {
            id: "n1".to_string(),
            chain: ChainId::parse("eip155:1").unwrap(),
            kind: PlanNodeKind::ActionRef,
            deps: vec![],
            condition: None,
            assert: None,
            assert_message: None,
            until: None,
            retry: None,
            timeout_ms: None,
            params: BTreeMap::new(),
            execution,
            writes: vec![],
            source: PlanNodeSource {
                workflow: "wf".to_string(),
                node_id: "n1".to_string(),
                protocol: "proto".to_string(),
                action: Some("transfer".to_string()),
                query: None,
                step_id: None,
            },
        }
    }

    #[test]
    fn ready_when_all_bindings_resolve() {
        let root = RuntimeRoot::new();
        let mut fields = BTreeMap::new();
        fields.insert("to".to_string(), ValueRef::lit(json!("0xabc")));
        let node = base_node(ExecutionSpec::EvmCall { fields });
        let outcome = analyze(&node, &root, &EvalOptions::default());
        assert_eq!(outcome.state, ReadinessState::Ready);
        assert_eq!(outcome.resolved_params, Some(json!({})));
    }

    #[test]
    fn blocked_when_param_missing() {
        let root = RuntimeRoot::new();
        let mut node = base_node(ExecutionSpec::EvmCall { fields: BTreeMap::new() });
        node.params.insert("amount".to_string(), ValueRef::reference("inputs.amount"));
        let outcome = analyze(&node, &root, &EvalOptions::default());
        assert_eq!(outcome.state, ReadinessState::Blocked);
        assert_eq!(outcome.missing_refs, vec!["inputs.amount".to_string()]);
    }

    #[test]
    fn blocked_when_execution_field_missing() {
        let root = RuntimeRoot::new();
        let mut fields = BTreeMap::new();
        fields.insert("to".to_string(), ValueRef::reference("contracts.router"));
        let node = base_node(ExecutionSpec::EvmCall { fields });
        let outcome = analyze(&node, &root, &EvalOptions::default());
        assert_eq!(outcome.state, ReadinessState::Blocked);
        assert_eq!(outcome.missing_refs, vec!["contracts.router".to_string()]);
    }

    #[test]
    fn skipped_when_condition_is_false() {
        let root = RuntimeRoot::new();
        let mut node = base_node(ExecutionSpec::EvmRead { fields: BTreeMap::new() });
        node.condition = Some(ValueRef::lit(json!(false)));
        let outcome = analyze(&node, &root, &EvalOptions::default());
        assert_eq!(outcome.state, ReadinessState::Skipped);
    }

    #[test]
    fn blocked_when_condition_is_non_boolean() {
        let root = RuntimeRoot::new();
        let mut node = base_node(ExecutionSpec::EvmRead { fields: BTreeMap::new() });
        node.condition = Some(ValueRef::lit(json!("not-a-bool")));
        let outcome = analyze(&node, &root, &EvalOptions::default());
        assert_eq!(outcome.state, ReadinessState::Blocked);
        assert!(!outcome.errors.is_empty());
    }

    #[test]
    fn params_overlay_resolves_execution_fields() {
        let mut root = RuntimeRoot::new();
        root.set_inputs(serde_json::Map::from_iter([("amount".to_string(), json!(5))]));
        let mut node = base_node(ExecutionSpec::EvmCall { fields: BTreeMap::new() });
        node.params.insert("amount".to_string(), ValueRef::reference("inputs.amount"));
        if let ExecutionSpec::EvmCall { fields } = &mut node.execution {
            fields.insert("value".to_string(), ValueRef::reference("params.amount"));
        }
        let outcome = analyze(&node, &root, &EvalOptions::default());
        assert_eq!(outcome.state, ReadinessState::Ready);
        assert_eq!(outcome.resolved_params, Some(json!({"amount": 5})));
    }

    #[test]
    fn needs_detect_when_detect_kind_unresolved() {
        let root = RuntimeRoot::new();
        let mut node = base_node(ExecutionSpec::EvmCall { fields: BTreeMap::new() });
        node.params.insert(
            "provider".to_string(),
            ValueRef::Detect(ais_core::value::DetectSpec {
                kind: "best_price".to_string(),
                provider: None,
                candidates: vec![],
                constraints: None,
                requires_capabilities: vec![],
            }),
        );
        let outcome = analyze(&node, &root, &EvalOptions::default());
        assert_eq!(outcome.state, ReadinessState::Blocked);
        assert!(outcome.needs_detect);
    }

    #[tokio::test]
    async fn async_analyze_matches_sync_for_ready_node() {
        let root = RuntimeRoot::new();
        let mut fields = BTreeMap::new();
        fields.insert("to".to_string(), ValueRef::lit(json!("0xabc")));
        let node = base_node(ExecutionSpec::EvmCall { fields });
        let sync_outcome = analyze(&node, &root, &EvalOptions::default());
        let async_outcome = analyze_async(&node, &root, &AsyncEvalOptions::default()).await;
        assert_eq!(sync_outcome, async_outcome);
    }

    #[test]
    fn bound_value_refs_returns_all_fields() {
        let mut fields = BTreeMap::new();
        fields.insert("to".to_string(), ValueRef::lit(json!("0xabc")));
        fields.insert("amount".to_string(), ValueRef::reference("inputs.amount"));
        let node = base_node(ExecutionSpec::EvmCall { fields });
        assert_eq!(bound_value_refs(&node).len(), 2);
    }
}
