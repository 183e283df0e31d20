// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! ais-compiler
#![warn(missing_docs)]
//!
//! Compiles a `Workflow` document, plus the `Protocol`s it references, into
//! a topologically sorted `PlanDag` ready for the readiness analyzer and
//! scheduler.

use ais_core::{
    ChainId, CompositeStep, ExecutionSpec, PlanDag, PlanNode, PlanNodeKind, PlanNodeSource,
    PlanWrite, Protocol, ValueRef, Workflow, WorkflowNode, WriteMode, select_execution_key,
};
use ais_error::{EngineError, ErrorCode};
use serde_json::Value as Json;
use std::collections::BTreeMap;

/// Looks up a registered [`Protocol`] by name for the nodes a workflow
/// references. Implemented for `BTreeMap<String, Protocol>` for the common
/// in-memory case; implement it directly to back the lookup with a loader.
pub trait ProtocolResolver {
    /// Returns the protocol registered under `name`, if any.
    fn protocol(&self, name: &str) -> Option<&Protocol>;
}

impl ProtocolResolver for BTreeMap<String, Protocol> {
    fn protocol(&self, name: &str) -> Option<&Protocol> {
        self.get(name)
    }
}

/// Compile `workflow` against `protocols` into a topologically sorted
/// [`PlanDag`].
///
/// # Errors
///
/// Returns an [`EngineError`] with [`ErrorCode::PlanBuildError`] for an
/// unresolvable protocol/action/query, an unmatched chain pattern, a nested
/// composite, or a dependency cycle.
pub fn compile(workflow: &Workflow, protocols: &dyn ProtocolResolver) -> Result<PlanDag, EngineError> {
    let order = topo_sort(workflow)?;
    let mut nodes = Vec::new();
    for idx in order {
        let wn = &workflow.nodes[idx];
        let chain = resolve_chain(workflow, wn)?;
        let protocol = protocols.protocol(&wn.protocol).ok_or_else(|| {
            EngineError::new(ErrorCode::PlanBuildError, format!("node `{}`: unknown protocol `{}`", wn.id, wn.protocol))
        })?;
        nodes.extend(compile_node(workflow, wn, protocol, &chain)?);
    }
    for node in &nodes {
        if !node.polling_fields_valid() {
            return Err(EngineError::new(
                ErrorCode::PlanBuildError,
                format!("node `{}`: `until`/`retry`/`timeout_ms` are only valid on read-kind nodes", node.id),
            ));
        }
    }
    let dag = PlanDag::new(nodes);
    if !dag.ids_unique() {
        return Err(EngineError::new(ErrorCode::PlanBuildError, "duplicate plan node ids after compilation"));
    }
    Ok(dag)
}

fn resolve_chain(workflow: &Workflow, wn: &WorkflowNode) -> Result<ChainId, EngineError> {
    let raw = wn
        .chain
        .as_deref()
        .or(workflow.default_chain.as_deref())
        .ok_or_else(|| {
            EngineError::new(
                ErrorCode::PlanBuildError,
                format!("node `{}` has no chain and workflow declares no default_chain", wn.id),
            )
        })?;
    ChainId::parse(raw)
        .map_err(|e| EngineError::new(ErrorCode::PlanBuildError, format!("node `{}`: {e}", wn.id)).with_source(e))
}

/// Explicit `deps` unioned with implicit `nodes.<id>.outputs…` refs mined
/// from `params`, `condition`, `assert`, and `until`, excluding a node's
/// reference to its own (post-execution) outputs.
fn node_dep_ids(wn: &WorkflowNode) -> Vec<String> {
    let mut deps = wn.deps.clone();
    for v in wn.params.values() {
        v.collect_node_deps(&mut deps);
    }
    for v in [&wn.condition, &wn.assert, &wn.until].into_iter().flatten() {
        v.collect_node_deps(&mut deps);
    }
    deps.retain(|d| d != &wn.id);
    deps.sort();
    deps.dedup();
    deps
}

/// Stable (source-order-broken-ties) topological sort of a workflow's
/// nodes, returning their indices in execution order.
fn topo_sort(workflow: &Workflow) -> Result<Vec<usize>, EngineError> {
    let n = workflow.nodes.len();
    let index_of: BTreeMap<&str, usize> =
        workflow.nodes.iter().enumerate().map(|(i, wn)| (wn.id.as_str(), i)).collect();

    let mut deps_by_idx: Vec<Vec<usize>> = Vec::with_capacity(n);
    for wn in &workflow.nodes {
        let mut idxs = Vec::new();
        for dep_id in node_dep_ids(wn) {
            let Some(&di) = index_of.get(dep_id.as_str()) else {
                return Err(EngineError::new(
                    ErrorCode::PlanBuildError,
                    format!("node `{}` depends on unknown node `{dep_id}`", wn.id),
                ));
            };
            idxs.push(di);
        }
        deps_by_idx.push(idxs);
    }

    let mut indegree = vec![0usize; n];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (i, deps) in deps_by_idx.iter().enumerate() {
        indegree[i] = deps.len();
        for &d in deps {
            dependents[d].push(i);
        }
    }

    let mut done = vec![false; n];
    let mut order = Vec::with_capacity(n);
    for _ in 0..n {
        let Some(i) = (0..n).find(|&i| !done[i] && indegree[i] == 0) else {
            return Err(EngineError::new(ErrorCode::PlanBuildError, "dependency cycle detected among workflow nodes"));
        };
        done[i] = true;
        order.push(i);
        for &dep in &dependents[i] {
            indegree[dep] -= 1;
        }
    }
    Ok(order)
}

fn compile_node(
    workflow: &Workflow,
    wn: &WorkflowNode,
    protocol: &Protocol,
    chain: &ChainId,
) -> Result<Vec<PlanNode>, EngineError> {
    let (kind, execution_map) = match (&wn.action, &wn.query) {
        (Some(action_id), None) => {
            let action = protocol.actions.get(action_id).ok_or_else(|| {
                EngineError::new(
                    ErrorCode::PlanBuildError,
                    format!("node `{}`: unknown action `{action_id}` on protocol `{}`", wn.id, wn.protocol),
                )
            })?;
            (PlanNodeKind::ActionRef, &action.execution)
        }
        (None, Some(query_id)) => {
            let query = protocol.queries.get(query_id).ok_or_else(|| {
                EngineError::new(
                    ErrorCode::PlanBuildError,
                    format!("node `{}`: unknown query `{query_id}` on protocol `{}`", wn.id, wn.protocol),
                )
            })?;
            (PlanNodeKind::QueryRef, &query.execution)
        }
        (Some(_), Some(_)) => {
            return Err(EngineError::new(
                ErrorCode::PlanBuildError,
                format!("node `{}` declares both an action and a query", wn.id),
            ));
        }
        (None, None) => {
            return Err(EngineError::new(
                ErrorCode::PlanBuildError,
                format!("node `{}` declares neither an action nor a query", wn.id),
            ));
        }
    };

    let key = select_execution_key(chain, execution_map.keys().map(String::as_str)).ok_or_else(|| {
        EngineError::new(ErrorCode::PlanBuildError, format!("node `{}`: no execution spec matches chain `{chain}`", wn.id))
            .with_context("protocol", &wn.protocol)
    })?;
    let execution = execution_map[key].clone();
    let deps = node_dep_ids(wn);

    match execution {
        ExecutionSpec::Composite { steps } => expand_composite(workflow, wn, chain, kind, deps, &steps),
        // `until`/`retry`/`timeout_ms` are carried through unvalidated here;
        // `compile` rejects the produced node afterwards if they land on a
        // non-read-kind node (see `PlanNode::polling_fields_valid`).
        other => Ok(vec![PlanNode {
            id: wn.id.clone(),
            chain: chain.clone(),
            kind,
            deps,
            condition: wn.condition.clone(),
            assert: wn.assert.clone(),
            assert_message: wn.assert_message.clone(),
            until: wn.until.clone(),
            retry: wn.retry.clone(),
            timeout_ms: wn.timeout_ms,
            params: wn.params.clone(),
            execution: other,
            writes: vec![PlanWrite { path: format!("nodes.{}.outputs", wn.id), mode: WriteMode::Set }],
            source: node_source(workflow, wn, None),
        }]),
    }
}

fn node_source(workflow: &Workflow, wn: &WorkflowNode, step_id: Option<String>) -> PlanNodeSource {
    PlanNodeSource {
        workflow: workflow.meta.name.clone(),
        node_id: wn.id.clone(),
        protocol: wn.protocol.clone(),
        action: wn.action.clone(),
        query: wn.query.clone(),
        step_id,
    }
}

/// A `ValueRef`'s projection into `cel` source, when one exists: `lit(bool)`
/// and `ref(path)` embed directly (a dotted path lexes as a `cel`
/// identifier), `cel(expr)` embeds parenthesized. `detect`/`object`/`array`
/// have no such projection.
fn cel_source(v: &ValueRef) -> Option<String> {
    match v {
        ValueRef::Lit(Json::Bool(b)) => Some(b.to_string()),
        ValueRef::Ref(path) => Some(path.clone()),
        ValueRef::Cel(expr) => Some(format!("({expr})")),
        _ => None,
    }
}

/// ANDs a composite step's own condition with its parent's, per §4.2 point
/// 4: only when both have a `cel` projection. When one side is absent, the
/// other is used unchanged; when both are present but not boolean
/// convertible, the step's own (more specific) condition wins.
fn and_conditions(parent: Option<&ValueRef>, step: Option<&ValueRef>) -> Option<ValueRef> {
    match (parent, step) {
        (None, None) => None,
        (Some(p), None) => Some(p.clone()),
        (None, Some(s)) => Some(s.clone()),
        (Some(p), Some(s)) => match (cel_source(p), cel_source(s)) {
            (Some(ps), Some(ss)) => Some(ValueRef::cel(format!("{ps} && {ss}"))),
            _ => Some(s.clone()),
        },
    }
}

fn expand_composite(
    workflow: &Workflow,
    wn: &WorkflowNode,
    chain: &ChainId,
    kind: PlanNodeKind,
    deps: Vec<String>,
    steps: &[CompositeStep],
) -> Result<Vec<PlanNode>, EngineError> {
    if steps.is_empty() {
        return Err(EngineError::new(ErrorCode::PlanBuildError, format!("node `{}`: composite execution has no steps", wn.id)));
    }
    let last_index = steps.len() - 1;
    let mut nodes = Vec::with_capacity(steps.len());
    let mut prev_id: Option<String> = None;

    for (i, step) in steps.iter().enumerate() {
        if matches!(*step.execution, ExecutionSpec::Composite { .. }) {
            return Err(EngineError::new(
                ErrorCode::PlanBuildError,
                format!("node `{}`: nested composite steps are not supported", wn.id),
            ));
        }
        let is_last = i == last_index;
        let step_node_id = PlanNode::composite_step_node_id(&wn.id, &step.step_id, is_last);
        let step_deps = match &prev_id {
            None => deps.clone(),
            Some(prev) => vec![prev.clone()],
        };
        let condition = and_conditions(wn.condition.as_ref(), step.condition.as_ref());
        let (assert, assert_message) =
            if is_last { (wn.assert.clone(), wn.assert_message.clone()) } else { (None, None) };
        let (until, retry, timeout_ms) = if is_last && kind.is_read_kind() {
            (wn.until.clone(), wn.retry.clone(), wn.timeout_ms)
        } else {
            (None, None, None)
        };
        let writes = if is_last {
            vec![PlanWrite { path: format!("nodes.{}.outputs", wn.id), mode: WriteMode::Merge }]
        } else {
            vec![PlanWrite { path: format!("nodes.{}.outputs.steps.{}", wn.id, step.step_id), mode: WriteMode::Set }]
        };

        nodes.push(PlanNode {
            id: step_node_id.clone(),
            chain: chain.clone(),
            kind,
            deps: step_deps,
            condition,
            assert,
            assert_message,
            until,
            retry,
            timeout_ms,
            params: wn.params.clone(),
            execution: (*step.execution).clone(),
            writes,
            source: node_source(workflow, wn, Some(step.step_id.clone())),
        });
        prev_id = Some(step_node_id);
    }
    Ok(nodes)
}
