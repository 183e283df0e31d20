// SPDX-License-Identifier: MIT OR Apache-2.0
//! The document kinds the compiler consumes: `Protocol`, `Pack`, and
//! `Workflow`. These are opaque to the core evaluator/engine — the engine
//! only cares about the compiled [`crate::plan::PlanDag`] they produce —
//! but the compiler needs their shapes to build one.

use crate::plan::ExecutionSpec;
use crate::value::ValueRef;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Schema string for a Protocol document.
pub const PROTOCOL_SCHEMA: &str = "ais/0.0.2";
/// Schema string for a Pack document.
pub const PACK_SCHEMA: &str = "ais-pack/0.0.2";
/// Schema string for a Workflow document.
pub const WORKFLOW_SCHEMA: &str = "ais-flow/0.0.3";

/// Protocol metadata header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProtocolMeta {
    /// Protocol name.
    pub protocol: String,
    /// Protocol version string.
    pub version: String,
}

/// A chain's contract deployments for a protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Deployment {
    /// The chain this deployment is on.
    pub chain: String,
    /// Contract name to address (or other chain-native identifier).
    pub contracts: BTreeMap<String, String>,
}

/// Declared shape of one action/query parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ParamSpec {
    /// Parameter name.
    pub name: String,
    /// Declared type tag, e.g. `uint256`, `address`, `string`.
    #[serde(rename = "type")]
    pub type_name: String,
    /// Whether the parameter is required.
    #[serde(default = "default_true")]
    pub required: bool,
}

fn default_true() -> bool {
    true
}

/// A calculated field definition: an expression plus the `calculated.*`
/// inputs it depends on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CalculatedFieldSpec {
    /// The expression to evaluate.
    pub expr: ValueRef,
    /// Dependency names, each expected to be prefixed `calculated.`.
    #[serde(default)]
    pub inputs: Vec<String>,
}

/// A hard constraint gating execution of an action, evaluated by the
/// policy gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct HardConstraint {
    /// Human-readable constraint name.
    pub name: String,
    /// The boolean-valued expression; `false` hard-blocks the action.
    pub expr: ValueRef,
    /// Message surfaced when the constraint fails.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// A protocol action: a write-capable operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Action {
    /// Declared parameters.
    #[serde(default)]
    pub params: Vec<ParamSpec>,
    /// Declared return fields.
    #[serde(default)]
    pub returns: Vec<ParamSpec>,
    /// Chain-pattern to `ExecutionSpec` map, e.g. `"eip155:*"`.
    pub execution: BTreeMap<String, ExecutionSpec>,
    /// Default risk level, overridable by a pack's `overrides.actions`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_level: Option<String>,
    /// Risk tags, unioned with any pack-level override tags.
    #[serde(default)]
    pub risk_tags: Vec<String>,
    /// Query ids that must already have results in `runtime.query` before
    /// this action may execute.
    #[serde(default)]
    pub requires_queries: Vec<String>,
    /// Calculated fields, keyed by name.
    #[serde(default)]
    pub calculated_fields: BTreeMap<String, CalculatedFieldSpec>,
    /// Hard constraints gating this action.
    #[serde(default)]
    pub hard_constraints: Vec<HardConstraint>,
}

/// A protocol query: a read-only operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Query {
    /// Declared parameters.
    #[serde(default)]
    pub params: Vec<ParamSpec>,
    /// Declared return fields.
    #[serde(default)]
    pub returns: Vec<ParamSpec>,
    /// Chain-pattern to `ExecutionSpec` map.
    pub execution: BTreeMap<String, ExecutionSpec>,
}

/// A Protocol document: the declarative description of what a protocol can
/// do, keyed by action/query id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Protocol {
    /// Always [`PROTOCOL_SCHEMA`] for documents this crate produces.
    pub schema: String,
    /// Protocol metadata.
    pub meta: ProtocolMeta,
    /// Contract deployments, one per chain.
    #[serde(default)]
    pub deployments: Vec<Deployment>,
    /// Actions keyed by id.
    #[serde(default)]
    pub actions: BTreeMap<String, Action>,
    /// Queries keyed by id.
    #[serde(default)]
    pub queries: BTreeMap<String, Query>,
}

/// One included protocol reference in a Pack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PackInclude {
    /// Protocol name.
    pub protocol: String,
    /// Protocol version string.
    pub version: String,
    /// Restrict this protocol's actions/queries to a chain namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_scope: Option<String>,
}

/// Approval thresholds for a Pack's risk-gated policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ApprovalPolicy {
    /// Max risk level auto-executed without confirmation.
    pub auto_execute_max_risk_level: String,
    /// Min risk level requiring explicit confirmation.
    pub require_approval_min_risk_level: String,
}

/// A Pack's policy block: approval thresholds plus default hard
/// constraints applied to every included action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PackPolicy {
    /// Approval thresholds.
    pub approvals: ApprovalPolicy,
    /// Hard constraints applied in addition to each action's own.
    #[serde(default)]
    pub hard_constraints_defaults: Vec<HardConstraint>,
}

/// Token allow-list and resolution mode for a Pack's token policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TokenPolicy {
    /// Allowed token identifiers (chain-qualified).
    #[serde(default)]
    pub allowlist: Vec<String>,
    /// Resolution strategy name, e.g. `strict` or `best_effort`.
    pub resolution: String,
}

/// One enabled detect provider entry in a Pack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DetectProviderEntry {
    /// The detect kind this provider services.
    pub kind: String,
    /// Provider name.
    pub provider: String,
    /// Restrict to specific chains; empty means all.
    #[serde(default)]
    pub chains: Vec<String>,
    /// Selection priority; higher wins when multiple providers qualify.
    #[serde(default)]
    pub priority: i32,
    /// Candidate values this provider may resolve to.
    #[serde(default)]
    pub candidates: Vec<serde_json::Value>,
}

/// One enabled execution plugin entry in a Pack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PluginEntry {
    /// The plugin execution type string.
    #[serde(rename = "type")]
    pub plugin_type: String,
    /// Restrict to specific chains; empty means all.
    #[serde(default)]
    pub chains: Vec<String>,
}

/// Per-action overrides a Pack may apply, e.g. additional risk tags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
pub struct ActionOverride {
    /// Additional risk tags unioned with the action's own.
    #[serde(default)]
    pub risk_tags: Vec<String>,
}

/// A Pack document: policy, provider, and plugin bindings layered over a
/// set of included protocols.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Pack {
    /// Always [`PACK_SCHEMA`] for documents this crate produces.
    pub schema: String,
    /// Included protocols.
    #[serde(default)]
    pub includes: Vec<PackInclude>,
    /// Approval and hard-constraint policy.
    pub policy: PackPolicy,
    /// Token allow-list policy.
    pub token_policy: TokenPolicy,
    /// Enabled detect providers.
    #[serde(default)]
    pub providers_detect_enabled: Vec<DetectProviderEntry>,
    /// Enabled execution plugins.
    #[serde(default)]
    pub plugins_execution_enabled: Vec<PluginEntry>,
    /// Per-action overrides, keyed by `<protocol>.<action_id>`.
    #[serde(default)]
    pub overrides_actions: BTreeMap<String, ActionOverride>,
}

/// Declared shape and default of one workflow input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WorkflowInputSpec {
    /// Declared type tag.
    #[serde(rename = "type")]
    pub type_name: String,
    /// Whether the input must be supplied.
    #[serde(default)]
    pub required: bool,
    /// Default value used when not supplied and not required.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
}

/// One node in a Workflow document, prior to compilation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WorkflowNode {
    /// Node id, unique within the workflow.
    pub id: String,
    /// Protocol this node references.
    pub protocol: String,
    /// Action id, if this node invokes an action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Query id, if this node invokes a query.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    /// Chain this node executes on; falls back to the workflow's
    /// `default_chain` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain: Option<String>,
    /// Explicit dependency node ids, unioned with implicit `ref` deps.
    #[serde(default)]
    pub deps: Vec<String>,
    /// Bound parameters.
    #[serde(default)]
    pub params: BTreeMap<String, ValueRef>,
    /// Pre-execution guard.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<ValueRef>,
    /// Post-execution assertion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assert: Option<ValueRef>,
    /// Message attached to an `assert` failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assert_message: Option<String>,
    /// Poll-until condition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<ValueRef>,
    /// Retry/poll configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<crate::plan::RetrySpec>,
    /// Per-node execution timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

/// One protocol import declared by a Workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProtocolImport {
    /// Protocol name.
    pub protocol: String,
    /// Path the protocol document was loaded from (opaque to the engine).
    pub path: String,
}

/// Workflow metadata header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WorkflowMeta {
    /// Workflow name.
    pub name: String,
    /// Workflow version string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// A Workflow document: an ordered, multi-step goal compiled into a
/// [`crate::plan::PlanDag`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Workflow {
    /// Always [`WORKFLOW_SCHEMA`] for documents this crate produces.
    pub schema: String,
    /// Workflow metadata.
    pub meta: WorkflowMeta,
    /// Chain used by nodes that don't declare their own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_chain: Option<String>,
    /// Declared inputs, keyed by name.
    #[serde(default)]
    pub inputs: BTreeMap<String, WorkflowInputSpec>,
    /// The workflow's nodes, in source order.
    pub nodes: Vec<WorkflowNode>,
    /// The pack id this workflow requires, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires_pack: Option<String>,
    /// Named output bindings evaluated from the final Runtime Root.
    #[serde(default)]
    pub outputs: BTreeMap<String, ValueRef>,
    /// Protocol imports.
    #[serde(default)]
    pub imports_protocols: Vec<ProtocolImport>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn param_spec_required_defaults_true() {
        let json = serde_json::json!({"name": "amount", "type": "uint256"});
        let spec: ParamSpec = serde_json::from_value(json).unwrap();
        assert!(spec.required);
    }

    #[test]
    fn workflow_roundtrips_through_json() {
        let wf = Workflow {
            schema: WORKFLOW_SCHEMA.to_string(),
            meta: WorkflowMeta { name: "swap-and-bridge".to_string(), version: None },
            default_chain: Some("eip155:1".to_string()),
            inputs: BTreeMap::from([(
                "amount".to_string(),
                WorkflowInputSpec { type_name: "uint256".to_string(), required: true, default: None },
            )]),
            nodes: vec![],
            requires_pack: None,
            outputs: BTreeMap::new(),
            imports_protocols: vec![],
        };
        let json = serde_json::to_string(&wf).unwrap();
        let back: Workflow = serde_json::from_str(&json).unwrap();
        assert_eq!(back, wf);
    }

    #[test]
    fn action_execution_map_keyed_by_chain_pattern() {
        let json = serde_json::json!({
            "params": [],
            "returns": [],
            "execution": {
                "eip155:*": {"type": "evm_call", "fields": {}},
                "*": {"type": "evm_call", "fields": {}},
            },
        });
        let action: Action = serde_json::from_value(json).unwrap();
        assert_eq!(action.execution.len(), 2);
    }
}
