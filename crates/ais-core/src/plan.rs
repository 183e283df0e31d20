// SPDX-License-Identifier: MIT OR Apache-2.0
//! The compiled Plan DAG: [`PlanNode`], [`ExecutionSpec`], and the write
//! targets a node's execution is permitted to touch.

use crate::chain::ChainId;
use crate::value::ValueRef;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Schema string for a compiled plan document.
pub const PLAN_SCHEMA: &str = "ais-plan/0.0.3";

/// What kind of workflow node a [`PlanNode`] was compiled from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PlanNodeKind {
    /// A reference to a protocol action (may write to the Runtime Root).
    ActionRef,
    /// A reference to a protocol query (read-only).
    QueryRef,
    /// An inline execution spec with no named action/query.
    Execution,
}

impl PlanNodeKind {
    /// Whether nodes of this kind are read-kind: eligible for `until`/retry.
    #[must_use]
    pub fn is_read_kind(self) -> bool {
        matches!(self, Self::QueryRef)
    }
}

/// Backoff strategy for a node's `retry` block. Only `Fixed` is implemented;
/// the variant exists so a future `Exponential` strategy doesn't require a
/// breaking schema change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    /// Constant `interval_ms` between attempts.
    #[default]
    Fixed,
}

/// A node's polling/retry configuration. Valid only on read-kind nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RetrySpec {
    /// Milliseconds to wait between attempts.
    pub interval_ms: u64,
    /// Maximum attempts before giving up; `None` means unbounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    /// Backoff strategy; defaults to fixed-interval.
    #[serde(default)]
    pub backoff: BackoffKind,
}

/// How a node's `writes[]` entry applies its value to the Runtime Root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Replace the value at `path` entirely.
    Set,
    /// Shallow-merge into the value at `path`.
    Merge,
}

/// A single write target a node's execution is permitted to populate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PlanWrite {
    /// Dotted target path in the Runtime Root.
    pub path: String,
    /// How the value is applied.
    pub mode: WriteMode,
}

/// Provenance of a compiled [`PlanNode`]: which workflow node, protocol, and
/// action/query/step it was compiled from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PlanNodeSource {
    /// The workflow this node was compiled from.
    pub workflow: String,
    /// The originating workflow node id (before composite-step expansion).
    pub node_id: String,
    /// The protocol the action/query belongs to.
    pub protocol: String,
    /// The action id, if this node references an action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// The query id, if this node references a query.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    /// The composite step id, if this node was expanded from a composite.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
}

/// The core execution kinds the engine recognizes, plus a `plugin` escape
/// hatch for any `type` string not in this set (walked generically via its
/// `fields` tree for the readiness analyzer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionSpec {
    /// An EVM contract call (a write).
    EvmCall {
        /// Bound parameters, keyed by the action's declared param names.
        #[serde(default)]
        fields: BTreeMap<String, ValueRef>,
    },
    /// A single EVM read (a view call).
    EvmRead {
        #[serde(default)]
        /// Bound parameters.
        fields: BTreeMap<String, ValueRef>,
    },
    /// Several EVM reads batched in one round-trip.
    EvmMultiread {
        /// Bound parameters.
        #[serde(default)]
        fields: BTreeMap<String, ValueRef>,
    },
    /// Several EVM calls batched via a multicall contract.
    EvmMulticall {
        /// Bound parameters.
        #[serde(default)]
        fields: BTreeMap<String, ValueRef>,
    },
    /// A Solana program instruction (a write).
    SolanaInstruction {
        /// Bound parameters.
        #[serde(default)]
        fields: BTreeMap<String, ValueRef>,
    },
    /// A Solana account/program read.
    SolanaRead {
        /// Bound parameters.
        #[serde(default)]
        fields: BTreeMap<String, ValueRef>,
    },
    /// A Bitcoin partially-signed transaction build (a write).
    BitcoinPsbt {
        /// Bound parameters.
        #[serde(default)]
        fields: BTreeMap<String, ValueRef>,
    },
    /// An ordered sequence of steps, expanded by the compiler before
    /// scheduling; never present on a final compiled [`PlanNode`].
    Composite {
        /// Step bindings, in declared order.
        steps: Vec<CompositeStep>,
    },
    /// Any execution type not in the core set, carried opaquely and walked
    /// generically for embedded [`ValueRef`]s.
    Plugin {
        /// The plugin-defined execution type string.
        plugin_type: String,
        /// Bound parameters.
        #[serde(default)]
        fields: BTreeMap<String, ValueRef>,
    },
}

impl ExecutionSpec {
    /// Whether this spec kind is a write (mutates on-chain state) as opposed
    /// to a read.
    #[must_use]
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Self::EvmCall { .. }
                | Self::EvmMulticall { .. }
                | Self::SolanaInstruction { .. }
                | Self::BitcoinPsbt { .. }
        )
    }

    /// Collect every [`ValueRef`] embedded in this spec's bound fields, the
    /// walk the readiness analyzer performs over "known shape per exec
    /// type, or a generic tree walk for plugin specs".
    #[must_use]
    pub fn bound_fields(&self) -> &BTreeMap<String, ValueRef> {
        static EMPTY: BTreeMap<String, ValueRef> = BTreeMap::new();
        match self {
            Self::EvmCall { fields }
            | Self::EvmRead { fields }
            | Self::EvmMultiread { fields }
            | Self::EvmMulticall { fields }
            | Self::SolanaInstruction { fields }
            | Self::SolanaRead { fields }
            | Self::BitcoinPsbt { fields }
            | Self::Plugin { fields, .. } => fields,
            Self::Composite { .. } => &EMPTY,
        }
    }
}

/// One step of a `composite` [`ExecutionSpec`], prior to compiler expansion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CompositeStep {
    /// The step id, suffixed onto the parent node id for all but the last
    /// step.
    pub step_id: String,
    /// The step's own execution spec (must not itself be `composite`).
    pub execution: Box<ExecutionSpec>,
    /// Step-local condition, ANDed with the parent condition when both are
    /// boolean-convertible.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<ValueRef>,
}

/// One node of a compiled [`PlanDag`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PlanNode {
    /// Unique id across the plan.
    pub id: String,
    /// The chain this node executes against.
    pub chain: ChainId,
    /// What kind of workflow node this was compiled from.
    pub kind: PlanNodeKind,
    /// Node ids this node depends on (explicit plus implicit `ref` deps).
    #[serde(default)]
    pub deps: Vec<String>,
    /// Evaluated before execution against the pre-execution root; `false`
    /// skips the node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<ValueRef>,
    /// Evaluated after the node has written its outputs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assert: Option<ValueRef>,
    /// Message attached to an `assert` failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assert_message: Option<String>,
    /// Poll-until condition, evaluated after each read attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<ValueRef>,
    /// Retry/poll configuration; only meaningful alongside `until`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetrySpec>,
    /// Per-node execution timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Bound node parameters.
    #[serde(default)]
    pub params: BTreeMap<String, ValueRef>,
    /// The execution spec this node runs.
    pub execution: ExecutionSpec,
    /// Write targets this node's outputs populate.
    #[serde(default)]
    pub writes: Vec<PlanWrite>,
    /// Provenance.
    pub source: PlanNodeSource,
}

impl PlanNode {
    /// Validate the invariant that `until`/`retry`/`timeout_ms` are only
    /// present on read-kind nodes.
    #[must_use]
    pub fn polling_fields_valid(&self) -> bool {
        if self.kind.is_read_kind() {
            return true;
        }
        self.until.is_none() && self.retry.is_none() && self.timeout_ms.is_none()
    }

    /// The id suffixing convention for composite step expansion:
    /// `<parent>__<step_id>` for every step but the last, which keeps the
    /// parent id.
    #[must_use]
    pub fn composite_step_node_id(parent_id: &str, step_id: &str, is_last: bool) -> String {
        if is_last {
            parent_id.to_string()
        } else {
            format!("{parent_id}__{step_id}")
        }
    }
}

/// A topologically sorted, ties-broken-by-source-order list of
/// [`PlanNode`]s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PlanDag {
    /// Schema version; always [`PLAN_SCHEMA`] for documents this crate
    /// produces.
    pub schema: String,
    /// The compiled nodes, in topological (and stable) order.
    pub nodes: Vec<PlanNode>,
}

impl PlanDag {
    /// Construct a [`PlanDag`] from already-ordered nodes.
    #[must_use]
    pub fn new(nodes: Vec<PlanNode>) -> Self {
        Self { schema: PLAN_SCHEMA.to_string(), nodes }
    }

    /// Look up a node by id.
    #[must_use]
    pub fn node(&self, id: &str) -> Option<&PlanNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Whether every node id in the plan is unique, an invariant the
    /// compiler must uphold before returning a [`PlanDag`].
    #[must_use]
    pub fn ids_unique(&self) -> bool {
        let mut seen = std::collections::HashSet::new();
        self.nodes.iter().all(|n| seen.insert(n.id.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainId;

    fn node(id: &str, kind: PlanNodeKind, deps: Vec<&str>) -> PlanNode {
        PlanNode {
            id: id.to_string(),
            chain: ChainId::parse("eip155:1").unwrap(),
            kind,
            deps: deps.into_iter().map(str::to_string).collect(),
            condition: None,
            assert: None,
            assert_message: None,
            until: None,
            retry: None,
            timeout_ms: None,
            params: BTreeMap::new(),
            execution: ExecutionSpec::EvmRead { fields: BTreeMap::new() },
            writes: vec![PlanWrite { path: format!("nodes.{id}.outputs"), mode: WriteMode::Set }],
            source: PlanNodeSource {
                workflow: "wf".to_string(),
                node_id: id.to_string(),
                protocol: "proto".to_string(),
                action: None,
                query: Some("balance".to_string()),
                step_id: None,
            },
        }
    }

    #[test]
    fn write_kinds_identified_correctly() {
        let mut fields = BTreeMap::new();
        fields.insert("to".to_string(), ValueRef::lit(serde_json::json!("0xabc")));
        assert!(ExecutionSpec::EvmCall { fields: fields.clone() }.is_write());
        assert!(!ExecutionSpec::EvmRead { fields }.is_write());
    }

    #[test]
    fn composite_step_id_suffixing() {
        assert_eq!(PlanNode::composite_step_node_id("swap1", "approve", false), "swap1__approve");
        assert_eq!(PlanNode::composite_step_node_id("swap1", "exec", true), "swap1");
    }

    #[test]
    fn polling_fields_valid_rejects_non_read_with_until() {
        let mut n = node("n1", PlanNodeKind::ActionRef, vec![]);
        n.until = Some(ValueRef::lit(serde_json::json!(true)));
        assert!(!n.polling_fields_valid());
    }

    #[test]
    fn polling_fields_valid_allows_read_with_until() {
        let mut n = node("n1", PlanNodeKind::QueryRef, vec![]);
        n.until = Some(ValueRef::lit(serde_json::json!(true)));
        assert!(n.polling_fields_valid());
    }

    #[test]
    fn polling_fields_valid_rejects_non_read_with_timeout_ms() {
        let mut n = node("n1", PlanNodeKind::ActionRef, vec![]);
        n.timeout_ms = Some(5_000);
        assert!(!n.polling_fields_valid());
    }

    #[test]
    fn polling_fields_valid_allows_read_with_timeout_ms() {
        let mut n = node("n1", PlanNodeKind::QueryRef, vec![]);
        n.timeout_ms = Some(5_000);
        assert!(n.polling_fields_valid());
    }

    #[test]
    fn plan_dag_detects_duplicate_ids() {
        let dag = PlanDag::new(vec![
            node("a", PlanNodeKind::QueryRef, vec![]),
            node("a", PlanNodeKind::QueryRef, vec![]),
        ]);
        assert!(!dag.ids_unique());
    }

    #[test]
    fn plan_dag_node_lookup() {
        let dag = PlanDag::new(vec![node("a", PlanNodeKind::QueryRef, vec![])]);
        assert!(dag.node("a").is_some());
        assert!(dag.node("b").is_none());
    }
}
