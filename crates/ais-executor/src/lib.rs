// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! ais-executor
#![warn(missing_docs)]

/// EVM/Solana inner executors and their pluggable RPC client traits.
pub mod chain;
/// Assembling the five wrapper stages around an inner executor.
pub mod pipeline;
/// The wrapper stages themselves: broadcast-gate, preflight, policy-gate,
/// calculated-fields, strict-success.
pub mod stages;

use std::sync::Arc;

use ais_core::{Action, Pack, PlanNode, RuntimeRoot, RuntimePatch};
use ais_error::EngineError;
use ais_eval::RootOverrides;
use ais_policy::ApprovalCache;
use async_trait::async_trait;
use serde_json::Value as Json;
use tokio::sync::Mutex;

pub use chain::{EvmExecutor, EvmRpcClient, MockEvmRpcClient, MockSolanaRpcClient, SolanaExecutor, SolanaRpcClient};
pub use pipeline::{ExecutorChain, ExecutorChainBuilder};
pub use stages::{ActionPreflightExecutor, BroadcastGateExecutor, CalculatedFieldsExecutor, PolicyGateExecutor, StrictSuccessExecutor};

/// Outcome of running one [`Executor::execute`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutorResult {
    /// The node ran to completion.
    Success {
        /// The node's output value, written to `nodes.<id>.outputs` by the
        /// caller via a patch.
        outputs: Option<Json>,
        /// Additional patches the executor wants applied alongside outputs
        /// (e.g. `CalculatedFieldsExecutor`'s `runtime.calculated` writes).
        patches: Vec<RuntimePatch>,
        /// Free-form telemetry surfaced in the emitted event's `data`.
        telemetry: Option<Json>,
    },
    /// The node is paused pending interactive approval or an explicit
    /// broadcast enable.
    NeedUserConfirm {
        /// Why confirmation is required.
        reason: String,
        /// Structured detail (a confirmation template, a compiled preview,
        /// a list of missing prerequisite queries — shape depends on which
        /// stage produced this).
        details: Json,
    },
}

/// Everything a wrapper stage or inner executor needs to process one node.
///
/// Borrowed fields (`root`, `pack`, `action`) are shared and unchanged
/// across the whole chain; `root_overrides` and `dry_run` are the two
/// fields a stage may adjust before delegating inward, which is why the
/// context is `Clone` rather than passed by unique reference.
#[derive(Clone)]
pub struct ExecutorContext<'a> {
    /// The Runtime Root as it stood when this node became ready.
    pub root: &'a RuntimeRoot,
    /// Values layered ahead of `root` for evaluation (e.g. `params`,
    /// `calculated`), extended by [`CalculatedFieldsExecutor`].
    pub root_overrides: RootOverrides,
    /// The pack layering policy over this node's action, if any.
    pub pack: &'a Pack,
    /// The action definition this node was compiled from, if this is an
    /// `action_ref` node. `None` for `query_ref`/inline `execution` nodes.
    pub action: Option<&'a Action>,
    /// The protocol this node's action/query belongs to.
    pub protocol_name: &'a str,
    /// The action or query id.
    pub action_id: &'a str,
    /// The originating workflow node id, used as the approval cache's
    /// scoping key.
    pub workflow_node_id: &'a str,
    /// Locale tag for confirmation template prose.
    pub locale: &'a str,
    /// Whether `--broadcast` was passed for this run.
    pub broadcast_enabled: bool,
    /// When `true`, an inner executor compiles a preview instead of
    /// sending. Set by [`BroadcastGateExecutor`] for its own inner call
    /// only; never observed above that stage.
    pub dry_run: bool,
    /// Shared across every node in the run so an approval persists for the
    /// lifetime of the engine, not just one gate evaluation.
    pub approval_cache: Arc<Mutex<ApprovalCache>>,
}

/// One stage of the executor chain, or the innermost chain-specific
/// executor it wraps.
///
/// Mirrors this workspace's backend abstraction: a small `supports`/`run`
/// pair rather than a monolithic dispatch `match`, so new inner executors
/// (a plugin execution type, a fourth chain namespace) plug in without
/// touching the wrapper stages.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Whether this executor (or, for a wrapper, its inner executor)
    /// handles `node`.
    fn supports(&self, node: &PlanNode) -> bool;

    /// Run `node` to completion or pause it for confirmation.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] the engine converts to an `error` event;
    /// retryability is carried in the error's context (see
    /// [`EngineError::is_retryable`]).
    async fn execute(&self, node: &PlanNode, ctx: &ExecutorContext<'_>) -> Result<ExecutorResult, EngineError>;

    /// Release any pooled resources (RPC connections, subprocess handles).
    /// Awaited once, when the chain is torn down at the end of a run.
    async fn destroy(&self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use ais_core::{ApprovalPolicy, ChainId, PACK_SCHEMA, PackPolicy, PlanNodeKind, PlanNodeSource, PlanWrite, TokenPolicy, WriteMode};
    use ais_core::plan::ExecutionSpec;
    use std::collections::BTreeMap;

    fn pack() -> Pack {
        Pack {
            schema: PACK_SCHEMA.to_string(),
            includes: vec![],
            policy: PackPolicy {
                approvals: ApprovalPolicy {
                    auto_execute_max_risk_level: "2".to_string(),
                    require_approval_min_risk_level: "3".to_string(),
                },
                hard_constraints_defaults: vec![],
            },
            token_policy: TokenPolicy { allowlist: vec![], resolution: "strict".to_string() },
            providers_detect_enabled: vec![],
            plugins_execution_enabled: vec![],
            overrides_actions: BTreeMap::new(),
        }
    }

    pub(crate) fn node(id: &str, execution: ExecutionSpec) -> PlanNode {
        PlanNode {
            id: id.to_string(),
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
            writes: vec![PlanWrite { path: format!("nodes.{id}.outputs"), mode: WriteMode::Set }],
            source: PlanNodeSource {
                workflow: "wf".to_string(),
                node_id: id.to_string(),
                protocol: "demo".to_string(),
                action: Some("swap".to_string()),
                query: None,
                step_id: None,
            },
        }
    }

    pub(crate) fn ctx<'a>(root: &'a RuntimeRoot, pack: &'a Pack, action: Option<&'a Action>) -> ExecutorContext<'a> {
        ExecutorContext {
            root,
            root_overrides: RootOverrides::new(),
            pack,
            action,
            protocol_name: "demo",
            action_id: "swap",
            workflow_node_id: "n1",
            locale: "en",
            broadcast_enabled: true,
            dry_run: false,
            approval_cache: Arc::new(Mutex::new(ApprovalCache::new())),
        }
    }

    #[tokio::test]
    async fn mock_evm_executor_runs_a_write_end_to_end() {
        let root = RuntimeRoot::new();
        let p = pack();
        let exec = EvmExecutor::new(Arc::new(MockEvmRpcClient::default()));
        let n = node("swap1", ExecutionSpec::EvmCall { fields: BTreeMap::new() });
        let c = ctx(&root, &p, None);
        let result = exec.execute(&n, &c).await.unwrap();
        assert!(matches!(result, ExecutorResult::Success { .. }));
    }
}
