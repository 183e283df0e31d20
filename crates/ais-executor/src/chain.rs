// SPDX-License-Identifier: MIT OR Apache-2.0
//! The innermost, chain-specific executors.
//!
//! ABI/Borsh encoding and the concrete RPC transport are out of scope here;
//! an [`EvmRpcClient`]/[`SolanaRpcClient`] implementation owns that, and is
//! injected rather than hard-coded, the way this workspace's backend crates
//! are split from the SDK-specific bridges that actually speak to a vendor.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use ais_core::ChainId;
use ais_core::plan::ExecutionSpec;
use ais_eval::{EvalOptions, evaluate};
use ais_error::EngineError;
use async_trait::async_trait;
use serde_json::{Value as Json, json};
use tokio::sync::Mutex;

use crate::{Executor, ExecutorContext, ExecutorResult};

fn bind_fields(fields: &BTreeMap<String, ais_core::ValueRef>, ctx: &ExecutorContext<'_>) -> Result<Json, EngineError> {
    let options = EvalOptions { root_overrides: ctx.root_overrides.clone(), ..EvalOptions::default() };
    let mut bound = serde_json::Map::with_capacity(fields.len());
    for (name, value_ref) in fields {
        bound.insert(name.clone(), evaluate(value_ref, ctx.root, &options)?);
    }
    Ok(Json::Object(bound))
}

// ---------------------------------------------------------------------------
// EVM
// ---------------------------------------------------------------------------

/// A transport-agnostic EVM JSON-RPC client, injected into [`EvmExecutor`].
#[async_trait]
pub trait EvmRpcClient: Send + Sync {
    /// Perform a view call / batched reads; `fields` is the node's bound
    /// parameter object.
    async fn query(&self, chain: &ChainId, fields: &Json) -> Result<Json, EngineError>;

    /// Broadcast a write and await its receipt, returning `(tx_hash,
    /// receipt)`. `receipt` must carry a `status` field per §4.6 point 1.
    async fn send_and_confirm(&self, chain: &ChainId, fields: &Json) -> Result<(String, Json), EngineError>;

    /// Release pooled connections.
    async fn destroy(&self);
}

/// Wraps an [`EvmRpcClient`] as an [`Executor`] over `eip155:*` nodes.
pub struct EvmExecutor {
    client: Arc<dyn EvmRpcClient>,
}

impl EvmExecutor {
    /// Wrap `client` as the EVM inner executor.
    #[must_use]
    pub fn new(client: Arc<dyn EvmRpcClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Executor for EvmExecutor {
    fn supports(&self, node: &ais_core::PlanNode) -> bool {
        node.chain.namespace() == "eip155"
            && matches!(
                node.execution,
                ExecutionSpec::EvmCall { .. } | ExecutionSpec::EvmRead { .. } | ExecutionSpec::EvmMultiread { .. } | ExecutionSpec::EvmMulticall { .. }
            )
    }

    async fn execute(&self, node: &ais_core::PlanNode, ctx: &ExecutorContext<'_>) -> Result<ExecutorResult, EngineError> {
        let bound = bind_fields(node.execution.bound_fields(), ctx)?;

        if !node.execution.is_write() {
            let outputs = self.client.query(&node.chain, &bound).await?;
            return Ok(ExecutorResult::Success { outputs: Some(outputs), patches: vec![], telemetry: None });
        }

        if ctx.dry_run {
            let preview = json!({"chain": node.chain.as_str(), "fields": bound});
            return Ok(ExecutorResult::Success { outputs: Some(preview), patches: vec![], telemetry: None });
        }

        let (tx_hash, receipt) = self.client.send_and_confirm(&node.chain, &bound).await?;
        let outputs = json!({"tx_hash": tx_hash, "receipt": receipt});
        Ok(ExecutorResult::Success { outputs: Some(outputs), patches: vec![], telemetry: None })
    }

    async fn destroy(&self) {
        self.client.destroy().await;
    }
}

/// In-memory [`EvmRpcClient`] for local development and tests, grounded on
/// this workspace's mock-backend idiom: no real transport, deterministic
/// fixture responses, a call counter exposed for assertions.
#[derive(Default)]
pub struct MockEvmRpcClient {
    sends: AtomicU64,
}

#[async_trait]
impl EvmRpcClient for MockEvmRpcClient {
    async fn query(&self, _chain: &ChainId, fields: &Json) -> Result<Json, EngineError> {
        Ok(json!({"echo": fields}))
    }

    async fn send_and_confirm(&self, _chain: &ChainId, _fields: &Json) -> Result<(String, Json), EngineError> {
        let n = self.sends.fetch_add(1, Ordering::SeqCst);
        Ok((format!("0x{n:064x}"), json!({"status": "0x1", "block_number": n})))
    }

    async fn destroy(&self) {}
}

// ---------------------------------------------------------------------------
// Solana
// ---------------------------------------------------------------------------

/// A transport-agnostic Solana RPC client, injected into [`SolanaExecutor`].
#[async_trait]
pub trait SolanaRpcClient: Send + Sync {
    /// Perform an account/program read; `fields` is the node's bound
    /// parameter object.
    async fn query(&self, chain: &ChainId, fields: &Json) -> Result<Json, EngineError>;

    /// Submit an instruction and await confirmation, returning `(signature,
    /// confirmation)`. `confirmation` must carry a `value.err` field (`null`
    /// on success) per §4.6 point 1.
    async fn send_and_confirm(&self, chain: &ChainId, fields: &Json) -> Result<(String, Json), EngineError>;

    /// Release pooled connections.
    async fn destroy(&self);
}

/// Wraps a [`SolanaRpcClient`] as an [`Executor`] over `solana:*` nodes.
pub struct SolanaExecutor {
    client: Arc<dyn SolanaRpcClient>,
}

impl SolanaExecutor {
    /// Wrap `client` as the Solana inner executor.
    #[must_use]
    pub fn new(client: Arc<dyn SolanaRpcClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Executor for SolanaExecutor {
    fn supports(&self, node: &ais_core::PlanNode) -> bool {
        node.chain.namespace() == "solana" && matches!(node.execution, ExecutionSpec::SolanaInstruction { .. } | ExecutionSpec::SolanaRead { .. })
    }

    async fn execute(&self, node: &ais_core::PlanNode, ctx: &ExecutorContext<'_>) -> Result<ExecutorResult, EngineError> {
        let bound = bind_fields(node.execution.bound_fields(), ctx)?;

        if !node.execution.is_write() {
            let outputs = self.client.query(&node.chain, &bound).await?;
            return Ok(ExecutorResult::Success { outputs: Some(outputs), patches: vec![], telemetry: None });
        }

        if ctx.dry_run {
            let preview = json!({"chain": node.chain.as_str(), "fields": bound});
            return Ok(ExecutorResult::Success { outputs: Some(preview), patches: vec![], telemetry: None });
        }

        let (signature, confirmation) = self.client.send_and_confirm(&node.chain, &bound).await?;
        let outputs = json!({"signature": signature, "confirmation": confirmation});
        Ok(ExecutorResult::Success { outputs: Some(outputs), patches: vec![], telemetry: None })
    }

    async fn destroy(&self) {
        self.client.destroy().await;
    }
}

/// In-memory [`SolanaRpcClient`] for local development and tests.
#[derive(Default)]
pub struct MockSolanaRpcClient {
    sends: Mutex<u64>,
}

#[async_trait]
impl SolanaRpcClient for MockSolanaRpcClient {
    async fn query(&self, _chain: &ChainId, fields: &Json) -> Result<Json, EngineError> {
        Ok(json!({"echo": fields}))
    }

    async fn send_and_confirm(&self, _chain: &ChainId, _fields: &Json) -> Result<(String, Json), EngineError> {
        let mut n = self.sends.lock().await;
        *n += 1;
        Ok((format!("sig-{n}"), json!({"value": {"err": null}})))
    }

    async fn destroy(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{ctx, node};
    use ais_core::{Pack, RuntimeRoot};

    #[tokio::test]
    async fn evm_read_echoes_bound_fields() {
        let root = RuntimeRoot::new();
        let pack = test_pack();
        let exec = EvmExecutor::new(Arc::new(MockEvmRpcClient::default()));
        let n = node("q1", ExecutionSpec::EvmRead { fields: BTreeMap::new() });
        let c = ctx(&root, &pack, None);
        let result = exec.execute(&n, &c).await.unwrap();
        match result {
            ExecutorResult::Success { outputs, .. } => assert_eq!(outputs.unwrap()["echo"], json!({})),
            other => panic!("expected Success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn evm_dry_run_returns_preview_not_a_send() {
        let root = RuntimeRoot::new();
        let pack = test_pack();
        let exec = EvmExecutor::new(Arc::new(MockEvmRpcClient::default()));
        let n = node("swap1", ExecutionSpec::EvmCall { fields: BTreeMap::new() });
        let mut c = ctx(&root, &pack, None);
        c.dry_run = true;
        let result = exec.execute(&n, &c).await.unwrap();
        match result {
            ExecutorResult::Success { outputs, .. } => assert!(outputs.unwrap().get("fields").is_some()),
            other => panic!("expected Success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn solana_send_confirms_with_null_err() {
        let root = RuntimeRoot::new();
        let pack = test_pack();
        let exec = SolanaExecutor::new(Arc::new(MockSolanaRpcClient::default()));
        let mut n = node("swap1", ExecutionSpec::SolanaInstruction { fields: BTreeMap::new() });
        n.chain = ChainId::parse("solana:mainnet").unwrap();
        let c = ctx(&root, &pack, None);
        let result = exec.execute(&n, &c).await.unwrap();
        match result {
            ExecutorResult::Success { outputs, .. } => {
                assert_eq!(outputs.unwrap()["confirmation"]["value"]["err"], Json::Null)
            }
            other => panic!("expected Success, got {other:?}"),
        }
    }

    fn test_pack() -> Pack {
        use ais_core::{ApprovalPolicy, PACK_SCHEMA, PackPolicy, TokenPolicy};
        use std::collections::BTreeMap as Map;
        Pack {
            schema: PACK_SCHEMA.to_string(),
            includes: vec![],
            policy: PackPolicy {
                approvals: ApprovalPolicy { auto_execute_max_risk_level: "2".to_string(), require_approval_min_risk_level: "3".to_string() },
                hard_constraints_defaults: vec![],
            },
            token_policy: TokenPolicy { allowlist: vec![], resolution: "strict".to_string() },
            providers_detect_enabled: vec![],
            plugins_execution_enabled: vec![],
            overrides_actions: Map::new(),
        }
    }
}
