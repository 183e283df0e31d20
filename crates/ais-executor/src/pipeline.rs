// SPDX-License-Identifier: MIT OR Apache-2.0
//! Assembling the five wrapper stages (§4.6) around a dispatcher that picks
//! the right chain-specific inner executor for a given node.

use std::sync::Arc;

use ais_core::PlanNode;
use ais_error::{EngineError, ErrorCode};
use async_trait::async_trait;
use tracing::debug;

use crate::stages::{ActionPreflightExecutor, BroadcastGateExecutor, CalculatedFieldsExecutor, PolicyGateExecutor, StrictSuccessExecutor};
use crate::{Executor, ExecutorContext, ExecutorResult};

/// Picks the first registered inner executor whose `supports` returns
/// `true`, the way a protocol/chain lookup falls through an ordered list of
/// candidates rather than a single monolithic `match`.
struct Dispatcher {
    inner_executors: Vec<Arc<dyn Executor>>,
}

#[async_trait]
impl Executor for Dispatcher {
    fn supports(&self, node: &PlanNode) -> bool {
        self.inner_executors.iter().any(|e| e.supports(node))
    }

    async fn execute(&self, node: &PlanNode, ctx: &ExecutorContext<'_>) -> Result<ExecutorResult, EngineError> {
        for executor in &self.inner_executors {
            if executor.supports(node) {
                debug!(target: "ais.executor", node_id = %node.id, "dispatched to inner executor");
                return executor.execute(node, ctx).await;
            }
        }
        Err(EngineError::new(ErrorCode::ExecutorFailed, format!("no inner executor supports node `{}`", node.id)))
    }

    async fn destroy(&self) {
        for executor in &self.inner_executors {
            executor.destroy().await;
        }
    }
}

/// Builds an [`ExecutorChain`] by registering one or more chain-specific
/// inner executors.
///
/// ```ignore
/// let chain = ExecutorChainBuilder::new()
///     .with_executor(Arc::new(EvmExecutor::new(evm_client)))
///     .with_executor(Arc::new(SolanaExecutor::new(solana_client)))
///     .build();
/// ```
pub struct ExecutorChainBuilder {
    inner_executors: Vec<Arc<dyn Executor>>,
}

impl ExecutorChainBuilder {
    /// Start with no inner executors registered.
    #[must_use]
    pub fn new() -> Self {
        Self { inner_executors: Vec::new() }
    }

    /// Register an inner executor (builder pattern).
    #[must_use]
    pub fn with_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.inner_executors.push(executor);
        self
    }

    /// Nest the five wrapper stages around the registered inner executors,
    /// innermost to outermost: `CalculatedFieldsExecutor`, `PolicyGateExecutor`,
    /// `ActionPreflightExecutor`, `BroadcastGateExecutor`, `StrictSuccessExecutor`.
    #[must_use]
    pub fn build(self) -> ExecutorChain {
        let dispatcher: Arc<dyn Executor> = Arc::new(Dispatcher { inner_executors: self.inner_executors });
        let wrapped: Arc<dyn Executor> = Arc::new(StrictSuccessExecutor::new(Arc::new(BroadcastGateExecutor::new(Arc::new(
            ActionPreflightExecutor::new(Arc::new(PolicyGateExecutor::new(Arc::new(CalculatedFieldsExecutor::new(dispatcher))))),
        )))));
        ExecutorChain { executor: wrapped }
    }
}

impl Default for ExecutorChainBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The fully assembled wrapper chain, ready to run plan nodes.
pub struct ExecutorChain {
    executor: Arc<dyn Executor>,
}

impl ExecutorChain {
    /// Start a builder.
    #[must_use]
    pub fn builder() -> ExecutorChainBuilder {
        ExecutorChainBuilder::new()
    }

    /// Whether any registered inner executor handles `node`.
    #[must_use]
    pub fn supports(&self, node: &PlanNode) -> bool {
        self.executor.supports(node)
    }

    /// Run `node` through the full wrapper chain.
    ///
    /// # Errors
    ///
    /// Propagates whatever [`Executor::execute`] returns, including
    /// [`ErrorCode::ExecutorFailed`] when no inner executor supports `node`.
    pub async fn execute(&self, node: &PlanNode, ctx: &ExecutorContext<'_>) -> Result<ExecutorResult, EngineError> {
        self.executor.execute(node, ctx).await
    }

    /// Tear down every inner executor's pooled resources.
    pub async fn destroy(&self) {
        self.executor.destroy().await;
    }
}
