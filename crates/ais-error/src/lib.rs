// SPDX-License-Identifier: MIT OR Apache-2.0
//! Unified error taxonomy with stable error codes for the execution-plan
//! engine.
//!
//! Every engine error carries an [`ErrorCode`] (a machine-readable, stable
//! string tag), a human-readable message, an optional cause chain, and
//! arbitrary key-value context. Use the builder returned by
//! [`EngineError::new`] to construct errors fluently.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// ErrorCategory
// ---------------------------------------------------------------------------

/// Broad family that an [`ErrorCode`] belongs to, mirroring the taxonomy's
/// build-time / readiness-time / executor-time / command-time split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Errors raised while compiling a workflow into a plan, before any node runs.
    Build,
    /// Errors raised while classifying a node's readiness.
    Readiness,
    /// Errors raised while an executor is running a node.
    Executor,
    /// Errors raised while processing a command-channel line.
    Command,
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Build => "build",
            Self::Readiness => "readiness",
            Self::Executor => "executor",
            Self::Command => "command",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Machine-readable, stable error code matching the taxonomy kinds.
///
/// Each variant serialises to a `snake_case` string that is guaranteed not
/// to change across patch releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    // -- Build-time; non-retryable --
    /// A document (workflow, protocol, pack) could not be parsed.
    ParseError,
    /// A document failed schema validation.
    SchemaValidation,
    /// The plan compiler could not build a valid DAG (e.g. a dependency cycle).
    PlanBuildError,
    /// A workspace document (pack) failed semantic validation.
    WorkspaceValidation,
    /// A workflow document failed semantic validation.
    WorkflowValidation,

    // -- Readiness-time; recoverable via solver/commands --
    /// A `ref` path did not resolve against the runtime root.
    MissingRef,
    /// A `cel` expression failed to evaluate.
    CelEvalFailed,
    /// A `detect` value-ref could not be resolved by any registered provider.
    DetectUnsupported,

    // -- Executor-time --
    /// Policy denied the action outright; not approvable.
    PolicyHardBlock,
    /// Policy requires interactive approval before the action may proceed.
    PolicyApprovalRequired,
    /// The inner executor failed; `retryable` context distinguishes transient failures.
    ExecutorFailed,

    // -- Command-time --
    /// A runtime patch was rejected by the patch guard.
    PatchRejected,
    /// A command envelope was rejected (bad kind, bad payload, duplicate id).
    CommandRejected,

    // -- Terminal --
    /// The run was cancelled via the command channel.
    Cancelled,

    // -- Internal --
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl ErrorCode {
    /// Returns the broad [`ErrorCategory`] this code belongs to.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ParseError
            | Self::SchemaValidation
            | Self::PlanBuildError
            | Self::WorkspaceValidation
            | Self::WorkflowValidation => ErrorCategory::Build,

            Self::MissingRef | Self::CelEvalFailed | Self::DetectUnsupported => {
                ErrorCategory::Readiness
            }

            Self::PolicyHardBlock | Self::PolicyApprovalRequired | Self::ExecutorFailed => {
                ErrorCategory::Executor
            }

            Self::PatchRejected | Self::CommandRejected => ErrorCategory::Command,

            Self::Cancelled | Self::Internal => ErrorCategory::Internal,
        }
    }

    /// Stable `&'static str` representation of the code (e.g. `"missing_ref"`).
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ParseError => "parse_error",
            Self::SchemaValidation => "schema_validation",
            Self::PlanBuildError => "plan_build_error",
            Self::WorkspaceValidation => "workspace_validation",
            Self::WorkflowValidation => "workflow_validation",
            Self::MissingRef => "missing_ref",
            Self::CelEvalFailed => "cel_eval_failed",
            Self::DetectUnsupported => "detect_unsupported",
            Self::PolicyHardBlock => "policy_hard_block",
            Self::PolicyApprovalRequired => "policy_approval_required",
            Self::ExecutorFailed => "executor_failed",
            Self::PatchRejected => "patch_rejected",
            Self::CommandRejected => "command_rejected",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        }
    }

    /// Whether this code, on its own, ever warrants a retry.
    ///
    /// [`Self::ExecutorFailed`] is the only code whose retryability is
    /// contextual; callers consult the `retryable` context entry instead of
    /// this method for that one.
    #[must_use]
    pub fn is_inherently_terminal(&self) -> bool {
        matches!(self.category(), ErrorCategory::Build) || matches!(self, Self::PolicyHardBlock)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// EngineError
// ---------------------------------------------------------------------------

/// Unified engine error.
///
/// Carries a stable [`ErrorCode`], a human-readable message, an optional
/// source error for cause-chaining, and arbitrary structured context (node
/// id, ref path, chain id, ...).
///
/// # Builder usage
///
/// ```
/// use ais_error::{EngineError, ErrorCode};
///
/// let err = EngineError::new(ErrorCode::MissingRef, "unresolved reference")
///     .with_context("ref_path", "contracts.router")
///     .with_context("node_id", "q1");
/// ```
pub struct EngineError {
    /// Machine-readable error code.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Optional underlying cause.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    /// Arbitrary structured context for diagnostics.
    pub context: BTreeMap<String, serde_json::Value>,
}

impl EngineError {
    /// Create a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
            context: BTreeMap::new(),
        }
    }

    /// Attach a key-value pair to the diagnostic context.
    ///
    /// The value is converted via [`serde_json::to_value`]; if serialisation
    /// fails, the entry is silently skipped.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Attach an underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Shorthand for `self.code.category()`.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }

    /// Whether the executor should retry, given `retryable` context set by
    /// the caller for [`ErrorCode::ExecutorFailed`].
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.code == ErrorCode::ExecutorFailed
            && self
                .context
                .get("retryable")
                .and_then(serde_json::Value::as_bool)
                .unwrap_or(false)
    }
}

impl fmt::Debug for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("EngineError");
        d.field("code", &self.code);
        d.field("message", &self.message);
        if let Some(ref src) = self.source {
            d.field("source", &src.to_string());
        }
        if !self.context.is_empty() {
            d.field("context", &self.context);
        }
        d.finish()
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)?;
        if !self.context.is_empty() {
            // Deterministic output thanks to BTreeMap.
            if let Ok(ctx) = serde_json::to_string(&self.context) {
                write!(f, " {ctx}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

// ---------------------------------------------------------------------------
// Serialization support
// ---------------------------------------------------------------------------

/// Serialisable snapshot of an [`EngineError`] (without the opaque source).
///
/// Used to embed errors inside `error`/`node_blocked`/`patch_rejected` event
/// payloads, which must round-trip through JSON.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineErrorDto {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Structured context.
    pub context: BTreeMap<String, serde_json::Value>,
    /// String representation of the source error, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_message: Option<String>,
}

impl From<&EngineError> for EngineErrorDto {
    fn from(err: &EngineError) -> Self {
        Self {
            code: err.code,
            message: err.message.clone(),
            context: err.context.clone(),
            source_message: err.source.as_ref().map(|s| s.to_string()),
        }
    }
}

impl From<EngineErrorDto> for EngineError {
    fn from(dto: EngineErrorDto) -> Self {
        Self {
            code: dto.code,
            message: dto.message,
            source: None,
            context: dto.context,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
