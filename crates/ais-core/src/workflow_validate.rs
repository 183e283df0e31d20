// SPDX-License-Identifier: MIT OR Apache-2.0
//! Validation and default-filling for workflow inputs, ahead of
//! compilation.

use crate::docs::Workflow;
use std::collections::HashSet;

/// Severity level for a workflow validation warning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WarningSeverity {
    /// Informational note — not necessarily a problem.
    Info,
    /// Something likely unintended, but not fatal.
    Warning,
    /// Invalid input that will fail compilation.
    Error,
}

/// A single warning produced by [`WorkflowValidator`].
#[derive(Debug, Clone)]
pub struct WorkflowWarning {
    /// Dot-delimited path to the problematic field (e.g. `"inputs.amount"`).
    pub field: String,
    /// Human-readable description of the issue.
    pub message: String,
    /// How severe this issue is.
    pub severity: WarningSeverity,
}

/// Validates a [`Workflow`] together with the caller-supplied input values,
/// returning warnings for missing required inputs, duplicate node ids, and
/// other defects catchable before compilation.
#[derive(Debug, Default)]
pub struct WorkflowValidator;

impl WorkflowValidator {
    /// Create a new validator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Validate `workflow` against the provided `supplied_inputs` and return
    /// all detected warnings.
    #[must_use]
    pub fn validate(
        &self,
        workflow: &Workflow,
        supplied_inputs: &serde_json::Map<String, serde_json::Value>,
    ) -> Vec<WorkflowWarning> {
        let mut warnings = Vec::new();

        if workflow.nodes.is_empty() {
            warnings.push(WorkflowWarning {
                field: "nodes".into(),
                message: "workflow has no nodes".into(),
                severity: WarningSeverity::Error,
            });
        }

        for (name, spec) in &workflow.inputs {
            let field = format!("inputs.{name}");
            let supplied = supplied_inputs.get(name);
            if spec.required && supplied.is_none() && spec.default.is_none() {
                warnings.push(WorkflowWarning {
                    field,
                    message: format!("required input {name:?} was not supplied"),
                    severity: WarningSeverity::Error,
                });
            }
        }

        for key in supplied_inputs.keys() {
            if !workflow.inputs.contains_key(key) {
                warnings.push(WorkflowWarning {
                    field: format!("inputs.{key}"),
                    message: format!("input {key:?} is not declared by the workflow"),
                    severity: WarningSeverity::Warning,
                });
            }
        }

        {
            let mut seen = HashSet::new();
            for node in &workflow.nodes {
                if !seen.insert(node.id.as_str()) {
                    warnings.push(WorkflowWarning {
                        field: "nodes".into(),
                        message: format!("duplicate node id: {}", node.id),
                        severity: WarningSeverity::Error,
                    });
                }
            }
        }

        for node in &workflow.nodes {
            let field = format!("nodes.{}", node.id);
            if node.action.is_none() && node.query.is_none() {
                warnings.push(WorkflowWarning {
                    field: field.clone(),
                    message: "node declares neither an action nor a query".into(),
                    severity: WarningSeverity::Error,
                });
            }
            if node.action.is_some() && node.query.is_some() {
                warnings.push(WorkflowWarning {
                    field: field.clone(),
                    message: "node declares both an action and a query".into(),
                    severity: WarningSeverity::Error,
                });
            }
            if node.chain.is_none() && workflow.default_chain.is_none() {
                warnings.push(WorkflowWarning {
                    field,
                    message: "node has no chain and the workflow has no default_chain".into(),
                    severity: WarningSeverity::Error,
                });
            }
        }

        warnings
    }

    /// Whether any warning in `warnings` is fatal.
    #[must_use]
    pub fn has_errors(warnings: &[WorkflowWarning]) -> bool {
        warnings.iter().any(|w| w.severity == WarningSeverity::Error)
    }
}

/// Coerce supplied + declared-default workflow inputs into the `inputs`
/// object the Runtime Root is seeded with.
///
/// Required inputs with no supplied value and no declared default are left
/// absent; callers are expected to have already rejected that case via
/// [`WorkflowValidator`].
#[must_use]
pub fn resolve_inputs(
    workflow: &Workflow,
    supplied: &serde_json::Map<String, serde_json::Value>,
) -> serde_json::Map<String, serde_json::Value> {
    let mut resolved = supplied.clone();
    for (name, spec) in &workflow.inputs {
        if !resolved.contains_key(name)
            && let Some(default) = &spec.default
        {
            resolved.insert(name.clone(), default.clone());
        }
    }
    resolved
}
