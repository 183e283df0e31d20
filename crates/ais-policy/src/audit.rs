// SPDX-License-Identifier: MIT OR Apache-2.0
//! Recording policy-gate decisions for later inspection.

use crate::PolicyDecision;
use chrono::{DateTime, Utc};

/// A single recorded policy-gate evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEntry {
    /// When the decision was recorded.
    pub timestamp: DateTime<Utc>,
    /// `<protocol>.<action_id>` the decision was for.
    pub action_key: String,
    /// The originating workflow node id.
    pub workflow_node_id: String,
    /// The decision that was recorded.
    pub decision: PolicyDecision,
}

/// Aggregate counts of recorded policy-gate decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AuditSummary {
    /// Count of [`PolicyDecision::Allow`].
    pub allowed: usize,
    /// Count of [`PolicyDecision::HardBlock`].
    pub hard_blocked: usize,
    /// Count of [`PolicyDecision::NeedsApproval`].
    pub needed_approval: usize,
}

/// An in-memory log of every policy-gate decision made during a run,
/// kept alongside the gate rather than inside it so the executor can
/// inspect history without coupling it to decision-making.
#[derive(Debug, Clone, Default)]
pub struct PolicyAuditor {
    log: Vec<AuditEntry>,
}

impl PolicyAuditor {
    /// An empty auditor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a decision for `workflow_node_id`/`action_key`.
    pub fn record(&mut self, workflow_node_id: &str, action_key: &str, decision: PolicyDecision) {
        self.log.push(AuditEntry {
            timestamp: Utc::now(),
            action_key: action_key.to_string(),
            workflow_node_id: workflow_node_id.to_string(),
            decision,
        });
    }

    /// All recorded entries in chronological order.
    #[must_use]
    pub fn entries(&self) -> &[AuditEntry] {
        &self.log
    }

    /// Aggregate counts across every recorded entry.
    #[must_use]
    pub fn summary(&self) -> AuditSummary {
        let mut s = AuditSummary::default();
        for e in &self.log {
            match e.decision {
                PolicyDecision::Allow => s.allowed += 1,
                PolicyDecision::HardBlock { .. } => s.hard_blocked += 1,
                PolicyDecision::NeedsApproval { .. } => s.needed_approval += 1,
            }
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_counts_each_decision_kind() {
        let mut auditor = PolicyAuditor::new();
        auditor.record("n1", "demo.swap", PolicyDecision::Allow);
        auditor.record("n2", "demo.swap", PolicyDecision::HardBlock { reason: "blocked".to_string() });
        let summary = auditor.summary();
        assert_eq!(summary.allowed, 1);
        assert_eq!(summary.hard_blocked, 1);
        assert_eq!(summary.needed_approval, 0);
        assert_eq!(auditor.entries().len(), 2);
    }
}
