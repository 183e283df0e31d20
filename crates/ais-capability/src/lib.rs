// SPDX-License-Identifier: MIT OR Apache-2.0
#![warn(missing_docs)]
//! Capability negotiation for `detect` value-ref resolution.
//!
//! A `detect` binding may declare `requires_capabilities`; this crate
//! checks that set against the capabilities the runtime actually supports
//! (from evaluator options or `ctx.capabilities`), per §4.1: validate
//! `requires_capabilities ⊆ supported_capabilities`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// The set of capabilities a runtime or detect provider declares it
/// supports.
pub type CapabilitySet = BTreeSet<String>;

/// Outcome of checking one `detect`'s required capabilities against a
/// [`CapabilitySet`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegotiationResult {
    /// Required capabilities present in the supported set.
    pub satisfied: Vec<String>,
    /// Required capabilities absent from the supported set.
    pub missing: Vec<String>,
}

impl NegotiationResult {
    /// Returns `true` when every required capability was satisfied.
    #[must_use]
    pub fn is_compatible(&self) -> bool {
        self.missing.is_empty()
    }

    /// Total number of capabilities evaluated.
    #[must_use]
    pub fn total(&self) -> usize {
        self.satisfied.len() + self.missing.len()
    }
}

/// Negotiate `required` capabilities against `supported`, preserving the
/// order `required` was declared in.
#[must_use]
pub fn negotiate(supported: &CapabilitySet, required: &[String]) -> NegotiationResult {
    let mut satisfied = Vec::new();
    let mut missing = Vec::new();
    for cap in required {
        if supported.contains(cap) {
            satisfied.push(cap.clone());
        } else {
            missing.push(cap.clone());
        }
    }
    NegotiationResult { satisfied, missing }
}

/// Human-readable summary of a negotiation outcome, suitable for a
/// `detect_unsupported` error's context.
#[must_use]
pub fn summarize(result: &NegotiationResult) -> String {
    if result.is_compatible() {
        format!("{} capabilities satisfied", result.satisfied.len())
    } else {
        format!(
            "missing capabilities: {}",
            result.missing.join(", ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(caps: &[&str]) -> CapabilitySet {
        caps.iter().map(|c| c.to_string()).collect()
    }

    fn reqs(caps: &[&str]) -> Vec<String> {
        caps.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn all_required_satisfied() {
        let supported = set(&["swap", "bridge"]);
        let res = negotiate(&supported, &reqs(&["swap"]));
        assert!(res.is_compatible());
        assert_eq!(res.satisfied, vec!["swap".to_string()]);
        assert!(res.missing.is_empty());
    }

    #[test]
    fn missing_capability_reported() {
        let supported = set(&["swap"]);
        let res = negotiate(&supported, &reqs(&["swap", "bridge"]));
        assert!(!res.is_compatible());
        assert_eq!(res.missing, vec!["bridge".to_string()]);
    }

    #[test]
    fn empty_requirements_always_compatible() {
        let supported = set(&[]);
        let res = negotiate(&supported, &[]);
        assert!(res.is_compatible());
        assert_eq!(res.total(), 0);
    }

    #[test]
    fn order_preserved() {
        let supported = set(&["a", "b", "c"]);
        let res = negotiate(&supported, &reqs(&["c", "a", "b"]));
        assert_eq!(res.satisfied, vec!["c".to_string(), "a".to_string(), "b".to_string()]);
    }

    #[test]
    fn summarize_reports_missing_names() {
        let supported = set(&[]);
        let res = negotiate(&supported, &reqs(&["swap", "bridge"]));
        let summary = summarize(&res);
        assert!(summary.contains("swap"));
        assert!(summary.contains("bridge"));
    }

    #[test]
    fn summarize_reports_count_when_compatible() {
        let supported = set(&["swap"]);
        let res = negotiate(&supported, &reqs(&["swap"]));
        assert_eq!(summarize(&res), "1 capabilities satisfied");
    }

    #[test]
    fn negotiation_result_serde_roundtrip() {
        let result = NegotiationResult {
            satisfied: vec!["swap".to_string()],
            missing: vec!["bridge".to_string()],
        };
        let json = serde_json::to_string(&result).unwrap();
        let back: NegotiationResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, result);
    }
}
