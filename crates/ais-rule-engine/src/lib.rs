// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! ais-rule-engine
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Glob-style condition trees and prioritized rule evaluation, reused for
//! two purposes in this workspace: matching a resource string (a token
//! identifier, a patch path) against allow/deny glob patterns, and
//! evaluating a pack's `hard_constraints` rule set against a resource key
//! such as `<protocol>.<action_id>`.

use globset::Glob;
use serde::{Deserialize, Serialize};

/// A composable predicate that decides whether a rule applies to a resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleCondition {
    /// Matches every resource.
    Always,
    /// Matches no resource.
    Never,
    /// Matches resources whose name satisfies the glob pattern, e.g.
    /// `eip155:*` or `uniswap.swap*`.
    Pattern(String),
    /// All child conditions must match.
    And(Vec<RuleCondition>),
    /// At least one child condition must match.
    Or(Vec<RuleCondition>),
    /// Negates the inner condition.
    Not(Box<RuleCondition>),
}

impl RuleCondition {
    /// Evaluate this condition against `resource`.
    #[must_use]
    pub fn matches(&self, resource: &str) -> bool {
        match self {
            Self::Always => true,
            Self::Never => false,
            Self::Pattern(pat) => Glob::new(pat)
                .ok()
                .is_some_and(|g| g.compile_matcher().is_match(resource)),
            Self::And(conds) => conds.iter().all(|c| c.matches(resource)),
            Self::Or(conds) => conds.iter().any(|c| c.matches(resource)),
            Self::Not(inner) => !inner.matches(resource),
        }
    }
}

/// The effect applied when a rule's condition matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleEffect {
    /// Permit the action.
    Allow,
    /// Hard-block the action; cannot be overridden by an approval.
    Deny,
    /// Permit, but note the match in the audit trail.
    Log,
    /// Permit, but cap at a maximum number of invocations.
    Throttle {
        /// Maximum number of allowed invocations.
        max: u32,
    },
}

/// A single rule: a condition, the effect it applies when matched, and a
/// priority used to break ties between multiple matching rules.
///
/// Rules are evaluated in **descending** priority order (higher number
/// wins); equal priorities are broken by insertion order (earlier rule
/// wins).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    /// Unique identifier for the rule.
    pub id: String,
    /// Human-readable description of what the rule does.
    pub description: String,
    /// Condition that must be met for this rule to fire.
    pub condition: RuleCondition,
    /// Effect applied when the condition matches.
    pub effect: RuleEffect,
    /// Higher priority rules are evaluated first and take precedence.
    pub priority: u32,
}

/// Result of evaluating a single rule against a resource.
#[derive(Debug, Clone)]
pub struct RuleEvaluation {
    /// The id of the rule that was evaluated.
    pub rule_id: String,
    /// Whether the rule's condition matched the resource.
    pub matched: bool,
    /// The effect that the rule would apply (regardless of match).
    pub effect: RuleEffect,
}

/// Engine that evaluates an ordered set of [`Rule`]s against a resource.
///
/// When multiple rules match, the one with the **highest priority** wins.
#[derive(Debug, Clone, Default)]
pub struct RuleEngine {
    rules: Vec<Rule>,
}

impl RuleEngine {
    /// Create an empty rule engine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule to the engine.
    pub fn add_rule(&mut self, rule: Rule) {
        self.rules.push(rule);
    }

    /// Evaluate `resource` and return the effect of the highest-priority
    /// matching rule. Returns [`RuleEffect::Allow`] when no rule matches —
    /// the absence of a hard constraint is not itself a block.
    #[must_use]
    pub fn evaluate(&self, resource: &str) -> RuleEffect {
        self.rules
            .iter()
            .enumerate()
            .filter(|(_, r)| r.condition.matches(resource))
            .max_by_key(|(idx, r)| (r.priority, std::cmp::Reverse(*idx)))
            .map_or(RuleEffect::Allow, |(_, r)| r.effect.clone())
    }

    /// Whether `resource` is hard-blocked: any matching rule carries
    /// [`RuleEffect::Deny`] at or above the priority of every other
    /// matching rule. Equivalent to `evaluate(resource) == RuleEffect::Deny`.
    #[must_use]
    pub fn is_denied(&self, resource: &str) -> bool {
        self.evaluate(resource) == RuleEffect::Deny
    }

    /// Evaluate every rule against `resource` and return all results, for
    /// audit trails that need to show which rules were considered.
    #[must_use]
    pub fn evaluate_all(&self, resource: &str) -> Vec<RuleEvaluation> {
        self.rules
            .iter()
            .map(|r| RuleEvaluation {
                rule_id: r.id.clone(),
                matched: r.condition.matches(resource),
                effect: r.effect.clone(),
            })
            .collect()
    }

    /// Borrow the current rule list.
    #[must_use]
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Remove a rule by its id. Does nothing if no such rule exists.
    pub fn remove_rule(&mut self, id: &str) {
        self.rules.retain(|r| r.id != id);
    }

    /// Number of rules currently registered.
    #[must_use]
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deny_rule(id: &str, pattern: &str, priority: u32) -> Rule {
        Rule {
            id: id.to_string(),
            description: "test".to_string(),
            condition: RuleCondition::Pattern(pattern.to_string()),
            effect: RuleEffect::Deny,
            priority,
        }
    }

    #[test]
    fn pattern_condition_matches_chain_namespace_wildcard() {
        let cond = RuleCondition::Pattern("eip155:*".to_string());
        assert!(cond.matches("eip155:1"));
        assert!(!cond.matches("solana:x"));
    }

    #[test]
    fn and_or_not_compose() {
        let cond = RuleCondition::And(vec![
            RuleCondition::Pattern("eip155:*".to_string()),
            RuleCondition::Not(Box::new(RuleCondition::Pattern("eip155:1".to_string()))),
        ]);
        assert!(cond.matches("eip155:137"));
        assert!(!cond.matches("eip155:1"));
    }

    #[test]
    fn highest_priority_matching_rule_wins() {
        let mut engine = RuleEngine::new();
        engine.add_rule(Rule {
            id: "low".to_string(),
            description: String::new(),
            condition: RuleCondition::Always,
            effect: RuleEffect::Allow,
            priority: 1,
        });
        engine.add_rule(deny_rule("high", "*", 10));
        assert_eq!(engine.evaluate("uniswap.swap"), RuleEffect::Deny);
        assert!(engine.is_denied("uniswap.swap"));
    }

    #[test]
    fn no_matching_rule_defaults_to_allow() {
        let engine = RuleEngine::new();
        assert_eq!(engine.evaluate("anything"), RuleEffect::Allow);
        assert!(!engine.is_denied("anything"));
    }

    #[test]
    fn ties_broken_by_earliest_insertion() {
        let mut engine = RuleEngine::new();
        engine.add_rule(Rule {
            id: "first".to_string(),
            description: String::new(),
            condition: RuleCondition::Always,
            effect: RuleEffect::Log,
            priority: 5,
        });
        engine.add_rule(Rule {
            id: "second".to_string(),
            description: String::new(),
            condition: RuleCondition::Always,
            effect: RuleEffect::Throttle { max: 1 },
            priority: 5,
        });
        assert_eq!(engine.evaluate("x"), RuleEffect::Log);
    }

    #[test]
    fn remove_rule_drops_it_from_evaluation() {
        let mut engine = RuleEngine::new();
        engine.add_rule(deny_rule("blocker", "*", 1));
        assert!(engine.is_denied("x"));
        engine.remove_rule("blocker");
        assert!(!engine.is_denied("x"));
        assert_eq!(engine.rule_count(), 0);
    }

    #[test]
    fn evaluate_all_reports_every_rule() {
        let mut engine = RuleEngine::new();
        engine.add_rule(deny_rule("a", "eip155:*", 1));
        engine.add_rule(deny_rule("b", "solana:*", 1));
        let results = engine.evaluate_all("eip155:1");
        assert_eq!(results.len(), 2);
        assert!(results.iter().find(|r| r.rule_id == "a").unwrap().matched);
        assert!(!results.iter().find(|r| r.rule_id == "b").unwrap().matched);
    }
}
