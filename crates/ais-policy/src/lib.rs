// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! ais-policy
#![warn(missing_docs)]

mod compose;
/// Audit trail of policy-gate decisions, for inclusion in telemetry/events.
pub mod audit;
mod rules;

pub use compose::{RiskLevel, RiskProfile};
pub use rules::{plugin_allowed, provider_allowed, token_allowed};

use ais_core::{Action, ChainId, Pack, RuntimeRoot};
use ais_error::EngineError;
use ais_eval::{EvalOptions, evaluate};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// The risk summary embedded in a [`ConfirmationTemplate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationRisk {
    /// The action's effective risk level.
    pub level: u32,
    /// The action's effective risk tags.
    pub tags: Vec<String>,
}

/// The pack's approval thresholds, echoed in a [`ConfirmationTemplate`] so
/// the caller can see why approval was requested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationThresholds {
    /// Max risk level the pack auto-executes without confirmation.
    pub auto_execute_max_risk_level: u32,
    /// Min risk level the pack requires explicit confirmation for.
    pub require_approval_min_risk_level: u32,
}

/// A structured, localizable prompt surfaced in `need_user_confirm` when a
/// write requires interactive approval (§4.6 point 4).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationTemplate {
    /// Short, localized title.
    pub title: String,
    /// Localized one-line summary naming the action, chain, and risk level.
    pub summary: String,
    /// `<protocol>.<action_id>`.
    pub action_ref: String,
    /// The chain the action would execute on.
    pub chain: String,
    /// Computed risk summary.
    pub risk: ConfirmationRisk,
    /// The pack's approval thresholds.
    pub thresholds: ConfirmationThresholds,
}

/// Outcome of evaluating the policy gate for one action invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum PolicyDecision {
    /// Nothing blocks this action: no failing hard constraint, and either
    /// its risk level is below the approval threshold or it was already
    /// approved.
    Allow,
    /// A hard constraint failed, or the execution type/chain/token isn't
    /// allow-listed. Not approvable — the engine must fail the node.
    HardBlock {
        /// Why the action was blocked.
        reason: String,
    },
    /// The action's risk level requires interactive approval, and no prior
    /// approval is cached for this `workflow_node_id:action_key`.
    NeedsApproval {
        /// The prompt to surface to the caller.
        template: Box<ConfirmationTemplate>,
    },
}

impl PolicyDecision {
    /// Returns `true` when the decision is [`PolicyDecision::Allow`].
    #[must_use]
    pub fn is_allow(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Tracks `workflow_node_id:action_key` pairs that have already been
/// approved, so a re-evaluated gate for the same action doesn't re-prompt.
/// In-memory only; durability across a pause/resume comes from replaying
/// the `user_confirm` commands that populated it, not from checkpointing
/// the cache itself.
#[derive(Debug, Clone, Default)]
pub struct ApprovalCache {
    approved: HashSet<String>,
}

impl ApprovalCache {
    /// An empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The cache key convention: `<workflow_node_id>:<action_key>`.
    #[must_use]
    pub fn cache_key(workflow_node_id: &str, action_key: &str) -> String {
        format!("{workflow_node_id}:{action_key}")
    }

    /// Record an approval.
    pub fn approve(&mut self, workflow_node_id: &str, action_key: &str) {
        self.approved.insert(Self::cache_key(workflow_node_id, action_key));
    }

    /// Whether this action was already approved for this node.
    #[must_use]
    pub fn is_approved(&self, workflow_node_id: &str, action_key: &str) -> bool {
        self.approved.contains(&Self::cache_key(workflow_node_id, action_key))
    }
}

/// Everything the policy gate needs to evaluate one action invocation.
/// Borrowed rather than owned since the executor already holds all of
/// these alongside the node it's about to run.
pub struct PolicyGateInput<'a> {
    /// The originating workflow node id (the approval cache's scoping key).
    pub workflow_node_id: &'a str,
    /// The protocol name the action belongs to.
    pub protocol_name: &'a str,
    /// The action id.
    pub action_id: &'a str,
    /// The action definition (risk defaults, hard constraints).
    pub action: &'a Action,
    /// The pack layering policy over this action.
    pub pack: &'a Pack,
    /// The chain this invocation executes on.
    pub chain: &'a ChainId,
    /// The current Runtime Root, against which hard constraints evaluate.
    pub root: &'a RuntimeRoot,
    /// BCP-47-ish locale tag for the confirmation template's prose.
    pub locale: &'a str,
}

impl PolicyGateInput<'_> {
    /// `<protocol>.<action_id>`, the key used both for pack overrides and
    /// the approval cache.
    #[must_use]
    pub fn action_key(&self) -> String {
        format!("{}.{}", self.protocol_name, self.action_id)
    }
}

/// Evaluate the policy gate (§4.6 point 4): hard constraints first (action's
/// own plus the pack's defaults, evaluated in declared order — the first
/// failure wins), then the risk/approval threshold.
///
/// # Errors
///
/// Returns an [`EngineError`] if a hard constraint's expression fails to
/// evaluate (propagated from [`ais_eval::evaluate`] unchanged).
pub fn evaluate_gate(input: &PolicyGateInput<'_>, cache: &ApprovalCache) -> Result<PolicyDecision, EngineError> {
    let action_key = input.action_key();
    let override_ = input.pack.overrides_actions.get(&action_key);
    let profile = RiskProfile::compose(input.action, override_);

    let options = EvalOptions::default();
    for hc in input.action.hard_constraints.iter().chain(input.pack.policy.hard_constraints_defaults.iter()) {
        let value = evaluate(&hc.expr, input.root, &options)?;
        if !value.as_bool().unwrap_or(false) {
            let reason = hc.message.clone().unwrap_or_else(|| format!("hard constraint `{}` failed", hc.name));
            return Ok(PolicyDecision::HardBlock { reason });
        }
    }

    let require_min = RiskLevel::parse(&input.pack.policy.approvals.require_approval_min_risk_level).unwrap_or(RiskLevel(0));
    let auto_max = RiskLevel::parse(&input.pack.policy.approvals.auto_execute_max_risk_level).unwrap_or(RiskLevel(0));
    let level = profile.risk_level.unwrap_or(RiskLevel(0));

    if level < require_min || cache.is_approved(input.workflow_node_id, &action_key) {
        return Ok(PolicyDecision::Allow);
    }
    Ok(PolicyDecision::NeedsApproval { template: Box::new(confirmation_template(input, &profile, auto_max, require_min)) })
}

fn confirmation_template(
    input: &PolicyGateInput<'_>,
    profile: &RiskProfile,
    auto_max: RiskLevel,
    require_min: RiskLevel,
) -> ConfirmationTemplate {
    let action_ref = input.action_key();
    let chain = input.chain.as_str();
    let level = profile.risk_level.unwrap_or(RiskLevel(0));
    let (title_tpl, summary_tpl) = locale_catalog(input.locale);
    ConfirmationTemplate {
        title: title_tpl.replace("{action}", &action_ref),
        summary: summary_tpl
            .replace("{action}", &action_ref)
            .replace("{chain}", &chain)
            .replace("{level}", &level.to_string()),
        action_ref,
        chain,
        risk: ConfirmationRisk { level: level.0, tags: profile.risk_tags.clone() },
        thresholds: ConfirmationThresholds {
            auto_execute_max_risk_level: auto_max.0,
            require_approval_min_risk_level: require_min.0,
        },
    }
}

/// Minimal built-in locale catalog for the confirmation template's title and
/// summary prose. Falls back to English for an unrecognized locale tag.
fn locale_catalog(locale: &str) -> (&'static str, &'static str) {
    match locale {
        "es" => (
            "Se requiere aprobación para {action}",
            "{action} en {chain} tiene nivel de riesgo {level}",
        ),
        _ => ("Approval required for {action}", "{action} on {chain} carries risk level {level}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ais_core::{
        ApprovalPolicy, ChainId, HardConstraint, PackPolicy, PACK_SCHEMA, TokenPolicy, ValueRef,
    };
    use serde_json::json;
    use std::collections::BTreeMap;

    fn action(risk_level: &str, hard_constraints: Vec<HardConstraint>) -> Action {
        Action {
            params: vec![],
            returns: vec![],
            execution: BTreeMap::new(),
            risk_level: Some(risk_level.to_string()),
            risk_tags: vec!["bridge".to_string()],
            requires_queries: vec![],
            calculated_fields: BTreeMap::new(),
            hard_constraints,
        }
    }

    fn pack(auto_max: &str, require_min: &str, hard_constraints_defaults: Vec<HardConstraint>) -> Pack {
        Pack {
            schema: PACK_SCHEMA.to_string(),
            includes: vec![],
            policy: PackPolicy {
                approvals: ApprovalPolicy {
                    auto_execute_max_risk_level: auto_max.to_string(),
                    require_approval_min_risk_level: require_min.to_string(),
                },
                hard_constraints_defaults,
            },
            token_policy: TokenPolicy { allowlist: vec![], resolution: "strict".to_string() },
            providers_detect_enabled: vec![],
            plugins_execution_enabled: vec![],
            overrides_actions: BTreeMap::new(),
        }
    }

    fn input<'a>(
        action: &'a Action,
        pack: &'a Pack,
        chain: &'a ChainId,
        root: &'a RuntimeRoot,
        node_id: &'a str,
    ) -> PolicyGateInput<'a> {
        PolicyGateInput {
            workflow_node_id: node_id,
            protocol_name: "demo",
            action_id: "swap",
            action,
            pack,
            chain,
            root,
            locale: "en",
        }
    }

    #[test]
    fn below_threshold_auto_allows() {
        let a = action("2", vec![]);
        let p = pack("4", "3", vec![]);
        let chain = ChainId::parse("eip155:1").unwrap();
        let root = RuntimeRoot::new();
        let decision = evaluate_gate(&input(&a, &p, &chain, &root, "n1"), &ApprovalCache::new()).unwrap();
        assert_eq!(decision, PolicyDecision::Allow);
    }

    #[test]
    fn at_or_above_threshold_needs_approval_with_template() {
        let a = action("4", vec![]);
        let p = pack("2", "3", vec![]);
        let chain = ChainId::parse("eip155:1").unwrap();
        let root = RuntimeRoot::new();
        let decision = evaluate_gate(&input(&a, &p, &chain, &root, "n1"), &ApprovalCache::new()).unwrap();
        match decision {
            PolicyDecision::NeedsApproval { template } => {
                assert_eq!(template.risk.level, 4);
                assert_eq!(template.thresholds.require_approval_min_risk_level, 3);
                assert_eq!(template.action_ref, "demo.swap");
            }
            other => panic!("expected NeedsApproval, got {other:?}"),
        }
    }

    #[test]
    fn cached_approval_bypasses_the_prompt() {
        let a = action("4", vec![]);
        let p = pack("2", "3", vec![]);
        let chain = ChainId::parse("eip155:1").unwrap();
        let root = RuntimeRoot::new();
        let mut cache = ApprovalCache::new();
        cache.approve("n1", "demo.swap");
        let decision = evaluate_gate(&input(&a, &p, &chain, &root, "n1"), &cache).unwrap();
        assert_eq!(decision, PolicyDecision::Allow);
    }

    #[test]
    fn failing_hard_constraint_blocks_regardless_of_risk_level() {
        let hc = HardConstraint {
            name: "slippage_ceiling".to_string(),
            expr: ValueRef::lit(json!(false)),
            message: Some("slippage exceeds ceiling".to_string()),
        };
        let a = action("0", vec![hc]);
        let p = pack("4", "5", vec![]);
        let chain = ChainId::parse("eip155:1").unwrap();
        let root = RuntimeRoot::new();
        let decision = evaluate_gate(&input(&a, &p, &chain, &root, "n1"), &ApprovalCache::new()).unwrap();
        assert_eq!(decision, PolicyDecision::HardBlock { reason: "slippage exceeds ceiling".to_string() });
    }

    #[test]
    fn pack_default_hard_constraint_applies_too() {
        let hc = HardConstraint { name: "kyc".to_string(), expr: ValueRef::lit(json!(false)), message: None };
        let a = action("0", vec![]);
        let p = pack("4", "5", vec![hc]);
        let chain = ChainId::parse("eip155:1").unwrap();
        let root = RuntimeRoot::new();
        let decision = evaluate_gate(&input(&a, &p, &chain, &root, "n1"), &ApprovalCache::new()).unwrap();
        assert_eq!(decision, PolicyDecision::HardBlock { reason: "hard constraint `kyc` failed".to_string() });
    }

    #[test]
    fn missing_risk_level_treated_as_zero() {
        let mut a = action("0", vec![]);
        a.risk_level = None;
        let p = pack("4", "1", vec![]);
        let chain = ChainId::parse("eip155:1").unwrap();
        let root = RuntimeRoot::new();
        let decision = evaluate_gate(&input(&a, &p, &chain, &root, "n1"), &ApprovalCache::new()).unwrap();
        assert_eq!(decision, PolicyDecision::Allow);
    }

    #[test]
    fn spanish_locale_renders_localized_prose() {
        let a = action("4", vec![]);
        let p = pack("2", "3", vec![]);
        let chain = ChainId::parse("eip155:1").unwrap();
        let root = RuntimeRoot::new();
        let mut i = input(&a, &p, &chain, &root, "n1");
        i.locale = "es";
        let decision = evaluate_gate(&i, &ApprovalCache::new()).unwrap();
        match decision {
            PolicyDecision::NeedsApproval { template } => assert!(template.title.contains("requiere")),
            other => panic!("expected NeedsApproval, got {other:?}"),
        }
    }
}
