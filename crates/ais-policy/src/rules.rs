// SPDX-License-Identifier: MIT OR Apache-2.0
//! Glob allow-list checks for a pack's token/plugin/provider gates, built on
//! the condition-tree matcher `ais-rule-engine` already provides for
//! chain-pattern and resource-key matching.

use ais_core::{ChainId, DetectProviderEntry, PluginEntry};
use ais_rule_engine::RuleCondition;

/// Whether `token` (a chain-qualified identifier, e.g. `eip155:1/0xabc…`)
/// is present in a pack's `token_policy.allowlist`. An empty allowlist
/// permits everything — the policy gate's "no restriction declared" case.
#[must_use]
pub fn token_allowed(allowlist: &[String], token: &str) -> bool {
    allowlist.is_empty() || allowlist.iter().any(|pat| RuleCondition::Pattern(pat.clone()).matches(token))
}

/// Whether `plugin_type` is permitted to execute on `chain` by any entry in
/// `plugins_execution_enabled`. An entry with an empty `chains[]` matches
/// every chain.
#[must_use]
pub fn plugin_allowed(entries: &[PluginEntry], plugin_type: &str, chain: &ChainId) -> bool {
    entries.iter().any(|e| {
        e.plugin_type == plugin_type && (e.chains.is_empty() || chain_list_matches(&e.chains, chain))
    })
}

/// Whether a `detect` provider is enabled for the given kind and chain.
#[must_use]
pub fn provider_allowed(entries: &[DetectProviderEntry], kind: &str, chain: &ChainId) -> bool {
    entries
        .iter()
        .any(|e| e.kind == kind && (e.chains.is_empty() || chain_list_matches(&e.chains, chain)))
}

fn chain_list_matches(patterns: &[String], chain: &ChainId) -> bool {
    patterns.iter().any(|pat| chain.matches_pattern(&ais_core::ChainPattern::parse(pat)))
}
