// SPDX-License-Identifier: MIT OR Apache-2.0
//! Composing an action's declared risk profile with a pack's per-action
//! overrides.

use ais_core::{Action, ActionOverride};

/// An action's effective risk level and tags, after layering a pack's
/// `overrides.actions` entry (if any) on top of the action's own defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiskProfile {
    /// Effective risk level; `None` when the action declares none and no
    /// override supplies one.
    pub risk_level: Option<RiskLevel>,
    /// Union of the action's own tags and the override's tags, sorted and
    /// deduplicated.
    pub risk_tags: Vec<String>,
}

impl RiskProfile {
    /// Compose an action's declared defaults with an optional override.
    #[must_use]
    pub fn compose(action: &Action, override_: Option<&ActionOverride>) -> Self {
        let risk_level = action.risk_level.as_deref().and_then(RiskLevel::parse);
        let mut risk_tags = action.risk_tags.clone();
        if let Some(o) = override_ {
            risk_tags.extend(o.risk_tags.iter().cloned());
        }
        risk_tags.sort();
        risk_tags.dedup();
        Self { risk_level, risk_tags }
    }
}

/// A numeric risk level, ordered so that higher always means riskier.
///
/// Protocol/pack documents carry risk levels as plain strings (`"0"` ..
/// `"4"` in observed usage); this type parses and orders them without
/// committing to a fixed named scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RiskLevel(pub u32);

impl RiskLevel {
    /// Parse a risk level string. Returns `None` for anything that doesn't
    /// parse as a non-negative integer.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        s.trim().parse().ok().map(Self)
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
