// SPDX-License-Identifier: MIT OR Apache-2.0
//! ais-glob
#![deny(unsafe_code)]
//!
//! Include/exclude glob matching reused in two places: the command
//! channel's patch guard (configured `allow_path_patterns` layered on top
//! of the default allowed roots) and a pack's `token_policy.allowlist`
//! matching against chain-qualified token identifiers.

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};

/// Result of evaluating a candidate string against include/exclude glob
/// rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchDecision {
    /// Candidate passes both include and exclude filters.
    Allowed,
    /// Candidate matched an exclude pattern.
    DeniedByExclude,
    /// Candidate did not match any include pattern (when includes are
    /// specified).
    DeniedByMissingInclude,
}

impl MatchDecision {
    /// Returns `true` only for [`MatchDecision::Allowed`].
    #[must_use]
    pub fn is_allowed(self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Compiled include/exclude glob pair for matching patch paths or token
/// identifiers.
///
/// Exclude patterns take precedence: a candidate matching an exclude glob
/// is denied even if it also matches an include glob. Empty pattern lists
/// are treated as "no constraint" (everything passes).
#[derive(Debug, Clone)]
pub struct IncludeExcludeGlobs {
    include: Option<GlobSet>,
    exclude: Option<GlobSet>,
}

impl IncludeExcludeGlobs {
    /// Compile include and exclude pattern lists into a reusable matcher.
    ///
    /// # Errors
    ///
    /// Returns an error if any pattern fails to compile as a glob.
    pub fn new(include: &[String], exclude: &[String]) -> Result<Self> {
        Ok(Self {
            include: build_globset(include)?,
            exclude: build_globset(exclude)?,
        })
    }

    /// Evaluate a candidate string — a dotted patch path (`nodes.swap1.outputs`)
    /// or a chain-qualified token id (`eip155:1/0xdAC17...`) — against the
    /// compiled glob rules.
    #[must_use]
    pub fn decide(&self, candidate: &str) -> MatchDecision {
        if self.exclude.as_ref().is_some_and(|set| set.is_match(candidate)) {
            return MatchDecision::DeniedByExclude;
        }
        if self.include.as_ref().is_some_and(|set| !set.is_match(candidate)) {
            return MatchDecision::DeniedByMissingInclude;
        }
        MatchDecision::Allowed
    }
}

/// Compile a list of glob patterns into a [`GlobSet`], returning `None` for
/// empty input.
///
/// # Errors
///
/// Returns an error if any pattern fails to compile as a glob.
pub fn build_globset(patterns: &[String]) -> Result<Option<GlobSet>> {
    if patterns.is_empty() {
        return Ok(None);
    }

    let mut b = GlobSetBuilder::new();
    for p in patterns {
        b.add(Glob::new(p).with_context(|| format!("invalid glob: {p}"))?);
    }
    Ok(Some(b.build()?))
}
