// SPDX-License-Identifier: MIT OR Apache-2.0
//! CAIP-2 chain identifiers and chain-pattern matching.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A CAIP-2 chain identifier, e.g. `eip155:1` or `solana:<genesis>`.
///
/// Stored pre-validated: construction fails unless the string matches
/// `<namespace>:<reference>` with both halves non-empty.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(try_from = "String", into = "String")]
pub struct ChainId {
    namespace: String,
    reference: String,
}

/// Error returned when a string is not a well-formed CAIP-2 chain id.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("invalid chain id {0:?}: expected `<namespace>:<reference>`")]
pub struct InvalidChainId(pub String);

impl ChainId {
    /// Parse a CAIP-2 string into a [`ChainId`].
    ///
    /// # Errors
    ///
    /// Returns [`InvalidChainId`] if `s` does not contain exactly one `:`
    /// separating two non-empty halves.
    pub fn parse(s: impl Into<String>) -> Result<Self, InvalidChainId> {
        let s = s.into();
        match s.split_once(':') {
            Some((ns, rest)) if !ns.is_empty() && !rest.is_empty() => Ok(Self {
                namespace: ns.to_string(),
                reference: rest.to_string(),
            }),
            _ => Err(InvalidChainId(s)),
        }
    }

    /// The namespace half (e.g. `eip155`, `solana`).
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The reference half (e.g. `1`, a Solana genesis hash).
    #[must_use]
    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// Full `<namespace>:<reference>` string form.
    #[must_use]
    pub fn as_str(&self) -> String {
        format!("{}:{}", self.namespace, self.reference)
    }

    /// Whether `pattern` matches this chain id.
    ///
    /// Patterns are, in order of specificity: an exact chain id, a
    /// namespace wildcard `<ns>:*`, or the universal wildcard `*`.
    #[must_use]
    pub fn matches_pattern(&self, pattern: &ChainPattern) -> bool {
        match pattern {
            ChainPattern::Exact(id) => id == self,
            ChainPattern::Namespace(ns) => ns == &self.namespace,
            ChainPattern::Any => true,
        }
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.reference)
    }
}

impl TryFrom<String> for ChainId {
    type Error = InvalidChainId;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(s)
    }
}

impl From<ChainId> for String {
    fn from(c: ChainId) -> Self {
        c.as_str()
    }
}

/// A chain-matching pattern as used in a protocol's `execution` block keys.
///
/// Parsed from the same string vocabulary used throughout the engine:
/// an exact chain id, `<namespace>:*`, or `*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainPattern {
    /// Matches one specific chain id.
    Exact(ChainId),
    /// Matches any chain id in the given namespace.
    Namespace(String),
    /// Matches any chain id.
    Any,
}

impl ChainPattern {
    /// Parse a pattern string.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        if s == "*" {
            return Self::Any;
        }
        if let Some(ns) = s.strip_suffix(":*") {
            return Self::Namespace(ns.to_string());
        }
        match ChainId::parse(s) {
            Ok(id) => Self::Exact(id),
            Err(_) => Self::Any,
        }
    }

    /// Specificity rank used to select the best-matching execution spec:
    /// lower is more specific. Exact < namespace < any.
    #[must_use]
    pub fn specificity(&self) -> u8 {
        match self {
            Self::Exact(_) => 0,
            Self::Namespace(_) => 1,
            Self::Any => 2,
        }
    }
}

/// Select the most specific [`ExecutionSpec`][crate::ExecutionSpec] key from
/// a protocol action/query's `execution` map for the given chain, matching
/// in order: exact id, `<ns>:*`, `*`.
#[must_use]
pub fn select_execution_key<'a>(
    chain: &ChainId,
    keys: impl IntoIterator<Item = &'a str>,
) -> Option<&'a str> {
    let mut best: Option<(&'a str, u8)> = None;
    for key in keys {
        let pattern = ChainPattern::parse(key);
        if chain.matches_pattern(&pattern) {
            let rank = pattern.specificity();
            if best.is_none_or(|(_, best_rank)| rank < best_rank) {
                best = Some((key, rank));
            }
        }
    }
    best.map(|(key, _)| key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_chain_id() {
        let id = ChainId::parse("eip155:1").unwrap();
        assert_eq!(id.namespace(), "eip155");
        assert_eq!(id.reference(), "1");
        assert_eq!(id.as_str(), "eip155:1");
    }

    #[test]
    fn rejects_malformed_chain_id() {
        assert!(ChainId::parse("eip1551").is_err());
        assert!(ChainId::parse(":1").is_err());
        assert!(ChainId::parse("eip155:").is_err());
        assert!(ChainId::parse("").is_err());
    }

    #[test]
    fn solana_genesis_reference_with_colons_not_supported_beyond_first() {
        // Only the first `:` splits namespace from reference; the rest of
        // the string (which may itself contain no further `:` for CAIP-2)
        // is taken whole.
        let id = ChainId::parse("solana:4uhcVJyU9pJkvQyS88uRDiswHXSCkY3zQawwpjk2NsNY").unwrap();
        assert_eq!(id.namespace(), "solana");
    }

    #[test]
    fn exact_pattern_matches_only_same_id() {
        let a = ChainId::parse("eip155:1").unwrap();
        let b = ChainId::parse("eip155:137").unwrap();
        let pattern = ChainPattern::parse("eip155:1");
        assert!(a.matches_pattern(&pattern));
        assert!(!b.matches_pattern(&pattern));
    }

    #[test]
    fn namespace_wildcard_matches_any_reference() {
        let a = ChainId::parse("eip155:1").unwrap();
        let b = ChainId::parse("eip155:137").unwrap();
        let c = ChainId::parse("solana:x").unwrap();
        let pattern = ChainPattern::parse("eip155:*");
        assert!(a.matches_pattern(&pattern));
        assert!(b.matches_pattern(&pattern));
        assert!(!c.matches_pattern(&pattern));
    }

    #[test]
    fn universal_wildcard_matches_everything() {
        let pattern = ChainPattern::parse("*");
        assert!(ChainId::parse("eip155:1").unwrap().matches_pattern(&pattern));
        assert!(ChainId::parse("solana:x").unwrap().matches_pattern(&pattern));
    }

    #[test]
    fn select_execution_key_prefers_exact_over_wildcard() {
        let chain = ChainId::parse("eip155:1").unwrap();
        let keys = vec!["*", "eip155:*", "eip155:1"];
        assert_eq!(select_execution_key(&chain, keys), Some("eip155:1"));
    }

    #[test]
    fn select_execution_key_falls_back_to_namespace_wildcard() {
        let chain = ChainId::parse("eip155:42").unwrap();
        let keys = vec!["*", "eip155:*"];
        assert_eq!(select_execution_key(&chain, keys), Some("eip155:*"));
    }

    #[test]
    fn select_execution_key_falls_back_to_any() {
        let chain = ChainId::parse("eip155:42").unwrap();
        let keys = vec!["*"];
        assert_eq!(select_execution_key(&chain, keys), Some("*"));
    }

    #[test]
    fn select_execution_key_none_when_nothing_matches() {
        let chain = ChainId::parse("eip155:42").unwrap();
        let keys = vec!["solana:*"];
        assert_eq!(select_execution_key(&chain, keys), None);
    }

    #[test]
    fn serde_roundtrip() {
        let id = ChainId::parse("eip155:1").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"eip155:1\"");
        let back: ChainId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn serde_rejects_malformed() {
        let err = serde_json::from_str::<ChainId>("\"nope\"");
        assert!(err.is_err());
    }
}
