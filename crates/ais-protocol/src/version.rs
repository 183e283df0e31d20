// SPDX-License-Identifier: MIT OR Apache-2.0
//! Parsing and compatibility checks for the `"<name>/<major>.<minor>.<patch>"`
//! schema strings stamped on documents and event envelopes
//! (`ais-engine-event/0.0.3`, `ais/0.0.2`, `ais-pack/0.0.2`,
//! `ais-flow/0.0.3`).

use std::fmt;

/// A parsed `"<name>/<major>.<minor>.<patch>"` schema string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaVersion {
    /// The schema family, e.g. `"ais-engine-event"`.
    pub name: String,
    /// Major component.
    pub major: u32,
    /// Minor component.
    pub minor: u32,
    /// Patch component.
    pub patch: u32,
}

/// Error parsing a schema string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaVersionError {
    /// The string had no `/` separator, or the version part wasn't
    /// `MAJOR.MINOR.PATCH`.
    #[error("invalid schema version format: {0:?}")]
    InvalidFormat(String),
}

impl SchemaVersion {
    /// Parse `s` as `"<name>/<major>.<minor>.<patch>"`.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaVersionError::InvalidFormat`] if `s` does not match
    /// the expected shape.
    pub fn parse(s: &str) -> Result<Self, SchemaVersionError> {
        let (name, version) = s.rsplit_once('/').ok_or_else(|| SchemaVersionError::InvalidFormat(s.to_string()))?;
        let mut parts = version.split('.');
        let (Some(major), Some(minor), Some(patch), None) = (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(SchemaVersionError::InvalidFormat(s.to_string()));
        };
        let parse_u32 = |p: &str| p.parse::<u32>().map_err(|_| SchemaVersionError::InvalidFormat(s.to_string()));
        Ok(Self { name: name.to_string(), major: parse_u32(major)?, minor: parse_u32(minor)?, patch: parse_u32(patch)? })
    }

    /// Two schema versions are compatible when they share a name and a
    /// major component; the reader only needs to tolerate additive
    /// (minor/patch) changes.
    #[must_use]
    pub fn is_compatible(&self, other: &Self) -> bool {
        self.name == other.name && self.major == other.major
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}.{}.{}", self.name, self.major, self.minor, self.patch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_event_schema() {
        let v = SchemaVersion::parse("ais-engine-event/0.0.3").unwrap();
        assert_eq!(v.name, "ais-engine-event");
        assert_eq!((v.major, v.minor, v.patch), (0, 0, 3));
    }

    #[test]
    fn rejects_malformed_strings() {
        assert!(SchemaVersion::parse("no-slash-here").is_err());
        assert!(SchemaVersion::parse("ais/0.2").is_err());
        assert!(SchemaVersion::parse("ais/0.0.x").is_err());
    }

    #[test]
    fn compatibility_requires_same_name_and_major() {
        let a = SchemaVersion::parse("ais-engine-event/0.0.3").unwrap();
        let b = SchemaVersion::parse("ais-engine-event/0.4.0").unwrap();
        let c = SchemaVersion::parse("ais-flow/0.0.3").unwrap();
        assert!(a.is_compatible(&b));
        assert!(!a.is_compatible(&c));
    }

    #[test]
    fn display_round_trips_parse() {
        let v = SchemaVersion::parse("ais-pack/0.0.2").unwrap();
        assert_eq!(v.to_string(), "ais-pack/0.0.2");
    }
}
