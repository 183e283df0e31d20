// SPDX-License-Identifier: MIT OR Apache-2.0
//! Structural validation for envelopes before they're written to, or
//! right after they're read from, a JSONL stream.

use std::collections::HashSet;

use crate::envelope::{CommandEnvelope, EventEnvelope, EVENT_SCHEMA};
use crate::version::SchemaVersion;

/// Recommended maximum serialized size (bytes) for a single event body.
const MAX_RECOMMENDED_PAYLOAD: usize = 10 * 1024 * 1024;

/// A non-fatal observation about an envelope that is still structurally
/// valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationWarning {
    /// The serialized envelope exceeds the recommended size.
    LargePayload {
        /// Actual size in bytes.
        size: usize,
    },
    /// The envelope's schema has a different (but compatible) minor/patch.
    SchemaDrift {
        /// The schema string actually seen.
        seen: String,
    },
}

/// Validate a single [`EventEnvelope`] before it is written to the event
/// stream.
///
/// Returns an error if the envelope's schema family/major doesn't match
/// [`EVENT_SCHEMA`] at all (a build-time bug, not a forwards-compat
/// concern); otherwise returns any warnings worth surfacing.
///
/// # Errors
///
/// Returns an error message if `envelope.schema` is not compatible with
/// [`EVENT_SCHEMA`].
pub fn validate_event(envelope: &EventEnvelope) -> Result<Vec<ValidationWarning>, String> {
    let mut warnings = Vec::new();

    let expected = SchemaVersion::parse(EVENT_SCHEMA).expect("EVENT_SCHEMA is well-formed");
    let seen = SchemaVersion::parse(&envelope.schema).map_err(|e| e.to_string())?;
    if !expected.is_compatible(&seen) {
        return Err(format!("incompatible event schema: expected {EVENT_SCHEMA}, got {}", envelope.schema));
    }
    if seen != expected {
        warnings.push(ValidationWarning::SchemaDrift { seen: envelope.schema.clone() });
    }

    if let Ok(json) = serde_json::to_string(&envelope.event)
        && json.len() > MAX_RECOMMENDED_PAYLOAD
    {
        warnings.push(ValidationWarning::LargePayload { size: json.len() });
    }

    Ok(warnings)
}

/// Duplicate-suppression check for the command channel (§4.8): commands
/// whose `id` has already been seen (persisted in checkpoint extensions)
/// are rejected rather than re-applied.
#[must_use]
pub fn is_duplicate_command(seen_command_ids: &HashSet<String>, envelope: &CommandEnvelope) -> bool {
    seen_command_ids.contains(&envelope.id)
}
