// SPDX-License-Identifier: MIT OR Apache-2.0
//! Redacting event bodies before they reach a trace file.

use ais_glob::build_globset;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// How aggressively an event's `data` body is redacted before it is
/// written to a trace file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedactionMode {
    /// No redaction; the raw event body is written verbatim.
    Off,
    /// Redact only fields whose key matches a secret-key pattern
    /// (`*secret*`, `*private_key*`, `*signature*`, `*mnemonic*`).
    Audit,
    /// [`Self::Audit`]'s redaction plus structural stripping of
    /// `rpc_payload`/`raw_tx` fields wherever they occur.
    #[default]
    Default,
}

const SECRET_KEY_PATTERNS: &[&str] = &["*secret*", "*private_key*", "*signature*", "*mnemonic*"];
const STRUCTURAL_STRIP_KEYS: &[&str] = &["rpc_payload", "raw_tx"];
const REDACTED: &str = "<redacted>";

/// Redact `value` in place according to `mode`.
///
/// `allowlist` is a set of glob patterns over dotted field paths (e.g.
/// `"data.contracts.*"`) that are kept unredacted even when they would
/// otherwise match a strip rule — the escape hatch §4.7 calls out for
/// deliberately-surfaced fields.
///
/// # Panics
///
/// Panics if `allowlist` contains an invalid glob pattern; callers are
/// expected to validate configured patterns at load time.
pub fn redact(value: &mut Json, mode: RedactionMode, allowlist: &[String]) {
    if mode == RedactionMode::Off {
        return;
    }
    let secret_keys = build_globset(&SECRET_KEY_PATTERNS.iter().map(ToString::to_string).collect::<Vec<_>>())
        .expect("secret-key patterns are valid globs")
        .expect("pattern list is non-empty");
    let allow = build_globset(allowlist).expect("configured allowlist patterns are valid globs");
    redact_node(value, String::new(), mode, &secret_keys, allow.as_ref());
}

fn redact_node(
    value: &mut Json,
    path: String,
    mode: RedactionMode,
    secret_keys: &globset::GlobSet,
    allowlist: Option<&globset::GlobSet>,
) {
    match value {
        Json::Object(map) => {
            for (key, child) in map.iter_mut() {
                let child_path = if path.is_empty() { key.clone() } else { format!("{path}.{key}") };
                if allowlist.is_some_and(|set| set.is_match(&child_path)) {
                    continue;
                }
                if secret_keys.is_match(key) {
                    *child = Json::String(REDACTED.to_string());
                    continue;
                }
                if mode == RedactionMode::Default && STRUCTURAL_STRIP_KEYS.contains(&key.as_str()) {
                    *child = Json::String(REDACTED.to_string());
                    continue;
                }
                redact_node(child, child_path, mode, secret_keys, allowlist);
            }
        }
        Json::Array(items) => {
            for (idx, item) in items.iter_mut().enumerate() {
                let child_path = format!("{path}.{idx}");
                redact_node(item, child_path, mode, secret_keys, allowlist);
            }
        }
        _ => {}
    }
}
