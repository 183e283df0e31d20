// SPDX-License-Identifier: MIT OR Apache-2.0
//! [`ValueRef`] — the tagged binding expression used throughout plans,
//! protocol specs, and packs wherever a value is not known until the
//! Runtime Root is consulted.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::collections::BTreeMap;

/// A value binding: either a literal, a dotted-path reference into the
/// Runtime Root, a `cel`-flavored expression, a deferred provider `detect`,
/// or a recursive `object`/`array` composition of the above.
///
/// Exactly one variant is present per instance; the `tag` field drives
/// serde's external tagging so documents remain `{"ref": "inputs.amount"}`
/// rather than nested under a `ValueRef` key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ValueRef {
    /// A literal JSON value, passed through unchanged.
    Lit(Json),
    /// A dotted path into the Runtime Root, e.g. `inputs.amount`.
    #[serde(rename = "ref")]
    Ref(String),
    /// An integer-first expression evaluated over the Runtime Root.
    Cel(String),
    /// A deferred, provider-driven selection resolved at evaluation time.
    Detect(DetectSpec),
    /// A recursive object composed of named [`ValueRef`]s.
    Object(BTreeMap<String, ValueRef>),
    /// A recursive array of [`ValueRef`]s.
    Array(Vec<ValueRef>),
}

/// Payload of a `detect` [`ValueRef`] variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DetectSpec {
    /// The detect kind, e.g. `choose_one`.
    pub kind: String,
    /// An explicit provider name, bypassing negotiation when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Ordered candidate values; `choose_one` always picks `candidates[0]`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<Json>,
    /// Free-form constraints passed to a resolver.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<Json>,
    /// Capabilities that must be present for this detect to be viable.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires_capabilities: Vec<String>,
}

impl ValueRef {
    /// Construct a literal binding.
    #[must_use]
    pub fn lit(value: impl Into<Json>) -> Self {
        Self::Lit(value.into())
    }

    /// Construct a dotted-path reference binding.
    #[must_use]
    pub fn reference(path: impl Into<String>) -> Self {
        Self::Ref(path.into())
    }

    /// Construct a `cel` expression binding.
    #[must_use]
    pub fn cel(expr: impl Into<String>) -> Self {
        Self::Cel(expr.into())
    }

    /// Whether this is a `ref` variant pointing into `nodes.<id>.outputs...`,
    /// the implicit-dependency convention the compiler mines for DAG edges.
    #[must_use]
    pub fn implicit_node_dep(&self) -> Option<&str> {
        let Self::Ref(path) = self else {
            return None;
        };
        let rest = path.strip_prefix("nodes.")?;
        rest.split('.').next()
    }

    /// Recursively collect every `nodes.<id>.outputs...` reference reachable
    /// from this binding, used both for implicit dependency mining and for
    /// the readiness analyzer's `ExecutionSpec` walk.
    pub fn collect_node_deps(&self, out: &mut Vec<String>) {
        match self {
            Self::Ref(_) => {
                if let Some(id) = self.implicit_node_dep() {
                    out.push(id.to_string());
                }
            }
            Self::Object(object) => {
                for v in object.values() {
                    v.collect_node_deps(out);
                }
            }
            Self::Array(array) => {
                for v in array {
                    v.collect_node_deps(out);
                }
            }
            Self::Lit(_) | Self::Cel(_) | Self::Detect(_) => {}
        }
    }
}

impl From<Json> for ValueRef {
    fn from(value: Json) -> Self {
        Self::Lit(value)
    }
}
