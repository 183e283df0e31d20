// SPDX-License-Identifier: MIT OR Apache-2.0
//! Value-reference evaluation: resolving a [`ValueRef`] tree (`lit`, `ref`,
//! `cel`, `detect`, `object`, `array`) against the Runtime Root.
//!
//! A sync [`evaluate`] handles everything except `detect` bindings that
//! require an async resolver; [`evaluate_async`] additionally drives an
//! [`AsyncDetectResolver`], re-evaluating when a resolver hands back a
//! further [`ValueRef`] rather than a terminal JSON value.

use crate::cel::{CelError, eval_cel_with};
use ais_capability::CapabilitySet;
use ais_core::runtime::RuntimeRoot;
use ais_core::value::{DetectSpec, ValueRef};
use ais_error::{EngineError, ErrorCode};
use serde_json::{Map, Value as Json};
use std::collections::BTreeMap;

/// Overlay values consulted ahead of the Runtime Root proper, keyed by the
/// path's first segment — e.g. `{"params": <resolved params object>}` while
/// the readiness analyzer walks an `ExecutionSpec`'s bound fields.
pub type RootOverrides = BTreeMap<String, Json>;

fn resolve_path(path: &str, root: &RuntimeRoot, overrides: &RootOverrides) -> Option<Json> {
    let mut segments = path.splitn(2, '.');
    let head = segments.next().unwrap_or(path);
    if let Some(base) = overrides.get(head) {
        return match segments.next() {
            None => Some(base.clone()),
            Some(rest) => get_json_path(base, rest),
        };
    }
    root.get(path)
}

fn get_json_path(value: &Json, path: &str) -> Option<Json> {
    let mut current = value.clone();
    for segment in path.split('.') {
        current = match current {
            Json::Object(map) => map.get(segment)?.clone(),
            Json::Array(arr) => arr.get(segment.parse::<usize>().ok()?)?.clone(),
            _ => return None,
        };
    }
    Some(current)
}

fn missing_ref_error(path: &str) -> EngineError {
    EngineError::new(ErrorCode::MissingRef, format!("missing ref: {path}")).with_context("path", path)
}

fn cel_error(expr: &str, err: CelError) -> EngineError {
    EngineError::new(ErrorCode::CelEvalFailed, err.to_string())
        .with_context("expr", expr)
        .with_source(err)
}

/// Evaluation context shared by sync resolution: the capability set a
/// `detect`'s `requires_capabilities` is checked against, and an optional
/// resolver for deferred selections.
pub struct EvalOptions<'a> {
    /// `root_overrides` layered ahead of the Runtime Root (e.g. `params`).
    pub root_overrides: RootOverrides,
    /// Capabilities the runtime declares as supported.
    pub capabilities: CapabilitySet,
    /// Optional resolver consulted for `detect` bindings beyond `choose_one`.
    pub resolver: Option<&'a dyn DetectResolver>,
}

impl Default for EvalOptions<'_> {
    fn default() -> Self {
        Self { root_overrides: RootOverrides::new(), capabilities: CapabilitySet::new(), resolver: None }
    }
}

/// Resolves a `detect` binding synchronously, given its already-negotiated
/// capabilities have passed. Implementations cover providers the engine can
/// pick without awaiting I/O (e.g. a static routing table).
pub trait DetectResolver {
    /// Resolve `spec` to a final JSON value, or decline by returning `None`
    /// (the evaluator then falls back to `choose_one`/`candidates[0]`
    /// semantics where applicable).
    fn resolve(&self, spec: &DetectSpec, root: &RuntimeRoot, overrides: &RootOverrides) -> Option<Json>;
}

/// Async counterpart to [`DetectResolver`]; may itself return a further
/// [`ValueRef`] (e.g. another `ref` or `cel`), which the async evaluator
/// re-evaluates rather than treating as terminal.
#[async_trait::async_trait]
pub trait AsyncDetectResolver: Send + Sync {
    /// Resolve `spec`, returning either a terminal value or a [`ValueRef`]
    /// to evaluate further.
    async fn resolve(
        &self,
        spec: &DetectSpec,
        root: &RuntimeRoot,
        overrides: &RootOverrides,
    ) -> Result<DetectResolution, EngineError>;
}

/// Outcome of an async `detect` resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum DetectResolution {
    /// A terminal JSON value.
    Value(Json),
    /// A further binding to evaluate against the same root/overrides.
    Deferred(Box<ValueRef>),
}

/// Union `options.capabilities` with any `ctx.capabilities` present on the
/// Runtime Root, per §4.1's "from options or `ctx.capabilities`" rule.
fn effective_capabilities(root: &RuntimeRoot, options: &CapabilitySet) -> CapabilitySet {
    let mut caps = options.clone();
    if let Some(Json::Array(items)) = root.get("ctx.capabilities") {
        caps.extend(items.into_iter().filter_map(|v| v.as_str().map(str::to_string)));
    }
    caps
}

fn negotiate_capabilities(spec: &DetectSpec, root: &RuntimeRoot, capabilities: &CapabilitySet) -> Result<(), EngineError> {
    let effective = effective_capabilities(root, capabilities);
    let result = ais_capability::negotiate(&effective, &spec.requires_capabilities);
    if result.is_compatible() {
        return Ok(());
    }
    Err(EngineError::new(ErrorCode::DetectUnsupported, ais_capability::summarize(&result))
        .with_context("kind", &spec.kind)
        .with_context("missing", &result.missing))
}

fn choose_one(spec: &DetectSpec) -> Result<Json, EngineError> {
    spec.candidates.first().cloned().ok_or_else(|| {
        EngineError::new(ErrorCode::DetectUnsupported, "choose_one has no candidates")
            .with_context("kind", &spec.kind)
    })
}

/// Evaluate a [`ValueRef`] tree synchronously.
///
/// `detect` bindings consult `options.resolver` first; if it declines (or
/// none is configured), `kind == "choose_one"` falls back to
/// `candidates[0]`. Any other unresolved `detect` kind is
/// [`ErrorCode::DetectUnsupported`].
///
/// # Errors
///
/// Returns [`EngineError`] with [`ErrorCode::MissingRef`] for an unresolved
/// `ref`, [`ErrorCode::CelEvalFailed`] for a `cel` evaluation fault, or
/// [`ErrorCode::DetectUnsupported`] for an unresolvable `detect`.
pub fn evaluate(value_ref: &ValueRef, root: &RuntimeRoot, options: &EvalOptions<'_>) -> Result<Json, EngineError> {
    match value_ref {
        ValueRef::Lit(v) => Ok(v.clone()),
        ValueRef::Ref(path) => resolve_path(path, root, &options.root_overrides).ok_or_else(|| missing_ref_error(path)),
        ValueRef::Cel(expr) => {
            let overrides = &options.root_overrides;
            eval_cel_with(expr, &|path| resolve_path(path, root, overrides))
                .map(|v| v.into_json())
                .map_err(|e| cel_error(expr, e))
        }
        ValueRef::Detect(spec) => {
            negotiate_capabilities(spec, root, &options.capabilities)?;
            if let Some(resolver) = options.resolver
                && let Some(resolved) = resolver.resolve(spec, root, &options.root_overrides)
            {
                return Ok(resolved);
            }
            if spec.kind == "choose_one" {
                return choose_one(spec);
            }
            Err(EngineError::new(ErrorCode::DetectUnsupported, format!("unsupported detect kind: {}", spec.kind))
                .with_context("kind", &spec.kind))
        }
        ValueRef::Object(fields) => {
            let mut out = Map::new();
            for (key, field) in fields {
                out.insert(key.clone(), evaluate(field, root, options)?);
            }
            Ok(Json::Object(out))
        }
        ValueRef::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(evaluate(item, root, options)?);
            }
            Ok(Json::Array(out))
        }
    }
}

/// Async evaluation context; parallels [`EvalOptions`] but with an
/// [`AsyncDetectResolver`].
pub struct AsyncEvalOptions<'a> {
    /// `root_overrides` layered ahead of the Runtime Root (e.g. `params`).
    pub root_overrides: RootOverrides,
    /// Capabilities the runtime declares as supported.
    pub capabilities: CapabilitySet,
    /// Optional async resolver for `detect` bindings.
    pub resolver: Option<&'a dyn AsyncDetectResolver>,
}

impl Default for AsyncEvalOptions<'_> {
    fn default() -> Self {
        Self { root_overrides: RootOverrides::new(), capabilities: CapabilitySet::new(), resolver: None }
    }
}

/// Evaluate a [`ValueRef`] tree, awaiting an [`AsyncDetectResolver`] for
/// `detect` bindings. If the resolver returns [`DetectResolution::Deferred`],
/// the returned [`ValueRef`] is evaluated in turn against the same root and
/// overrides.
///
/// Boxed explicitly (rather than via `#[async_recursion]`) since this
/// function calls itself across `detect`/`object`/`array` branches and a
/// plain `async fn` cannot be directly recursive.
///
/// # Errors
///
/// Same failure modes as [`evaluate`].
pub fn evaluate_async<'a>(
    value_ref: &'a ValueRef,
    root: &'a RuntimeRoot,
    options: &'a AsyncEvalOptions<'a>,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Json, EngineError>> + Send + 'a>> {
    Box::pin(async move {
        match value_ref {
            ValueRef::Lit(v) => Ok(v.clone()),
            ValueRef::Ref(path) => {
                resolve_path(path, root, &options.root_overrides).ok_or_else(|| missing_ref_error(path))
            }
            ValueRef::Cel(expr) => {
                let overrides = &options.root_overrides;
                eval_cel_with(expr, &|path| resolve_path(path, root, overrides))
                    .map(|v| v.into_json())
                    .map_err(|e| cel_error(expr, e))
            }
            ValueRef::Detect(spec) => {
                negotiate_capabilities(spec, root, &options.capabilities)?;
                if let Some(resolver) = options.resolver {
                    match resolver.resolve(spec, root, &options.root_overrides).await? {
                        DetectResolution::Value(v) => return Ok(v),
                        DetectResolution::Deferred(next) => return evaluate_async(&next, root, options).await,
                    }
                }
                if spec.kind == "choose_one" {
                    return choose_one(spec);
                }
                Err(
                    EngineError::new(ErrorCode::DetectUnsupported, format!("unsupported detect kind: {}", spec.kind))
                        .with_context("kind", &spec.kind),
                )
            }
            ValueRef::Object(fields) => {
                let mut out = Map::new();
                for (key, field) in fields {
                    out.insert(key.clone(), evaluate_async(field, root, options).await?);
                }
                Ok(Json::Object(out))
            }
            ValueRef::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(evaluate_async(item, root, options).await?);
                }
                Ok(Json::Array(out))
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ais_core::value::DetectSpec;
    use serde_json::json;

    fn root() -> RuntimeRoot {
        let mut r = RuntimeRoot::new();
        r.set_inputs(Map::from_iter([("amount".to_string(), json!(10))]));
        r
    }

    #[test]
    fn lit_passes_through() {
        let r = root();
        let opts = EvalOptions::default();
        assert_eq!(evaluate(&ValueRef::lit(json!(5)), &r, &opts).unwrap(), json!(5));
    }

    #[test]
    fn ref_resolves_against_root() {
        let r = root();
        let opts = EvalOptions::default();
        assert_eq!(evaluate(&ValueRef::reference("inputs.amount"), &r, &opts).unwrap(), json!(10));
    }

    #[test]
    fn ref_missing_is_missing_ref_error() {
        let r = root();
        let opts = EvalOptions::default();
        let err = evaluate(&ValueRef::reference("inputs.nope"), &r, &opts).unwrap_err();
        assert_eq!(err.code, ErrorCode::MissingRef);
    }

    #[test]
    fn cel_resolves_against_root() {
        let r = root();
        let opts = EvalOptions::default();
        assert_eq!(
            evaluate(&ValueRef::cel("inputs.amount * 2"), &r, &opts).unwrap(),
            json!(20)
        );
    }

    #[test]
    fn cel_failure_is_cel_eval_failed_error() {
        let r = root();
        let opts = EvalOptions::default();
        let err = evaluate(&ValueRef::cel("inputs.amount / 0"), &r, &opts).unwrap_err();
        assert_eq!(err.code, ErrorCode::CelEvalFailed);
    }

    #[test]
    fn root_overrides_take_precedence_over_root() {
        let r = root();
        let mut overrides = RootOverrides::new();
        overrides.insert("params".to_string(), json!({"amount": 99}));
        let opts = EvalOptions { root_overrides: overrides, ..EvalOptions::default() };
        assert_eq!(evaluate(&ValueRef::reference("params.amount"), &r, &opts).unwrap(), json!(99));
    }

    #[test]
    fn object_and_array_recurse() {
        let r = root();
        let opts = EvalOptions::default();
        let v = ValueRef::Object(BTreeMap::from([
            ("a".to_string(), ValueRef::lit(json!(1))),
            ("b".to_string(), ValueRef::Array(vec![ValueRef::lit(json!(2)), ValueRef::lit(json!(3))])),
        ]));
        assert_eq!(evaluate(&v, &r, &opts).unwrap(), json!({"a": 1, "b": [2, 3]}));
    }

    #[test]
    fn detect_choose_one_picks_first_candidate() {
        let r = root();
        let opts = EvalOptions::default();
        let spec = DetectSpec {
            kind: "choose_one".to_string(),
            provider: None,
            candidates: vec![json!("uniswap"), json!("sushiswap")],
            constraints: None,
            requires_capabilities: vec![],
        };
        assert_eq!(evaluate(&ValueRef::Detect(spec), &r, &opts).unwrap(), json!("uniswap"));
    }

    #[test]
    fn detect_missing_capability_is_detect_unsupported() {
        let r = root();
        let opts = EvalOptions::default();
        let spec = DetectSpec {
            kind: "choose_one".to_string(),
            provider: None,
            candidates: vec![json!("uniswap")],
            constraints: None,
            requires_capabilities: vec!["flash_loan".to_string()],
        };
        let err = evaluate(&ValueRef::Detect(spec), &r, &opts).unwrap_err();
        assert_eq!(err.code, ErrorCode::DetectUnsupported);
    }

    #[test]
    fn detect_custom_kind_without_resolver_is_unsupported() {
        let r = root();
        let opts = EvalOptions::default();
        let spec = DetectSpec {
            kind: "best_price".to_string(),
            provider: None,
            candidates: vec![],
            constraints: None,
            requires_capabilities: vec![],
        };
        let err = evaluate(&ValueRef::Detect(spec), &r, &opts).unwrap_err();
        assert_eq!(err.code, ErrorCode::DetectUnsupported);
    }

    struct StaticResolver(Json);
    impl DetectResolver for StaticResolver {
        fn resolve(&self, _spec: &DetectSpec, _root: &RuntimeRoot, _overrides: &RootOverrides) -> Option<Json> {
            Some(self.0.clone())
        }
    }

    #[test]
    fn sync_resolver_takes_precedence_over_choose_one() {
        let r = root();
        let resolver = StaticResolver(json!("resolved"));
        let opts = EvalOptions { resolver: Some(&resolver), ..EvalOptions::default() };
        let spec = DetectSpec {
            kind: "choose_one".to_string(),
            provider: None,
            candidates: vec![json!("fallback")],
            constraints: None,
            requires_capabilities: vec![],
        };
        assert_eq!(evaluate(&ValueRef::Detect(spec), &r, &opts).unwrap(), json!("resolved"));
    }

    struct DeferringResolver;
    #[async_trait::async_trait]
    impl AsyncDetectResolver for DeferringResolver {
        async fn resolve(
            &self,
            _spec: &DetectSpec,
            _root: &RuntimeRoot,
            _overrides: &RootOverrides,
        ) -> Result<DetectResolution, EngineError> {
            Ok(DetectResolution::Deferred(Box::new(ValueRef::reference("inputs.amount"))))
        }
    }

    #[tokio::test]
    async fn async_resolver_deferred_result_is_reevaluated() {
        let r = root();
        let resolver = DeferringResolver;
        let opts = AsyncEvalOptions { resolver: Some(&resolver), ..AsyncEvalOptions::default() };
        let spec = DetectSpec {
            kind: "best_price".to_string(),
            provider: None,
            candidates: vec![],
            constraints: None,
            requires_capabilities: vec![],
        };
        assert_eq!(evaluate_async(&ValueRef::Detect(spec), &r, &opts).await.unwrap(), json!(10));
    }

    #[tokio::test]
    async fn async_evaluate_handles_lit_and_ref() {
        let r = root();
        let opts = AsyncEvalOptions::default();
        assert_eq!(evaluate_async(&ValueRef::lit(json!(1)), &r, &opts).await.unwrap(), json!(1));
        assert_eq!(
            evaluate_async(&ValueRef::reference("inputs.amount"), &r, &opts).await.unwrap(),
            json!(10)
        );
    }
}
