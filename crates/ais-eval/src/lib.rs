// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! ais-eval
#![warn(missing_docs)]
//!
//! Resolves the `ValueRef` binding language (`lit`, `ref`, `cel`, `detect`,
//! `object`, `array`) against the Runtime Root, and classifies a compiled
//! `PlanNode`'s readiness (`ready | blocked | skipped`) from the result.

/// The integer-first `cel` expression dialect: lexer, parser, evaluator.
pub mod cel;
/// `ValueRef` tree resolution, sync and async.
pub mod eval;
/// Three-phase readiness analysis over a `PlanNode`.
pub mod readiness;

pub use cel::{CelError, CelValue, eval_cel, eval_cel_with};
pub use eval::{
    AsyncDetectResolver, AsyncEvalOptions, DetectResolution, DetectResolver, EvalOptions, RootOverrides, evaluate,
    evaluate_async,
};
pub use readiness::{ReadinessOutcome, ReadinessState, analyze, analyze_async, bound_value_refs};
