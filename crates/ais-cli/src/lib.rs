// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! ais-cli
#![warn(missing_docs)]

/// Loading and validating the Workflow/Pack/Protocol documents a run needs.
pub mod docs;
/// JSONL event output and command input for a run.
pub mod stream;

/// Compiling and driving one engine run end to end.
pub mod run;
