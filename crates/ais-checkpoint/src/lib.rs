// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! ais-checkpoint
#![warn(missing_docs)]

/// [`CheckpointStore`] and its file-backed and in-memory implementations.
pub mod store;

pub use store::{CheckpointStore, FileCheckpointStore, InMemoryCheckpointStore, StoreError};
