// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! ais-protocol
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! JSONL wire format: events flow out over `--events-jsonl`, commands flow
//! in over `--commands-stdin-jsonl`. Both sides share the same envelope
//! codec and the tagged-JSON rules for `i128`/byte data.
//!
//! # Examples
//!
//! ```
//! use ais_protocol::{EventKind, EventSink, JsonlCodec, RedactionMode};
//! use serde_json::json;
//!
//! let sink = EventSink::new("run-1", RedactionMode::Default);
//! let envelope = sink.emit_for_node(EventKind::NodeReady, "swap1", json!({"chain": "eip155:1"}));
//!
//! let line = JsonlCodec::encode(&envelope).unwrap();
//! assert!(line.ends_with('\n'));
//! assert!(line.contains("\"type\":\"node_ready\""));
//! ```

pub mod builder;
pub mod codec;
mod envelope;
pub mod redact;
pub mod stream;
pub mod validate;
pub mod version;

use std::io::Error as IoError;

use thiserror::Error;

pub use builder::EventSink;
pub use codec::{JsonlCodec, decode_bigint, decode_bytes, encode_bigint, encode_bytes, from_ais_json, to_ais_json};
pub use envelope::{
    ApplyPatchesPayload, CancelPayload, Command, CommandEnvelope, CommandKind, Event, EventEnvelope,
    EventExtensions, EventKind, SelectProviderPayload, UserConfirmPayload, EVENT_SCHEMA,
};
pub use redact::RedactionMode;
pub use stream::StreamParser;
pub use validate::{ValidationWarning, is_duplicate_command, validate_event};
pub use version::{SchemaVersion, SchemaVersionError};

/// Errors arising from JSONL encoding/decoding or protocol-level
/// violations.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// JSON serialization or deserialization failure.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// A protocol-level invariant was violated (oversized line, bad UTF-8).
    #[error("protocol violation: {0}")]
    Violation(String),
}

impl From<ProtocolError> for ais_error::EngineError {
    fn from(e: ProtocolError) -> Self {
        ais_error::EngineError::new(ais_error::ErrorCode::CommandRejected, e.to_string())
    }
}
