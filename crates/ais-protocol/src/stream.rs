// SPDX-License-Identifier: MIT OR Apache-2.0
//! Incremental JSONL parsing for messages arriving in arbitrary byte
//! chunks — the shape `--commands-stdin-jsonl` reads in, where a line may
//! be split across two `read()` calls.

use serde::de::DeserializeOwned;

use crate::{JsonlCodec, ProtocolError};

/// Default maximum line length (16 MiB) before a line is rejected rather
/// than buffered indefinitely.
const DEFAULT_MAX_LINE_LEN: usize = 16 * 1024 * 1024;

/// Buffers incoming bytes and yields complete `T` values as full lines
/// become available.
#[derive(Debug, Clone)]
pub struct StreamParser<T> {
    buf: Vec<u8>,
    max_line_len: usize,
    _marker: std::marker::PhantomData<T>,
}

impl<T: DeserializeOwned> Default for StreamParser<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned> StreamParser<T> {
    /// Create a new parser with the default line-length limit.
    #[must_use]
    pub fn new() -> Self {
        Self { buf: Vec::new(), max_line_len: DEFAULT_MAX_LINE_LEN, _marker: std::marker::PhantomData }
    }

    /// Create a new parser with a custom maximum line length.
    #[must_use]
    pub fn with_max_line_len(max_line_len: usize) -> Self {
        Self { buf: Vec::new(), max_line_len, _marker: std::marker::PhantomData }
    }

    /// Feed a chunk of bytes, returning one result per complete line found
    /// in the accumulated buffer. Blank lines are skipped; an incomplete
    /// trailing line stays buffered.
    pub fn push(&mut self, data: &[u8]) -> Vec<Result<T, ProtocolError>> {
        self.buf.extend_from_slice(data);
        self.drain_lines()
    }

    /// Flush any remaining buffered data, treating it as the final
    /// (possibly unterminated) line. The parser is empty afterward.
    pub fn finish(&mut self) -> Vec<Result<T, ProtocolError>> {
        if !self.buf.is_empty() && !self.buf.ends_with(b"\n") {
            self.buf.push(b'\n');
        }
        self.drain_lines()
    }

    /// `true` if nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Number of buffered, not-yet-consumed bytes.
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }

    fn drain_lines(&mut self) -> Vec<Result<T, ProtocolError>> {
        let mut results = Vec::new();
        while let Some(newline_pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line_bytes: Vec<u8> = self.buf.drain(..=newline_pos).collect();
            let line_bytes = &line_bytes[..line_bytes.len() - 1];

            if line_bytes.len() > self.max_line_len {
                results.push(Err(ProtocolError::Violation(format!(
                    "line length {} exceeds maximum {}",
                    line_bytes.len(),
                    self.max_line_len
                ))));
                continue;
            }

            let line = match std::str::from_utf8(line_bytes) {
                Ok(s) => s,
                Err(e) => {
                    results.push(Err(ProtocolError::Violation(format!("invalid UTF-8: {e}"))));
                    continue;
                }
            };
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            results.push(JsonlCodec::decode(trimmed));
        }
        results
    }
}
