// SPDX-License-Identifier: MIT OR Apache-2.0
//! Newline-delimited JSON encoding, plus the tagged-wrapper codec that
//! lets `i128` and raw byte arrays survive a round trip through
//! [`serde_json::Value`] without losing precision or type.

use std::io::{BufRead, Write};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as Json;

use crate::ProtocolError;

/// The tag key stamped on a tagged wrapper object.
pub const TYPE_TAG_KEY: &str = "__ais_json_type";
const BIGINT_TAG: &str = "bigint";
const BYTES_TAG: &str = "bytes";

/// Wrap an `i128` as `{"__ais_json_type":"bigint","value":"<decimal string>"}`.
///
/// `serde_json`'s own number type cannot carry the full `i128` range
/// losslessly once a value exceeds `i64`/`u64` bounds; the decimal-string
/// wrapper sidesteps that rather than risk silent truncation.
#[must_use]
pub fn encode_bigint(value: i128) -> Json {
    serde_json::json!({ TYPE_TAG_KEY: BIGINT_TAG, "value": value.to_string() })
}

/// Recover the `i128` wrapped by [`encode_bigint`], if `value` is such a
/// wrapper.
#[must_use]
pub fn decode_bigint(value: &Json) -> Option<i128> {
    let obj = value.as_object()?;
    if obj.get(TYPE_TAG_KEY)?.as_str()? != BIGINT_TAG {
        return None;
    }
    obj.get("value")?.as_str()?.parse().ok()
}

/// Wrap a byte slice as `{"__ais_json_type":"bytes","value":"<base64>"}`.
#[must_use]
pub fn encode_bytes(bytes: &[u8]) -> Json {
    serde_json::json!({ TYPE_TAG_KEY: BYTES_TAG, "value": BASE64.encode(bytes) })
}

/// Recover the bytes wrapped by [`encode_bytes`], if `value` is such a
/// wrapper.
#[must_use]
pub fn decode_bytes(value: &Json) -> Option<Vec<u8>> {
    let obj = value.as_object()?;
    if obj.get(TYPE_TAG_KEY)?.as_str()? != BYTES_TAG {
        return None;
    }
    BASE64.decode(obj.get("value")?.as_str()?).ok()
}

/// Whether `value` is a tagged wrapper object of either known kind.
#[must_use]
pub fn is_tagged_wrapper(value: &Json) -> bool {
    value.as_object().and_then(|o| o.get(TYPE_TAG_KEY)).and_then(Json::as_str).is_some_and(|t| t == BIGINT_TAG || t == BYTES_TAG)
}

/// Walk `value` and reconstruct any tagged-wrapper objects in place.
///
/// Bigint wrappers become JSON numbers when they fit in an `i64`, and stay
/// as the decimal string otherwise (JSON numbers cannot exceed `f64`
/// precision meaningfully, so widening is a silent correctness bug, not a
/// convenience). Byte wrappers become a JSON array of byte values.
pub fn from_ais_json(value: &mut Json) {
    if let Some(n) = decode_bigint(value) {
        *value = match i64::try_from(n) {
            Ok(small) => Json::from(small),
            Err(_) => Json::String(n.to_string()),
        };
        return;
    }
    if let Some(bytes) = decode_bytes(value) {
        *value = Json::Array(bytes.into_iter().map(Json::from).collect());
        return;
    }
    match value {
        Json::Object(map) => {
            for v in map.values_mut() {
                from_ais_json(v);
            }
        }
        Json::Array(items) => {
            for v in items.iter_mut() {
                from_ais_json(v);
            }
        }
        _ => {}
    }
}

/// Serialize `value` to JSON, then apply [`from_ais_json`] to reconstruct
/// any tagged wrappers it contains. For values produced by this crate's
/// own event/command types (which never emit tagged wrappers themselves —
/// only raw `i128`/byte data inside a `data`/`payload` body does), this is
/// a convenience pass-through.
///
/// # Errors
///
/// Returns [`ProtocolError::Json`] if `value` cannot be serialized.
pub fn to_ais_json<T: Serialize>(value: &T) -> Result<Json, ProtocolError> {
    Ok(serde_json::to_value(value)?)
}

// ---------------------------------------------------------------------------
// JsonlCodec
// ---------------------------------------------------------------------------

/// Stateless newline-delimited JSON codec for any `Serialize` +
/// `DeserializeOwned` envelope type (event or command).
#[derive(Debug, Clone, Copy)]
pub struct JsonlCodec;

impl JsonlCodec {
    /// Serialize `msg` to a newline-terminated JSON string.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Json`] if `msg` cannot be serialized.
    pub fn encode<T: Serialize>(msg: &T) -> Result<String, ProtocolError> {
        let mut s = serde_json::to_string(msg)?;
        s.push('\n');
        Ok(s)
    }

    /// Deserialize a single JSON line into `T`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Json`] if the line is not valid JSON or
    /// does not match `T`.
    pub fn decode<T: DeserializeOwned>(line: &str) -> Result<T, ProtocolError> {
        Ok(serde_json::from_str(line)?)
    }

    /// Return a lazy iterator over non-blank lines read from `reader`,
    /// deserializing each into `T`.
    pub fn decode_stream<T: DeserializeOwned>(
        reader: impl BufRead,
    ) -> impl Iterator<Item = Result<T, ProtocolError>> {
        reader.lines().filter_map(|line_result| match line_result {
            Err(e) => Some(Err(ProtocolError::Io(e))),
            Ok(line) => {
                if line.trim().is_empty() { None } else { Some(Self::decode(line.trim())) }
            }
        })
    }

    /// Write a single message as a newline-terminated JSON line.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] on serialization or I/O failure.
    pub fn encode_to_writer<T: Serialize>(writer: &mut impl Write, msg: &T) -> Result<(), ProtocolError> {
        let line = Self::encode(msg)?;
        writer.write_all(line.as_bytes())?;
        Ok(())
    }
}
