//! # JSON Parsing
//!
//! Request-body JSON parsing using simd-json.
//!
//! simd-json parses in place, so callers hand over an owned buffer.

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Parse JSON bytes to a typed value using simd-json
///
/// # Errors
///
/// Returns `Error::InvalidJson` if parsing fails
pub fn parse_json_bytes<T: DeserializeOwned>(bytes: &mut [u8]) -> Result<T> {
    simd_json::serde::from_slice(bytes).map_err(|e| Error::InvalidJson {
        reason: e.to_string(),
    })
}

/// Parse a request body into a generic JSON value
///
/// # Errors
///
/// Returns `Error::InvalidJson` if the body is not valid JSON
pub fn parse_body(body: &[u8]) -> Result<Value> {
    let mut buf = body.to_vec();
    parse_json_bytes(&mut buf)
}
