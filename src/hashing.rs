//! Content digests and settings fingerprints.
//!
//! Both halves of a cache key come from here: [`digest_bytes`] addresses
//! raw input (a PDF, an audio file) and [`digest_settings`] addresses the
//! parameters a derivation ran with. Settings are serialized to canonical
//! JSON first (object keys sorted at every depth, no whitespace), so two
//! structures that compare equal field-by-field always hash the same
//! regardless of declaration or insertion order.

use std::fmt;

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// A SHA-256 digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Full lowercase hex (64 chars).
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First 8 hex chars, used in session ids.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }

    /// Parse a 64-char hex digest, as stored in session manifests.
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|e| Error::config(format!("invalid digest '{s}': {e}")))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::config(format!("digest '{s}' is not 32 bytes")))?;
        Ok(Self(arr))
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.to_hex())
    }
}

pub fn digest_bytes(data: &[u8]) -> ContentHash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    ContentHash(hasher.finalize().into())
}

/// Fingerprint a settings structure.
///
/// # Errors
///
/// [`Error::ConfigurationError`] if the value cannot be represented as JSON
/// (for example a map whose keys are not strings) or does not serialize to
/// a JSON object.
pub fn digest_settings<S: Serialize + ?Sized>(settings: &S) -> Result<ContentHash> {
    let value = serde_json::to_value(settings)
        .map_err(|e| Error::config(format!("settings cannot be fingerprinted: {e}")))?;
    if !value.is_object() {
        return Err(Error::config(format!(
            "settings must be a key-value structure, got {}",
            json_kind(&value)
        )));
    }
    Ok(digest_bytes(canonical_json(&value).as_bytes()))
}

/// Compact JSON with object keys sorted at every depth.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
