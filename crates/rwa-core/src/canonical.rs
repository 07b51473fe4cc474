//! # Canonical Serialization — JCS Byte Production
//!
//! `CanonicalBytes` is the only input accepted when signing a request for
//! the external ledger gateway. The gateway re-canonicalizes the body it
//! receives and verifies the signatures over those bytes, so both sides
//! must produce the identical byte sequence: RFC 8785 (JSON
//! Canonicalization Scheme) output with floats rejected.

use serde::Serialize;
use serde_json::Value;

use crate::error::CanonicalizationError;

/// Bytes produced exclusively by JCS canonicalization.
///
/// # Invariants
///
/// - The only constructor is `CanonicalBytes::new()`.
/// - No float values; amounts are integers or strings.
/// - Object keys sorted, compact separators.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonicalBytes(Vec<u8>);

impl CanonicalBytes {
    /// Construct canonical bytes from any serializable value.
    ///
    /// # Errors
    ///
    /// Returns `CanonicalizationError::FloatRejected` if the value contains a
    /// float, or `SerializationFailed` if serialization fails.
    pub fn new(obj: &impl Serialize) -> Result<Self, CanonicalizationError> {
        let value = serde_json::to_value(obj)?;
        reject_floats(&value)?;
        let bytes = serde_jcs::to_vec(&value)?;
        Ok(Self(bytes))
    }

    /// Access the canonical bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the length of the canonical byte sequence.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the canonical byte sequence is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl AsRef<[u8]> for CanonicalBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

fn reject_floats(value: &Value) -> Result<(), CanonicalizationError> {
    match value {
        Value::Number(n) if n.is_f64() => Err(CanonicalizationError::FloatRejected(
            n.as_f64().unwrap_or(f64::NAN),
        )),
        Value::Object(map) => map.values().try_for_each(reject_floats),
        Value::Array(items) => items.iter().try_for_each(reject_floats),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_keys_sorted_compact() {
        let cb = CanonicalBytes::new(&json!({"b": 2, "a": 1, "c": {"z": true, "y": null}})).unwrap();
        assert_eq!(
            std::str::from_utf8(cb.as_bytes()).unwrap(),
            r#"{"a":1,"b":2,"c":{"y":null,"z":true}}"#
        );
    }

    #[test]
    fn test_float_rejected() {
        let result = CanonicalBytes::new(&json!({"amount": 1.5}));
        assert!(matches!(result, Err(CanonicalizationError::FloatRejected(_))));
    }

    #[test]
    fn test_nested_float_in_array_rejected() {
        assert!(CanonicalBytes::new(&json!({"xs": [1, 2, 0.25]})).is_err());
    }

    #[test]
    fn test_large_integers_accepted() {
        let cb = CanonicalBytes::new(&json!({"supply": u64::MAX})).unwrap();
        assert!(!cb.is_empty());
    }
}
