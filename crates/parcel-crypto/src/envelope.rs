//! # Recordset Envelope
//!
//! Decrypted plaintext is a JSON object of the form
//! `{"recordsets": [{"features": [...]}, ...]}`. All feature lists are
//! concatenated in order. A recordset without a feature list contributes
//! nothing; a single feature that does not parse is skipped and counted,
//! the rest of its recordset is kept.

use parcel_core::Feature;
use serde_json::Value;

use crate::error::PayloadError;

/// Features recovered from one payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedPayload {
    /// Every parsed feature, in recordset then feature order.
    pub features: Vec<Feature>,
    /// Number of recordsets in the envelope.
    pub recordsets: usize,
    /// Features that were present but malformed.
    pub skipped: usize,
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Parse decrypted plaintext into a flat feature list.
pub fn parse_envelope(plaintext: &[u8]) -> Result<DecodedPayload, PayloadError> {
    let text = std::str::from_utf8(plaintext)
        .map_err(|e| PayloadError::Format(format!("plaintext is not UTF-8: {e}")))?;
    let mut envelope: Value = serde_json::from_str(text)
        .map_err(|e| PayloadError::Format(format!("plaintext is not JSON: {e}")))?;

    let kind = kind_of(&envelope);
    let object = envelope
        .as_object_mut()
        .ok_or_else(|| PayloadError::Format(format!("envelope is {kind}, expected an object")))?;
    let recordsets = match object.remove("recordsets") {
        Some(Value::Array(recordsets)) => recordsets,
        Some(other) => {
            return Err(PayloadError::Format(format!(
                "recordsets is {}, expected an array",
                kind_of(&other)
            )))
        }
        None => return Err(PayloadError::Format("envelope has no recordsets".into())),
    };

    let mut decoded = DecodedPayload {
        recordsets: recordsets.len(),
        ..DecodedPayload::default()
    };
    for (index, mut recordset) in recordsets.into_iter().enumerate() {
        let features = match recordset.get_mut("features").map(Value::take) {
            Some(Value::Array(features)) => features,
            _ => continue,
        };
        for raw in features {
            match serde_json::from_value::<Feature>(raw) {
                Ok(feature) => decoded.features.push(feature),
                Err(e) => {
                    decoded.skipped += 1;
                    tracing::warn!(recordset = index, error = %e, "skipping malformed feature");
                }
            }
        }
    }
    Ok(decoded)
}
