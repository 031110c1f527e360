//! Typed wire envelopes for the Proctor REST API.
//!
//! Success shape for `/groups/identify`:
//!
//! ```json
//! {"data": {"groups": {"buttoncolortst": {"name": "blue", "value": 1,
//!           "payload": {"stringValue": "#2B60DE"}}},
//!           "audit": {"version": "7"}}}
//! ```
//!
//! Matrix shape for `/proctor/matrix`: `{"audit": {...}, "tests": {...}}`.
//! Error shape on non-2xx: `{"meta": {"error": "..."}}`.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque test-matrix version token.
///
/// The server assigns either an integer or a string; the engine only ever
/// compares tokens for equality.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VersionToken {
    Number(i64),
    Text(String),
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::Text(s) => write!(f, "{}", s),
        }
    }
}

/// A bucket payload value.
///
/// Payloads configure test-specific values from the server instead of in
/// code. The wire format hides the value behind a type tag
/// (`stringValue`, `longValue`, `doubleArray`, ...); only the value itself is
/// kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    Text(String),
    Number(serde_json::Number),
    TextList(Vec<String>),
    NumberList(Vec<serde_json::Number>),
}

/// One test's bucket fields inside `data.groups`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketFields {
    /// Assigned group name.
    pub name: String,

    /// Assigned bucket value. -1 typically means inactive, 0 control.
    pub value: i64,

    /// Type-tagged payload union; absent when the bucket has no payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<BTreeMap<String, Payload>>,
}

impl BucketFields {
    /// Unwrap the type-tagged payload map to its single value.
    pub fn payload_value(&self) -> Option<Payload> {
        self.payload
            .as_ref()
            .and_then(|tagged| tagged.values().next().cloned())
    }
}

/// Audit block carrying the matrix version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Audit {
    pub version: VersionToken,
}

/// Validated response from `/groups/identify`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifyEnvelope {
    pub data: IdentifyData,
}

/// Inner `data` object of an identify response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifyData {
    pub groups: BTreeMap<String, BucketFields>,
    pub audit: Audit,
}

impl IdentifyEnvelope {
    /// Matrix version observed in this response.
    pub fn version(&self) -> &VersionToken {
        &self.data.audit.version
    }
}

/// Validated response from `/proctor/matrix`.
///
/// Test definitions are kept as raw JSON; the engine does not interpret the
/// matrix beyond catalog filtering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixEnvelope {
    pub audit: serde_json::Value,
    pub tests: BTreeMap<String, serde_json::Value>,
}

/// Error body optionally returned with non-2xx statuses.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ErrorEnvelope {
    pub meta: ErrorMeta,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ErrorMeta {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identify_envelope_parses_payload_union() {
        let raw = serde_json::json!({
            "data": {
                "groups": {
                    "buttoncolortst": {
                        "name": "blue",
                        "value": 1,
                        "payload": {"stringValue": "#2B60DE"}
                    },
                    "countryalgotst": {"name": "control", "value": 0}
                },
                "audit": {"version": "7"}
            }
        });

        let envelope: IdentifyEnvelope = serde_json::from_value(raw).unwrap();
        assert_eq!(envelope.version(), &VersionToken::Text("7".into()));

        let button = &envelope.data.groups["buttoncolortst"];
        assert_eq!(button.name, "blue");
        assert_eq!(button.value, 1);
        assert_eq!(
            button.payload_value(),
            Some(Payload::Text("#2B60DE".into()))
        );

        let country = &envelope.data.groups["countryalgotst"];
        assert_eq!(country.payload_value(), None);
    }

    #[test]
    fn version_token_accepts_integer_or_string() {
        let numeric: VersionToken = serde_json::from_str("42").unwrap();
        let text: VersionToken = serde_json::from_str("\"42\"").unwrap();
        assert_eq!(numeric, VersionToken::Number(42));
        assert_eq!(text, VersionToken::Text("42".into()));
        // Equality-only comparison: a numeric token never equals a textual one.
        assert_ne!(numeric, text);
    }

    #[test]
    fn payload_list_variants_round_trip() {
        let raw = serde_json::json!({"longArray": [1, 2, 3]});
        let tagged: BTreeMap<String, Payload> = serde_json::from_value(raw).unwrap();
        match &tagged["longArray"] {
            Payload::NumberList(values) => assert_eq!(values.len(), 3),
            other => panic!("expected NumberList, got {:?}", other),
        }
    }
}
