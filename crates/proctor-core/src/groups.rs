//! Test group assignments and extraction from API responses.
//!
//! [`ProctorGroups`] maps every declared test name to a [`GroupAssignment`].
//! All names in the declared catalog are guaranteed present after extraction;
//! looking up a name outside the catalog is an [`UnknownTestError`], never a
//! silent default. This keeps switch-on-group code honest: an unassigned test
//! resolves to the sentinel, a misspelled test fails loudly.
//!
//! Always give switch-on-group code a default branch covering control,
//! inactive, and unassigned. That branch is what runs when the test is
//! removed from the matrix or the API is down.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::envelope::{IdentifyEnvelope, Payload};
use crate::error::UnknownTestError;

/// One test's assignment: group name, bucket value, and payload.
///
/// All three fields absent is the canonical "unassigned" value, used whenever
/// the API errored, an eligibility rule was not met, or the test is unknown
/// to the matrix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupAssignment {
    pub group: Option<String>,
    pub value: Option<i64>,
    pub payload: Option<Payload>,
}

impl GroupAssignment {
    /// The unassigned sentinel. A single well-known identity value so that
    /// downstream equality and filtering stay stable.
    pub const UNASSIGNED: Self = Self {
        group: None,
        value: None,
        payload: None,
    };

    pub fn new(group: impl Into<String>, value: i64, payload: Option<Payload>) -> Self {
        Self {
            group: Some(group.into()),
            value: Some(value),
            payload,
        }
    }

    pub fn is_unassigned(&self) -> bool {
        *self == Self::UNASSIGNED
    }
}

/// Mapping of declared test name to assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProctorGroups {
    assignments: BTreeMap<String, GroupAssignment>,
}

impl ProctorGroups {
    pub(crate) fn from_map(assignments: BTreeMap<String, GroupAssignment>) -> Self {
        Self { assignments }
    }

    /// Look up a declared test's assignment.
    ///
    /// Fails for names outside the declared catalog to catch caller
    /// misconfiguration early.
    pub fn get(&self, test_name: &str) -> Result<&GroupAssignment, UnknownTestError> {
        self.assignments
            .get(test_name)
            .ok_or_else(|| UnknownTestError {
                name: test_name.to_string(),
            })
    }

    /// Iterate over `(test name, assignment)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &GroupAssignment)> {
        self.assignments
            .iter()
            .map(|(name, assignment)| (name.as_str(), assignment))
    }

    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    /// `{testname}{bucketvalue}` strings for A/B metrics logging.
    ///
    /// Unassigned tests and negative (inactive) buckets are skipped.
    pub fn group_string_list(&self) -> Vec<String> {
        self.assignments
            .iter()
            .filter_map(|(name, assignment)| match assignment.value {
                Some(value) if value >= 0 => Some(format!("{}{}", name, value)),
                _ => None,
            })
            .collect()
    }
}

impl fmt::Display for ProctorGroups {
    /// Comma-separated group strings, e.g. `buttoncolortst1,countryalgotst0`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.group_string_list().join(","))
    }
}

/// Build a [`ProctorGroups`] from an identify response.
///
/// This function is total: with an absent envelope (API failure with no
/// fallback), every declared test maps to the unassigned sentinel. With a
/// present envelope, declared tests missing from `data.groups` also map to
/// the sentinel; that is the expected steady state for bucketed-out tests.
/// Envelope entries outside the declared catalog are dropped.
pub fn extract_groups(
    envelope: Option<&IdentifyEnvelope>,
    defined_tests: &[String],
) -> ProctorGroups {
    let assignments = match envelope {
        None => defined_tests
            .iter()
            .map(|name| (name.clone(), GroupAssignment::UNASSIGNED))
            .collect(),
        Some(envelope) => defined_tests
            .iter()
            .map(|name| {
                let assignment = match envelope.data.groups.get(name) {
                    Some(bucket) => GroupAssignment {
                        group: Some(bucket.name.clone()),
                        value: Some(bucket.value),
                        payload: bucket.payload_value(),
                    },
                    None => GroupAssignment::UNASSIGNED,
                };
                (name.clone(), assignment)
            })
            .collect(),
    };

    ProctorGroups::from_map(assignments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::VersionToken;

    fn tests(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn envelope(raw: serde_json::Value) -> IdentifyEnvelope {
        serde_json::from_value(raw).unwrap()
    }

    #[test]
    fn absent_envelope_yields_all_unassigned() {
        let groups = extract_groups(None, &tests(&["exp_a", "exp_b"]));
        assert_eq!(groups.len(), 2);
        assert!(groups.get("exp_a").unwrap().is_unassigned());
        assert!(groups.get("exp_b").unwrap().is_unassigned());
    }

    #[test]
    fn declared_tests_are_always_present() {
        let envelope = envelope(serde_json::json!({
            "data": {
                "groups": {"exp_a": {"name": "blue", "value": 1}},
                "audit": {"version": "7"}
            }
        }));

        let groups = extract_groups(Some(&envelope), &tests(&["exp_a", "exp_b"]));
        let exp_a = groups.get("exp_a").unwrap();
        assert_eq!(exp_a.group.as_deref(), Some("blue"));
        assert_eq!(exp_a.value, Some(1));
        assert_eq!(exp_a.payload, None);
        assert!(groups.get("exp_b").unwrap().is_unassigned());
        assert_eq!(envelope.version(), &VersionToken::Text("7".into()));
    }

    #[test]
    fn undeclared_envelope_tests_are_dropped() {
        let envelope = envelope(serde_json::json!({
            "data": {
                "groups": {
                    "declared": {"name": "active", "value": 1},
                    "undeclared": {"name": "active", "value": 1}
                },
                "audit": {"version": 3}
            }
        }));

        let groups = extract_groups(Some(&envelope), &tests(&["declared"]));
        assert_eq!(groups.len(), 1);
        assert!(groups.get("undeclared").is_err());
    }

    #[test]
    fn unknown_test_lookup_fails_loudly() {
        let groups = extract_groups(None, &tests(&["declared"]));
        let err = groups.get("testnotinsettings").unwrap_err();
        assert_eq!(err.name, "testnotinsettings");
    }

    #[test]
    fn payload_is_unwrapped_from_type_tag() {
        let envelope = envelope(serde_json::json!({
            "data": {
                "groups": {
                    "buttoncolortst": {
                        "name": "blue",
                        "value": 1,
                        "payload": {"stringValue": "#2B60DE"}
                    }
                },
                "audit": {"version": "7"}
            }
        }));

        let groups = extract_groups(Some(&envelope), &tests(&["buttoncolortst"]));
        assert_eq!(
            groups.get("buttoncolortst").unwrap().payload,
            Some(Payload::Text("#2B60DE".into()))
        );
    }

    #[test]
    fn group_string_list_skips_unassigned_and_inactive() {
        let envelope = envelope(serde_json::json!({
            "data": {
                "groups": {
                    "buttoncolortst": {"name": "blue", "value": 1},
                    "countryalgotst": {"name": "control", "value": 0},
                    "oldtst": {"name": "inactive", "value": -1}
                },
                "audit": {"version": "7"}
            }
        }));

        let groups = extract_groups(
            Some(&envelope),
            &tests(&["buttoncolortst", "countryalgotst", "oldtst", "unassignedtst"]),
        );
        assert_eq!(
            groups.group_string_list(),
            vec!["buttoncolortst1", "countryalgotst0"]
        );
        assert_eq!(groups.to_string(), "buttoncolortst1,countryalgotst0");
    }

    #[test]
    fn unassigned_sentinel_is_a_stable_identity() {
        assert_eq!(GroupAssignment::UNASSIGNED, GroupAssignment::UNASSIGNED);
        assert!(GroupAssignment::UNASSIGNED.is_unassigned());
        assert!(!GroupAssignment::new("blue", 1, None).is_unassigned());
    }
}
