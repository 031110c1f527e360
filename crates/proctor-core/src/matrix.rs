//! Test matrix retrieval.
//!
//! The matrix endpoint reports the full definition of each test rather than
//! a per-identity assignment. It is a diagnostic surface and is never cached:
//! every call goes to the API.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::client::ProctorClient;
use crate::envelope::MatrixEnvelope;
use crate::params::ProctorParameters;

/// Definitions of the declared tests, filtered from a matrix response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestMatrix {
    /// Audit block from the response, absent when the fetch failed.
    pub audit: Option<serde_json::Value>,
    /// Definition per declared test. A test the matrix does not know is
    /// present with an empty definition, so lookups stay total.
    pub tests: BTreeMap<String, serde_json::Value>,
}

/// Filter a matrix response down to the declared tests.
///
/// Total over a missing envelope: `None` yields an empty matrix.
pub fn extract_tests(envelope: Option<&MatrixEnvelope>, defined_tests: &[String]) -> TestMatrix {
    let Some(envelope) = envelope else {
        return TestMatrix {
            audit: None,
            tests: BTreeMap::new(),
        };
    };

    let tests = defined_tests
        .iter()
        .map(|name| {
            let definition = envelope
                .tests
                .get(name)
                .cloned()
                .unwrap_or_else(|| serde_json::Value::Object(serde_json::Map::new()));
            (name.clone(), definition)
        })
        .collect();

    TestMatrix {
        audit: Some(envelope.audit.clone()),
        tests,
    }
}

/// Fetch the current test matrix, degrading to an empty matrix on failure.
pub async fn identify_matrix(client: &ProctorClient, params: &ProctorParameters) -> TestMatrix {
    match client.fetch_matrix(params).await {
        Ok(envelope) => extract_tests(Some(&envelope), &params.defined_tests),
        Err(e) => {
            warn!(error = %e, "proctor matrix fetch failed, returning empty matrix");
            extract_tests(None, &params.defined_tests)
        }
    }
}
