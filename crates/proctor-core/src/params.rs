//! Resolution request parameters.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Immutable value object identifying a resolution request.
///
/// These values are reused in many places, especially for caching, so they
/// live in one place instead of five separate arguments to every function.
/// A copy is stored inside every cache record and compared at read time, so
/// divergent context or overrides invalidate a hit even though they are not
/// part of the cache key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProctorParameters {
    /// Root URL of the Proctor API, without trailing slash.
    pub api_root: String,

    /// Test names this application uses (the catalog). Order is preserved for
    /// the request, but irrelevant for equality.
    pub defined_tests: Vec<String>,

    /// Context variable source keys and their values (e.g. user agent).
    pub context: BTreeMap<String, String>,

    /// Identifier source keys and their values (e.g. account or cookie ids
    /// used for bucketing). The cache key is derived from these alone.
    pub identifiers: BTreeMap<String, String>,

    /// Group-forcing override string (from query param or cookie), if any.
    pub force_groups: Option<String>,
}

impl ProctorParameters {
    pub fn new(
        api_root: impl Into<String>,
        defined_tests: Vec<String>,
        context: BTreeMap<String, String>,
        identifiers: BTreeMap<String, String>,
        force_groups: Option<String>,
    ) -> Self {
        let api_root = api_root.into().trim_end_matches('/').to_string();
        Self {
            api_root,
            defined_tests,
            context,
            identifiers,
            force_groups,
        }
    }
}

impl PartialEq for ProctorParameters {
    fn eq(&self, other: &Self) -> bool {
        let mut ours: Vec<&str> = self.defined_tests.iter().map(String::as_str).collect();
        let mut theirs: Vec<&str> = other.defined_tests.iter().map(String::as_str).collect();
        ours.sort_unstable();
        theirs.sort_unstable();

        self.api_root == other.api_root
            && ours == theirs
            && self.context == other.context
            && self.identifiers == other.identifiers
            && self.force_groups == other.force_groups
    }
}

impl Eq for ProctorParameters {}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(tests: &[&str]) -> ProctorParameters {
        ProctorParameters::new(
            "http://proctor.example.com/api",
            tests.iter().map(|t| t.to_string()).collect(),
            BTreeMap::from([("ua".to_string(), "test-agent".to_string())]),
            BTreeMap::from([("account".to_string(), "1234".to_string())]),
            None,
        )
    }

    #[test]
    fn trailing_slash_is_normalized() {
        let p = ProctorParameters::new(
            "http://proctor.example.com/api/",
            vec![],
            BTreeMap::new(),
            BTreeMap::new(),
            None,
        );
        assert_eq!(p.api_root, "http://proctor.example.com/api");
    }

    #[test]
    fn test_order_is_irrelevant_for_equality() {
        assert_eq!(params(&["a", "b"]), params(&["b", "a"]));
        assert_ne!(params(&["a", "b"]), params(&["a", "c"]));
    }

    #[test]
    fn context_divergence_breaks_equality() {
        let a = params(&["a"]);
        let mut b = params(&["a"]);
        b.context.insert("ua".to_string(), "other-agent".to_string());
        assert_ne!(a, b);
    }
}
