//! Engine configuration.
//!
//! Hosts describe the API endpoint, the declared test catalog, and the
//! timing knobs in one place, usually loaded from a YAML file checked in
//! next to the application config.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::{DEFAULT_RECORD_TTL, DEFAULT_VERSION_TTL};
use crate::client::{FetchTimeout, ProctorClient, DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT};
use crate::error::ConfigError;
use crate::params::ProctorParameters;

/// Static configuration for the assignment engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProctorConfig {
    /// Base URL of the Proctor REST API.
    pub api_root: String,

    /// Every test the application branches on. Lookups outside this catalog
    /// are rejected.
    pub defined_tests: Vec<String>,

    /// Per-request timeout in milliseconds. `0` disables the timeout.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Retries after a transient failure.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// How long a matrix version observation stays current, in seconds.
    #[serde(default = "default_version_ttl_secs")]
    pub version_ttl_secs: u64,

    /// Independent expiry for keyed-store assignment records, in seconds.
    /// `null` leaves record lifetime to the store.
    #[serde(default = "default_record_ttl_secs")]
    pub record_ttl_secs: Option<u64>,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT.as_millis() as u64
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_version_ttl_secs() -> u64 {
    DEFAULT_VERSION_TTL.as_secs()
}

fn default_record_ttl_secs() -> Option<u64> {
    Some(DEFAULT_RECORD_TTL.as_secs())
}

impl ProctorConfig {
    pub fn new(api_root: impl Into<String>, defined_tests: Vec<String>) -> Self {
        Self {
            api_root: api_root.into(),
            defined_tests,
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
            version_ttl_secs: default_version_ttl_secs(),
            record_ttl_secs: default_record_ttl_secs(),
        }
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(raw)
            .map_err(|e| ConfigError::new(format!("invalid YAML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = url::Url::parse(&self.api_root)
            .map_err(|e| ConfigError::new(format!("invalid api_root {:?}: {e}", self.api_root)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::new(format!(
                "api_root must be http(s), got {:?}",
                url.scheme()
            )));
        }

        let mut seen = std::collections::BTreeSet::new();
        for name in &self.defined_tests {
            if name.is_empty() {
                return Err(ConfigError::new("defined_tests contains an empty name"));
            }
            if !seen.insert(name) {
                return Err(ConfigError::new(format!("duplicate test name {name:?}")));
            }
        }
        Ok(())
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Parameters for one identity, combining the static catalog with the
    /// per-request context and identifiers.
    pub fn params(
        &self,
        context: BTreeMap<String, String>,
        identifiers: BTreeMap<String, String>,
        force_groups: Option<String>,
    ) -> ProctorParameters {
        ProctorParameters::new(
            &self.api_root,
            self.defined_tests.clone(),
            context,
            identifiers,
            force_groups,
        )
    }

    /// An API client configured with this timeout and retry policy.
    pub fn client(&self) -> ProctorClient {
        let timeout = if self.timeout_ms == 0 {
            FetchTimeout::Unbounded
        } else {
            FetchTimeout::Bounded(Duration::from_millis(self.timeout_ms))
        };
        ProctorClient::new()
            .with_timeout(timeout)
            .with_max_retries(self.max_retries)
    }

    pub fn version_ttl(&self) -> Duration {
        Duration::from_secs(self.version_ttl_secs)
    }

    pub fn record_ttl(&self) -> Option<Duration> {
        self.record_ttl_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaml_with_defaults() {
        let config = ProctorConfig::from_yaml(
            r#"
api_root: "https://proctor.example.com/api/v1"
defined_tests:
  - exp_a
  - exp_b
"#,
        )
        .unwrap();

        assert_eq!(config.timeout_ms, 1000);
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.version_ttl_secs, 300);
        assert_eq!(config.record_ttl_secs, Some(3600));
        assert_eq!(config.defined_tests, vec!["exp_a", "exp_b"]);
    }

    #[test]
    fn yaml_overrides_take_effect() {
        let config = ProctorConfig::from_yaml(
            r#"
api_root: "https://proctor.example.com/api/v1"
defined_tests: [exp_a]
timeout_ms: 250
max_retries: 0
version_ttl_secs: 60
record_ttl_secs: null
"#,
        )
        .unwrap();

        assert_eq!(config.timeout_ms, 250);
        assert_eq!(config.max_retries, 0);
        assert_eq!(config.version_ttl(), Duration::from_secs(60));
        assert_eq!(config.record_ttl(), None);
    }

    #[test]
    fn invalid_api_root_is_rejected() {
        let err = ProctorConfig::new("not a url", vec![]).validate().unwrap_err();
        assert!(err.message.contains("api_root"));

        let err = ProctorConfig::new("ftp://example.com", vec![])
            .validate()
            .unwrap_err();
        assert!(err.message.contains("http(s)"));
    }

    #[test]
    fn duplicate_test_names_are_rejected() {
        let config = ProctorConfig::new(
            "https://proctor.example.com",
            vec!["exp_a".to_string(), "exp_a".to_string()],
        );
        let err = config.validate().unwrap_err();
        assert!(err.message.contains("duplicate"));
    }

    #[test]
    fn params_carry_the_catalog_and_normalize_the_root() {
        let config = ProctorConfig::new(
            "https://proctor.example.com/api/v1/",
            vec!["exp_a".to_string()],
        );
        let params = config.params(
            BTreeMap::new(),
            BTreeMap::from([("account".to_string(), "1234".to_string())]),
            None,
        );

        assert_eq!(params.api_root, "https://proctor.example.com/api/v1");
        assert_eq!(params.defined_tests, vec!["exp_a"]);
    }
}
