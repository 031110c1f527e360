//! HTTP client for the Proctor REST API.
//!
//! The client classifies failures and validates envelope shape; it performs
//! no fallback logic itself. Degrading to defaults on failure is the
//! orchestrator's job (see [`crate::identify`]).

use std::time::Duration;

use tracing::{debug, error, warn};

use crate::envelope::{ErrorEnvelope, IdentifyEnvelope, MatrixEnvelope};
use crate::error::ClientError;
use crate::params::ProctorParameters;

/// Default per-request timeout.
///
/// A timeout is important to ensure the host backend does not block on
/// Proctor API calls forever if the API severely degrades or starts hanging.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Default number of extra attempts for transient failures.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Query parameter carrying the group-forcing override.
const FORCE_GROUPS_PARAM: &str = "prforceGroups";

/// Per-request timeout policy.
///
/// There is deliberately no `Default`: an unbounded call on a degraded remote
/// service would stall the caller indefinitely, so `Unbounded` is an explicit
/// opt-in at the call site, never something you get by omission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchTimeout {
    Bounded(Duration),
    Unbounded,
}

/// REST API operations the client knows how to call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ApiMethod {
    GroupsIdentify,
    ProctorMatrix,
}

impl ApiMethod {
    fn path(self) -> &'static str {
        match self {
            Self::GroupsIdentify => "groups/identify",
            Self::ProctorMatrix => "proctor/matrix",
        }
    }

    /// Top-level field a 2xx envelope must contain for this operation.
    fn required_field(self) -> &'static str {
        match self {
            Self::GroupsIdentify => "data.groups",
            Self::ProctorMatrix => "tests",
        }
    }

    fn has_required_field(self, value: &serde_json::Value) -> bool {
        match self {
            Self::GroupsIdentify => value.pointer("/data/groups").is_some(),
            Self::ProctorMatrix => value.get("tests").is_some(),
        }
    }
}

/// Transport-level failure before a complete response was read.
#[derive(Debug)]
enum TransportFailure {
    Timeout,
    Connection(String),
}

impl From<reqwest::Error> for TransportFailure {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else {
            Self::Connection(e.to_string())
        }
    }
}

/// Client for the Proctor REST API.
#[derive(Debug, Clone)]
pub struct ProctorClient {
    client: reqwest::Client,
    timeout: FetchTimeout,
    max_retries: u32,
}

impl ProctorClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout: FetchTimeout::Bounded(DEFAULT_TIMEOUT),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Override the per-request timeout policy.
    pub fn with_timeout(mut self, timeout: FetchTimeout) -> Self {
        self.timeout = timeout;
        self
    }

    /// Override the retry ceiling for transient failures.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Call `GET {api_root}/groups/identify` and validate the envelope.
    pub async fn fetch_identify(
        &self,
        params: &ProctorParameters,
    ) -> Result<IdentifyEnvelope, ClientError> {
        let method = ApiMethod::GroupsIdentify;
        let url = self.api_url(params, method);
        let (status, value) = self.call(&url, params, method).await?;

        let envelope: IdentifyEnvelope =
            serde_json::from_value(value).map_err(|e| ClientError::MalformedResponse {
                url: url.clone(),
                status,
                message: format!("invalid identify envelope: {}", e),
            })?;

        debug!(url = %url, version = %envelope.version(), "proctor identify succeeded");
        Ok(envelope)
    }

    /// Call `GET {api_root}/proctor/matrix` and validate the envelope.
    pub async fn fetch_matrix(
        &self,
        params: &ProctorParameters,
    ) -> Result<MatrixEnvelope, ClientError> {
        let method = ApiMethod::ProctorMatrix;
        let url = self.api_url(params, method);
        let (status, value) = self.call(&url, params, method).await?;

        let envelope: MatrixEnvelope =
            serde_json::from_value(value).map_err(|e| ClientError::MalformedResponse {
                url: url.clone(),
                status,
                message: format!("invalid matrix envelope: {}", e),
            })?;

        debug!(url = %url, "proctor matrix fetch succeeded");
        Ok(envelope)
    }

    fn api_url(&self, params: &ProctorParameters, method: ApiMethod) -> String {
        format!("{}/{}", params.api_root, method.path())
    }

    /// Issue the request and validate status and envelope shape.
    async fn call(
        &self,
        url: &str,
        params: &ProctorParameters,
        method: ApiMethod,
    ) -> Result<(u16, serde_json::Value), ClientError> {
        let query = query_params(params);
        debug!(url = %url, ?query, "calling proctor api");

        let (status, body) = match self.request(url, &query).await {
            Ok(response) => response,
            Err(e) => {
                error!(url = %url, error = %e, "proctor api request failed");
                return Err(e);
            }
        };

        if !(200..300).contains(&status) {
            // API errors may carry additional JSON metadata under meta.error.
            return Err(match serde_json::from_str::<ErrorEnvelope>(&body) {
                Ok(envelope) => {
                    error!(
                        url = %url,
                        status,
                        message = %envelope.meta.error,
                        "proctor api returned http error with api error message"
                    );
                    ClientError::Protocol {
                        url: url.to_string(),
                        status,
                        message: envelope.meta.error,
                    }
                }
                Err(_) => {
                    error!(url = %url, status, "proctor api returned http error");
                    ClientError::MalformedResponse {
                        url: url.to_string(),
                        status,
                        message: "http error body is not an error envelope".to_string(),
                    }
                }
            });
        }

        let value: serde_json::Value =
            serde_json::from_str(&body).map_err(|e| {
                error!(url = %url, error = %e, "proctor api returned invalid json");
                ClientError::MalformedResponse {
                    url: url.to_string(),
                    status,
                    message: format!("invalid JSON: {}", e),
                }
            })?;

        // The Proctor REST API should never return 200 without groups or tests.
        if !method.has_required_field(&value) {
            let field = method.required_field();
            error!(url = %url, field, "proctor api returned incomplete envelope");
            return Err(ClientError::IncompleteEnvelope {
                url: url.to_string(),
                field,
            });
        }

        Ok((status, value))
    }

    /// Send with retry for transient failures.
    async fn request(
        &self,
        url: &str,
        query: &[(String, String)],
    ) -> Result<(u16, String), ClientError> {
        let max_attempts = self.max_retries + 1;
        let mut attempt = 0;

        loop {
            attempt += 1;

            match self.request_once(url, query).await {
                Ok(response) => return Ok(response),
                Err(failure) if attempt < max_attempts => {
                    let backoff =
                        Duration::from_millis(100u64 << attempt).min(Duration::from_secs(1));
                    warn!(
                        url = %url,
                        failure = ?failure,
                        attempt,
                        max_attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        "retrying proctor api request"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(TransportFailure::Timeout) => {
                    return Err(ClientError::Timeout {
                        url: url.to_string(),
                        attempts: attempt,
                    })
                }
                Err(TransportFailure::Connection(message)) => {
                    return Err(ClientError::ConnectionFailure {
                        url: url.to_string(),
                        attempts: attempt,
                        message,
                    })
                }
            }
        }
    }

    /// Send a single request and read the full body, without retry.
    ///
    /// The body read stays inside the transport layer: the per-request
    /// timeout keeps running while the body streams in, so a server that
    /// answers with headers and then stalls the body is a timeout, not a
    /// malformed response.
    async fn request_once(
        &self,
        url: &str,
        query: &[(String, String)],
    ) -> Result<(u16, String), TransportFailure> {
        let mut request = self.client.get(url).query(query);
        if let FetchTimeout::Bounded(timeout) = self.timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok((status, body))
    }
}

impl Default for ProctorClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the query string for a parameter set.
///
/// Context and identifier entries need their source prefixes. `test` is
/// always sent, even when the catalog is empty: without it the service
/// returns every matrix test.
fn query_params(params: &ProctorParameters) -> Vec<(String, String)> {
    let mut query = Vec::new();

    for (key, value) in &params.context {
        query.push((format!("ctx.{}", key), value.clone()));
    }
    for (key, value) in &params.identifiers {
        query.push((format!("id.{}", key), value.clone()));
    }

    query.push(("test".to_string(), params.defined_tests.join(",")));

    if let Some(force_groups) = params.force_groups.as_deref() {
        if !force_groups.is_empty() {
            query.push((FORCE_GROUPS_PARAM.to_string(), force_groups.to_string()));
        }
    }

    query
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn params(api_root: &str) -> ProctorParameters {
        ProctorParameters::new(
            api_root,
            vec!["exp_a".to_string(), "exp_b".to_string()],
            BTreeMap::from([("ua".to_string(), "test-agent".to_string())]),
            BTreeMap::from([("account".to_string(), "1234".to_string())]),
            None,
        )
    }

    #[test]
    fn query_includes_prefixed_entries_and_test_list() {
        let query = query_params(&params("http://example.com"));
        assert!(query.contains(&("ctx.ua".to_string(), "test-agent".to_string())));
        assert!(query.contains(&("id.account".to_string(), "1234".to_string())));
        assert!(query.contains(&("test".to_string(), "exp_a,exp_b".to_string())));
        assert!(!query.iter().any(|(key, _)| key == FORCE_GROUPS_PARAM));
    }

    #[test]
    fn test_param_is_sent_even_for_empty_catalog() {
        let mut p = params("http://example.com");
        p.defined_tests.clear();
        let query = query_params(&p);
        assert!(query.contains(&("test".to_string(), String::new())));
    }

    #[test]
    fn force_groups_is_sent_only_when_non_empty() {
        let mut p = params("http://example.com");
        p.force_groups = Some(String::new());
        assert!(!query_params(&p)
            .iter()
            .any(|(key, _)| key == FORCE_GROUPS_PARAM));

        p.force_groups = Some("exp_a1".to_string());
        assert!(query_params(&p)
            .contains(&(FORCE_GROUPS_PARAM.to_string(), "exp_a1".to_string())));
    }
}
