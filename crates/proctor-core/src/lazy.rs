//! Deferred group resolution.
//!
//! [`LazyProctorGroups`] carries everything needed to resolve assignments
//! but performs no cache lookup or network call until an assignment is first
//! read. Hosts can construct one per request up front and pay for resolution
//! only on the requests that actually branch on a test.

use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::cache::{Cacher, RequestScope};
use crate::client::ProctorClient;
use crate::envelope::Payload;
use crate::error::{CacheError, ProctorError, UnknownTestError};
use crate::groups::{GroupAssignment, ProctorGroups};
use crate::identify::load_group_dict;
use crate::params::ProctorParameters;

/// Group assignments that resolve themselves on first read.
///
/// Resolution runs at most once: concurrent first reads race on a single
/// shared cell and every later read returns the settled result. Lookups for
/// tests outside the declared set fail without triggering resolution.
pub struct LazyProctorGroups {
    client: ProctorClient,
    params: ProctorParameters,
    cacher: Option<Arc<dyn Cacher>>,
    scope: Option<Arc<dyn RequestScope>>,
    cell: OnceCell<ProctorGroups>,
}

impl LazyProctorGroups {
    pub fn new(
        client: ProctorClient,
        params: ProctorParameters,
        cacher: Option<Arc<dyn Cacher>>,
        scope: Option<Arc<dyn RequestScope>>,
    ) -> Self {
        Self {
            client,
            params,
            cacher,
            scope,
            cell: OnceCell::new(),
        }
    }

    /// Whether resolution has already happened.
    pub fn is_loaded(&self) -> bool {
        self.cell.initialized()
    }

    /// Resolve now (or return the already-resolved assignments).
    pub async fn load(&self) -> Result<&ProctorGroups, CacheError> {
        self.cell
            .get_or_try_init(|| {
                load_group_dict(
                    &self.client,
                    &self.params,
                    self.cacher.as_deref(),
                    self.scope.as_deref(),
                )
            })
            .await
    }

    /// The assignment for a declared test, resolving on first call.
    pub async fn get(&self, test_name: &str) -> Result<&GroupAssignment, ProctorError> {
        // Reject undeclared names before spending a resolution on them.
        if !self.params.defined_tests.iter().any(|t| t == test_name) {
            return Err(UnknownTestError {
                name: test_name.to_string(),
            }
            .into());
        }
        let groups = self.load().await?;
        Ok(groups.get(test_name)?)
    }

    /// The assigned group name for a declared test, `None` when unassigned.
    pub async fn group(&self, test_name: &str) -> Result<Option<String>, ProctorError> {
        Ok(self.get(test_name).await?.group.clone())
    }

    /// The assigned bucket value for a declared test, `None` when unassigned.
    pub async fn value(&self, test_name: &str) -> Result<Option<i64>, ProctorError> {
        Ok(self.get(test_name).await?.value)
    }

    /// The assignment payload for a declared test, if any.
    pub async fn payload(&self, test_name: &str) -> Result<Option<Payload>, ProctorError> {
        Ok(self.get(test_name).await?.payload.clone())
    }

    /// The `testname<value>` strings for every assigned test.
    pub async fn group_string_list(&self) -> Result<Vec<String>, CacheError> {
        Ok(self.load().await?.group_string_list())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn params(api_root: &str) -> ProctorParameters {
        ProctorParameters::new(
            api_root,
            vec!["exp_a".to_string(), "exp_b".to_string()],
            BTreeMap::new(),
            BTreeMap::from([("account".to_string(), "1234".to_string())]),
            None,
        )
    }

    async fn mount_identify(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/groups/identify"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": {
                    "groups": {"exp_a": {"name": "blue", "value": 1}},
                    "audit": {"version": "7"}
                }
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn nothing_is_fetched_until_first_read() {
        let server = MockServer::start().await;
        mount_identify(&server).await;

        let lazy = LazyProctorGroups::new(ProctorClient::new(), params(&server.uri()), None, None);
        assert!(!lazy.is_loaded());
        assert!(server.received_requests().await.unwrap().is_empty());

        assert_eq!(lazy.group("exp_a").await.unwrap().as_deref(), Some("blue"));
        assert!(lazy.is_loaded());
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn repeated_reads_resolve_exactly_once() {
        let server = MockServer::start().await;
        mount_identify(&server).await;

        let lazy = LazyProctorGroups::new(ProctorClient::new(), params(&server.uri()), None, None);
        assert_eq!(lazy.value("exp_a").await.unwrap(), Some(1));
        assert_eq!(lazy.value("exp_b").await.unwrap(), None);
        assert_eq!(lazy.group_string_list().await.unwrap(), vec!["exp_a1"]);

        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn undeclared_test_fails_without_resolving() {
        let server = MockServer::start().await;
        mount_identify(&server).await;

        let lazy = LazyProctorGroups::new(ProctorClient::new(), params(&server.uri()), None, None);
        let err = lazy.get("nosuchtest").await.unwrap_err();

        assert!(matches!(err, ProctorError::UnknownTest(_)));
        assert!(!lazy.is_loaded());
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_resolution_settles_to_unassigned() {
        let client = ProctorClient::new().with_max_retries(0);
        let lazy = LazyProctorGroups::new(client, params("http://127.0.0.1:9"), None, None);

        assert!(lazy.get("exp_a").await.unwrap().is_unassigned());
        // The all-unassigned outcome is settled, not retried per read.
        assert!(lazy.is_loaded());
        assert_eq!(lazy.group("exp_b").await.unwrap(), None);
    }
}
