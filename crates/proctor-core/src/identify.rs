//! Orchestration of cache, client, and extraction.
//!
//! The assignment service is non-critical: a resolution never fails because
//! the API is down. The fallback order on a cache miss is live fetch, then
//! stale cache read, then all-unassigned. Only cache misuse (a wiring bug in
//! the host) surfaces as an error.

use std::sync::Arc;

use tracing::warn;

use crate::cache::{Cacher, RequestScope};
use crate::client::ProctorClient;
use crate::error::CacheError;
use crate::groups::{extract_groups, ProctorGroups};
use crate::lazy::LazyProctorGroups;
use crate::params::ProctorParameters;

/// Resolve the group assignments for `params`.
///
/// With a cacher, the dominant fast path is a cache hit with no network
/// call. On a miss the client is called, the response extracted and written
/// through; on client failure the result degrades to a stale cache read or
/// to all-unassigned, never to an error.
pub async fn identify_groups(
    client: &ProctorClient,
    params: &ProctorParameters,
    cacher: Option<&dyn Cacher>,
    scope: Option<&dyn RequestScope>,
) -> Result<ProctorGroups, CacheError> {
    load_group_dict(client, params, cacher, scope).await
}

/// Like [`identify_groups`], but the cache lookup and network call are
/// deferred until an assignment is first read.
pub fn identify_groups_lazy(
    client: ProctorClient,
    params: ProctorParameters,
    cacher: Option<Arc<dyn Cacher>>,
    scope: Option<Arc<dyn RequestScope>>,
) -> LazyProctorGroups {
    LazyProctorGroups::new(client, params, cacher, scope)
}

/// One full resolution pass.
pub(crate) async fn load_group_dict(
    client: &ProctorClient,
    params: &ProctorParameters,
    cacher: Option<&dyn Cacher>,
    scope: Option<&dyn RequestScope>,
) -> Result<ProctorGroups, CacheError> {
    if let Some(cacher) = cacher {
        if let Some(groups) = cacher.get(scope, params, false) {
            return Ok(groups);
        }
    }

    match client.fetch_identify(params).await {
        Ok(envelope) => {
            let groups = extract_groups(Some(&envelope), &params.defined_tests);
            if let Some(cacher) = cacher {
                cacher.update_version(&envelope);
                cacher.set(scope, params, &groups, &envelope)?;
            }
            Ok(groups)
        }
        Err(e) => {
            warn!(error = %e, "proctor identify failed, degrading to fallback");
            // Prefer slightly-stale assignments over universal unassignment.
            let stale = cacher.and_then(|cacher| cacher.get(scope, params, true));
            Ok(stale.unwrap_or_else(|| extract_groups(None, &params.defined_tests)))
        }
    }
}
