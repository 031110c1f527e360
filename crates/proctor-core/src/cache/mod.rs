//! Versioned assignment caches.
//!
//! A cache hit is only valid while the remote test matrix has not changed,
//! so every backend tracks the most recently observed matrix version token
//! and a wall-clock deadline after which upstream must be rechecked. Records
//! found stale on read are deleted, not merely ignored, so storage does not
//! accumulate orphans under churn.
//!
//! Two backends are provided: [`SessionCacher`] stores records in a
//! caller-supplied request scope, [`CacheCacher`] in a shared keyed store
//! with its own TTL support.

pub mod key;
pub mod session;
pub mod store;

pub use session::{MemoryScope, RequestScope, SessionCacher};
pub use store::{CacheCacher, KeyedStore, MemoryStore};

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::envelope::{IdentifyEnvelope, VersionToken};
use crate::error::CacheError;
use crate::groups::ProctorGroups;
use crate::params::ProctorParameters;

/// How long a version observation stays current before upstream must be
/// rechecked.
pub const DEFAULT_VERSION_TTL: Duration = Duration::from_secs(300);

/// Default independent expiry for assignment records in the keyed store.
pub const DEFAULT_RECORD_TTL: Duration = Duration::from_secs(3600);

/// Versioned assignment cache.
///
/// `set` requires a prior version observation: assignments written without a
/// version could never be revalidated, so calling `set` before
/// `update_version` is a wiring bug surfaced as
/// [`CacheError::VersionNotInitialized`].
pub trait Cacher: Send + Sync {
    /// Return the cached groups for `params`, or `None` on miss.
    ///
    /// Misses: no version observed yet, version observation expired (unless
    /// `allow_expired`), no record, or a record whose version token or
    /// stored parameters no longer match — the stale record is deleted as a
    /// side effect. `allow_expired` treats the last recorded version as
    /// still current past its TTL; it is meant only for the fallback path
    /// after a live fetch has failed.
    fn get(
        &self,
        scope: Option<&dyn RequestScope>,
        params: &ProctorParameters,
        allow_expired: bool,
    ) -> Option<ProctorGroups>;

    /// Cache the groups produced from `envelope` for `params`.
    fn set(
        &self,
        scope: Option<&dyn RequestScope>,
        params: &ProctorParameters,
        groups: &ProctorGroups,
        envelope: &IdentifyEnvelope,
    ) -> Result<(), CacheError>;

    /// Record the matrix version observed in `envelope`.
    ///
    /// Idempotent. Always re-arms the staleness deadline, even when the
    /// token is unchanged, which is what makes the TTL a
    /// recheck-at-least-every-N-seconds policy. Returns the version now
    /// considered current.
    fn update_version(&self, envelope: &IdentifyEnvelope) -> VersionToken;
}

/// Persisted cache unit.
///
/// The parameter set that produced the assignments is stored alongside them
/// so reads can revalidate context and override divergence that the
/// identifier-derived key cannot see.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct CacheRecord {
    pub group_dict: ProctorGroups,
    pub params: ProctorParameters,
    pub matrix_version: VersionToken,
}
