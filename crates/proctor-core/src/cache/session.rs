//! Request-scoped cache backend.
//!
//! Records live in a caller-supplied [`RequestScope`] (typically a web
//! session), so their lifetime is bound to that scope. The version state is
//! process-local: it belongs to the cacher instance, which hosts share
//! across requests for the lifetime of the process. Tests must construct a
//! fresh instance per case.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::{CacheRecord, Cacher, DEFAULT_VERSION_TTL};
use crate::envelope::{IdentifyEnvelope, VersionToken};
use crate::error::CacheError;
use crate::groups::ProctorGroups;
use crate::params::ProctorParameters;

/// Key under which the record blob is stored in the request scope.
const SESSION_KEY: &str = "proctorcache";

/// A request/session-like scope holding opaque blobs.
///
/// Implementations use interior mutability; the engine only ever hands them
/// JSON values and never interprets what the scope does with them.
pub trait RequestScope: Send + Sync {
    fn get(&self, key: &str) -> Option<serde_json::Value>;
    fn set(&self, key: &str, value: serde_json::Value);
    fn remove(&self, key: &str);
}

/// In-memory scope for tests and hosts without a real session store.
#[derive(Debug, Default)]
pub struct MemoryScope {
    entries: Mutex<HashMap<String, serde_json::Value>>,
}

impl MemoryScope {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RequestScope for MemoryScope {
    fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.entries
            .lock()
            .expect("scope mutex poisoned")
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: serde_json::Value) {
        self.entries
            .lock()
            .expect("scope mutex poisoned")
            .insert(key.to_string(), value);
    }

    fn remove(&self, key: &str) {
        self.entries
            .lock()
            .expect("scope mutex poisoned")
            .remove(key);
    }
}

/// Last observed matrix version and the deadline for rechecking it.
#[derive(Debug, Default)]
struct VersionState {
    token: Option<VersionToken>,
    recheck_deadline: Option<DateTime<Utc>>,
}

/// Cache backend storing assignments in the request scope.
pub struct SessionCacher {
    state: Mutex<VersionState>,
    version_ttl: chrono::Duration,
}

impl SessionCacher {
    pub fn new() -> Self {
        Self::with_version_ttl(DEFAULT_VERSION_TTL)
    }

    /// Construct with a custom version-observation TTL.
    pub fn with_version_ttl(ttl: Duration) -> Self {
        Self {
            state: Mutex::new(VersionState::default()),
            version_ttl: chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX),
        }
    }

    /// Treat the current version observation as expired, forcing the next
    /// plain `get` to recheck upstream.
    pub fn force_expire(&self) {
        let mut state = self.state.lock().expect("version state mutex poisoned");
        state.recheck_deadline = None;
    }
}

impl Default for SessionCacher {
    fn default() -> Self {
        Self::new()
    }
}

impl Cacher for SessionCacher {
    fn get(
        &self,
        scope: Option<&dyn RequestScope>,
        params: &ProctorParameters,
        allow_expired: bool,
    ) -> Option<ProctorGroups> {
        let Some(scope) = scope else {
            debug!("session cacher read without a request scope");
            return None;
        };

        let token = {
            let mut state = self.state.lock().expect("version state mutex poisoned");
            let token = state.token.clone()?;

            let now = Utc::now();
            let expired = state.recheck_deadline.is_none_or(|deadline| deadline < now);
            if expired {
                if !allow_expired {
                    debug!("version observation expired, forcing upstream recheck");
                    return None;
                }
                // Stale read keeps the last token current and re-arms the
                // deadline, matching the upstream fallback behavior.
                state.recheck_deadline = Some(now + self.version_ttl);
            }
            token
        };

        let blob = scope.get(SESSION_KEY)?;
        let record: CacheRecord = match serde_json::from_value(blob) {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "dropping undecodable session cache record");
                scope.remove(SESSION_KEY);
                return None;
            }
        };

        if record.matrix_version == token && record.params == *params {
            debug!("session cache hit");
            Some(record.group_dict)
        } else {
            debug!("session cache record stale, deleting");
            scope.remove(SESSION_KEY);
            None
        }
    }

    fn set(
        &self,
        scope: Option<&dyn RequestScope>,
        params: &ProctorParameters,
        groups: &ProctorGroups,
        envelope: &IdentifyEnvelope,
    ) -> Result<(), CacheError> {
        let Some(scope) = scope else {
            return Err(CacheError::ScopeRequired);
        };

        {
            let mut state = self.state.lock().expect("version state mutex poisoned");
            if state.token.is_none() {
                return Err(CacheError::VersionNotInitialized);
            }
            state.token = Some(envelope.version().clone());
            state.recheck_deadline = Some(Utc::now() + self.version_ttl);
        }

        let record = CacheRecord {
            group_dict: groups.clone(),
            params: params.clone(),
            matrix_version: envelope.version().clone(),
        };
        let blob = serde_json::to_value(&record).map_err(|e| CacheError::Storage {
            message: e.to_string(),
        })?;
        scope.set(SESSION_KEY, blob);
        Ok(())
    }

    fn update_version(&self, envelope: &IdentifyEnvelope) -> VersionToken {
        let token = envelope.version().clone();
        let mut state = self.state.lock().expect("version state mutex poisoned");
        state.token = Some(token.clone());
        state.recheck_deadline = Some(Utc::now() + self.version_ttl);
        token
    }
}
