//! Shared keyed-store cache backend.
//!
//! Both the assignment records and the version state live in an external
//! keyed store (memcached, Redis, or the in-memory [`MemoryStore`]). All
//! operations are single-key; concurrent `get`/`set`/`update_version` from
//! multiple threads or processes rely on the store's per-key atomicity, no
//! multi-key transaction is assumed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::key::assignment_key;
use super::session::RequestScope;
use super::{CacheRecord, Cacher, DEFAULT_RECORD_TTL, DEFAULT_VERSION_TTL};
use crate::envelope::{IdentifyEnvelope, VersionToken};
use crate::error::CacheError;
use crate::groups::ProctorGroups;
use crate::params::ProctorParameters;

/// Version observation with its own TTL acting as the staleness deadline.
const VERSION_RECENT_KEY: &str = "proctor:matrix-version:recent";

/// Last observed version, kept without TTL for the stale-read fallback.
const VERSION_LAST_KEY: &str = "proctor:matrix-version:last";

/// Prefix for per-parameter assignment records.
const GROUPS_KEY_PREFIX: &str = "proctor:groups:";

/// A keyed store with per-record TTL support.
///
/// Single-key operations must be atomic; that is the only concurrency
/// guarantee the engine relies on.
pub trait KeyedStore: Send + Sync {
    fn get(&self, key: &str) -> Option<serde_json::Value>;
    fn set(&self, key: &str, value: serde_json::Value, ttl: Option<Duration>);
    fn delete(&self, key: &str);
}

/// In-memory keyed store with TTL support, for tests and single-process
/// hosts. Expired entries are dropped on read.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, (serde_json::Value, Option<Instant>)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyedStore for MemoryStore {
    fn get(&self, key: &str) -> Option<serde_json::Value> {
        let mut entries = self.entries.lock().expect("store mutex poisoned");
        match entries.get(key) {
            Some((_, Some(deadline))) if *deadline <= Instant::now() => {
                entries.remove(key);
                None
            }
            Some((value, _)) => Some(value.clone()),
            None => None,
        }
    }

    fn set(&self, key: &str, value: serde_json::Value, ttl: Option<Duration>) {
        let deadline = ttl.map(|ttl| Instant::now() + ttl);
        self.entries
            .lock()
            .expect("store mutex poisoned")
            .insert(key.to_string(), (value, deadline));
    }

    fn delete(&self, key: &str) {
        self.entries
            .lock()
            .expect("store mutex poisoned")
            .remove(key);
    }
}

/// Cache backend storing assignments and version state in a [`KeyedStore`].
pub struct CacheCacher {
    store: Arc<dyn KeyedStore>,
    version_ttl: Duration,
    record_ttl: Option<Duration>,
}

impl CacheCacher {
    pub fn new(store: Arc<dyn KeyedStore>) -> Self {
        Self {
            store,
            version_ttl: DEFAULT_VERSION_TTL,
            record_ttl: Some(DEFAULT_RECORD_TTL),
        }
    }

    /// Override how long a version observation stays current.
    pub fn with_version_ttl(mut self, ttl: Duration) -> Self {
        self.version_ttl = ttl;
        self
    }

    /// Override the independent expiry for assignment records. `None` leaves
    /// record lifetime to the store.
    pub fn with_record_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.record_ttl = ttl;
        self
    }

    /// Treat the current version observation as expired, forcing the next
    /// plain `get` to recheck upstream.
    pub fn force_expire(&self) {
        self.store.delete(VERSION_RECENT_KEY);
    }

    fn groups_key(params: &ProctorParameters) -> String {
        format!("{}{}", GROUPS_KEY_PREFIX, assignment_key(params))
    }

    /// The version considered current for this lookup.
    fn current_version(&self, allow_expired: bool) -> Option<VersionToken> {
        if let Some(token) = self
            .store
            .get(VERSION_RECENT_KEY)
            .and_then(|blob| serde_json::from_value(blob).ok())
        {
            return Some(token);
        }

        if !allow_expired {
            return None;
        }

        // The recent observation expired; fall back to the last known token
        // and re-arm its deadline, matching the upstream fallback behavior.
        let last: VersionToken = self
            .store
            .get(VERSION_LAST_KEY)
            .and_then(|blob| serde_json::from_value(blob).ok())?;
        self.store.set(
            VERSION_RECENT_KEY,
            serde_json::to_value(&last).expect("version token serializes"),
            Some(self.version_ttl),
        );
        Some(last)
    }
}

impl Cacher for CacheCacher {
    fn get(
        &self,
        _scope: Option<&dyn RequestScope>,
        params: &ProctorParameters,
        allow_expired: bool,
    ) -> Option<ProctorGroups> {
        let token = self.current_version(allow_expired)?;

        let key = Self::groups_key(params);
        let blob = self.store.get(&key)?;
        let record: CacheRecord = match serde_json::from_value(blob) {
            Ok(record) => record,
            Err(e) => {
                warn!(key = %key, error = %e, "dropping undecodable cache record");
                self.store.delete(&key);
                return None;
            }
        };

        if record.matrix_version == token && record.params == *params {
            debug!(key = %key, "keyed cache hit");
            Some(record.group_dict)
        } else {
            debug!(key = %key, "keyed cache record stale, deleting");
            self.store.delete(&key);
            None
        }
    }

    fn set(
        &self,
        _scope: Option<&dyn RequestScope>,
        params: &ProctorParameters,
        groups: &ProctorGroups,
        envelope: &IdentifyEnvelope,
    ) -> Result<(), CacheError> {
        if self.store.get(VERSION_LAST_KEY).is_none() {
            return Err(CacheError::VersionNotInitialized);
        }

        self.update_version(envelope);

        let record = CacheRecord {
            group_dict: groups.clone(),
            params: params.clone(),
            matrix_version: envelope.version().clone(),
        };
        let blob = serde_json::to_value(&record).map_err(|e| CacheError::Storage {
            message: e.to_string(),
        })?;
        self.store.set(&Self::groups_key(params), blob, self.record_ttl);
        Ok(())
    }

    fn update_version(&self, envelope: &IdentifyEnvelope) -> VersionToken {
        let token = envelope.version().clone();
        let blob = serde_json::to_value(&token).expect("version token serializes");
        self.store
            .set(VERSION_RECENT_KEY, blob.clone(), Some(self.version_ttl));
        self.store.set(VERSION_LAST_KEY, blob, None);
        token
    }
}
