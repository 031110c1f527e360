//! Error types for the assignment engine.

/// Errors raised by the Proctor API client.
///
/// Every variant is distinguishable so callers and tests can assert on *why*
/// a call failed, not just that it failed. The orchestrator recovers all of
/// these locally; they never reach the host application.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Request exceeded its timeout on every attempt.
    #[error("request to {url} timed out after {attempts} attempt(s)")]
    Timeout { url: String, attempts: u32 },

    /// Connection-level failure (DNS, refused, reset) on every attempt.
    #[error("connection to {url} failed after {attempts} attempt(s): {message}")]
    ConnectionFailure {
        url: String,
        attempts: u32,
        message: String,
    },

    /// Non-2xx status with a structured `meta.error` message in the body.
    #[error("{url} returned HTTP {status}: {message}")]
    Protocol {
        url: String,
        status: u16,
        message: String,
    },

    /// Non-2xx with an unparseable body, or 2xx with invalid JSON or JSON of
    /// the wrong shape.
    #[error("malformed response from {url} (status {status}): {message}")]
    MalformedResponse {
        url: String,
        status: u16,
        message: String,
    },

    /// 2xx with valid JSON that is missing the required top-level field for
    /// the requested operation.
    #[error("incomplete envelope from {url}: missing {field} field")]
    IncompleteEnvelope { url: String, field: &'static str },
}

impl ClientError {
    /// Whether the failure is transient and worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::ConnectionFailure { .. }
        )
    }

    /// Attempts made before giving up, where the variant tracks them.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Self::Timeout { attempts, .. } | Self::ConnectionFailure { attempts, .. } => {
                Some(*attempts)
            }
            _ => None,
        }
    }
}

/// Cache misuse errors.
///
/// Unlike [`ClientError`], these indicate a wiring bug in the host
/// application and are surfaced to the caller instead of being swallowed.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// `set()` was called before any version was observed via
    /// `update_version()`. Assignments written without a version could never
    /// be revalidated, so this ordering is enforced.
    #[error("update_version() must be called before set()")]
    VersionNotInitialized,

    /// A request-scoped cacher was used without a request scope.
    #[error("session cacher requires a request scope")]
    ScopeRequired,

    /// The scope or store rejected a record blob.
    #[error("cache storage error: {message}")]
    Storage { message: String },
}

/// Lookup of a test name outside the declared catalog.
///
/// Surfaced (never defaulted) to catch caller misconfiguration early.
#[derive(Debug, thiserror::Error)]
#[error("test {name} is not in the defined test catalog")]
pub struct UnknownTestError {
    pub name: String,
}

/// Errors produced while reading assignments through the engine.
#[derive(Debug, thiserror::Error)]
pub enum ProctorError {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    UnknownTest(#[from] UnknownTestError),
}

/// Invalid engine configuration.
#[derive(Debug, thiserror::Error)]
#[error("configuration error: {message}")]
pub struct ConfigError {
    pub message: String,
}

impl ConfigError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
