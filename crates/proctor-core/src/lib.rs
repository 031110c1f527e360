//! Group-assignment resolution for Proctor-style A/B test services.
//!
//! This crate resolves which test groups an identity belongs to, providing:
//!
//! - HTTP client for the Proctor REST API with timeout, retry, and error
//!   classification
//! - Typed extraction of assignments, total over the declared test catalog
//! - Versioned caching keyed to the remote test-matrix version, with a
//!   request-scoped and a shared keyed-store backend
//! - Lazy resolution that defers the fetch until an assignment is read
//! - Test matrix retrieval for diagnostics
//!
//! # Quick Start
//!
//! ```no_run
//! use std::collections::BTreeMap;
//! use proctor_core::{identify_groups, ProctorClient, ProctorParameters};
//!
//! # async fn example() -> Result<(), proctor_core::ProctorError> {
//! let params = ProctorParameters::new(
//!     "https://proctor.example.com/api/v1",
//!     vec!["buttoncolortst".to_string()],
//!     BTreeMap::new(),
//!     BTreeMap::from([("account".to_string(), "1234".to_string())]),
//!     None,
//! );
//!
//! let client = ProctorClient::new();
//! let groups = identify_groups(&client, &params, None, None).await?;
//! if groups.get("buttoncolortst")?.group.as_deref() == Some("blue") {
//!     // render the blue button
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Degradation
//!
//! Assignment resolution never fails because the API is unreachable: on
//! client failure it falls back to a stale cache read, then to marking every
//! declared test unassigned. Only cache misuse and unknown-test lookups
//! surface as errors.

pub mod cache;
pub mod client;
pub mod config;
pub mod envelope;
pub mod error;
pub mod groups;
pub mod identify;
pub mod lazy;
pub mod matrix;
pub mod params;

pub use cache::{
    CacheCacher, Cacher, KeyedStore, MemoryScope, MemoryStore, RequestScope, SessionCacher,
};
pub use client::{FetchTimeout, ProctorClient};
pub use config::ProctorConfig;
pub use envelope::{IdentifyEnvelope, MatrixEnvelope, Payload, VersionToken};
pub use error::{CacheError, ClientError, ConfigError, ProctorError, UnknownTestError};
pub use groups::{extract_groups, GroupAssignment, ProctorGroups};
pub use identify::{identify_groups, identify_groups_lazy};
pub use lazy::LazyProctorGroups;
pub use matrix::{extract_tests, identify_matrix, TestMatrix};
pub use params::ProctorParameters;
