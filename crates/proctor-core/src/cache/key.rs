//! Cache key derivation.

use sha2::{Digest, Sha256};

use crate::params::ProctorParameters;

/// Derive the assignment cache key for a parameter set.
///
/// A pure function of the identifier mapping alone, iterated in sorted
/// order. Context and override fields are deliberately excluded so they do
/// not fragment the key address space; their divergence is caught by the
/// stored-parameter comparison at read time instead.
pub fn assignment_key(params: &ProctorParameters) -> String {
    let mut h = Sha256::new();
    for (name, value) in &params.identifiers {
        h.update(name.as_bytes());
        h.update(b"=");
        h.update(value.as_bytes());
        h.update(b"\n");
    }
    format!("{:x}", h.finalize())
}
