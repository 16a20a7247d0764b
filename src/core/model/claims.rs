// src/core/model/claims.rs

//! Claims carried by a signed workload identity.

use serde::{Deserialize, Serialize};

/// An allocation-scoped bearer claim, signed by the key manager. Equivalent
/// to a token whose permissions are the union of job-scoped policies
/// matching (namespace, job, group, task).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct IdentityClaims {
    pub namespace: String,
    pub job_id: String,
    pub alloc_id: String,
    pub task: String,
    /// Unix seconds. None means non-expiring.
    #[serde(default)]
    pub expiry: Option<i64>,
    #[serde(default)]
    pub issued_at: i64,
}

impl IdentityClaims {
    pub fn is_expired(&self, now_unix: i64) -> bool {
        self.expiry.is_some_and(|exp| exp <= now_unix)
    }
}

/// The header of the compact signed-identity wire form, naming the key that
/// signed the claims.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ClaimsHeader {
    pub key_id: String,
    #[serde(default)]
    pub algorithm: String,
}
