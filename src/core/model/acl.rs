// src/core/model/acl.rs

//! Replicated ACL entities: policies, roles, and tokens.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// The accessor id of the well-known anonymous token.
pub const ANONYMOUS_ACCESSOR_ID: &str = "anonymous";

/// Scopes a policy to a job (and optionally a group or task) so that signed
/// workload identities can pick it up without an explicit token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobScope {
    pub namespace: String,
    pub job_id: String,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub task: Option<String>,
}

impl JobScope {
    /// Whether this scope applies to the given claim coordinates under the
    /// specificity rule: a group-scoped policy applies only to that group,
    /// a task-scoped policy only to that task.
    pub fn matches(&self, namespace: &str, job_id: &str, group: &str, task: &str) -> bool {
        if self.namespace != namespace || self.job_id != job_id {
            return false;
        }
        if let Some(g) = &self.group {
            if g != group {
                return false;
            }
        }
        if let Some(t) = &self.task {
            if t != task {
                return false;
            }
        }
        true
    }
}

/// A named ACL policy holding policy-language source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AclPolicy {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// TOML policy source, compiled on resolution.
    pub rules: String,
    /// Content-derived hash, recomputed whenever rules or scope change.
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub job_scope: Option<JobScope>,
    #[serde(default)]
    pub create_index: u64,
    #[serde(default)]
    pub modify_index: u64,
}

impl AclPolicy {
    /// Recomputes the content hash over the name, rules, and scope.
    pub fn set_hash(&mut self) {
        let mut hasher = Sha256::new();
        hasher.update(self.name.as_bytes());
        hasher.update(self.rules.as_bytes());
        if let Some(scope) = &self.job_scope {
            hasher.update(scope.namespace.as_bytes());
            hasher.update(scope.job_id.as_bytes());
            if let Some(g) = &scope.group {
                hasher.update(g.as_bytes());
            }
            if let Some(t) = &scope.task {
                hasher.update(t.as_bytes());
            }
        }
        self.hash = hex::encode(hasher.finalize());
    }
}

/// A named set of policies that tokens can reference as one unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AclRole {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Sorted, deduplicated policy names.
    pub policies: Vec<String>,
    #[serde(default)]
    pub create_index: u64,
    #[serde(default)]
    pub modify_index: u64,
}

/// A reference from a token to a role, by id with a denormalized name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleLink {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// Token types. Management tokens are all-powerful and carry no policies.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Default,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TokenType {
    #[default]
    Client,
    Management,
}

/// An ACL token: the bearer credential presented on RPCs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AclToken {
    #[serde(default)]
    pub accessor_id: String,
    /// High-entropy bearer secret. Lookups go through a SHA-256 digest so
    /// raw secrets are never compared byte-by-byte.
    #[serde(default)]
    pub secret_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub token_type: TokenType,
    #[serde(default)]
    pub policies: Vec<String>,
    #[serde(default)]
    pub roles: Vec<RoleLink>,
    /// Global tokens replicate from the authoritative region.
    #[serde(default)]
    pub global: bool,
    #[serde(default)]
    pub create_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expiration_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub create_index: u64,
    #[serde(default)]
    pub modify_index: u64,
}

impl AclToken {
    /// A token with `expiration_time <= now` is semantically absent.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration_time.is_some_and(|exp| exp <= now)
    }

    pub fn is_management(&self) -> bool {
        self.token_type == TokenType::Management
    }

    /// Validates the invariants enforced at upsert time.
    pub fn validate(&self) -> Result<(), String> {
        if self.accessor_id.is_empty() || self.secret_id.is_empty() {
            return Err("token accessor and secret ids are required".to_string());
        }
        if self.is_management() && !(self.policies.is_empty() && self.roles.is_empty()) {
            return Err("management tokens cannot carry policies or roles".to_string());
        }
        if !self.is_management() && self.policies.is_empty() && self.roles.is_empty() {
            return Err("client tokens require at least one policy or role".to_string());
        }
        Ok(())
    }
}

/// Hashes a bearer secret for cache keys and secret-index lookups.
pub fn hash_secret(secret: &str) -> [u8; 32] {
    Sha256::digest(secret.as_bytes()).into()
}
