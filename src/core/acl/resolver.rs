// src/core/acl/resolver.rs

//! The caching ACL resolver: turns a presented credential (opaque secret or
//! signed workload identity) into a compiled `Acl`.
//!
//! Two LRU caches, keyed by the SHA-256 of the secret and of the identity
//! token. Each entry records the ACL-table index it was resolved at; a
//! lookup re-resolves whenever any ACL table has moved past that index, so
//! a policy, role, or token change at index `i` invalidates every entry
//! resolved before `i`.

use super::compiled::Acl;
use super::policy::PolicyDocument;
use crate::core::FlotillaError;
use crate::core::keyring::KeyManager;
use crate::core::model::acl::{ANONYMOUS_ACCESSOR_ID, hash_secret};
use crate::core::model::AclToken;
use crate::core::store::{StateSnapshot, StateStore};
use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::warn;

const TOKEN_CACHE_SIZE: usize = 512;
const CLAIMS_CACHE_SIZE: usize = 512;

#[derive(Clone)]
struct CachedAcl {
    acl: Arc<Acl>,
    /// The ACL-table high-water index at resolution time.
    acl_index: u64,
    /// Hard expiry inherited from the token or claims.
    expires_at: Option<DateTime<Utc>>,
}

pub struct AclResolver {
    store: Arc<StateStore>,
    key_manager: Arc<KeyManager>,
    /// The bootstrap leader secret; always resolves to management.
    leader_secret: String,
    token_cache: Mutex<LruCache<[u8; 32], CachedAcl>>,
    claims_cache: Mutex<LruCache<[u8; 32], CachedAcl>>,
}

impl AclResolver {
    pub fn new(store: Arc<StateStore>, key_manager: Arc<KeyManager>, leader_secret: String) -> Self {
        Self {
            store,
            key_manager,
            leader_secret,
            token_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(TOKEN_CACHE_SIZE).unwrap(),
            )),
            claims_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(CLAIMS_CACHE_SIZE).unwrap(),
            )),
        }
    }

    /// Resolves an opaque bearer secret.
    ///
    /// The empty secret is the anonymous identity; the leader-bootstrap
    /// secret is management; an expired token is treated as absent.
    pub fn resolve_token(&self, secret: &str) -> Result<Arc<Acl>, FlotillaError> {
        if !self.leader_secret.is_empty() && secret == self.leader_secret {
            return Ok(Acl::management());
        }
        if secret.is_empty() {
            return self.resolve_anonymous();
        }

        let now = Utc::now();
        let key = hash_secret(secret);
        let current_acl_index = self.store.acl_index();

        {
            let mut cache = self.token_cache.lock();
            if let Some(entry) = cache.get(&key) {
                if entry.expires_at.is_some_and(|exp| exp <= now) {
                    cache.pop(&key);
                    return Err(FlotillaError::TokenNotFound);
                }
                if entry.acl_index >= current_acl_index {
                    return Ok(entry.acl.clone());
                }
            }
        }

        let snapshot = self.store.snapshot();
        let Some(token) = snapshot.acl_token_by_secret(secret) else {
            self.token_cache.lock().pop(&key);
            return Err(FlotillaError::TokenNotFound);
        };
        if token.is_expired(now) {
            self.token_cache.lock().pop(&key);
            return Err(FlotillaError::TokenNotFound);
        }

        let acl = self.compile_token(&snapshot, &token)?;
        self.token_cache.lock().put(
            key,
            CachedAcl {
                acl: acl.clone(),
                acl_index: current_acl_index,
                expires_at: token.expiration_time,
            },
        );
        Ok(acl)
    }

    /// Resolves a signed workload identity: verify the signature, require a
    /// live allocation, then union every policy whose job scope matches the
    /// claim coordinates.
    pub fn resolve_claims(&self, token: &str) -> Result<Arc<Acl>, FlotillaError> {
        let now = Utc::now();
        let key = hash_secret(token);
        let current_acl_index = self.store.acl_index();

        {
            let mut cache = self.claims_cache.lock();
            if let Some(entry) = cache.get(&key) {
                if entry.expires_at.is_some_and(|exp| exp <= now) {
                    cache.pop(&key);
                    return Err(FlotillaError::TokenExpired);
                }
                if entry.acl_index >= current_acl_index {
                    return Ok(entry.acl.clone());
                }
            }
        }

        let claims = self.key_manager.verify_claims(token)?;
        if claims.is_expired(now.timestamp()) {
            self.claims_cache.lock().pop(&key);
            return Err(FlotillaError::TokenExpired);
        }

        let snapshot = self.store.snapshot();
        let Some(alloc) = snapshot.alloc_by_id(None, &claims.alloc_id) else {
            return Err(FlotillaError::NotFound(format!(
                "allocation {:?}",
                claims.alloc_id
            )));
        };
        if alloc.is_terminal() {
            return Err(FlotillaError::InvalidRequest(
                "allocation is terminal".to_string(),
            ));
        }

        let policies = snapshot.job_scoped_policies(
            &claims.namespace,
            &claims.job_id,
            &alloc.task_group,
            &claims.task,
        );
        let documents = parse_documents(policies.iter().map(|p| (&p.name, &p.rules)));
        let acl = Acl::compile(&documents);

        self.claims_cache.lock().put(
            key,
            CachedAcl {
                acl: acl.clone(),
                acl_index: current_acl_index,
                expires_at: claims
                    .expiry
                    .and_then(|e| DateTime::<Utc>::from_timestamp(e, 0)),
            },
        );
        Ok(acl)
    }

    /// Re-resolves a token by accessor id, bypassing the secret cache. The
    /// broker uses this to revalidate live subscriptions.
    pub fn resolve_accessor(&self, accessor: &str) -> Result<Arc<Acl>, FlotillaError> {
        let snapshot = self.store.snapshot();
        let Some(token) = snapshot.acl_token_by_accessor(None, accessor) else {
            return Err(FlotillaError::TokenNotFound);
        };
        if token.is_expired(Utc::now()) {
            return Err(FlotillaError::TokenExpired);
        }
        self.compile_token(&snapshot, &token)
    }

    /// Purges cache entries whose hard expiry has passed.
    pub fn purge_expired(&self) {
        let now = Utc::now();
        for cache in [&self.token_cache, &self.claims_cache] {
            let mut cache = cache.lock();
            let expired: Vec<[u8; 32]> = cache
                .iter()
                .filter(|(_, v)| v.expires_at.is_some_and(|exp| exp <= now))
                .map(|(k, _)| *k)
                .collect();
            for key in expired {
                cache.pop(&key);
            }
        }
    }

    fn resolve_anonymous(&self) -> Result<Arc<Acl>, FlotillaError> {
        let snapshot = self.store.snapshot();
        match snapshot.acl_token_by_accessor(None, ANONYMOUS_ACCESSOR_ID) {
            Some(token) if !token.is_expired(Utc::now()) => self.compile_token(&snapshot, &token),
            _ => Ok(Acl::deny_all()),
        }
    }

    fn compile_token(
        &self,
        snapshot: &StateSnapshot<'_>,
        token: &AclToken,
    ) -> Result<Arc<Acl>, FlotillaError> {
        if token.is_management() {
            return Ok(Acl::management());
        }

        // token.policies plus the flattened policies of every role.
        let mut names: Vec<String> = token.policies.clone();
        for link in &token.roles {
            let role = snapshot
                .acl_role_by_id(None, &link.id)
                .or_else(|| snapshot.acl_role_by_name(&link.name));
            match role {
                Some(role) => names.extend(role.policies.iter().cloned()),
                None => warn!(role = %link.id, "token references unknown role"),
            }
        }
        names.sort();
        names.dedup();

        let mut sources = Vec::with_capacity(names.len());
        for name in &names {
            match snapshot.acl_policy_by_name(None, name) {
                Some(policy) => sources.push(policy),
                None => warn!(policy = %name, "token references unknown policy"),
            }
        }
        let documents = parse_documents(sources.iter().map(|p| (&p.name, &p.rules)));
        Ok(Acl::compile(&documents))
    }
}

/// Parses policy sources, skipping (with a warning) any that fail to parse;
/// a bad policy must not lock out the rest of a token's grants.
fn parse_documents<'a>(
    sources: impl Iterator<Item = (&'a String, &'a String)>,
) -> Vec<PolicyDocument> {
    let mut documents = Vec::new();
    for (name, rules) in sources {
        match PolicyDocument::parse(rules) {
            Ok(doc) => documents.push(doc),
            Err(e) => warn!(policy = %name, "skipping unparseable policy: {e}"),
        }
    }
    documents
}

impl std::fmt::Debug for AclResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AclResolver")
            .field("token_cache_len", &self.token_cache.lock().len())
            .field("claims_cache_len", &self.claims_cache.lock().len())
            .finish()
    }
}
