// src/core/store/acl.rs

//! ACL tables: policies, roles, tokens, and the secret-hash index.

use super::{StateSnapshot, StateStore, TableId, WatchSet, WatchToken};
use crate::core::FlotillaError;
use crate::core::model::acl::hash_secret;
use crate::core::model::{AclPolicy, AclRole, AclToken};
use chrono::{DateTime, Utc};
use std::sync::Arc;

impl StateStore {
    pub fn upsert_acl_policies(
        &self,
        index: u64,
        policies: Vec<AclPolicy>,
    ) -> Result<(), FlotillaError> {
        self.write(|inner| {
            let mut keys = Vec::with_capacity(policies.len());
            for mut policy in policies {
                if policy.name.is_empty() {
                    return Err(FlotillaError::InvalidRequest(
                        "policy name is required".to_string(),
                    ));
                }
                policy.set_hash();
                if let Some(existing) = inner.acl_policies.get(&policy.name) {
                    policy.create_index = existing.create_index;
                } else {
                    policy.create_index = index;
                }
                policy.modify_index = index;
                keys.push(policy.name.clone());
                inner.acl_policies.insert(policy.name.clone(), Arc::new(policy));
            }
            inner.bump(TableId::AclPolicies, index);
            Ok(((), vec![(TableId::AclPolicies, keys)]))
        })
    }

    pub fn delete_acl_policies(&self, index: u64, names: &[String]) -> Result<(), FlotillaError> {
        self.write(|inner| {
            let mut removed = Vec::new();
            for name in names {
                if inner.acl_policies.remove(name).is_some() {
                    removed.push(name.clone());
                }
            }
            if !removed.is_empty() {
                inner.bump(TableId::AclPolicies, index);
            }
            Ok(((), vec![(TableId::AclPolicies, removed)]))
        })
    }

    /// Upserts roles. Every referenced policy must exist.
    pub fn upsert_acl_roles(&self, index: u64, roles: Vec<AclRole>) -> Result<(), FlotillaError> {
        self.write(|inner| {
            let mut keys = Vec::with_capacity(roles.len());
            for mut role in roles {
                if role.id.is_empty() || role.name.is_empty() {
                    return Err(FlotillaError::InvalidRequest(
                        "role id and name are required".to_string(),
                    ));
                }
                for policy in &role.policies {
                    if !inner.acl_policies.contains_key(policy) {
                        return Err(FlotillaError::InvalidRequest(format!(
                            "role {:?} references unknown policy {policy:?}",
                            role.name
                        )));
                    }
                }
                if let Some(owner) = inner.acl_roles_by_name.get(&role.name)
                    && owner != &role.id
                {
                    return Err(FlotillaError::InvalidRequest(format!(
                        "role name {:?} already in use",
                        role.name
                    )));
                }
                role.policies.sort();
                role.policies.dedup();
                if let Some(existing) = inner.acl_roles.get(&role.id) {
                    role.create_index = existing.create_index;
                    // Release a renamed role's old name.
                    if existing.name != role.name {
                        inner.acl_roles_by_name.remove(&existing.name);
                    }
                } else {
                    role.create_index = index;
                }
                role.modify_index = index;
                keys.push(role.id.clone());
                inner
                    .acl_roles_by_name
                    .insert(role.name.clone(), role.id.clone());
                inner.acl_roles.insert(role.id.clone(), Arc::new(role));
            }
            inner.bump(TableId::AclRoles, index);
            Ok(((), vec![(TableId::AclRoles, keys)]))
        })
    }

    pub fn upsert_acl_tokens(&self, index: u64, tokens: Vec<AclToken>) -> Result<(), FlotillaError> {
        self.write(|inner| {
            let mut keys = Vec::with_capacity(tokens.len());
            for mut token in tokens {
                token.validate().map_err(FlotillaError::InvalidRequest)?;
                if let Some(existing) = inner.acl_tokens.get(&token.accessor_id) {
                    token.create_index = existing.create_index;
                    // The secret is immutable for a given accessor.
                    if existing.secret_id != token.secret_id {
                        return Err(FlotillaError::InvalidRequest(
                            "cannot change the secret id of an existing token".to_string(),
                        ));
                    }
                } else {
                    token.create_index = index;
                    if token.create_time.is_none() {
                        token.create_time = Some(Utc::now());
                    }
                }
                token.modify_index = index;
                keys.push(token.accessor_id.clone());
                inner
                    .acl_tokens_by_secret
                    .insert(hash_secret(&token.secret_id), token.accessor_id.clone());
                inner
                    .acl_tokens
                    .insert(token.accessor_id.clone(), Arc::new(token));
            }
            inner.bump(TableId::AclTokens, index);
            Ok(((), vec![(TableId::AclTokens, keys)]))
        })
    }

    pub fn delete_acl_tokens(&self, index: u64, accessors: &[String]) -> Result<(), FlotillaError> {
        self.write(|inner| {
            let mut removed = Vec::new();
            for accessor in accessors {
                if let Some(token) = inner.acl_tokens.remove(accessor) {
                    inner.acl_tokens_by_secret.remove(&hash_secret(&token.secret_id));
                    removed.push(accessor.clone());
                }
            }
            if !removed.is_empty() {
                inner.bump(TableId::AclTokens, index);
            }
            Ok(((), vec![(TableId::AclTokens, removed)]))
        })
    }
}

impl<'a> StateSnapshot<'a> {
    pub fn acl_policy_by_name(
        &self,
        ws: Option<&mut WatchSet>,
        name: &str,
    ) -> Option<Arc<AclPolicy>> {
        self.maybe_arm(ws, WatchToken::Row(TableId::AclPolicies, name.to_string()));
        self.inner.acl_policies.get(name).cloned()
    }

    pub fn acl_policies(&self, ws: Option<&mut WatchSet>) -> Vec<Arc<AclPolicy>> {
        self.maybe_arm(ws, WatchToken::Table(TableId::AclPolicies));
        self.inner.acl_policies.values().cloned().collect()
    }

    /// Every policy whose job scope matches the claim coordinates.
    pub fn job_scoped_policies(
        &self,
        namespace: &str,
        job_id: &str,
        group: &str,
        task: &str,
    ) -> Vec<Arc<AclPolicy>> {
        self.inner
            .acl_policies
            .values()
            .filter(|p| {
                p.job_scope
                    .as_ref()
                    .is_some_and(|s| s.matches(namespace, job_id, group, task))
            })
            .cloned()
            .collect()
    }

    pub fn acl_role_by_id(&self, ws: Option<&mut WatchSet>, id: &str) -> Option<Arc<AclRole>> {
        self.maybe_arm(ws, WatchToken::Row(TableId::AclRoles, id.to_string()));
        self.inner.acl_roles.get(id).cloned()
    }

    pub fn acl_role_by_name(&self, name: &str) -> Option<Arc<AclRole>> {
        let id = self.inner.acl_roles_by_name.get(name)?;
        self.inner.acl_roles.get(id).cloned()
    }

    pub fn acl_roles(&self, ws: Option<&mut WatchSet>) -> Vec<Arc<AclRole>> {
        self.maybe_arm(ws, WatchToken::Table(TableId::AclRoles));
        self.inner.acl_roles.values().cloned().collect()
    }

    pub fn acl_token_by_accessor(
        &self,
        ws: Option<&mut WatchSet>,
        accessor: &str,
    ) -> Option<Arc<AclToken>> {
        self.maybe_arm(ws, WatchToken::Row(TableId::AclTokens, accessor.to_string()));
        self.inner.acl_tokens.get(accessor).cloned()
    }

    /// Token lookup by secret. Secrets index through their SHA-256 digest so
    /// no raw-secret comparison happens on the lookup path.
    pub fn acl_token_by_secret(&self, secret: &str) -> Option<Arc<AclToken>> {
        let accessor = self.inner.acl_tokens_by_secret.get(&hash_secret(secret))?;
        self.inner.acl_tokens.get(accessor).cloned()
    }

    pub fn acl_tokens(&self, ws: Option<&mut WatchSet>) -> Vec<Arc<AclToken>> {
        self.maybe_arm(ws, WatchToken::Table(TableId::AclTokens));
        self.inner.acl_tokens.values().cloned().collect()
    }

    /// Accessor ids of tokens already expired at `now`.
    pub fn expired_acl_tokens(&self, now: DateTime<Utc>) -> Vec<Arc<AclToken>> {
        self.inner
            .acl_tokens
            .values()
            .filter(|t| t.is_expired(now))
            .cloned()
            .collect()
    }
}
