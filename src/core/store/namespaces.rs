// src/core/store/namespaces.rs

//! Namespace table. The `default` namespace is seeded at bootstrap and can
//! never be deleted; non-empty namespaces are protected too.

use super::{StateSnapshot, StateStore, TableId, WatchSet, WatchToken};
use crate::core::FlotillaError;
use crate::core::model::namespace::DEFAULT_NAMESPACE;
use crate::core::model::Namespace;
use std::sync::Arc;

impl StateStore {
    pub fn upsert_namespaces(
        &self,
        index: u64,
        namespaces: Vec<Namespace>,
    ) -> Result<(), FlotillaError> {
        self.write(|inner| {
            let mut keys = Vec::with_capacity(namespaces.len());
            for mut namespace in namespaces {
                namespace.validate().map_err(FlotillaError::InvalidRequest)?;
                if let Some(existing) = inner.namespaces.get(&namespace.name) {
                    namespace.create_index = existing.create_index;
                } else {
                    namespace.create_index = index;
                }
                namespace.modify_index = index;
                keys.push(namespace.name.clone());
                inner
                    .namespaces
                    .insert(namespace.name.clone(), Arc::new(namespace));
            }
            inner.bump(TableId::Namespaces, index);
            Ok(((), vec![(TableId::Namespaces, keys)]))
        })
    }

    pub fn delete_namespaces(&self, index: u64, names: &[String]) -> Result<(), FlotillaError> {
        self.write(|inner| {
            // Validate the whole batch before mutating anything.
            for name in names {
                if name == DEFAULT_NAMESPACE {
                    return Err(FlotillaError::InvalidRequest(
                        "default namespace can not be deleted".to_string(),
                    ));
                }
                if !inner.namespaces.contains_key(name) {
                    return Err(FlotillaError::NotFound(format!("namespace {name:?}")));
                }
                let occupied = inner.jobs.keys().any(|(ns, _)| ns == name);
                if occupied {
                    return Err(FlotillaError::InvalidRequest(format!(
                        "namespace {name:?} has existing jobs"
                    )));
                }
            }
            let mut removed = Vec::new();
            for name in names {
                inner.namespaces.remove(name);
                removed.push(name.clone());
            }
            inner.bump(TableId::Namespaces, index);
            Ok(((), vec![(TableId::Namespaces, removed)]))
        })
    }
}

impl<'a> StateSnapshot<'a> {
    pub fn namespace_by_name(
        &self,
        ws: Option<&mut WatchSet>,
        name: &str,
    ) -> Option<Arc<Namespace>> {
        self.maybe_arm(ws, WatchToken::Row(TableId::Namespaces, name.to_string()));
        self.inner.namespaces.get(name).cloned()
    }

    pub fn namespaces(&self, ws: Option<&mut WatchSet>) -> Vec<Arc<Namespace>> {
        self.maybe_arm(ws, WatchToken::Table(TableId::Namespaces));
        self.inner.namespaces.values().cloned().collect()
    }
}
