// src/core/store/services.rs

//! Service-registration table. The compound primary key
//! (namespace, service name, id) doubles as the by-name range index.

use super::{StateSnapshot, StateStore, TableId, WatchSet, WatchToken};
use crate::core::FlotillaError;
use crate::core::model::ServiceRegistration;
use std::sync::Arc;

impl StateStore {
    pub fn upsert_service_registrations(
        &self,
        index: u64,
        services: Vec<ServiceRegistration>,
    ) -> Result<(), FlotillaError> {
        self.write(|inner| {
            let mut keys = Vec::with_capacity(services.len());
            for mut service in services {
                service.validate().map_err(FlotillaError::InvalidRequest)?;
                let key = (
                    service.namespace.clone(),
                    service.service_name.clone(),
                    service.id.clone(),
                );
                // A re-registration may move an id across names; drop the
                // old row first so the id stays unique.
                if let Some(old_key) = inner.services_by_id.get(&service.id).cloned()
                    && old_key != key
                {
                    inner.services.remove(&old_key);
                    if let Some(list) = inner.services_by_alloc.get_mut(&service.alloc_id) {
                        list.retain(|k| k != &old_key);
                    }
                }
                if let Some(existing) = inner.services.get(&key) {
                    service.create_index = existing.create_index;
                } else {
                    service.create_index = index;
                }
                service.modify_index = index;
                keys.push(service_row_key(&key));
                inner.services_by_id.insert(service.id.clone(), key.clone());
                if !service.alloc_id.is_empty() {
                    let list = inner
                        .services_by_alloc
                        .entry(service.alloc_id.clone())
                        .or_default();
                    if !list.contains(&key) {
                        list.push(key.clone());
                    }
                }
                inner.services.insert(key, Arc::new(service));
            }
            inner.bump(TableId::Services, index);
            Ok(((), vec![(TableId::Services, keys)]))
        })
    }

    pub fn delete_service_registration(
        &self,
        index: u64,
        namespace: &str,
        id: &str,
    ) -> Result<(), FlotillaError> {
        self.write(|inner| {
            let Some(key) = inner.services_by_id.get(id).cloned() else {
                return Err(FlotillaError::NotFound(format!(
                    "service registration {id:?}"
                )));
            };
            if key.0 != namespace {
                return Err(FlotillaError::NotFound(format!(
                    "service registration {id:?}"
                )));
            }
            let Some(service) = inner.services.remove(&key) else {
                return Err(FlotillaError::NotFound(format!(
                    "service registration {id:?}"
                )));
            };
            inner.services_by_id.remove(id);
            if let Some(list) = inner.services_by_alloc.get_mut(&service.alloc_id) {
                list.retain(|k| k != &key);
            }
            inner.bump(TableId::Services, index);
            Ok(((), vec![(TableId::Services, vec![service_row_key(&key)])]))
        })
    }
}

/// The row-token key for a service registration.
fn service_row_key(key: &(String, String, String)) -> String {
    format!("{}/{}/{}", key.0, key.1, key.2)
}

impl<'a> StateSnapshot<'a> {
    /// All instances registered under one service name.
    pub fn service_registrations_by_name(
        &self,
        ws: Option<&mut WatchSet>,
        namespace: &str,
        service_name: &str,
    ) -> Vec<Arc<ServiceRegistration>> {
        self.maybe_arm(
            ws,
            WatchToken::Prefix(TableId::Services, format!("{namespace}/{service_name}/")),
        );
        let from = (
            namespace.to_string(),
            service_name.to_string(),
            String::new(),
        );
        self.inner
            .services
            .range(from..)
            .take_while(|((ns, name, _), _)| ns == namespace && name == service_name)
            .map(|(_, s)| s.clone())
            .collect()
    }

    /// Every registration in a namespace, ordered by service name.
    pub fn service_registrations_by_namespace(
        &self,
        ws: Option<&mut WatchSet>,
        namespace: &str,
    ) -> Vec<Arc<ServiceRegistration>> {
        self.maybe_arm(
            ws,
            WatchToken::Prefix(TableId::Services, format!("{namespace}/")),
        );
        let from = (namespace.to_string(), String::new(), String::new());
        self.inner
            .services
            .range(from..)
            .take_while(|((ns, _, _), _)| ns == namespace)
            .map(|(_, s)| s.clone())
            .collect()
    }

    pub fn service_registration_by_id(
        &self,
        namespace: &str,
        id: &str,
    ) -> Option<Arc<ServiceRegistration>> {
        let key = self.inner.services_by_id.get(id)?;
        if key.0 != namespace {
            return None;
        }
        self.inner.services.get(key).cloned()
    }
}
