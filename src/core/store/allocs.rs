// src/core/store/allocs.rs

//! Allocation table and its secondary indexes (by job, deployment, node).

use super::jobs::job_row_key;
use super::{StateSnapshot, StateStore, StoreInner, TableId, WatchSet, WatchToken};
use crate::core::FlotillaError;
use crate::core::model::{Allocation, TaskGroupHostVolumeClaim, generate_id};
use std::sync::Arc;

impl StoreInner {
    /// Inserts or merges one allocation, keeping every secondary index in
    /// lockstep. An existing row keeps its create index; empty incoming
    /// client fields do not clobber previously reported state.
    pub(super) fn insert_alloc_locked(&mut self, index: u64, mut alloc: Allocation) {
        if let Some(existing) = self.allocs.get(&alloc.id) {
            alloc.create_index = existing.create_index;
            if alloc.client_status.is_empty() {
                alloc.client_status = existing.client_status.clone();
            }
            if alloc.desired_status.is_empty() {
                alloc.desired_status = existing.desired_status.clone();
            }
            if alloc.deployment_status.is_none() {
                alloc.deployment_status = existing.deployment_status.clone();
            }
        } else {
            alloc.create_index = index;
        }
        alloc.modify_index = index;

        let job_key = (alloc.namespace.clone(), alloc.job_id.clone());
        self.allocs_by_job
            .entry(job_key)
            .or_default()
            .insert(alloc.id.clone());
        if let Some(deployment_id) = &alloc.deployment_id {
            self.allocs_by_deployment
                .entry(deployment_id.clone())
                .or_default()
                .insert(alloc.id.clone());
        }
        if !alloc.node_id.is_empty() {
            self.allocs_by_node
                .entry(alloc.node_id.clone())
                .or_default()
                .insert(alloc.id.clone());
        }
        self.allocs.insert(alloc.id.clone(), Arc::new(alloc));
        self.bump(TableId::Allocations, index);
    }
}

impl StateStore {
    /// Upserts a batch of allocations. Sticky volume requests on the
    /// allocation's task group record a host-volume claim the first time the
    /// group lands on a volume.
    pub fn upsert_allocs(&self, index: u64, allocs: Vec<Allocation>) -> Result<(), FlotillaError> {
        self.write(|inner| {
            let mut alloc_keys = Vec::with_capacity(allocs.len());
            let mut claim_keys = Vec::new();

            for alloc in allocs {
                if alloc.id.is_empty() || alloc.job_id.is_empty() {
                    return Err(FlotillaError::InvalidRequest(
                        "allocation id and job id are required".to_string(),
                    ));
                }
                alloc_keys.push(alloc.id.clone());

                // Record sticky volume claims for the group being placed.
                let job_key = (alloc.namespace.clone(), alloc.job_id.clone());
                if let Some(job) = inner.jobs.get(&job_key).cloned()
                    && let Some(group) = job.task_group(&alloc.task_group)
                {
                    for (volume_name, request) in &group.volumes {
                        if !request.sticky {
                            continue;
                        }
                        let claim_key = (
                            alloc.namespace.clone(),
                            alloc.job_id.clone(),
                            alloc.task_group.clone(),
                            volume_name.clone(),
                        );
                        if inner.volume_claims.contains_key(&claim_key) {
                            continue;
                        }
                        let claim = TaskGroupHostVolumeClaim {
                            id: generate_id(),
                            namespace: alloc.namespace.clone(),
                            job_id: alloc.job_id.clone(),
                            task_group_name: alloc.task_group.clone(),
                            volume_id: format!("{}@{}", request.source, alloc.node_id),
                            volume_name: volume_name.clone(),
                            create_index: index,
                            modify_index: index,
                        };
                        inner
                            .volume_claims_by_id
                            .insert(claim.id.clone(), claim_key.clone());
                        inner.volume_claims.insert(claim_key.clone(), Arc::new(claim));
                        claim_keys.push(claim_key.3.clone());
                    }
                }

                inner.insert_alloc_locked(index, alloc);
            }

            if !claim_keys.is_empty() {
                inner.bump(TableId::VolumeClaims, index);
            }
            let mut wakes = vec![(TableId::Allocations, alloc_keys)];
            if !claim_keys.is_empty() {
                wakes.push((TableId::VolumeClaims, claim_keys));
            }
            Ok(((), wakes))
        })
    }

    /// Deletes allocations outright; only the GC path uses this.
    pub fn delete_allocs(&self, index: u64, ids: &[String]) -> Result<(), FlotillaError> {
        self.write(|inner| {
            let mut removed = Vec::new();
            for id in ids {
                let Some(alloc) = inner.allocs.remove(id) else {
                    continue;
                };
                removed.push(id.clone());
                let job_key = (alloc.namespace.clone(), alloc.job_id.clone());
                if let Some(set) = inner.allocs_by_job.get_mut(&job_key) {
                    set.remove(id);
                }
                if let Some(dep) = &alloc.deployment_id
                    && let Some(set) = inner.allocs_by_deployment.get_mut(dep)
                {
                    set.remove(id);
                }
                if let Some(set) = inner.allocs_by_node.get_mut(&alloc.node_id) {
                    set.remove(id);
                }
            }
            if !removed.is_empty() {
                inner.bump(TableId::Allocations, index);
            }
            Ok(((), vec![(TableId::Allocations, removed)]))
        })
    }
}

impl<'a> StateSnapshot<'a> {
    pub fn alloc_by_id(&self, ws: Option<&mut WatchSet>, id: &str) -> Option<Arc<Allocation>> {
        self.maybe_arm(ws, WatchToken::Row(TableId::Allocations, id.to_string()));
        self.inner.allocs.get(id).cloned()
    }

    pub fn allocs_by_deployment(
        &self,
        ws: Option<&mut WatchSet>,
        deployment_id: &str,
    ) -> Vec<Arc<Allocation>> {
        self.maybe_arm(ws, WatchToken::Table(TableId::Allocations));
        self.inner
            .allocs_by_deployment
            .get(deployment_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.inner.allocs.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn allocs_by_job(
        &self,
        ws: Option<&mut WatchSet>,
        namespace: &str,
        job_id: &str,
    ) -> Vec<Arc<Allocation>> {
        self.maybe_arm(
            ws,
            WatchToken::Prefix(TableId::Allocations, job_row_key(namespace, job_id)),
        );
        self.inner
            .allocs_by_job
            .get(&(namespace.to_string(), job_id.to_string()))
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.inner.allocs.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn allocs_by_node(&self, ws: Option<&mut WatchSet>, node_id: &str) -> Vec<Arc<Allocation>> {
        self.maybe_arm(ws, WatchToken::Table(TableId::Allocations));
        self.inner
            .allocs_by_node
            .get(node_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.inner.allocs.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn all_allocs(&self, ws: Option<&mut WatchSet>) -> Vec<Arc<Allocation>> {
        self.maybe_arm(ws, WatchToken::Table(TableId::Allocations));
        self.inner.allocs.values().cloned().collect()
    }
}
