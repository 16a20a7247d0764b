// src/core/store/deployments.rs

//! Deployment table, including the composite appliers that update a
//! deployment together with a reverted job and a watcher evaluation in one
//! atomic write.

use super::jobs::job_row_key;
use super::{StateSnapshot, StateStore, StoreInner, TableId, WatchSet, WatchToken};
use crate::core::FlotillaError;
use crate::core::model::{
    AllocDeploymentStatus, Deployment, DeploymentStatus, Evaluation, Job,
};
use std::sync::Arc;

impl StoreInner {
    pub(super) fn insert_deployment_locked(&mut self, index: u64, mut deployment: Deployment) {
        if let Some(existing) = self.deployments.get(&deployment.id) {
            deployment.create_index = existing.create_index;
        } else {
            deployment.create_index = index;
        }
        deployment.modify_index = index;
        self.deployments_by_job
            .entry((deployment.namespace.clone(), deployment.job_id.clone()))
            .or_default()
            .insert(deployment.id.clone());
        self.deployments
            .insert(deployment.id.clone(), Arc::new(deployment));
        self.bump(TableId::Deployments, index);
    }

    /// Applies the optional side effects of a deployment transition: a
    /// reverted job and a deployment-watcher evaluation.
    fn apply_deployment_side_effects(
        &mut self,
        index: u64,
        revert_job: Option<Job>,
        eval: Option<Evaluation>,
        wakes: &mut Vec<(TableId, Vec<String>)>,
    ) {
        if let Some(job) = revert_job {
            let row = job_row_key(&job.namespace, &job.id);
            self.insert_job_locked(index, job);
            wakes.push((TableId::Jobs, vec![row.clone()]));
            wakes.push((TableId::JobVersions, vec![row]));
        }
        if let Some(eval) = eval {
            let id = eval.id.clone();
            self.insert_eval_locked(index, eval);
            wakes.push((TableId::Evaluations, vec![id]));
        }
    }
}

impl StateStore {
    pub fn upsert_deployment(
        &self,
        index: u64,
        deployment: Deployment,
    ) -> Result<(), FlotillaError> {
        self.write(|inner| {
            if deployment.id.is_empty() || deployment.job_id.is_empty() {
                return Err(FlotillaError::InvalidRequest(
                    "deployment id and job id are required".to_string(),
                ));
            }
            let id = deployment.id.clone();
            inner.insert_deployment_locked(index, deployment);
            Ok(((), vec![(TableId::Deployments, vec![id])]))
        })
    }

    /// Transitions a deployment's status, atomically applying an attached
    /// reverted job and watcher evaluation when present.
    pub fn update_deployment_status(
        &self,
        index: u64,
        deployment_id: &str,
        status: DeploymentStatus,
        description: String,
        revert_job: Option<Job>,
        eval: Option<Evaluation>,
    ) -> Result<(), FlotillaError> {
        self.write(|inner| {
            let Some(existing) = inner.deployments.get(deployment_id).cloned() else {
                return Err(FlotillaError::NotFound(format!(
                    "deployment {deployment_id:?}"
                )));
            };
            if existing.status.is_terminal() {
                return Err(FlotillaError::InvalidRequest(format!(
                    "can't update terminal deployment ({})",
                    existing.status
                )));
            }
            let mut updated = (*existing).clone();
            updated.status = status;
            updated.status_description = description;
            updated.modify_index = index;
            inner
                .deployments
                .insert(deployment_id.to_string(), Arc::new(updated));
            inner.bump(TableId::Deployments, index);

            let mut wakes = vec![(TableId::Deployments, vec![deployment_id.to_string()])];
            inner.apply_deployment_side_effects(index, revert_job, eval, &mut wakes);
            Ok(((), wakes))
        })
    }

    /// Promotes canaries for the named groups (all groups when empty).
    pub fn promote_deployment(
        &self,
        index: u64,
        deployment_id: &str,
        groups: &[String],
        eval: Option<Evaluation>,
    ) -> Result<(), FlotillaError> {
        self.write(|inner| {
            let Some(existing) = inner.deployments.get(deployment_id).cloned() else {
                return Err(FlotillaError::NotFound(format!(
                    "deployment {deployment_id:?}"
                )));
            };
            if existing.status.is_terminal() {
                return Err(FlotillaError::InvalidRequest(format!(
                    "can't promote terminal deployment ({})",
                    existing.status
                )));
            }
            let mut updated = (*existing).clone();
            let mut promoted_any = false;
            for (name, group) in updated.task_groups.iter_mut() {
                if !groups.is_empty() && !groups.contains(name) {
                    continue;
                }
                if group.desired_canaries > 0 && !group.promoted {
                    // Canaries must be healthy before promotion.
                    if (group.healthy_allocs as usize) < group.placed_canaries.len() {
                        return Err(FlotillaError::InvalidRequest(format!(
                            "group {name:?} has unhealthy canaries"
                        )));
                    }
                    group.promoted = true;
                    promoted_any = true;
                }
            }
            if !promoted_any {
                return Err(FlotillaError::InvalidRequest(
                    "no canaries to promote".to_string(),
                ));
            }
            updated.status_description =
                crate::core::model::deployment::DESC_PROMOTED.to_string();
            updated.modify_index = index;
            inner
                .deployments
                .insert(deployment_id.to_string(), Arc::new(updated));
            inner.bump(TableId::Deployments, index);

            let mut wakes = vec![(TableId::Deployments, vec![deployment_id.to_string()])];
            inner.apply_deployment_side_effects(index, None, eval, &mut wakes);
            Ok(((), wakes))
        })
    }

    /// Records alloc health verdicts for a deployment, optionally failing
    /// the deployment and reverting the job in the same write.
    #[allow(clippy::too_many_arguments)]
    pub fn set_alloc_health(
        &self,
        index: u64,
        deployment_id: &str,
        healthy: &[String],
        unhealthy: &[String],
        status_update: Option<(DeploymentStatus, String)>,
        revert_job: Option<Job>,
        eval: Option<Evaluation>,
    ) -> Result<(), FlotillaError> {
        self.write(|inner| {
            let Some(existing) = inner.deployments.get(deployment_id).cloned() else {
                return Err(FlotillaError::NotFound(format!(
                    "deployment {deployment_id:?}"
                )));
            };
            if existing.status.is_terminal() {
                return Err(FlotillaError::InvalidRequest(format!(
                    "can't set health on terminal deployment ({})",
                    existing.status
                )));
            }

            let timestamp = chrono::Utc::now().timestamp();
            let mut updated = (*existing).clone();
            let mut alloc_keys = Vec::new();

            for (ids, verdict) in [(healthy, true), (unhealthy, false)] {
                for alloc_id in ids {
                    let Some(alloc) = inner.allocs.get(alloc_id).cloned() else {
                        return Err(FlotillaError::NotFound(format!("allocation {alloc_id:?}")));
                    };
                    if alloc.deployment_id.as_deref() != Some(deployment_id) {
                        return Err(FlotillaError::InvalidRequest(format!(
                            "allocation {alloc_id:?} is not part of deployment {deployment_id:?}"
                        )));
                    }
                    let previously = alloc
                        .deployment_status
                        .as_ref()
                        .and_then(|ds| ds.healthy);
                    let mut changed = (*alloc).clone();
                    changed.deployment_status = Some(AllocDeploymentStatus {
                        healthy: Some(verdict),
                        timestamp,
                    });
                    changed.modify_index = index;
                    alloc_keys.push(alloc_id.clone());

                    // Group counters move only on a verdict transition.
                    if previously != Some(verdict)
                        && let Some(group) = updated.task_groups.get_mut(&changed.task_group)
                    {
                        if verdict {
                            group.healthy_allocs += 1;
                            if previously == Some(false) {
                                group.unhealthy_allocs =
                                    group.unhealthy_allocs.saturating_sub(1);
                            }
                        } else {
                            group.unhealthy_allocs += 1;
                            if previously == Some(true) {
                                group.healthy_allocs = group.healthy_allocs.saturating_sub(1);
                            }
                        }
                    }
                    inner.allocs.insert(alloc_id.clone(), Arc::new(changed));
                }
            }
            inner.bump(TableId::Allocations, index);

            if let Some((status, description)) = status_update {
                updated.status = status;
                updated.status_description = description;
            }
            updated.modify_index = index;
            inner
                .deployments
                .insert(deployment_id.to_string(), Arc::new(updated));
            inner.bump(TableId::Deployments, index);

            let mut wakes = vec![
                (TableId::Deployments, vec![deployment_id.to_string()]),
                (TableId::Allocations, alloc_keys),
            ];
            inner.apply_deployment_side_effects(index, revert_job, eval, &mut wakes);
            Ok(((), wakes))
        })
    }

    /// Removes deployments outright (the `Reap` path and GC).
    pub fn delete_deployments(&self, index: u64, ids: &[String]) -> Result<usize, FlotillaError> {
        self.write(|inner| {
            let mut removed = Vec::new();
            for id in ids {
                let Some(deployment) = inner.deployments.remove(id) else {
                    continue;
                };
                removed.push(id.clone());
                if let Some(set) = inner
                    .deployments_by_job
                    .get_mut(&(deployment.namespace.clone(), deployment.job_id.clone()))
                {
                    set.remove(id);
                }
                inner.allocs_by_deployment.remove(id);
            }
            let count = removed.len();
            if count > 0 {
                inner.bump(TableId::Deployments, index);
            }
            Ok((count, vec![(TableId::Deployments, removed)]))
        })
    }
}

impl<'a> StateSnapshot<'a> {
    pub fn deployment_by_id(
        &self,
        ws: Option<&mut WatchSet>,
        id: &str,
    ) -> Option<Arc<Deployment>> {
        self.maybe_arm(ws, WatchToken::Row(TableId::Deployments, id.to_string()));
        self.inner.deployments.get(id).cloned()
    }

    /// Deployment lookup by unique id prefix, the CLI-friendly form.
    pub fn deployment_by_id_prefix(
        &self,
        ws: Option<&mut WatchSet>,
        prefix: &str,
    ) -> Result<Option<Arc<Deployment>>, FlotillaError> {
        self.maybe_arm(ws, WatchToken::Prefix(TableId::Deployments, prefix.to_string()));
        let mut matches = self
            .inner
            .deployments
            .range(prefix.to_string()..)
            .take_while(|(id, _)| id.starts_with(prefix));
        match (matches.next(), matches.next()) {
            (None, _) => Ok(None),
            (Some((_, d)), None) => Ok(Some(d.clone())),
            (Some(_), Some(_)) => Err(FlotillaError::InvalidRequest(format!(
                "deployment id prefix {prefix:?} is ambiguous"
            ))),
        }
    }

    pub fn deployments_by_namespace(
        &self,
        ws: Option<&mut WatchSet>,
        namespace: &str,
    ) -> Vec<Arc<Deployment>> {
        self.maybe_arm(ws, WatchToken::Table(TableId::Deployments));
        self.inner
            .deployments
            .values()
            .filter(|d| d.namespace == namespace)
            .cloned()
            .collect()
    }

    pub fn all_deployments(&self, ws: Option<&mut WatchSet>) -> Vec<Arc<Deployment>> {
        self.maybe_arm(ws, WatchToken::Table(TableId::Deployments));
        self.inner.deployments.values().cloned().collect()
    }

    pub fn deployments_by_job(
        &self,
        ws: Option<&mut WatchSet>,
        namespace: &str,
        job_id: &str,
    ) -> Vec<Arc<Deployment>> {
        self.maybe_arm(
            ws,
            WatchToken::Prefix(TableId::Deployments, job_row_key(namespace, job_id)),
        );
        self.inner
            .deployments_by_job
            .get(&(namespace.to_string(), job_id.to_string()))
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.inner.deployments.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }
}
