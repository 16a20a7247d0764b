// src/core/store/jobs.rs

//! Job table: registration with version history, deregistration, queries.

use super::{MAX_JOB_VERSIONS, StateSnapshot, StateStore, StoreInner, TableId, WatchSet, WatchToken};
use crate::core::FlotillaError;
use crate::core::model::{Job, JobStatus};
use std::sync::Arc;

impl StoreInner {
    /// Inserts a job, pushing the previous row into the version history and
    /// bumping the version counter. Shared by the register applier and the
    /// deployment auto-revert path, which must run inside one write.
    ///
    /// Returns the version assigned to the inserted job.
    pub(super) fn insert_job_locked(&mut self, index: u64, mut job: Job) -> u64 {
        let key = (job.namespace.clone(), job.id.clone());

        match self.jobs.get(&key) {
            Some(existing) => {
                job.version = existing.version + 1;
                job.create_index = existing.create_index;
                let versions = self.job_versions.entry(key.clone()).or_default();
                versions.insert(0, existing.clone());
                versions.truncate(MAX_JOB_VERSIONS);
            }
            None => {
                job.version = 0;
                job.create_index = index;
            }
        }
        job.modify_index = index;
        if job.submit_time == 0 {
            job.submit_time = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
        }

        let version = job.version;
        self.jobs.insert(key, Arc::new(job));
        self.bump(TableId::Jobs, index);
        self.bump(TableId::JobVersions, index);
        version
    }
}

impl StateStore {
    /// Registers or re-registers a job. A submission whose specification is
    /// identical to the current row is a no-op and does not bump the
    /// version.
    pub fn upsert_job(&self, index: u64, job: Job) -> Result<u64, FlotillaError> {
        self.write(|inner| {
            let key = (job.namespace.clone(), job.id.clone());
            if let Some(existing) = inner.jobs.get(&key)
                && existing.spec_equal(&job)
            {
                return Ok((existing.version, vec![]));
            }
            let version = inner.insert_job_locked(index, job);
            let wakes = vec![
                (TableId::Jobs, vec![job_row_key(&key.0, &key.1)]),
                (TableId::JobVersions, vec![job_row_key(&key.0, &key.1)]),
            ];
            Ok((version, wakes))
        })
    }

    /// Deregisters a job. With `purge`, the row and its history are removed;
    /// otherwise the job is marked dead and kept for inspection until GC.
    pub fn delete_job(
        &self,
        index: u64,
        namespace: &str,
        job_id: &str,
        purge: bool,
    ) -> Result<(), FlotillaError> {
        self.write(|inner| {
            let key = (namespace.to_string(), job_id.to_string());
            let Some(existing) = inner.jobs.get(&key).cloned() else {
                return Err(FlotillaError::NotFound(format!("job {job_id:?}")));
            };
            if purge {
                inner.jobs.remove(&key);
                inner.job_versions.remove(&key);
            } else {
                let mut dead = (*existing).clone();
                dead.status = JobStatus::Dead;
                dead.stable = false;
                dead.modify_index = index;
                inner.jobs.insert(key.clone(), Arc::new(dead));
            }
            inner.bump(TableId::Jobs, index);
            inner.bump(TableId::JobVersions, index);
            let wakes = vec![
                (TableId::Jobs, vec![job_row_key(namespace, job_id)]),
                (TableId::JobVersions, vec![job_row_key(namespace, job_id)]),
            ];
            Ok(((), wakes))
        })
    }

    /// Marks a job version stable or unstable.
    pub fn set_job_stability(
        &self,
        index: u64,
        namespace: &str,
        job_id: &str,
        version: u64,
        stable: bool,
    ) -> Result<(), FlotillaError> {
        self.write(|inner| {
            let key = (namespace.to_string(), job_id.to_string());
            let Some(existing) = inner.jobs.get(&key).cloned() else {
                return Err(FlotillaError::NotFound(format!("job {job_id:?}")));
            };
            if existing.version == version {
                let mut updated = (*existing).clone();
                updated.stable = stable;
                updated.modify_index = index;
                inner.jobs.insert(key.clone(), Arc::new(updated));
            } else if let Some(versions) = inner.job_versions.get_mut(&key)
                && let Some(slot) = versions.iter_mut().find(|j| j.version == version)
            {
                let mut updated = (**slot).clone();
                updated.stable = stable;
                updated.modify_index = index;
                *slot = Arc::new(updated);
            } else {
                return Err(FlotillaError::NotFound(format!(
                    "job {job_id:?} version {version}"
                )));
            }
            inner.bump(TableId::Jobs, index);
            inner.bump(TableId::JobVersions, index);
            Ok(((), vec![(TableId::Jobs, vec![job_row_key(namespace, job_id)])]))
        })
    }

    /// Recomputes every job's status from its live allocations. Used by
    /// `System.ReconcileJobSummaries`.
    pub fn reconcile_job_statuses(&self, index: u64) -> Result<usize, FlotillaError> {
        self.write(|inner| {
            let mut changed_keys = Vec::new();
            let keys: Vec<_> = inner.jobs.keys().cloned().collect();
            for key in keys {
                let Some(job) = inner.jobs.get(&key).cloned() else {
                    continue;
                };
                if job.status == JobStatus::Dead {
                    continue;
                }
                let has_live_alloc = inner
                    .allocs_by_job
                    .get(&key)
                    .map(|ids| {
                        ids.iter().any(|id| {
                            inner.allocs.get(id).is_some_and(|a| !a.is_terminal())
                        })
                    })
                    .unwrap_or(false);
                let status = if has_live_alloc {
                    JobStatus::Running
                } else {
                    JobStatus::Pending
                };
                if status != job.status {
                    let mut updated = (*job).clone();
                    updated.status = status;
                    updated.modify_index = index;
                    inner.jobs.insert(key.clone(), Arc::new(updated));
                    changed_keys.push(job_row_key(&key.0, &key.1));
                }
            }
            let count = changed_keys.len();
            if count > 0 {
                inner.bump(TableId::Jobs, index);
            }
            Ok((count, vec![(TableId::Jobs, changed_keys)]))
        })
    }
}

/// The row-token key for a job.
pub(super) fn job_row_key(namespace: &str, job_id: &str) -> String {
    format!("{namespace}/{job_id}")
}

impl<'a> StateSnapshot<'a> {
    pub fn job_by_id(
        &self,
        ws: Option<&mut WatchSet>,
        namespace: &str,
        job_id: &str,
    ) -> Option<Arc<Job>> {
        self.maybe_arm(
            ws,
            WatchToken::Row(TableId::Jobs, job_row_key(namespace, job_id)),
        );
        self.inner
            .jobs
            .get(&(namespace.to_string(), job_id.to_string()))
            .cloned()
    }

    pub fn jobs_by_namespace(
        &self,
        ws: Option<&mut WatchSet>,
        namespace: &str,
    ) -> Vec<Arc<Job>> {
        self.maybe_arm(
            ws,
            WatchToken::Prefix(TableId::Jobs, format!("{namespace}/")),
        );
        self.inner
            .jobs
            .range((namespace.to_string(), String::new())..)
            .take_while(|((ns, _), _)| ns == namespace)
            .map(|(_, job)| job.clone())
            .collect()
    }

    pub fn all_jobs(&self, ws: Option<&mut WatchSet>) -> Vec<Arc<Job>> {
        self.maybe_arm(ws, WatchToken::Table(TableId::Jobs));
        self.inner.jobs.values().cloned().collect()
    }

    /// A specific retained version of a job, including the current one.
    pub fn job_version(
        &self,
        namespace: &str,
        job_id: &str,
        version: u64,
    ) -> Option<Arc<Job>> {
        let key = (namespace.to_string(), job_id.to_string());
        if let Some(current) = self.inner.jobs.get(&key)
            && current.version == version
        {
            return Some(current.clone());
        }
        self.inner
            .job_versions
            .get(&key)?
            .iter()
            .find(|j| j.version == version)
            .cloned()
    }

    /// All retained versions, newest first, current included.
    pub fn job_versions(&self, namespace: &str, job_id: &str) -> Vec<Arc<Job>> {
        let key = (namespace.to_string(), job_id.to_string());
        let mut out = Vec::new();
        if let Some(current) = self.inner.jobs.get(&key) {
            out.push(current.clone());
        }
        if let Some(history) = self.inner.job_versions.get(&key) {
            out.extend(history.iter().cloned());
        }
        out
    }

    /// The most recent stable version preceding the current one, used by
    /// deployment auto-revert.
    pub fn latest_stable_job_version(&self, namespace: &str, job_id: &str) -> Option<Arc<Job>> {
        let current_version = self.job_by_id(None, namespace, job_id)?.version;
        self.job_versions(namespace, job_id)
            .into_iter()
            .filter(|j| j.stable && j.version < current_version)
            .max_by_key(|j| j.version)
    }
}
