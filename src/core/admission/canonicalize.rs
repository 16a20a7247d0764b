// src/core/admission/canonicalize.rs

//! The first mutator: fill structural defaults so every later hook sees a
//! fully-populated job.

use super::{AdmissionContext, JobMutator};
use crate::core::FlotillaError;
use crate::core::model::Job;
use crate::core::model::namespace::DEFAULT_NAMESPACE;
use async_trait::async_trait;

pub struct Canonicalizer;

#[async_trait]
impl JobMutator for Canonicalizer {
    fn name(&self) -> &'static str {
        "canonicalizer"
    }

    async fn mutate(
        &self,
        mut job: Job,
        ctx: &AdmissionContext,
    ) -> Result<(Job, Vec<String>), FlotillaError> {
        if job.namespace.is_empty() {
            job.namespace = DEFAULT_NAMESPACE.to_string();
        }
        if job.name.is_empty() {
            job.name = job.id.clone();
        }
        if job.job_type.is_empty() {
            job.job_type = "service".to_string();
        }
        if job.priority == 0 {
            job.priority = ctx.config.job.default_priority;
        }
        if job.datacenters.is_empty() {
            job.datacenters = vec!["*".to_string()];
        }
        if job.node_pool.is_empty() {
            job.node_pool = "default".to_string();
        }
        for group in &mut job.task_groups {
            if group.count == 0 {
                group.count = 1;
            }
            // Task-level services remember which task defined them.
            for task in &mut group.tasks {
                for service in &mut task.services {
                    if service.task_name.is_empty() {
                        service.task_name = task.name.clone();
                    }
                }
            }
        }
        Ok((job, Vec::new()))
    }
}
