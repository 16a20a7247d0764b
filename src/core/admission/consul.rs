// src/core/admission/consul.rs

//! Consul-cluster defaulting and the Consul workload-identity validator.

use super::{AdmissionContext, JobMutator, JobValidator};
use crate::core::FlotillaError;
use crate::core::model::{Constraint, Job, ServiceProvider};
use async_trait::async_trait;
use std::collections::BTreeSet;

/// Mutator: default every service and task Consul block to the configured
/// default cluster, and pin tasks with an admin partition to matching
/// nodes.
pub struct ConsulCluster;

#[async_trait]
impl JobMutator for ConsulCluster {
    fn name(&self) -> &'static str {
        "consul-cluster"
    }

    async fn mutate(
        &self,
        mut job: Job,
        ctx: &AdmissionContext,
    ) -> Result<(Job, Vec<String>), FlotillaError> {
        let default_cluster = ctx.config.consul.default_cluster.clone();

        for group in &mut job.task_groups {
            for service in &mut group.services {
                if service.provider == ServiceProvider::Consul && service.cluster.is_empty() {
                    service.cluster = default_cluster.clone();
                }
            }
            for task in &mut group.tasks {
                for service in &mut task.services {
                    if service.provider == ServiceProvider::Consul && service.cluster.is_empty() {
                        service.cluster = default_cluster.clone();
                    }
                }
                if task.consul_cluster.is_empty()
                    && (!task.consul_partition.is_empty()
                        || !task.templates.is_empty()
                        || task.services.iter().any(|s| s.provider == ServiceProvider::Consul))
                {
                    task.consul_cluster = default_cluster.clone();
                }
            }
        }

        // One partition constraint per (cluster, partition) pair.
        let mut partitions: BTreeSet<(String, String)> = BTreeSet::new();
        for (_, task) in job.tasks() {
            if !task.consul_partition.is_empty() {
                partitions.insert((task.consul_cluster.clone(), task.consul_partition.clone()));
            }
        }
        for (cluster, partition) in partitions {
            let attr = if cluster.is_empty() || cluster == default_cluster {
                "${attr.consul.partition}".to_string()
            } else {
                format!("${{attr.consul.{cluster}.partition}}")
            };
            let constraint = Constraint::new(&attr, "=", &partition);
            if !job.constraints.contains(&constraint) {
                job.constraints.push(constraint);
            }
        }

        Ok((job, Vec::new()))
    }
}

/// Validator: when the server runs Consul in workload-identity mode, every
/// Consul-provider service must carry an identity (its own, or one the
/// implicit-identities hook generated).
pub struct ConsulServiceValidator;

#[async_trait]
impl JobValidator for ConsulServiceValidator {
    fn name(&self) -> &'static str {
        "consul-service"
    }

    async fn validate(
        &self,
        job: &Job,
        ctx: &AdmissionContext,
    ) -> Result<Vec<String>, FlotillaError> {
        if !ctx.config.consul.use_identity {
            return Ok(Vec::new());
        }
        for group in &job.task_groups {
            for service in group
                .services
                .iter()
                .chain(group.tasks.iter().flat_map(|t| t.services.iter()))
            {
                if service.provider == ServiceProvider::Consul && service.identity.is_none() {
                    return Err(FlotillaError::InvalidRequest(format!(
                        "service {:?} uses the Consul provider and requires a workload identity; \
                         none is set and the server has no default service identity",
                        service.name
                    )));
                }
            }
        }
        Ok(Vec::new())
    }
}
