// src/core/admission/identity.rs

//! Implicit workload identities for Consul services and Vault-using tasks.

use super::{AdmissionContext, JobMutator};
use crate::config::IdentityConfig;
use crate::core::FlotillaError;
use crate::core::model::{Constraint, Job, Service, ServiceProvider, WorkloadIdentity};
use async_trait::async_trait;

/// The client version that understands minted workload identities; added as
/// a constraint whenever an identity is injected.
const IDENTITY_CLIENT_VERSION_CONSTRAINT: (&str, &str, &str) =
    ("${attr.flotilla.version}", "semver", ">= 1.1.0");

pub struct ImplicitIdentities;

fn identity_from_config(name: String, cfg: &IdentityConfig, default_audience: &str) -> WorkloadIdentity {
    WorkloadIdentity {
        name,
        audience: if cfg.audience.is_empty() {
            vec![default_audience.to_string()]
        } else {
            cfg.audience.clone()
        },
        env: cfg.env,
        file: cfg.file,
        ttl_seconds: cfg.ttl,
    }
}

fn service_identity_name(service: &Service) -> String {
    format!("consul-service_{}", service.name)
}

fn vault_identity_name(cluster: &str, default_cluster: &str) -> String {
    let cluster = if cluster.is_empty() { default_cluster } else { cluster };
    format!("vault_{cluster}")
}

fn consul_task_identity_name(cluster: &str, default_cluster: &str) -> String {
    let cluster = if cluster.is_empty() { default_cluster } else { cluster };
    format!("consul_{cluster}")
}

/// Whether a task talks to Consul directly: it renders templates, names a
/// partition, or advertises a Consul-provider service of its own.
fn task_uses_consul(task: &crate::core::model::Task) -> bool {
    !task.templates.is_empty()
        || !task.consul_partition.is_empty()
        || task
            .services
            .iter()
            .any(|s| s.provider == ServiceProvider::Consul)
}

#[async_trait]
impl JobMutator for ImplicitIdentities {
    fn name(&self) -> &'static str {
        "implicit-identities"
    }

    async fn mutate(
        &self,
        mut job: Job,
        ctx: &AdmissionContext,
    ) -> Result<(Job, Vec<String>), FlotillaError> {
        let mut injected = false;

        if let Some(service_identity) = &ctx.config.consul.service_identity {
            for group in &mut job.task_groups {
                for service in group
                    .services
                    .iter_mut()
                    .chain(group.tasks.iter_mut().flat_map(|t| t.services.iter_mut()))
                {
                    if service.provider == ServiceProvider::Consul && service.identity.is_none() {
                        service.identity = Some(identity_from_config(
                            service_identity_name(service),
                            service_identity,
                            "consul.io",
                        ));
                        injected = true;
                    }
                }
            }
        }

        if let Some(task_identity) = &ctx.config.consul.task_identity {
            let default_cluster = ctx.config.consul.default_cluster.clone();
            for group in &mut job.task_groups {
                for task in &mut group.tasks {
                    if !task_uses_consul(task) {
                        continue;
                    }
                    let name = consul_task_identity_name(&task.consul_cluster, &default_cluster);
                    if !task.identities.iter().any(|wi| wi.name == name) {
                        task.identities.push(identity_from_config(
                            name,
                            task_identity,
                            "consul.io",
                        ));
                        injected = true;
                    }
                }
            }
        }

        if ctx.config.vault.use_identity
            && let Some(vault_identity) = &ctx.config.vault.default_identity
        {
            let default_cluster = ctx.config.vault.default_cluster.clone();
            for group in &mut job.task_groups {
                for task in &mut group.tasks {
                    let Some(vault) = &task.vault else { continue };
                    let name = vault_identity_name(&vault.cluster, &default_cluster);
                    if !task.identities.iter().any(|wi| wi.name == name) {
                        task.identities.push(identity_from_config(
                            name,
                            vault_identity,
                            "vault.io",
                        ));
                        injected = true;
                    }
                }
            }
        }

        if injected {
            let (l, op, r) = IDENTITY_CLIENT_VERSION_CONSTRAINT;
            let constraint = Constraint::new(l, op, r);
            if !job.constraints.contains(&constraint) {
                job.constraints.push(constraint);
            }
        }

        Ok((job, Vec::new()))
    }
}
