// src/core/admission/constraints.rs

//! Implicit constraints derived from job content: Vault reachability,
//! OS-signal support, and service-discovery availability.

use super::{AdmissionContext, JobMutator};
use crate::core::FlotillaError;
use crate::core::model::{Constraint, Job, ServiceProvider};
use async_trait::async_trait;
use std::collections::BTreeSet;

const VAULT_VERSION_REQ: &str = ">= 0.6.1";
const CONSUL_VERSION_REQ: &str = ">= 1.8.0";

fn vault_constraint(cluster: &str, default_cluster: &str) -> Constraint {
    if cluster.is_empty() || cluster == default_cluster {
        Constraint::new("${attr.vault.version}", "semver", VAULT_VERSION_REQ)
    } else {
        Constraint::new(
            &format!("${{attr.vault.{cluster}.version}}"),
            "semver",
            VAULT_VERSION_REQ,
        )
    }
}

fn consul_constraint(cluster: &str, default_cluster: &str) -> Constraint {
    if cluster.is_empty() || cluster == default_cluster {
        Constraint::new("${attr.consul.version}", "semver", CONSUL_VERSION_REQ)
    } else {
        Constraint::new(
            &format!("${{attr.consul.{cluster}.version}}"),
            "semver",
            CONSUL_VERSION_REQ,
        )
    }
}

fn native_discovery_constraint() -> Constraint {
    Constraint::new("${attr.flotilla.service_discovery}", "=", "true")
}

/// Appends a constraint unless a semantically equivalent one is present.
fn add_if_missing(constraints: &mut Vec<Constraint>, constraint: Constraint) {
    if !constraints.contains(&constraint) {
        constraints.push(constraint);
    }
}

pub struct ImplicitConstraints;

#[async_trait]
impl JobMutator for ImplicitConstraints {
    fn name(&self) -> &'static str {
        "implicit-constraints"
    }

    async fn mutate(
        &self,
        mut job: Job,
        ctx: &AdmissionContext,
    ) -> Result<(Job, Vec<String>), FlotillaError> {
        let vault_default = ctx.config.vault.default_cluster.clone();
        let consul_default = ctx.config.consul.default_cluster.clone();

        // Vault reachability, one constraint per referenced cluster.
        let vault_clusters: BTreeSet<String> = job
            .tasks()
            .filter_map(|(_, t)| t.vault.as_ref())
            .map(|v| v.cluster.clone())
            .collect();
        let mut new_constraints = Vec::new();
        for cluster in vault_clusters {
            new_constraints.push(vault_constraint(&cluster, &vault_default));
        }

        // OS signals: one aggregated set_contains constraint over every
        // signal the job references, sorted for determinism.
        let mut signals: BTreeSet<String> = BTreeSet::new();
        for (_, task) in job.tasks() {
            if let Some(signal) = &task.kill_signal {
                signals.insert(signal.clone());
            }
            for template in &task.templates {
                if let Some(signal) = &template.change_signal {
                    signals.insert(signal.clone());
                }
            }
            if let Some(signal) = task.vault.as_ref().and_then(|v| v.change_signal.as_ref()) {
                signals.insert(signal.clone());
            }
        }
        if !signals.is_empty() {
            let joined = signals.into_iter().collect::<Vec<_>>().join(",");
            new_constraints.push(Constraint::new(
                "${attr.os.signals}",
                "set_contains",
                &joined,
            ));
        }

        // Service discovery availability, per provider and cluster.
        let mut consul_clusters: BTreeSet<String> = BTreeSet::new();
        let mut uses_native = false;
        for group in &job.task_groups {
            for service in group
                .services
                .iter()
                .chain(group.tasks.iter().flat_map(|t| t.services.iter()))
            {
                match service.provider {
                    ServiceProvider::Flotilla => uses_native = true,
                    ServiceProvider::Consul => {
                        consul_clusters.insert(service.cluster.clone());
                    }
                }
            }
        }
        if uses_native {
            new_constraints.push(native_discovery_constraint());
        }
        for cluster in consul_clusters {
            new_constraints.push(consul_constraint(&cluster, &consul_default));
        }

        for constraint in new_constraints {
            add_if_missing(&mut job.constraints, constraint);
        }
        Ok((job, Vec::new()))
    }
}
