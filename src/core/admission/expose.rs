// src/core/admission/expose.rs

//! Expose-path handling for group services whose health checks are reached
//! through the built-in sidecar proxy: the generator (mutate phase), the
//! reconciler (late mutate phase), and the structural validator.

use super::{AdmissionContext, JobMutator, JobValidator};
use crate::core::FlotillaError;
use crate::core::model::{
    Connect, ExposePath, Job, Network, Port, Service, SidecarProxy, SidecarService, TaskGroup,
};
use async_trait::async_trait;
use sha2::{Digest, Sha256};

/// Deterministic port label for a check that did not name one: a hash of
/// the service name and check position, so repeated admissions agree.
fn generated_port_label(service: &Service, check_index: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(service.name.as_bytes());
    hasher.update(check_index.to_be_bytes());
    let digest = hasher.finalize();
    format!("svc_{}_ck_{}", service.name, hex::encode(&digest[..4]))
}

fn ensure_dynamic_port(networks: &mut [Network], label: &str) {
    let Some(network) = networks.first_mut() else {
        return;
    };
    let known = network
        .dynamic_ports
        .iter()
        .chain(network.reserved_ports.iter())
        .any(|p| p.label == label);
    if !known {
        network.dynamic_ports.push(Port {
            label: label.to_string(),
            ..Default::default()
        });
    }
}

fn sidecar_proxy_mut(service: &mut Service) -> &mut SidecarProxy {
    let connect = service.connect.get_or_insert_with(Connect::default);
    let sidecar = connect
        .sidecar_service
        .get_or_insert_with(SidecarService::default);
    sidecar.proxy.get_or_insert_with(SidecarProxy::default)
}

/// Mutator: generate expose paths for group-service checks that set
/// `expose`, allocating a port label when the check omits one.
pub struct ExposeCheckMutator;

#[async_trait]
impl JobMutator for ExposeCheckMutator {
    fn name(&self) -> &'static str {
        "expose-check"
    }

    async fn mutate(
        &self,
        mut job: Job,
        _ctx: &AdmissionContext,
    ) -> Result<(Job, Vec<String>), FlotillaError> {
        for group in &mut job.task_groups {
            let mut port_labels = Vec::new();
            for service in &mut group.services {
                let exposeable: Vec<(usize, String, String, String)> = service
                    .checks
                    .iter()
                    .enumerate()
                    .filter(|(_, check)| check.expose && !check.path.is_empty())
                    .map(|(i, check)| {
                        let label = if check.port_label.is_empty() {
                            generated_port_label(service, i)
                        } else {
                            check.port_label.clone()
                        };
                        (i, check.path.clone(), check.protocol.clone(), label)
                    })
                    .collect();
                if exposeable.is_empty() {
                    continue;
                }

                let proxy = sidecar_proxy_mut(service);
                for (_, path, protocol, label) in &exposeable {
                    let exists = proxy
                        .expose_paths
                        .iter()
                        .any(|ep| &ep.path == path && &ep.local_path_port == label);
                    if !exists {
                        proxy.expose_paths.push(ExposePath {
                            path: path.clone(),
                            protocol: if protocol.is_empty() {
                                "http".to_string()
                            } else {
                                protocol.clone()
                            },
                            local_path_port: label.clone(),
                            listener_port: label.clone(),
                        });
                    }
                    port_labels.push(label.clone());
                }
                // Backfill generated labels onto the checks themselves.
                for (i, _, _, label) in exposeable {
                    if service.checks[i].port_label.is_empty() {
                        service.checks[i].port_label = label;
                    }
                }
            }
            for label in port_labels {
                ensure_dynamic_port(&mut group.networks, &label);
            }
        }
        Ok((job, Vec::new()))
    }
}

/// Late mutator: reconcile expose paths against the checks that remain,
/// dropping paths whose check disappeared and deduplicating.
pub struct ExposeReconciler;

#[async_trait]
impl JobMutator for ExposeReconciler {
    fn name(&self) -> &'static str {
        "expose-mutate"
    }

    async fn mutate(
        &self,
        mut job: Job,
        _ctx: &AdmissionContext,
    ) -> Result<(Job, Vec<String>), FlotillaError> {
        for group in &mut job.task_groups {
            for service in &mut group.services {
                let check_paths: Vec<String> = service
                    .checks
                    .iter()
                    .filter(|c| c.expose)
                    .map(|c| c.path.clone())
                    .collect();
                let Some(proxy) = service
                    .connect
                    .as_mut()
                    .and_then(|c| c.sidecar_service.as_mut())
                    .and_then(|s| s.proxy.as_mut())
                else {
                    continue;
                };
                proxy
                    .expose_paths
                    .retain(|ep| check_paths.iter().any(|p| p == &ep.path));
                proxy.expose_paths.dedup_by(|a, b| {
                    a.path == b.path && a.local_path_port == b.local_path_port
                });
            }
        }
        Ok((job, Vec::new()))
    }
}

fn group_uses_expose(group: &TaskGroup) -> bool {
    group
        .services
        .iter()
        .any(|s| s.checks.iter().any(|c| c.expose))
}

/// Validator: structural rules for expose usage.
pub struct ExposeCheckValidator;

#[async_trait]
impl JobValidator for ExposeCheckValidator {
    fn name(&self) -> &'static str {
        "expose-check"
    }

    async fn validate(
        &self,
        job: &Job,
        _ctx: &AdmissionContext,
    ) -> Result<Vec<String>, FlotillaError> {
        for group in &job.task_groups {
            // Task-level services may never set expose.
            for task in &group.tasks {
                for service in &task.services {
                    if service.checks.iter().any(|c| c.expose) {
                        return Err(FlotillaError::InvalidRequest(format!(
                            "exposed checks are only allowed on group services, found on task service {:?}",
                            service.name
                        )));
                    }
                }
            }

            if !group_uses_expose(group) {
                continue;
            }
            let bridge_networks = group
                .networks
                .iter()
                .filter(|n| n.mode == "bridge")
                .count();
            if group.networks.len() != 1 || bridge_networks != 1 {
                return Err(FlotillaError::InvalidRequest(format!(
                    "group {:?} uses expose checks and must have exactly one bridge-mode network",
                    group.name
                )));
            }
            for service in &group.services {
                if service.checks.iter().any(|c| c.expose)
                    && !service.connect.as_ref().is_some_and(Connect::has_sidecar)
                {
                    return Err(FlotillaError::InvalidRequest(format!(
                        "service {:?} uses expose checks and must use the built-in sidecar proxy",
                        service.name
                    )));
                }
            }
        }
        Ok(Vec::new())
    }
}
