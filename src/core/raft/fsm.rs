// src/core/raft/fsm.rs

//! The finite state machine: deterministic application of committed log
//! entries to the state store. The FSM is the sole writer; appliers are
//! pure over the current state and a decode or apply failure of a
//! committed entry signals corruption.

use super::{Applied, LogEntry, RaftRequest};
use crate::core::FlotillaError;
use crate::core::events::{Event, Topic};
use crate::core::store::StateStore;
use bytes::Bytes;
use std::sync::Arc;
use tracing::debug;

pub struct Fsm {
    store: Arc<StateStore>,
}

impl Fsm {
    pub fn new(store: Arc<StateStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    /// Dispatches one committed entry to its applier. Returns the applied
    /// result and the events to publish.
    pub fn apply(&self, entry: &LogEntry) -> Result<(Applied, Vec<Event>), FlotillaError> {
        let index = entry.index;
        debug!(index, "applying log entry");
        let mut events = Vec::new();
        let mut output = None;

        match &entry.request {
            RaftRequest::NodeRegister { node } => {
                self.store.upsert_node(index, node.clone())?;
                events.push(Event::new(
                    Topic::Node,
                    "NodeRegistered",
                    "",
                    &node.id,
                    index,
                    &node.sanitized(),
                ));
            }
            RaftRequest::NodeDeregister { node_id } => {
                self.store.delete_node(index, node_id)?;
                events.push(Event::new(
                    Topic::Node,
                    "NodeDeregistered",
                    "",
                    node_id,
                    index,
                    &node_id,
                ));
            }
            RaftRequest::NodeUpdateStatus { node_id, status } => {
                self.store.update_node_status(index, node_id, *status)?;
                events.push(Event::new(
                    Topic::Node,
                    "NodeStatusUpdated",
                    "",
                    node_id,
                    index,
                    status,
                ));
            }
            RaftRequest::JobRegister { job, eval } => {
                self.store.upsert_job(index, job.clone())?;
                events.push(Event::new(
                    Topic::Job,
                    "JobRegistered",
                    &job.namespace,
                    &job.id,
                    index,
                    job,
                ));
                if let Some(eval) = eval {
                    self.store.upsert_evals(index, vec![eval.clone()])?;
                    events.push(eval_event(eval, index));
                }
            }
            RaftRequest::JobDeregister {
                namespace,
                job_id,
                purge,
                eval,
            } => {
                self.store.delete_job(index, namespace, job_id, *purge)?;
                events.push(Event::new(
                    Topic::Job,
                    "JobDeregistered",
                    namespace,
                    job_id,
                    index,
                    job_id,
                ));
                if let Some(eval) = eval {
                    self.store.upsert_evals(index, vec![eval.clone()])?;
                    events.push(eval_event(eval, index));
                }
            }
            RaftRequest::JobStabilityUpdate {
                namespace,
                job_id,
                job_version,
                stable,
            } => {
                self.store
                    .set_job_stability(index, namespace, job_id, *job_version, *stable)?;
            }
            RaftRequest::EvalUpsert { evals } => {
                self.store.upsert_evals(index, evals.clone())?;
                for eval in evals {
                    events.push(eval_event(eval, index));
                }
            }
            RaftRequest::EvalDelete { ids } => {
                self.store.delete_evals(index, ids)?;
            }
            RaftRequest::AllocUpsert { allocs } => {
                self.store.upsert_allocs(index, allocs.clone())?;
                for alloc in allocs {
                    events.push(Event::new(
                        Topic::Allocation,
                        "AllocationUpserted",
                        &alloc.namespace,
                        &alloc.id,
                        index,
                        alloc,
                    ));
                }
            }
            RaftRequest::AllocDelete { ids } => {
                self.store.delete_allocs(index, ids)?;
            }
            RaftRequest::DeploymentUpsert { deployment } => {
                self.store.upsert_deployment(index, deployment.clone())?;
                events.push(deployment_event(
                    "DeploymentUpserted",
                    &deployment.namespace,
                    &deployment.id,
                    index,
                    deployment,
                ));
            }
            RaftRequest::DeploymentStatusUpdate {
                deployment_id,
                status,
                description,
                revert_job,
                eval,
            } => {
                self.store.update_deployment_status(
                    index,
                    deployment_id,
                    *status,
                    description.clone(),
                    revert_job.clone(),
                    eval.clone(),
                )?;
                self.push_deployment_events(deployment_id, index, revert_job, eval, &mut events);
            }
            RaftRequest::DeploymentPromote {
                deployment_id,
                groups,
                eval,
            } => {
                self.store
                    .promote_deployment(index, deployment_id, groups, eval.clone())?;
                self.push_deployment_events(deployment_id, index, &None, eval, &mut events);
            }
            RaftRequest::DeploymentAllocHealth {
                deployment_id,
                healthy_allocs,
                unhealthy_allocs,
                status_update,
                revert_job,
                eval,
            } => {
                self.store.set_alloc_health(
                    index,
                    deployment_id,
                    healthy_allocs,
                    unhealthy_allocs,
                    status_update.clone(),
                    revert_job.clone(),
                    eval.clone(),
                )?;
                self.push_deployment_events(deployment_id, index, revert_job, eval, &mut events);
            }
            RaftRequest::DeploymentDelete { ids } => {
                let count = self.store.delete_deployments(index, ids)?;
                output = Some(serde_json::json!({ "deleted": count }));
            }
            RaftRequest::AclPolicyUpsert { policies } => {
                self.store.upsert_acl_policies(index, policies.clone())?;
            }
            RaftRequest::AclPolicyDelete { names } => {
                self.store.delete_acl_policies(index, names)?;
            }
            RaftRequest::AclRoleUpsert { roles } => {
                self.store.upsert_acl_roles(index, roles.clone())?;
            }
            RaftRequest::AclTokenUpsert { tokens } => {
                self.store.upsert_acl_tokens(index, tokens.clone())?;
            }
            RaftRequest::AclTokenDelete { accessor_ids } => {
                self.store.delete_acl_tokens(index, accessor_ids)?;
            }
            RaftRequest::NamespaceUpsert { namespaces } => {
                self.store.upsert_namespaces(index, namespaces.clone())?;
            }
            RaftRequest::NamespaceDelete { names } => {
                self.store.delete_namespaces(index, names)?;
            }
            RaftRequest::ServiceRegistrationUpsert { services } => {
                self.store
                    .upsert_service_registrations(index, services.clone())?;
                for service in services {
                    events.push(Event::new(
                        Topic::Service,
                        "ServiceRegistered",
                        &service.namespace,
                        &service.service_name,
                        index,
                        service,
                    ));
                }
            }
            RaftRequest::ServiceRegistrationDelete { namespace, id } => {
                self.store.delete_service_registration(index, namespace, id)?;
                events.push(Event::new(
                    Topic::Service,
                    "ServiceDeregistered",
                    namespace,
                    id,
                    index,
                    id,
                ));
            }
            RaftRequest::RootKeyMetaUpsert { meta } => {
                self.store.upsert_root_key_meta(index, meta.clone())?;
            }
            RaftRequest::VolumeClaimDelete { ids } => {
                self.store.delete_volume_claims(index, ids)?;
            }
            RaftRequest::JobStatusReconcile => {
                let count = self.store.reconcile_job_statuses(index)?;
                output = Some(serde_json::json!({ "reconciled": count }));
            }
        }

        Ok((Applied { index, output }, events))
    }

    /// Events for a deployment transition: the deployment itself plus the
    /// reverted job and watcher evaluation when attached.
    fn push_deployment_events(
        &self,
        deployment_id: &str,
        index: u64,
        revert_job: &Option<crate::core::model::Job>,
        eval: &Option<crate::core::model::Evaluation>,
        events: &mut Vec<Event>,
    ) {
        let snapshot = self.store.snapshot();
        if let Some(deployment) = snapshot.deployment_by_id(None, deployment_id) {
            events.push(deployment_event(
                "DeploymentStatusUpdated",
                &deployment.namespace,
                &deployment.id,
                index,
                deployment.as_ref(),
            ));
        }
        if let Some(job) = revert_job {
            events.push(Event::new(
                Topic::Job,
                "JobRegistered",
                &job.namespace,
                &job.id,
                index,
                job,
            ));
        }
        if let Some(eval) = eval {
            events.push(eval_event(eval, index));
        }
    }

    /// Serializes all tables into the snapshot wire form.
    pub fn snapshot(&self) -> Result<Bytes, FlotillaError> {
        self.store.persist_snapshot()
    }

    /// Replaces the store from a snapshot image.
    pub fn restore(&self, data: Bytes) -> Result<(), FlotillaError> {
        self.store.restore_snapshot(data)
    }
}

fn eval_event(eval: &crate::core::model::Evaluation, index: u64) -> Event {
    Event::new(
        Topic::Evaluation,
        "EvaluationUpserted",
        &eval.namespace,
        &eval.id,
        index,
        eval,
    )
}

fn deployment_event<T: serde::Serialize>(
    event_type: &str,
    namespace: &str,
    key: &str,
    index: u64,
    payload: &T,
) -> Event {
    Event::new(Topic::Deployment, event_type, namespace, key, index, payload)
}
