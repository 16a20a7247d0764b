// src/core/raft/mod.rs

//! The consensus seam: typed log entries, the commit pipeline, and
//! leadership state.
//!
//! The log transport itself is external; `RaftHandle::apply` is the seam.
//! In-process the handle assigns the next log index, runs the FSM, and
//! publishes the resulting events. Non-leaders are refused with `NoLeader`
//! and rely on the dispatcher's leader forwarding.

pub mod fsm;

use crate::core::FlotillaError;
use crate::core::events::Events;
use crate::core::model::*;
use crate::core::stream::broker::EventBroker;
use fsm::Fsm;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;

/// One mutation of cluster state, as committed to the log. Every variant
/// has exactly one applier in the FSM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RaftRequest {
    NodeRegister {
        node: Node,
    },
    NodeDeregister {
        node_id: String,
    },
    NodeUpdateStatus {
        node_id: String,
        status: NodeStatus,
    },
    JobRegister {
        job: Job,
        eval: Option<Evaluation>,
    },
    JobDeregister {
        namespace: String,
        job_id: String,
        purge: bool,
        eval: Option<Evaluation>,
    },
    JobStabilityUpdate {
        namespace: String,
        job_id: String,
        job_version: u64,
        stable: bool,
    },
    EvalUpsert {
        evals: Vec<Evaluation>,
    },
    EvalDelete {
        ids: Vec<String>,
    },
    AllocUpsert {
        allocs: Vec<Allocation>,
    },
    AllocDelete {
        ids: Vec<String>,
    },
    DeploymentUpsert {
        deployment: Deployment,
    },
    /// Status transitions carry their side effects so the revert job and the
    /// watcher evaluation commit in the same entry.
    DeploymentStatusUpdate {
        deployment_id: String,
        status: DeploymentStatus,
        description: String,
        revert_job: Option<Job>,
        eval: Option<Evaluation>,
    },
    DeploymentPromote {
        deployment_id: String,
        groups: Vec<String>,
        eval: Option<Evaluation>,
    },
    DeploymentAllocHealth {
        deployment_id: String,
        healthy_allocs: Vec<String>,
        unhealthy_allocs: Vec<String>,
        status_update: Option<(DeploymentStatus, String)>,
        revert_job: Option<Job>,
        eval: Option<Evaluation>,
    },
    DeploymentDelete {
        ids: Vec<String>,
    },
    AclPolicyUpsert {
        policies: Vec<AclPolicy>,
    },
    AclPolicyDelete {
        names: Vec<String>,
    },
    AclRoleUpsert {
        roles: Vec<AclRole>,
    },
    AclTokenUpsert {
        tokens: Vec<AclToken>,
    },
    AclTokenDelete {
        accessor_ids: Vec<String>,
    },
    NamespaceUpsert {
        namespaces: Vec<Namespace>,
    },
    NamespaceDelete {
        names: Vec<String>,
    },
    ServiceRegistrationUpsert {
        services: Vec<ServiceRegistration>,
    },
    ServiceRegistrationDelete {
        namespace: String,
        id: String,
    },
    RootKeyMetaUpsert {
        meta: RootKeyMeta,
    },
    VolumeClaimDelete {
        ids: Vec<String>,
    },
    JobStatusReconcile,
}

/// A committed log entry handed to the FSM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub index: u64,
    pub request: RaftRequest,
}

/// The result of a committed apply: the index it landed at plus any
/// applier-specific output.
#[derive(Debug, Clone, Default)]
pub struct Applied {
    pub index: u64,
    /// Set by appliers that produce an output (e.g. the reconcile count).
    pub output: Option<serde_json::Value>,
}

/// The commit pipeline. Owns the FSM, the log index counter, and the
/// leadership flag.
pub struct RaftHandle {
    fsm: Fsm,
    log_index: AtomicU64,
    leadership: watch::Sender<bool>,
    broker: Arc<EventBroker>,
}

impl RaftHandle {
    pub fn new(fsm: Fsm, broker: Arc<EventBroker>) -> Self {
        let (leadership, _) = watch::channel(false);
        Self {
            fsm,
            log_index: AtomicU64::new(0),
            leadership,
            broker,
        }
    }

    pub fn is_leader(&self) -> bool {
        *self.leadership.borrow()
    }

    /// A receiver that observes leadership transitions.
    pub fn leadership_watch(&self) -> watch::Receiver<bool> {
        self.leadership.subscribe()
    }

    /// Establishes or abdicates leadership. Single-server bootstrap calls
    /// this once at startup.
    pub fn set_leader(&self, leader: bool) {
        self.leadership.send_replace(leader);
    }

    /// Commits one request: assigns the next index, applies it, and
    /// publishes the resulting events to the broker. Only the leader may
    /// commit.
    pub fn apply(&self, request: RaftRequest) -> Result<Applied, FlotillaError> {
        if !self.is_leader() {
            return Err(FlotillaError::NoLeader);
        }
        let index = self.log_index.fetch_add(1, Ordering::SeqCst) + 1;
        let entry = LogEntry { index, request };
        let (applied, events) = self.fsm.apply(&entry)?;
        if !events.is_empty() {
            self.broker.publish(Events { index, events });
        }
        Ok(applied)
    }

    /// Replays an already-committed entry, e.g. during log restore or from
    /// the federated replicator. The index comes from the entry itself.
    pub fn replay(&self, entry: &LogEntry) -> Result<Applied, FlotillaError> {
        self.log_index.fetch_max(entry.index, Ordering::SeqCst);
        let (applied, events) = self.fsm.apply(entry)?;
        if !events.is_empty() {
            self.broker.publish(Events {
                index: entry.index,
                events,
            });
        }
        Ok(applied)
    }

    pub fn fsm(&self) -> &Fsm {
        &self.fsm
    }

    /// Restores the FSM from a snapshot image and realigns the log index
    /// with the restored state so subsequent commits keep monotonicity.
    pub fn restore_snapshot(&self, data: bytes::Bytes) -> Result<(), FlotillaError> {
        self.fsm.restore(data)?;
        self.log_index
            .fetch_max(self.fsm.store().latest_index(), Ordering::SeqCst);
        Ok(())
    }

    /// Seeds the bootstrap state every cluster starts with: the default
    /// namespace. Called once when leadership is first established.
    pub fn bootstrap(&self) -> Result<(), FlotillaError> {
        self.apply(RaftRequest::NamespaceUpsert {
            namespaces: vec![Namespace::default_namespace()],
        })?;
        Ok(())
    }
}

impl std::fmt::Debug for RaftHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RaftHandle")
            .field("log_index", &self.log_index.load(Ordering::Relaxed))
            .field("is_leader", &self.is_leader())
            .finish()
    }
}
