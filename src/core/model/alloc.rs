// src/core/model/alloc.rs

//! Allocations: a placement of a task group onto a node.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Deployment-related health state reported for an allocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AllocDeploymentStatus {
    /// None until a health verdict is reached.
    pub healthy: Option<bool>,
    #[serde(default)]
    pub timestamp: i64,
}

/// A single placement of a task group. Created by the scheduler, updated by
/// node agents (`client_status`) and by raft writes (`desired_status`,
/// `deployment_status`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Allocation {
    pub id: String,
    #[serde(default)]
    pub namespace: String,
    pub job_id: String,
    #[serde(default)]
    pub job_version: u64,
    #[serde(default)]
    pub eval_id: String,
    #[serde(default)]
    pub node_id: String,
    pub task_group: String,
    #[serde(default)]
    pub desired_status: String,
    #[serde(default)]
    pub client_status: String,
    #[serde(default)]
    pub deployment_id: Option<String>,
    #[serde(default)]
    pub deployment_status: Option<AllocDeploymentStatus>,
    /// Signed workload-identity tokens minted for this allocation, by task.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub signed_identities: HashMap<String, String>,
    #[serde(default)]
    pub create_index: u64,
    #[serde(default)]
    pub modify_index: u64,
}

pub const ALLOC_DESIRED_RUN: &str = "run";
pub const ALLOC_DESIRED_STOP: &str = "stop";
pub const ALLOC_CLIENT_PENDING: &str = "pending";
pub const ALLOC_CLIENT_RUNNING: &str = "running";
pub const ALLOC_CLIENT_COMPLETE: &str = "complete";
pub const ALLOC_CLIENT_FAILED: &str = "failed";

impl Allocation {
    /// Whether the allocation is still live from the cluster's perspective.
    pub fn is_terminal(&self) -> bool {
        self.desired_status == ALLOC_DESIRED_STOP
            || matches!(
                self.client_status.as_str(),
                ALLOC_CLIENT_COMPLETE | ALLOC_CLIENT_FAILED
            )
    }
}
