// src/core/model/deployment.rs

//! Deployments: progressive rollout records attached to a job version.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Default,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum DeploymentStatus {
    #[default]
    Running,
    Paused,
    Successful,
    Failed,
    Canceled,
}

impl DeploymentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeploymentStatus::Successful | DeploymentStatus::Failed | DeploymentStatus::Canceled
        )
    }
}

// Canonical status descriptions. The rollback variants embed the version the
// deployment rolled the job back to.
pub const DESC_RUNNING: &str = "Deployment is running";
pub const DESC_PAUSED: &str = "Deployment is paused";
pub const DESC_SUCCESSFUL: &str = "Deployment completed successfully";
pub const DESC_FAILED_BY_USER: &str = "Deployment marked as failed";
pub const DESC_FAILED_ALLOC_HEALTH: &str = "Failed due to unhealthy allocations";
pub const DESC_PROMOTED: &str = "Deployment promoted canaries";

/// Appends the rollback outcome to a base failure description.
pub fn desc_with_rollback(base: &str, job_version: u64) -> String {
    format!("{base} - rolling back to job version {job_version}")
}

/// Marks a failure description as a rollback that changed nothing.
pub fn desc_rollback_noop(base: &str) -> String {
    format!("{base} - rollback is a noop")
}

/// Per-task-group rollout state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DeploymentTaskGroupState {
    #[serde(default)]
    pub desired_total: u32,
    #[serde(default)]
    pub placed_allocs: u32,
    #[serde(default)]
    pub healthy_allocs: u32,
    #[serde(default)]
    pub unhealthy_allocs: u32,
    #[serde(default)]
    pub desired_canaries: u32,
    #[serde(default, skip_serializing_if = "super::is_empty_vec")]
    pub placed_canaries: Vec<String>,
    /// Roll the job back to the last stable version if this group fails.
    #[serde(default)]
    pub auto_revert: bool,
    #[serde(default)]
    pub promoted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Deployment {
    pub id: String,
    #[serde(default)]
    pub namespace: String,
    pub job_id: String,
    #[serde(default)]
    pub job_version: u64,
    #[serde(default)]
    pub status: DeploymentStatus,
    #[serde(default)]
    pub status_description: String,
    #[serde(default)]
    pub task_groups: HashMap<String, DeploymentTaskGroupState>,
    #[serde(default)]
    pub create_index: u64,
    #[serde(default)]
    pub modify_index: u64,
}

impl Deployment {
    /// True when any task group requests auto-revert on failure.
    pub fn has_auto_revert(&self) -> bool {
        self.task_groups.values().any(|tg| tg.auto_revert)
    }

    /// True when promotion is still outstanding for any canary group.
    pub fn requires_promotion(&self) -> bool {
        self.task_groups
            .values()
            .any(|tg| tg.desired_canaries > 0 && !tg.promoted)
    }
}
