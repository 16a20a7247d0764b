// src/core/model/volume.rs

//! Sticky host-volume claims binding a task group to a host volume.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TaskGroupHostVolumeClaim {
    pub id: String,
    #[serde(default)]
    pub namespace: String,
    pub job_id: String,
    pub task_group_name: String,
    pub volume_id: String,
    pub volume_name: String,
    #[serde(default)]
    pub create_index: u64,
    #[serde(default)]
    pub modify_index: u64,
}

impl TaskGroupHostVolumeClaim {
    /// Claims are unique per (namespace, job, group, volume name); two rows
    /// with the same coordinates refer to the same binding.
    pub fn same_binding(&self, other: &TaskGroupHostVolumeClaim) -> bool {
        self.namespace == other.namespace
            && self.job_id == other.job_id
            && self.task_group_name == other.task_group_name
            && self.volume_name == other.volume_name
    }
}
