// src/core/model/job.rs

//! The job specification and its compositional children.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The lifecycle status of a job, derived from its allocations and evaluations.
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
pub enum JobStatus {
    #[default]
    Pending,
    Running,
    Dead,
}

/// A single constraint restricting where a job, group, or task may be placed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Constraint {
    #[serde(default)]
    pub l_target: String,
    #[serde(default)]
    pub r_target: String,
    #[serde(default)]
    pub operand: String,
}

impl Constraint {
    pub fn new(l_target: &str, operand: &str, r_target: &str) -> Self {
        Self {
            l_target: l_target.to_string(),
            r_target: r_target.to_string(),
            operand: operand.to_string(),
        }
    }
}

/// Which service catalog a service registers into.
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
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ServiceProvider {
    #[default]
    Consul,
    Flotilla,
}

/// A health check attached to a service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Check {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub check_type: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub port_label: String,
    /// When set on a group service, the check is reachable through the
    /// sidecar proxy and an expose path must be generated for it.
    #[serde(default)]
    pub expose: bool,
    #[serde(default)]
    pub interval_ms: u64,
    #[serde(default)]
    pub timeout_ms: u64,
}

/// A single path exposed through the built-in sidecar proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ExposePath {
    pub path: String,
    pub protocol: String,
    pub local_path_port: String,
    #[serde(default)]
    pub listener_port: String,
}

/// Proxy configuration of a connect sidecar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SidecarProxy {
    #[serde(default, skip_serializing_if = "super::is_empty_vec")]
    pub expose_paths: Vec<ExposePath>,
}

/// The sidecar service of a connect-enabled service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SidecarService {
    #[serde(default)]
    pub proxy: Option<SidecarProxy>,
}

/// Consul Connect configuration for a service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Connect {
    #[serde(default)]
    pub sidecar_service: Option<SidecarService>,
}

impl Connect {
    /// True when the service uses the built-in sidecar proxy.
    pub fn has_sidecar(&self) -> bool {
        self.sidecar_service.is_some()
    }
}

/// A workload identity requested by a task or service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct WorkloadIdentity {
    pub name: String,
    #[serde(default, skip_serializing_if = "super::is_empty_vec")]
    pub audience: Vec<String>,
    #[serde(default)]
    pub env: bool,
    #[serde(default)]
    pub file: bool,
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
}

/// A service advertised by a group or task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Service {
    pub name: String,
    #[serde(default)]
    pub provider: ServiceProvider,
    /// Which Consul cluster the service registers into. Empty means the
    /// server default, filled in by admission.
    #[serde(default)]
    pub cluster: String,
    #[serde(default)]
    pub port_label: String,
    #[serde(default, skip_serializing_if = "super::is_empty_vec")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "super::is_empty_vec")]
    pub checks: Vec<Check>,
    #[serde(default)]
    pub connect: Option<Connect>,
    #[serde(default)]
    pub identity: Option<WorkloadIdentity>,
    /// Set when the service is defined at task level.
    #[serde(default)]
    pub task_name: String,
}

/// A network port request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Port {
    pub label: String,
    #[serde(default)]
    pub value: u16,
    #[serde(default)]
    pub to: i32,
}

/// A network block of a task group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Network {
    #[serde(default)]
    pub mode: String,
    #[serde(default, skip_serializing_if = "super::is_empty_vec")]
    pub dynamic_ports: Vec<Port>,
    #[serde(default, skip_serializing_if = "super::is_empty_vec")]
    pub reserved_ports: Vec<Port>,
}

/// A Vault block requesting secrets access for a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct VaultBlock {
    /// Which Vault cluster serves this task. Empty means the default.
    #[serde(default)]
    pub cluster: String,
    #[serde(default, skip_serializing_if = "super::is_empty_vec")]
    pub policies: Vec<String>,
    #[serde(default)]
    pub change_signal: Option<String>,
    #[serde(default, skip_serializing_if = "super::is_empty_vec")]
    pub entity_aliases: Vec<String>,
}

/// A rendered template block of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Template {
    #[serde(default)]
    pub dest_path: String,
    #[serde(default)]
    pub change_mode: String,
    #[serde(default)]
    pub change_signal: Option<String>,
}

/// A host-volume request made by a task group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct VolumeRequest {
    #[serde(rename = "type", default)]
    pub volume_type: String,
    #[serde(default)]
    pub source: String,
    /// Sticky volumes record a claim binding the group to the chosen
    /// host volume so future placements reuse it.
    #[serde(default)]
    pub sticky: bool,
    #[serde(default)]
    pub read_only: bool,
}

/// A single task within a group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Task {
    pub name: String,
    pub driver: String,
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default, skip_serializing_if = "super::is_empty_vec")]
    pub constraints: Vec<Constraint>,
    #[serde(default, skip_serializing_if = "super::is_empty_vec")]
    pub services: Vec<Service>,
    #[serde(default)]
    pub vault: Option<VaultBlock>,
    #[serde(default, skip_serializing_if = "super::is_empty_vec")]
    pub templates: Vec<Template>,
    #[serde(default, skip_serializing_if = "super::is_empty_vec")]
    pub identities: Vec<WorkloadIdentity>,
    #[serde(default)]
    pub kill_signal: Option<String>,
    /// The Consul cluster serving this task's service mesh and templates.
    #[serde(default)]
    pub consul_cluster: String,
    /// The Consul admin partition the task must land in, when set.
    #[serde(default)]
    pub consul_partition: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub meta: HashMap<String, String>,
}

/// A set of tasks co-scheduled on one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TaskGroup {
    pub name: String,
    #[serde(default = "default_count")]
    pub count: u32,
    #[serde(default, skip_serializing_if = "super::is_empty_vec")]
    pub constraints: Vec<Constraint>,
    #[serde(default, skip_serializing_if = "super::is_empty_vec")]
    pub networks: Vec<Network>,
    #[serde(default, skip_serializing_if = "super::is_empty_vec")]
    pub services: Vec<Service>,
    #[serde(default, skip_serializing_if = "super::is_empty_vec")]
    pub tasks: Vec<Task>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub volumes: HashMap<String, VolumeRequest>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub meta: HashMap<String, String>,
}

fn default_count() -> u32 {
    1
}

impl TaskGroup {
    pub fn task(&self, name: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.name == name)
    }
}

/// The declarative specification a user submits.
///
/// Immutable after registration except through re-registration (which bumps
/// `version`) or a revert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Job {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(rename = "type", default)]
    pub job_type: String,
    #[serde(default)]
    pub priority: u8,
    #[serde(default, skip_serializing_if = "super::is_empty_vec")]
    pub datacenters: Vec<String>,
    #[serde(default)]
    pub node_pool: String,
    #[serde(default, skip_serializing_if = "super::is_empty_vec")]
    pub constraints: Vec<Constraint>,
    #[serde(default, skip_serializing_if = "super::is_empty_vec")]
    pub task_groups: Vec<TaskGroup>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub meta: HashMap<String, String>,
    /// The raw submitted source text, when the gateway passes it along.
    #[serde(default)]
    pub source: Option<String>,
    /// A Vault token submitted alongside the job for policy checking.
    /// Never persisted; cleared by admission before the raft write.
    #[serde(default)]
    pub vault_token: Option<String>,
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub stable: bool,
    #[serde(default)]
    pub status: JobStatus,
    #[serde(default)]
    pub submit_time: i64,
    #[serde(default)]
    pub create_index: u64,
    #[serde(default)]
    pub modify_index: u64,
}

impl Job {
    pub fn task_group(&self, name: &str) -> Option<&TaskGroup> {
        self.task_groups.iter().find(|g| g.name == name)
    }

    /// Iterates over every task in every group.
    pub fn tasks(&self) -> impl Iterator<Item = (&TaskGroup, &Task)> {
        self.task_groups
            .iter()
            .flat_map(|g| g.tasks.iter().map(move |t| (g, t)))
    }

    /// Compares two jobs as specifications, ignoring bookkeeping fields.
    /// Used to decide whether a revert to a prior version is a noop.
    pub fn spec_equal(&self, other: &Job) -> bool {
        let mut a = self.clone();
        let mut b = other.clone();
        for j in [&mut a, &mut b] {
            j.version = 0;
            j.stable = false;
            j.status = JobStatus::Pending;
            j.submit_time = 0;
            j.create_index = 0;
            j.modify_index = 0;
            j.vault_token = None;
        }
        a == b
    }

    /// True when any task in the job carries a Vault block.
    pub fn uses_vault(&self) -> bool {
        self.tasks().any(|(_, t)| t.vault.is_some())
    }
}
