// src/core/model/mod.rs

//! The replicated data model: every entity held by the state store.
//!
//! All entities carry `create_index`/`modify_index` pairs stamped by the FSM.
//! Rows handed out by the store are immutable; mutation happens by cloning,
//! editing, and committing a new row through the consensus log.

pub mod acl;
pub mod alloc;
pub mod claims;
pub mod deployment;
pub mod eval;
pub mod job;
pub mod keyring;
pub mod namespace;
pub mod node;
pub mod service;
pub mod volume;

pub use acl::{AclPolicy, AclRole, AclToken, JobScope, RoleLink, TokenType};
pub use alloc::{AllocDeploymentStatus, Allocation};
pub use claims::IdentityClaims;
pub use deployment::{Deployment, DeploymentStatus, DeploymentTaskGroupState};
pub use eval::{EvalStatus, Evaluation};
pub use job::{
    Check, Connect, Constraint, ExposePath, Job, JobStatus, Network, Port, Service,
    ServiceProvider, SidecarService, SidecarProxy, Task, TaskGroup, Template, VaultBlock,
    VolumeRequest, WorkloadIdentity,
};
pub use keyring::{RootKey, RootKeyAlgorithm, RootKeyMeta, RootKeyState};
pub use namespace::{Namespace, NamespaceCapabilities};
pub use node::{Node, NodeStatus};
pub use service::ServiceRegistration;
pub use volume::TaskGroupHostVolumeClaim;

/// Generates a fresh v4 UUID string, the id format for every entity.
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Serde helper: skip serializing empty vectors.
pub(crate) fn is_empty_vec<T>(v: &Vec<T>) -> bool {
    v.is_empty()
}
