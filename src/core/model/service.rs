// src/core/model/service.rs

//! Service registrations reported by node agents.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ServiceRegistration {
    pub id: String,
    pub service_name: String,
    #[serde(default)]
    pub namespace: String,
    pub node_id: String,
    #[serde(default)]
    pub datacenter: String,
    #[serde(default)]
    pub job_id: String,
    #[serde(default)]
    pub alloc_id: String,
    #[serde(default, skip_serializing_if = "super::is_empty_vec")]
    pub tags: Vec<String>,
    pub address: String,
    pub port: u16,
    #[serde(default)]
    pub create_index: u64,
    #[serde(default)]
    pub modify_index: u64,
}

impl ServiceRegistration {
    pub fn validate(&self) -> Result<(), String> {
        if self.id.is_empty() {
            return Err("service registration id is required".to_string());
        }
        if self.service_name.is_empty() {
            return Err("service name is required".to_string());
        }
        if self.node_id.is_empty() {
            return Err("node id is required".to_string());
        }
        if self.address.is_empty() {
            return Err("service address is required".to_string());
        }
        Ok(())
    }
}
