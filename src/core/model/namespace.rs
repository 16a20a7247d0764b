// src/core/model/namespace.rs

//! Namespaces: the tenancy boundary for all tenant-scoped tables.

use serde::{Deserialize, Serialize};

/// The undeletable namespace every cluster starts with.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Capabilities restricting what jobs in a namespace may use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct NamespaceCapabilities {
    #[serde(default, skip_serializing_if = "super::is_empty_vec")]
    pub enabled_task_drivers: Vec<String>,
    #[serde(default, skip_serializing_if = "super::is_empty_vec")]
    pub disabled_task_drivers: Vec<String>,
    #[serde(default, skip_serializing_if = "super::is_empty_vec")]
    pub allowed_node_pools: Vec<String>,
}

impl NamespaceCapabilities {
    /// Whether a task driver is usable under these capabilities.
    pub fn allows_driver(&self, driver: &str) -> bool {
        if self
            .disabled_task_drivers
            .iter()
            .any(|d| d.eq_ignore_ascii_case(driver))
        {
            return false;
        }
        if self.enabled_task_drivers.is_empty() {
            return true;
        }
        self.enabled_task_drivers
            .iter()
            .any(|d| d.eq_ignore_ascii_case(driver))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Namespace {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub capabilities: Option<NamespaceCapabilities>,
    #[serde(default)]
    pub quota: Option<String>,
    #[serde(default)]
    pub create_index: u64,
    #[serde(default)]
    pub modify_index: u64,
}

impl Namespace {
    pub fn default_namespace() -> Self {
        Self {
            name: DEFAULT_NAMESPACE.to_string(),
            description: "Default shared namespace".to_string(),
            ..Default::default()
        }
    }

    /// Name validation applied at upsert.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("namespace name is required".to_string());
        }
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(format!("invalid namespace name {:?}", self.name));
        }
        Ok(())
    }
}
