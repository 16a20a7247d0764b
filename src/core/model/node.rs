// src/core/model/node.rs

//! Worker-node records registered by node agents.

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
pub enum NodeStatus {
    #[default]
    Initializing,
    Ready,
    Down,
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Node {
    pub id: String,
    /// The node's bearer secret, presented on node-originated RPCs.
    /// Redacted from read responses by the RPC layer.
    #[serde(default)]
    pub secret_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub datacenter: String,
    #[serde(default)]
    pub node_pool: String,
    #[serde(default)]
    pub status: NodeStatus,
    /// Fingerprinted attributes, e.g. `os.signals`, `consul.version`.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub attributes: HashMap<String, String>,
    #[serde(default)]
    pub drain: bool,
    #[serde(default)]
    pub create_index: u64,
    #[serde(default)]
    pub modify_index: u64,
}

impl Node {
    /// A copy safe to return to non-node callers.
    pub fn sanitized(&self) -> Node {
        let mut n = self.clone();
        n.secret_id = String::new();
        n
    }
}
