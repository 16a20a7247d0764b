// src/core/store/nodes.rs

//! Worker-node table, plus root-key metadata and volume-claim tables (the
//! remaining small tables share this module).

use super::{StateSnapshot, StateStore, TableId, WatchSet, WatchToken};
use crate::core::FlotillaError;
use crate::core::model::{
    Node, NodeStatus, RootKeyMeta, RootKeyState, TaskGroupHostVolumeClaim,
};
use std::sync::Arc;

impl StateStore {
    pub fn upsert_node(&self, index: u64, mut node: Node) -> Result<(), FlotillaError> {
        self.write(|inner| {
            if node.id.is_empty() || node.secret_id.is_empty() {
                return Err(FlotillaError::InvalidRequest(
                    "node id and secret are required".to_string(),
                ));
            }
            if let Some(existing) = inner.nodes.get(&node.id) {
                if existing.secret_id != node.secret_id {
                    return Err(FlotillaError::PermissionDenied);
                }
                node.create_index = existing.create_index;
            } else {
                node.create_index = index;
            }
            node.modify_index = index;
            let id = node.id.clone();
            inner.nodes.insert(id.clone(), Arc::new(node));
            inner.bump(TableId::Nodes, index);
            Ok(((), vec![(TableId::Nodes, vec![id])]))
        })
    }

    pub fn update_node_status(
        &self,
        index: u64,
        node_id: &str,
        status: NodeStatus,
    ) -> Result<(), FlotillaError> {
        self.write(|inner| {
            let Some(existing) = inner.nodes.get(node_id).cloned() else {
                return Err(FlotillaError::NotFound(format!("node {node_id:?}")));
            };
            let mut updated = (*existing).clone();
            updated.status = status;
            updated.modify_index = index;
            inner.nodes.insert(node_id.to_string(), Arc::new(updated));
            inner.bump(TableId::Nodes, index);
            Ok(((), vec![(TableId::Nodes, vec![node_id.to_string()])]))
        })
    }

    pub fn delete_node(&self, index: u64, node_id: &str) -> Result<(), FlotillaError> {
        self.write(|inner| {
            if inner.nodes.remove(node_id).is_none() {
                return Err(FlotillaError::NotFound(format!("node {node_id:?}")));
            }
            inner.allocs_by_node.remove(node_id);
            inner.bump(TableId::Nodes, index);
            Ok(((), vec![(TableId::Nodes, vec![node_id.to_string()])]))
        })
    }

    /// Inserts root-key metadata. Inserting an active meta demotes every
    /// other key in the same write, keeping exactly one active.
    pub fn upsert_root_key_meta(&self, index: u64, mut meta: RootKeyMeta) -> Result<(), FlotillaError> {
        self.write(|inner| {
            if meta.id.is_empty() {
                return Err(FlotillaError::InvalidRequest(
                    "root key id is required".to_string(),
                ));
            }
            let mut keys = vec![meta.id.clone()];
            if meta.is_active() {
                let to_demote: Vec<String> = inner
                    .root_keys
                    .values()
                    .filter(|m| m.is_active() && m.id != meta.id)
                    .map(|m| m.id.clone())
                    .collect();
                for id in to_demote {
                    let Some(existing) = inner.root_keys.get(&id).cloned() else {
                        continue;
                    };
                    let mut demoted = (*existing).clone();
                    demoted.state = RootKeyState::Inactive;
                    demoted.modify_index = index;
                    keys.push(id.clone());
                    inner.root_keys.insert(id, Arc::new(demoted));
                }
            }
            if let Some(existing) = inner.root_keys.get(&meta.id) {
                meta.create_index = existing.create_index;
            } else {
                meta.create_index = index;
            }
            meta.modify_index = index;
            inner.root_keys.insert(meta.id.clone(), Arc::new(meta));
            inner.bump(TableId::RootKeys, index);
            Ok(((), vec![(TableId::RootKeys, keys)]))
        })
    }

    pub fn delete_volume_claims(&self, index: u64, ids: &[String]) -> Result<(), FlotillaError> {
        self.write(|inner| {
            let mut removed = Vec::new();
            for id in ids {
                if let Some(key) = inner.volume_claims_by_id.remove(id) {
                    inner.volume_claims.remove(&key);
                    removed.push(id.clone());
                }
            }
            if !removed.is_empty() {
                inner.bump(TableId::VolumeClaims, index);
            }
            Ok(((), vec![(TableId::VolumeClaims, removed)]))
        })
    }
}

impl<'a> StateSnapshot<'a> {
    pub fn node_by_id(&self, ws: Option<&mut WatchSet>, id: &str) -> Option<Arc<Node>> {
        self.maybe_arm(ws, WatchToken::Row(TableId::Nodes, id.to_string()));
        self.inner.nodes.get(id).cloned()
    }

    /// Authenticates a node secret, returning the owning node.
    pub fn node_by_secret(&self, secret: &str) -> Option<Arc<Node>> {
        if secret.is_empty() {
            return None;
        }
        self.inner
            .nodes
            .values()
            .find(|n| n.secret_id == secret)
            .cloned()
    }

    pub fn nodes(&self, ws: Option<&mut WatchSet>) -> Vec<Arc<Node>> {
        self.maybe_arm(ws, WatchToken::Table(TableId::Nodes));
        self.inner.nodes.values().cloned().collect()
    }

    pub fn root_key_metas(&self, ws: Option<&mut WatchSet>) -> Vec<Arc<RootKeyMeta>> {
        self.maybe_arm(ws, WatchToken::Table(TableId::RootKeys));
        self.inner.root_keys.values().cloned().collect()
    }

    pub fn active_root_key_meta(&self) -> Option<Arc<RootKeyMeta>> {
        self.inner.root_keys.values().find(|m| m.is_active()).cloned()
    }

    pub fn root_key_meta_by_id(&self, id: &str) -> Option<Arc<RootKeyMeta>> {
        self.inner.root_keys.get(id).cloned()
    }

    pub fn volume_claims(&self, ws: Option<&mut WatchSet>) -> Vec<Arc<TaskGroupHostVolumeClaim>> {
        self.maybe_arm(ws, WatchToken::Table(TableId::VolumeClaims));
        self.inner.volume_claims.values().cloned().collect()
    }

    pub fn volume_claims_by_namespace(
        &self,
        ws: Option<&mut WatchSet>,
        namespace: &str,
    ) -> Vec<Arc<TaskGroupHostVolumeClaim>> {
        self.maybe_arm(ws, WatchToken::Table(TableId::VolumeClaims));
        self.inner
            .volume_claims
            .values()
            .filter(|c| c.namespace == namespace)
            .cloned()
            .collect()
    }
}
