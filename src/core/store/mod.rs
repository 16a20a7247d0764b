// src/core/store/mod.rs

//! The in-memory indexed state store.
//!
//! All cluster state lives here, in typed tables of `Arc` rows behind a
//! single `parking_lot::RwLock`. The FSM is the sole writer; every write
//! carries the committed log index, which becomes the table index and the
//! row's `modify_index`. Readers take `snapshot()` (a read guard, O(1) and
//! consistent) and never observe partial writes.

use crate::core::model::*;
use parking_lot::{RwLock, RwLockReadGuard};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

pub mod acl;
pub mod allocs;
pub mod blocking;
pub mod deployments;
pub mod evals;
pub mod jobs;
pub mod namespaces;
pub mod nodes;
pub mod services;
pub mod snapshot;
pub mod watch;

pub use blocking::run_blocking_query;
pub use watch::{WatchRegistry, WatchSet, WatchToken};

/// Every table held by the store. Also the snapshot section tags, so the
/// variants are explicitly numbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TableId {
    Nodes = 0,
    Jobs = 1,
    JobVersions = 2,
    Allocations = 3,
    Evaluations = 4,
    Deployments = 5,
    AclPolicies = 6,
    AclRoles = 7,
    AclTokens = 8,
    Namespaces = 9,
    Services = 10,
    RootKeys = 11,
    VolumeClaims = 12,
}

/// How many historical versions of a job are retained for reverts.
pub const MAX_JOB_VERSIONS: usize = 6;

/// The mutable interior of the store. Secondary indexes are plain maps kept
/// in lockstep with the primary tables by the apply methods.
#[derive(Debug, Default)]
pub struct StoreInner {
    pub(super) latest_index: u64,
    pub(super) table_indexes: HashMap<TableId, u64>,

    pub(super) nodes: BTreeMap<String, Arc<Node>>,

    /// Jobs by (namespace, job id).
    pub(super) jobs: BTreeMap<(String, String), Arc<Job>>,
    /// Retained versions by (namespace, job id), newest first.
    pub(super) job_versions: BTreeMap<(String, String), Vec<Arc<Job>>>,

    pub(super) allocs: BTreeMap<String, Arc<Allocation>>,
    pub(super) allocs_by_job: HashMap<(String, String), BTreeSet<String>>,
    pub(super) allocs_by_deployment: HashMap<String, BTreeSet<String>>,
    pub(super) allocs_by_node: HashMap<String, BTreeSet<String>>,

    pub(super) evals: BTreeMap<String, Arc<Evaluation>>,
    pub(super) evals_by_job: HashMap<(String, String), BTreeSet<String>>,

    pub(super) deployments: BTreeMap<String, Arc<Deployment>>,
    pub(super) deployments_by_job: HashMap<(String, String), BTreeSet<String>>,

    pub(super) acl_policies: BTreeMap<String, Arc<AclPolicy>>,
    pub(super) acl_roles: BTreeMap<String, Arc<AclRole>>,
    pub(super) acl_roles_by_name: HashMap<String, String>,
    pub(super) acl_tokens: BTreeMap<String, Arc<AclToken>>,
    pub(super) acl_tokens_by_secret: HashMap<[u8; 32], String>,

    pub(super) namespaces: BTreeMap<String, Arc<Namespace>>,

    /// Service registrations by (namespace, service name, id); the compound
    /// key doubles as the by-name range index.
    pub(super) services: BTreeMap<(String, String, String), Arc<ServiceRegistration>>,
    pub(super) services_by_id: HashMap<String, (String, String, String)>,
    pub(super) services_by_alloc: HashMap<String, Vec<(String, String, String)>>,

    pub(super) root_keys: BTreeMap<String, Arc<RootKeyMeta>>,

    /// Volume claims by (namespace, job, group, volume name).
    pub(super) volume_claims: BTreeMap<(String, String, String, String), Arc<TaskGroupHostVolumeClaim>>,
    pub(super) volume_claims_by_id: HashMap<String, (String, String, String, String)>,
}

impl StoreInner {
    /// Bumps the global and per-table high-water indexes. The FSM guarantees
    /// `index` is monotonic; a regression here signals log corruption.
    pub(super) fn bump(&mut self, table: TableId, index: u64) {
        debug_assert!(index >= self.latest_index, "non-monotonic store write");
        self.latest_index = self.latest_index.max(index);
        let entry = self.table_indexes.entry(table).or_insert(0);
        *entry = (*entry).max(index);
    }

    pub(super) fn table_index(&self, table: TableId) -> u64 {
        self.table_indexes.get(&table).copied().unwrap_or(0)
    }
}

/// The state store: the locked interior plus the watch registry.
#[derive(Debug, Default)]
pub struct StateStore {
    inner: RwLock<StoreInner>,
    watches: WatchRegistry,
}

/// A consistent, read-only view of the store. Holds the read lock; keep it
/// short-lived and never across an await point.
pub struct StateSnapshot<'a> {
    pub(super) inner: RwLockReadGuard<'a, StoreInner>,
    pub(super) store: &'a StateStore,
}

impl StateStore {
    pub fn new() -> Self {
        Default::default()
    }

    /// An O(1) consistent read view.
    pub fn snapshot(&self) -> StateSnapshot<'_> {
        StateSnapshot {
            inner: self.inner.read(),
            store: self,
        }
    }

    pub(super) fn watches(&self) -> &WatchRegistry {
        &self.watches
    }

    /// The global high-water index.
    pub fn latest_index(&self) -> u64 {
        self.inner.read().latest_index
    }

    /// The high-water index of one table.
    pub fn table_index(&self, table: TableId) -> u64 {
        self.inner.read().table_index(table)
    }

    /// The highest index across the three ACL tables, used by the resolver
    /// to detect stale cache entries.
    pub fn acl_index(&self) -> u64 {
        let inner = self.inner.read();
        inner
            .table_index(TableId::AclPolicies)
            .max(inner.table_index(TableId::AclRoles))
            .max(inner.table_index(TableId::AclTokens))
    }

    /// Runs a mutation under the write lock and wakes the invalidated
    /// watchers after the lock is released.
    pub(super) fn write<R>(
        &self,
        op: impl FnOnce(&mut StoreInner) -> Result<(R, Vec<(TableId, Vec<String>)>), crate::core::FlotillaError>,
    ) -> Result<R, crate::core::FlotillaError> {
        let (result, wakes) = {
            let mut inner = self.inner.write();
            op(&mut inner)?
        };
        for (table, keys) in &wakes {
            self.watches.wake(*table, keys);
        }
        self.watches.purge();
        Ok(result)
    }

    /// Replaces the entire interior, used by snapshot restore. Every
    /// watcher is woken since any query result may have changed.
    pub(crate) fn replace(&self, new_inner: StoreInner) {
        {
            let mut inner = self.inner.write();
            *inner = new_inner;
        }
        self.watches.wake_all();
    }
}

pub(crate) const ALL_TABLES: [TableId; 13] = [
    TableId::Nodes,
    TableId::Jobs,
    TableId::JobVersions,
    TableId::Allocations,
    TableId::Evaluations,
    TableId::Deployments,
    TableId::AclPolicies,
    TableId::AclRoles,
    TableId::AclTokens,
    TableId::Namespaces,
    TableId::Services,
    TableId::RootKeys,
    TableId::VolumeClaims,
];

impl<'a> StateSnapshot<'a> {
    /// Arms a token when the caller is a blocking query.
    pub(super) fn maybe_arm(&self, ws: Option<&mut WatchSet>, token: WatchToken) {
        if let Some(ws) = ws {
            ws.arm(self.store.watches(), token);
        }
    }

    pub fn latest_index(&self) -> u64 {
        self.inner.latest_index
    }

    pub fn table_index(&self, table: TableId) -> u64 {
        self.inner.table_index(table)
    }
}
