// src/core/state/mod.rs

//! Defines the central `ServerState` struct, holding all shared
//! server-wide state. Wrapped in an `Arc` and passed to every connection
//! handler and background task.

use crate::config::Config;
use crate::core::FlotillaError;
use crate::core::acl::AclResolver;
use crate::core::admission::AdmissionPipeline;
use crate::core::admission::vault::VaultTokenLookup;
use crate::core::keyring::{KeyManager, Keystore};
use crate::core::model::{RootKeyAlgorithm, generate_id};
use crate::core::raft::fsm::Fsm;
use crate::core::raft::{RaftHandle, RaftRequest};
use crate::core::rpc::forward::RegionRouter;
use crate::core::store::StateStore;
use crate::core::store::blocking::QueryOptions;
use crate::core::stream::{EventBroker, MonitorSink};
use parking_lot::RwLock;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// The central struct holding all shared, server-wide state.
pub struct ServerState {
    /// The runtime configuration; a lock so administrative RPCs can adjust
    /// limits without a restart.
    pub config: RwLock<Config>,
    pub store: Arc<StateStore>,
    pub raft: Arc<RaftHandle>,
    pub acl: Arc<AclResolver>,
    pub broker: Arc<EventBroker>,
    pub key_manager: Arc<KeyManager>,
    pub admission: AdmissionPipeline,
    pub router: Arc<RegionRouter>,
    /// The bootstrap leader secret; resolves to management for the
    /// lifetime of this server process.
    pub leader_token: String,
    /// Mirror of formatted log lines for `Agent.Monitor`.
    pub monitor: MonitorSink,
}

impl ServerState {
    /// Initializes the entire server state from the given configuration.
    /// This is the main factory function for creating the shared context.
    pub async fn initialize(
        config: Config,
        monitor: MonitorSink,
        vault: Option<Arc<dyn VaultTokenLookup>>,
    ) -> Result<Arc<Self>, FlotillaError> {
        let store = Arc::new(StateStore::new());
        let broker = Arc::new(EventBroker::new(
            config.event_broker.enabled,
            config.event_broker.event_buffer_size,
        ));
        let raft = Arc::new(RaftHandle::new(Fsm::new(store.clone()), broker.clone()));

        let keystore = Keystore::open(Path::new(&config.data_dir)).await?;
        let key_manager = Arc::new(KeyManager::open(keystore).await?);

        let leader_token = generate_id();
        let acl = Arc::new(AclResolver::new(
            store.clone(),
            key_manager.clone(),
            leader_token.clone(),
        ));

        let admission = AdmissionPipeline::new(store.clone(), vault);
        let router = Arc::new(RegionRouter::new(
            config.region.clone(),
            config.regions.clone(),
        ));

        let state = Arc::new(Self {
            config: RwLock::new(config),
            store,
            raft,
            acl,
            broker,
            key_manager,
            admission,
            router,
            leader_token,
            monitor,
        });

        state.establish_leadership().await?;
        Ok(state)
    }

    /// Single-server bootstrap: take leadership, seed the default
    /// namespace, reconcile the keystore with replicated metadata, and
    /// mint the first root key when none exists.
    async fn establish_leadership(&self) -> Result<(), FlotillaError> {
        self.raft.set_leader(true);
        self.raft.bootstrap()?;

        let metas: Vec<_> = {
            let snapshot = self.store.snapshot();
            snapshot
                .root_key_metas(None)
                .iter()
                .map(|m| (**m).clone())
                .collect()
        };
        let missing = self.key_manager.pair_with_metas(&metas);
        if !missing.is_empty() {
            info!(
                count = missing.len(),
                "root keys pending fetch from the authoritative region"
            );
        }

        if self.key_manager.active_key().is_none() {
            let meta = self.key_manager.rotate(RootKeyAlgorithm::Aes256Gcm).await?;
            self.raft.apply(RaftRequest::RootKeyMetaUpsert { meta })?;
            info!("minted initial root key");
        }
        Ok(())
    }

    /// A point-in-time copy of the configuration.
    pub fn config(&self) -> Config {
        self.config.read().clone()
    }

    pub fn acl_enabled(&self) -> bool {
        self.config.read().acl.enabled
    }

    pub fn region(&self) -> String {
        self.config.read().region.clone()
    }

    /// Blocking-query options from request fields, clamped by config.
    pub fn query_opts(&self, min_query_index: u64, max_query_time_ms: Option<u64>) -> QueryOptions {
        let window = self.config.read().limits.blocking_query_window;
        QueryOptions {
            min_query_index,
            max_query_time: Some(
                max_query_time_ms
                    .map(Duration::from_millis)
                    .unwrap_or(window)
                    .min(window),
            ),
        }
    }
}

impl std::fmt::Debug for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerState")
            .field("region", &self.router.local_region())
            .field("is_leader", &self.raft.is_leader())
            .finish()
    }
}
