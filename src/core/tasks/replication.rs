// src/core/tasks/replication.rs

//! Federated-region replication: pull ACL policies, roles, global tokens,
//! and namespaces from the authoritative region and mirror them into the
//! local raft log, with backoff on failure.

use crate::core::FlotillaError;
use crate::core::model::{AclPolicy, AclRole, AclToken, Namespace};
use crate::core::protocol::RpcRequest;
use crate::core::raft::RaftRequest;
use crate::core::rpc::forward::RpcClient;
use crate::core::state::ServerState;
use rand::Rng;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, warn};

const MIN_BACKOFF: Duration = Duration::from_secs(1);

/// Calls a List RPC on the authoritative region and extracts `field` from
/// the result.
async fn fetch_remote<T: DeserializeOwned>(
    state: &Arc<ServerState>,
    method: &str,
    field: &str,
) -> Result<T, FlotillaError> {
    let config = state.config();
    let authoritative = config.authoritative_region().to_string();
    let Some(addr) = state.router.pick_server(&authoritative) else {
        return Err(FlotillaError::ReplicationError(format!(
            "no known servers in authoritative region {authoritative:?}"
        )));
    };

    let request = RpcRequest {
        method: method.to_string(),
        region: authoritative,
        auth_token: config.replication.token.clone(),
        forwarded: true,
        ..Default::default()
    };
    let mut client = RpcClient::connect(&addr).await?;
    let (_, result) = client.call(&request).await?.into_result()?;
    let value = result
        .get(field)
        .cloned()
        .unwrap_or(serde_json::Value::Null);
    serde_json::from_value(value)
        .map_err(|e| FlotillaError::ReplicationError(format!("decode {method}: {e}")))
}

/// One replication round over every replicated table.
async fn replicate_once(state: &Arc<ServerState>) -> Result<(), FlotillaError> {
    let policies: Vec<AclPolicy> = fetch_remote(state, "ACL.ListPolicies", "policies").await?;
    if !policies.is_empty() {
        state.raft.apply(RaftRequest::AclPolicyUpsert { policies })?;
    }

    let roles: Vec<AclRole> = fetch_remote(state, "ACL.ListRoles", "roles").await?;
    if !roles.is_empty() {
        state.raft.apply(RaftRequest::AclRoleUpsert { roles })?;
    }

    let tokens: Vec<AclToken> = fetch_remote(state, "ACL.ListTokens", "tokens").await?;
    let global: Vec<AclToken> = tokens.into_iter().filter(|t| t.global).collect();
    if !global.is_empty() {
        state.raft.apply(RaftRequest::AclTokenUpsert { tokens: global })?;
    }

    let namespaces: Vec<Namespace> = fetch_remote(state, "Namespace.List", "namespaces").await?;
    if !namespaces.is_empty() {
        state.raft.apply(RaftRequest::NamespaceUpsert { namespaces })?;
    }

    fetch_missing_key_material(state).await?;
    Ok(())
}

/// Pulls material for replicated key metadata this server has no local key
/// file for.
async fn fetch_missing_key_material(state: &Arc<ServerState>) -> Result<(), FlotillaError> {
    use base64::{Engine as _, engine::general_purpose::STANDARD};

    let local: std::collections::HashSet<String> =
        state.key_manager.key_ids().into_iter().collect();
    let missing: Vec<crate::core::model::RootKeyMeta> = {
        let snapshot = state.store.snapshot();
        snapshot
            .root_key_metas(None)
            .iter()
            .filter(|m| !local.contains(&m.id))
            .map(|m| (**m).clone())
            .collect()
    };

    for meta in missing {
        let config = state.config();
        let authoritative = config.authoritative_region().to_string();
        let Some(addr) = state.router.pick_server(&authoritative) else {
            return Err(FlotillaError::ReplicationError(format!(
                "no known servers in authoritative region {authoritative:?}"
            )));
        };
        let request = RpcRequest {
            method: "Keyring.Fetch".to_string(),
            region: authoritative,
            auth_token: config.replication.token.clone(),
            forwarded: true,
            payload: serde_json::json!({ "key_id": meta.id }),
            ..Default::default()
        };
        let mut client = RpcClient::connect(&addr).await?;
        let (_, result) = client.call(&request).await?.into_result()?;
        let material = result
            .get("material")
            .and_then(|m| m.as_str())
            .and_then(|m| STANDARD.decode(m.as_bytes()).ok())
            .ok_or_else(|| {
                FlotillaError::ReplicationError(format!("bad key material for {:?}", meta.id))
            })?;
        state
            .key_manager
            .add_fetched_key(crate::core::model::RootKey { meta, material })
            .await?;
    }
    Ok(())
}

/// The replicator loop. Only federated regions run it; the authoritative
/// region is the source of truth and has nothing to pull.
pub async fn run(state: Arc<ServerState>, mut shutdown_rx: broadcast::Receiver<()>) {
    if state.config().is_authoritative() {
        debug!("authoritative region; replication task idle");
        return;
    }
    let max_backoff = state.config().replication.backoff;
    let mut backoff = MIN_BACKOFF;

    loop {
        let wait = if state.raft.is_leader() {
            match replicate_once(&state).await {
                Ok(()) => {
                    backoff = MIN_BACKOFF;
                    max_backoff
                }
                Err(e) => {
                    warn!("replication round failed: {e}");
                    backoff = (backoff * 2).min(max_backoff);
                    backoff
                }
            }
        } else {
            // Followers wait for leadership before replicating.
            max_backoff
        };

        // Jitter keeps a fleet of federated servers from thundering.
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..250));
        tokio::select! {
            _ = tokio::time::sleep(wait + jitter) => {}
            _ = shutdown_rx.recv() => {
                debug!("replication task shutting down");
                return;
            }
        }
    }
}
