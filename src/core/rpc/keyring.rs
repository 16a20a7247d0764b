// src/core/rpc/keyring.rs

//! Root-key RPCs: rotation (management-only) and listing.

use super::{AuthContext, parse_payload_or_default};
use crate::core::FlotillaError;
use crate::core::model::RootKeyAlgorithm;
use crate::core::protocol::{RpcRequest, RpcResponse};
use crate::core::raft::RaftRequest;
use crate::core::state::ServerState;
use crate::core::store::{TableId, run_blocking_query};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize, Default)]
struct RotateRequest {
    #[serde(default)]
    algorithm: Option<RootKeyAlgorithm>,
}

/// Rotation: generate and persist material locally, then replicate the new
/// active metadata. The FSM applier demotes the previous active key.
pub async fn rotate(
    state: &Arc<ServerState>,
    ctx: &AuthContext,
    request: &RpcRequest,
) -> Result<RpcResponse, FlotillaError> {
    ctx.require_management()?;
    let RotateRequest { algorithm } = parse_payload_or_default(request)?;

    let meta = state
        .key_manager
        .rotate(algorithm.unwrap_or_default())
        .await?;
    let applied = state
        .raft
        .apply(RaftRequest::RootKeyMetaUpsert { meta: meta.clone() })?;
    Ok(RpcResponse::ok(
        applied.index,
        &serde_json::json!({ "key_id": meta.id }),
    ))
}

#[derive(Debug, Deserialize)]
struct FetchRequest {
    key_id: String,
}

/// Hands a peer server the material for one key. Management-only; used by
/// federated regions whose replicated metadata references a key they have
/// no material for.
pub async fn fetch(
    state: &Arc<ServerState>,
    ctx: &AuthContext,
    request: &RpcRequest,
) -> Result<RpcResponse, FlotillaError> {
    ctx.require_management()?;
    let FetchRequest { key_id } = super::parse_payload(request)?;
    let Some(key) = state.key_manager.key_by_id(&key_id) else {
        return Err(FlotillaError::NotFound(format!("root key {key_id:?}")));
    };
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    Ok(RpcResponse::ok(
        state.store.latest_index(),
        &serde_json::json!({
            "meta": key.meta,
            "material": STANDARD.encode(&key.material),
        }),
    ))
}

pub async fn list(
    state: &Arc<ServerState>,
    ctx: &AuthContext,
    request: &RpcRequest,
) -> Result<RpcResponse, FlotillaError> {
    if !ctx.acl.allow_operator_read() {
        return Err(FlotillaError::PermissionDenied);
    }

    let opts = state.query_opts(request.min_query_index, request.max_query_time_ms);
    let (index, metas) = run_blocking_query(&state.store, opts, |snapshot, ws| {
        let metas = snapshot.root_key_metas(Some(ws));
        Ok((snapshot.table_index(TableId::RootKeys), metas))
    })
    .await?;

    let keys: Vec<_> = metas.iter().map(|m| (**m).clone()).collect();
    Ok(RpcResponse::ok(index, &serde_json::json!({ "keys": keys })))
}
