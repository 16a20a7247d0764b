// src/core/rpc/namespace.rs

//! Namespace RPCs. Writes are management-only; reads filter to what the
//! caller can see.

use super::{AuthContext, parse_payload};
use crate::core::FlotillaError;
use crate::core::acl::NamespaceCapability;
use crate::core::model::Namespace;
use crate::core::protocol::{RpcRequest, RpcResponse};
use crate::core::raft::RaftRequest;
use crate::core::state::ServerState;
use crate::core::store::{TableId, run_blocking_query};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct UpsertRequest {
    namespaces: Vec<Namespace>,
}

#[derive(Debug, Deserialize)]
struct DeleteRequest {
    namespaces: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct GetRequest {
    name: String,
}

pub async fn upsert(
    state: &Arc<ServerState>,
    ctx: &AuthContext,
    request: &RpcRequest,
) -> Result<RpcResponse, FlotillaError> {
    ctx.require_management()?;
    let UpsertRequest { namespaces } = parse_payload(request)?;
    if namespaces.is_empty() {
        return Err(FlotillaError::InvalidRequest(
            "at least one namespace is required".to_string(),
        ));
    }
    let applied = state.raft.apply(RaftRequest::NamespaceUpsert { namespaces })?;
    Ok(RpcResponse::ok(applied.index, &serde_json::json!({})))
}

pub async fn delete(
    state: &Arc<ServerState>,
    ctx: &AuthContext,
    request: &RpcRequest,
) -> Result<RpcResponse, FlotillaError> {
    ctx.require_management()?;
    let DeleteRequest { namespaces } = parse_payload(request)?;
    let applied = state.raft.apply(RaftRequest::NamespaceDelete { names: namespaces })?;
    Ok(RpcResponse::ok(applied.index, &serde_json::json!({})))
}

pub async fn get_namespace(
    state: &Arc<ServerState>,
    ctx: &AuthContext,
    request: &RpcRequest,
) -> Result<RpcResponse, FlotillaError> {
    let GetRequest { name } = parse_payload(request)?;
    ctx.require_namespace_cap(&name, NamespaceCapability::READ_JOB)?;

    let opts = state.query_opts(request.min_query_index, request.max_query_time_ms);
    let (index, namespace) = run_blocking_query(&state.store, opts, |snapshot, ws| {
        let namespace = snapshot.namespace_by_name(Some(ws), &name);
        Ok((snapshot.table_index(TableId::Namespaces), namespace))
    })
    .await?;

    Ok(RpcResponse::ok(
        index,
        &serde_json::json!({ "namespace": namespace.map(|n| (*n).clone()) }),
    ))
}

pub async fn list(
    state: &Arc<ServerState>,
    ctx: &AuthContext,
    request: &RpcRequest,
) -> Result<RpcResponse, FlotillaError> {
    let opts = state.query_opts(request.min_query_index, request.max_query_time_ms);
    let (index, namespaces) = run_blocking_query(&state.store, opts, |snapshot, ws| {
        let namespaces = snapshot.namespaces(Some(ws));
        Ok((snapshot.table_index(TableId::Namespaces), namespaces))
    })
    .await?;

    // Visibility filter: only namespaces the caller can read appear.
    let visible: Vec<Namespace> = namespaces
        .iter()
        .filter(|n| {
            ctx.acl
                .allow_namespace_op(&n.name, NamespaceCapability::READ_JOB)
                || ctx
                    .acl
                    .allow_namespace_op(&n.name, NamespaceCapability::LIST_JOBS)
        })
        .map(|n| (**n).clone())
        .collect();
    Ok(RpcResponse::ok(
        index,
        &serde_json::json!({ "namespaces": visible }),
    ))
}
