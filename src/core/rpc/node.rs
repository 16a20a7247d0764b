// src/core/rpc/node.rs

//! Node lifecycle RPCs (`Client.*`), authenticated by node secret or node
//! ACL capabilities.

use super::{AuthContext, parse_payload};
use crate::core::FlotillaError;
use crate::core::model::{Node, NodeStatus};
use crate::core::protocol::{RpcRequest, RpcResponse};
use crate::core::raft::RaftRequest;
use crate::core::state::ServerState;
use crate::core::store::run_blocking_query;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    node: Node,
}

#[derive(Debug, Deserialize)]
struct NodeSpecificRequest {
    node_id: String,
}

#[derive(Debug, Deserialize)]
struct UpdateStatusRequest {
    node_id: String,
    status: NodeStatus,
}

#[derive(Debug, Serialize)]
struct NodeResponse {
    node: Option<Node>,
}

pub async fn register(
    state: &Arc<ServerState>,
    ctx: &AuthContext,
    request: &RpcRequest,
) -> Result<RpcResponse, FlotillaError> {
    let RegisterRequest { node } = parse_payload(request)?;
    if node.id.is_empty() || node.secret_id.is_empty() {
        return Err(FlotillaError::InvalidRequest(
            "node id and secret are required".to_string(),
        ));
    }
    // A node may register itself with its own secret; anything else needs
    // node write.
    if ctx.secret != node.secret_id {
        ctx.require_node_write()?;
    }

    let applied = state.raft.apply(RaftRequest::NodeRegister { node: node.clone() })?;
    // This server now owns the node's session.
    state
        .router
        .node_sessions
        .register(&node.id, &state.config.read().bind_addr());
    Ok(RpcResponse::ok(applied.index, &serde_json::json!({})))
}

pub async fn deregister(
    state: &Arc<ServerState>,
    ctx: &AuthContext,
    request: &RpcRequest,
) -> Result<RpcResponse, FlotillaError> {
    let NodeSpecificRequest { node_id } = parse_payload(request)?;
    if ctx.node.as_ref().map(|n| n.id.as_str()) != Some(node_id.as_str()) {
        ctx.require_node_write()?;
    }
    let applied = state.raft.apply(RaftRequest::NodeDeregister {
        node_id: node_id.clone(),
    })?;
    state.router.node_sessions.deregister(&node_id);
    Ok(RpcResponse::ok(applied.index, &serde_json::json!({})))
}

pub async fn update_status(
    state: &Arc<ServerState>,
    ctx: &AuthContext,
    request: &RpcRequest,
) -> Result<RpcResponse, FlotillaError> {
    let UpdateStatusRequest { node_id, status } = parse_payload(request)?;
    if ctx.node.as_ref().map(|n| n.id.as_str()) != Some(node_id.as_str()) {
        ctx.require_node_write()?;
    }
    let applied = state
        .raft
        .apply(RaftRequest::NodeUpdateStatus { node_id, status })?;
    Ok(RpcResponse::ok(applied.index, &serde_json::json!({})))
}

pub async fn get_node(
    state: &Arc<ServerState>,
    ctx: &AuthContext,
    request: &RpcRequest,
) -> Result<RpcResponse, FlotillaError> {
    let NodeSpecificRequest { node_id } = parse_payload(request)?;
    let is_self = ctx.node.as_ref().map(|n| n.id.as_str()) == Some(node_id.as_str());
    if !is_self {
        ctx.require_node_read()?;
    }
    let reveal_secret = is_self || ctx.acl.is_management();

    let opts = state.query_opts(request.min_query_index, request.max_query_time_ms);
    let (index, node) = run_blocking_query(&state.store, opts, |snapshot, ws| {
        let node = snapshot.node_by_id(Some(ws), &node_id);
        Ok((
            snapshot.table_index(crate::core::store::TableId::Nodes),
            node,
        ))
    })
    .await?;

    let node = node.map(|n| {
        if reveal_secret {
            (*n).clone()
        } else {
            n.sanitized()
        }
    });
    Ok(RpcResponse::ok(index, &NodeResponse { node }))
}
