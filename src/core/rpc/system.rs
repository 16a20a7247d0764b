// src/core/rpc/system.rs

//! Management-only system RPCs: forced garbage collection and job-summary
//! reconciliation.

use super::AuthContext;
use crate::core::FlotillaError;
use crate::core::protocol::{RpcRequest, RpcResponse};
use crate::core::raft::RaftRequest;
use crate::core::state::ServerState;
use crate::core::tasks::gc;
use std::sync::Arc;

/// Forces a full GC pass, ignoring age thresholds.
pub async fn garbage_collect(
    state: &Arc<ServerState>,
    ctx: &AuthContext,
    _request: &RpcRequest,
) -> Result<RpcResponse, FlotillaError> {
    ctx.require_management()?;
    let collected = gc::collect(state, true)?;
    Ok(RpcResponse::ok(
        state.store.latest_index(),
        &serde_json::json!({
            "evals": collected.evals,
            "deployments": collected.deployments,
            "jobs": collected.jobs,
            "nodes": collected.nodes,
        }),
    ))
}

/// Recomputes every job's status from its live allocations.
pub async fn reconcile_job_summaries(
    state: &Arc<ServerState>,
    ctx: &AuthContext,
    _request: &RpcRequest,
) -> Result<RpcResponse, FlotillaError> {
    ctx.require_management()?;
    let applied = state.raft.apply(RaftRequest::JobStatusReconcile)?;
    Ok(RpcResponse::ok(
        applied.index,
        &applied.output.unwrap_or(serde_json::Value::Null),
    ))
}
