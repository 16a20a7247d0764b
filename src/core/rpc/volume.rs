// src/core/rpc/volume.rs

//! Sticky host-volume claim RPCs.

use super::paginator::{PageRequest, paginate};
use super::{AuthContext, filter, parse_payload_or_default, request_namespace};
use crate::core::FlotillaError;
use crate::core::acl::NamespaceCapability;
use crate::core::model::TaskGroupHostVolumeClaim;
use crate::core::protocol::{RpcRequest, RpcResponse};
use crate::core::state::ServerState;
use crate::core::store::{TableId, run_blocking_query};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize, Default)]
struct ListRequest {
    #[serde(flatten)]
    page: PageRequest,
}

/// Lists volume claims in the request namespace, with blocking-query
/// support.
pub async fn list_claims(
    state: &Arc<ServerState>,
    ctx: &AuthContext,
    request: &RpcRequest,
) -> Result<RpcResponse, FlotillaError> {
    let ListRequest { page } = parse_payload_or_default(request)?;
    let namespace = request_namespace(request).to_string();
    ctx.require_namespace_cap(&namespace, NamespaceCapability::READ_JOB)?;

    let opts = state.query_opts(request.min_query_index, request.max_query_time_ms);
    let (index, claims) = run_blocking_query(&state.store, opts, |snapshot, ws| {
        let claims = snapshot.volume_claims_by_namespace(Some(ws), &namespace);
        Ok((snapshot.table_index(TableId::VolumeClaims), claims))
    })
    .await?;

    let rows: Vec<TaskGroupHostVolumeClaim> = claims.iter().map(|c| (**c).clone()).collect();
    let filtered = filter::apply_filter(&page.filter, rows)?;
    let (claims, meta) = paginate(filtered, &page, |c| c.id.clone());
    Ok(RpcResponse::ok(
        index,
        &serde_json::json!({
            "claims": claims,
            "next_token": meta.next_token,
        }),
    ))
}
