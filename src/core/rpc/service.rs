// src/core/rpc/service.rs

//! Service-registration RPCs. `Upsert` is node-originated and requires a
//! node secret; `GetService` supports deterministic instance selection
//! through rendezvous hashing (`choose = "<n>|<key>"`).

use super::paginator::{PageRequest, paginate};
use super::{AuthContext, filter, parse_payload, parse_payload_or_default, request_namespace};
use crate::core::FlotillaError;
use crate::core::acl::NamespaceCapability;
use crate::core::model::ServiceRegistration;
use crate::core::protocol::{RpcRequest, RpcResponse};
use crate::core::raft::RaftRequest;
use crate::core::state::ServerState;
use crate::core::store::{TableId, run_blocking_query};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct UpsertRequest {
    services: Vec<ServiceRegistration>,
}

#[derive(Debug, Deserialize)]
struct DeleteRequest {
    id: String,
}

#[derive(Debug, Deserialize, Default)]
struct ListRequest {
    #[serde(flatten)]
    page: PageRequest,
}

#[derive(Debug, Deserialize)]
struct GetServiceRequest {
    service_name: String,
    /// `"<n>|<key>"`: select `n` instances deterministically by `key`.
    #[serde(default)]
    choose: String,
}

/// Rendezvous-style selection: every instance is scored by hashing the
/// caller's key with the instance id; the top `n` win. Stable for a given
/// key regardless of registration order, and different keys spread load.
fn choose_instances(
    mut instances: Vec<ServiceRegistration>,
    choose: &str,
) -> Result<Vec<ServiceRegistration>, FlotillaError> {
    let Some((count, key)) = choose.split_once('|') else {
        return Err(FlotillaError::InvalidRequest(format!(
            "malformed choose parameter {choose:?}"
        )));
    };
    let count: usize = count
        .parse()
        .map_err(|_| FlotillaError::InvalidRequest(format!("malformed choose count {count:?}")))?;

    let mut scored: Vec<(u32, ServiceRegistration)> = instances
        .drain(..)
        .map(|instance| {
            let subject = format!("{key}|{}", instance.id);
            let score = murmur3::murmur3_32(&mut std::io::Cursor::new(subject.as_bytes()), 0)
                .unwrap_or_default();
            (score, instance)
        })
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.id.cmp(&b.1.id)));
    Ok(scored
        .into_iter()
        .take(count)
        .map(|(_, instance)| instance)
        .collect())
}

pub async fn upsert(
    state: &Arc<ServerState>,
    ctx: &AuthContext,
    request: &RpcRequest,
) -> Result<RpcResponse, FlotillaError> {
    // Registrations come from node agents; a node secret is mandatory
    // regardless of ACL mode.
    let Some(node) = &ctx.node else {
        return Err(FlotillaError::PermissionDenied);
    };
    let UpsertRequest { services } = parse_payload(request)?;
    for service in &services {
        if service.node_id != node.id {
            return Err(FlotillaError::PermissionDenied);
        }
    }
    let applied = state
        .raft
        .apply(RaftRequest::ServiceRegistrationUpsert { services })?;
    Ok(RpcResponse::ok(applied.index, &serde_json::json!({})))
}

pub async fn delete_by_id(
    state: &Arc<ServerState>,
    ctx: &AuthContext,
    request: &RpcRequest,
) -> Result<RpcResponse, FlotillaError> {
    let DeleteRequest { id } = parse_payload(request)?;
    let namespace = request_namespace(request).to_string();
    ctx.require_namespace_cap(&namespace, NamespaceCapability::SUBMIT_JOB)?;
    let applied = state
        .raft
        .apply(RaftRequest::ServiceRegistrationDelete { namespace, id })?;
    Ok(RpcResponse::ok(applied.index, &serde_json::json!({})))
}

pub async fn list(
    state: &Arc<ServerState>,
    ctx: &AuthContext,
    request: &RpcRequest,
) -> Result<RpcResponse, FlotillaError> {
    let ListRequest { page } = parse_payload_or_default(request)?;
    let namespace = request_namespace(request).to_string();
    ctx.require_namespace_cap(&namespace, NamespaceCapability::READ_JOB)?;

    let opts = state.query_opts(request.min_query_index, request.max_query_time_ms);
    let (index, services) = run_blocking_query(&state.store, opts, |snapshot, ws| {
        let services = snapshot.service_registrations_by_namespace(Some(ws), &namespace);
        Ok((snapshot.table_index(TableId::Services), services))
    })
    .await?;

    let rows: Vec<ServiceRegistration> = services.iter().map(|s| (**s).clone()).collect();
    let filtered = filter::apply_filter(&page.filter, rows)?;
    let (services, meta) = paginate(filtered, &page, |s| {
        format!("{}/{}", s.service_name, s.id)
    });
    Ok(RpcResponse::ok(
        index,
        &serde_json::json!({
            "services": services,
            "next_token": meta.next_token,
        }),
    ))
}

pub async fn get_service(
    state: &Arc<ServerState>,
    ctx: &AuthContext,
    request: &RpcRequest,
) -> Result<RpcResponse, FlotillaError> {
    let GetServiceRequest {
        service_name,
        choose,
    } = parse_payload(request)?;
    let namespace = request_namespace(request).to_string();
    ctx.require_namespace_cap(&namespace, NamespaceCapability::READ_JOB)?;

    let opts = state.query_opts(request.min_query_index, request.max_query_time_ms);
    let (index, services) = run_blocking_query(&state.store, opts, |snapshot, ws| {
        let services = snapshot.service_registrations_by_name(Some(ws), &namespace, &service_name);
        Ok((snapshot.table_index(TableId::Services), services))
    })
    .await?;

    let mut instances: Vec<ServiceRegistration> = services.iter().map(|s| (**s).clone()).collect();
    if !choose.is_empty() {
        instances = choose_instances(instances, &choose)?;
    }
    Ok(RpcResponse::ok(
        index,
        &serde_json::json!({ "services": instances }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(id: &str, address: &str) -> ServiceRegistration {
        ServiceRegistration {
            id: id.to_string(),
            service_name: "s1".to_string(),
            node_id: "n1".to_string(),
            address: address.to_string(),
            port: 8080,
            ..Default::default()
        }
    }

    #[test]
    fn choose_is_deterministic_and_bounded() {
        let pool = vec![
            instance("a", "10.0.0.1"),
            instance("b", "10.0.0.2"),
            instance("c", "10.0.0.3"),
        ];
        let first = choose_instances(pool.clone(), "2|abc123").unwrap();
        let second = choose_instances(pool.clone(), "2|abc123").unwrap();
        assert_eq!(first.len(), 2);
        let first_ids: Vec<_> = first.iter().map(|s| s.id.clone()).collect();
        let second_ids: Vec<_> = second.iter().map(|s| s.id.clone()).collect();
        assert_eq!(first_ids, second_ids);

        // Requesting more than the pool holds returns the whole pool.
        let all = choose_instances(pool, "9|abc123").unwrap();
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn choose_is_stable_under_insertion_order() {
        let forward = vec![
            instance("a", "10.0.0.1"),
            instance("b", "10.0.0.2"),
            instance("c", "10.0.0.3"),
        ];
        let mut reversed = forward.clone();
        reversed.reverse();
        let from_forward: Vec<_> = choose_instances(forward, "2|key")
            .unwrap()
            .iter()
            .map(|s| s.id.clone())
            .collect();
        let from_reversed: Vec<_> = choose_instances(reversed, "2|key")
            .unwrap()
            .iter()
            .map(|s| s.id.clone())
            .collect();
        assert_eq!(from_forward, from_reversed);
    }

    #[test]
    fn choose_rejects_malformed_parameter() {
        let err = choose_instances(vec![], "nonsense").unwrap_err();
        assert!(matches!(err, FlotillaError::InvalidRequest(_)));
    }
}
