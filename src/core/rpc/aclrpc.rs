// src/core/rpc/aclrpc.rs

//! ACL object RPCs: policies, roles, tokens, one-shot bootstrap, and token
//! introspection. All writes are management-only.

use super::{AuthContext, parse_payload, parse_payload_or_default};
use crate::core::FlotillaError;
use crate::core::acl::PolicyDocument;
use crate::core::model::{AclPolicy, AclRole, AclToken, TokenType, generate_id};
use crate::core::protocol::{RpcRequest, RpcResponse};
use crate::core::raft::RaftRequest;
use crate::core::state::ServerState;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct PolicyUpsertRequest {
    policies: Vec<AclPolicy>,
}

#[derive(Debug, Deserialize)]
struct PolicyDeleteRequest {
    names: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RoleUpsertRequest {
    roles: Vec<AclRole>,
}

#[derive(Debug, Deserialize)]
struct TokenUpsertRequest {
    tokens: Vec<AclToken>,
}

#[derive(Debug, Deserialize)]
struct TokenDeleteRequest {
    accessor_ids: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ResolveTokenRequest {
    #[serde(default)]
    secret_id: String,
}

pub async fn upsert_policies(
    state: &Arc<ServerState>,
    ctx: &AuthContext,
    request: &RpcRequest,
) -> Result<RpcResponse, FlotillaError> {
    ctx.require_management()?;
    let PolicyUpsertRequest { policies } = parse_payload(request)?;
    // Reject unparseable policy source before it reaches the log.
    for policy in &policies {
        PolicyDocument::parse(&policy.rules)?;
    }
    let applied = state.raft.apply(RaftRequest::AclPolicyUpsert { policies })?;
    Ok(RpcResponse::ok(applied.index, &serde_json::json!({})))
}

pub async fn delete_policies(
    state: &Arc<ServerState>,
    ctx: &AuthContext,
    request: &RpcRequest,
) -> Result<RpcResponse, FlotillaError> {
    ctx.require_management()?;
    let PolicyDeleteRequest { names } = parse_payload(request)?;
    let applied = state.raft.apply(RaftRequest::AclPolicyDelete { names })?;
    Ok(RpcResponse::ok(applied.index, &serde_json::json!({})))
}

pub async fn upsert_roles(
    state: &Arc<ServerState>,
    ctx: &AuthContext,
    request: &RpcRequest,
) -> Result<RpcResponse, FlotillaError> {
    ctx.require_management()?;
    let RoleUpsertRequest { mut roles } = parse_payload(request)?;
    for role in &mut roles {
        if role.id.is_empty() {
            role.id = generate_id();
        }
    }
    let applied = state.raft.apply(RaftRequest::AclRoleUpsert { roles })?;
    Ok(RpcResponse::ok(applied.index, &serde_json::json!({})))
}

pub async fn upsert_tokens(
    state: &Arc<ServerState>,
    ctx: &AuthContext,
    request: &RpcRequest,
) -> Result<RpcResponse, FlotillaError> {
    ctx.require_management()?;
    let TokenUpsertRequest { mut tokens } = parse_payload(request)?;
    for token in &mut tokens {
        // Server-minted ids for new tokens.
        if token.accessor_id.is_empty() {
            token.accessor_id = generate_id();
        }
        if token.secret_id.is_empty() {
            token.secret_id = generate_id();
        }
    }
    let created: Vec<AclToken> = tokens.clone();
    let applied = state.raft.apply(RaftRequest::AclTokenUpsert { tokens })?;
    Ok(RpcResponse::ok(
        applied.index,
        &serde_json::json!({ "tokens": created }),
    ))
}

pub async fn delete_tokens(
    state: &Arc<ServerState>,
    ctx: &AuthContext,
    request: &RpcRequest,
) -> Result<RpcResponse, FlotillaError> {
    ctx.require_management()?;
    let TokenDeleteRequest { accessor_ids } = parse_payload(request)?;
    let applied = state.raft.apply(RaftRequest::AclTokenDelete { accessor_ids })?;
    Ok(RpcResponse::ok(applied.index, &serde_json::json!({})))
}

pub async fn list_policies(
    state: &Arc<ServerState>,
    ctx: &AuthContext,
    request: &RpcRequest,
) -> Result<RpcResponse, FlotillaError> {
    ctx.require_management()?;
    let opts = state.query_opts(request.min_query_index, request.max_query_time_ms);
    let (index, policies) =
        crate::core::store::run_blocking_query(&state.store, opts, |snapshot, ws| {
            let policies = snapshot.acl_policies(Some(ws));
            Ok((
                snapshot.table_index(crate::core::store::TableId::AclPolicies),
                policies,
            ))
        })
        .await?;
    let policies: Vec<AclPolicy> = policies.iter().map(|p| (**p).clone()).collect();
    Ok(RpcResponse::ok(
        index,
        &serde_json::json!({ "policies": policies }),
    ))
}

pub async fn list_roles(
    state: &Arc<ServerState>,
    ctx: &AuthContext,
    request: &RpcRequest,
) -> Result<RpcResponse, FlotillaError> {
    ctx.require_management()?;
    let opts = state.query_opts(request.min_query_index, request.max_query_time_ms);
    let (index, roles) =
        crate::core::store::run_blocking_query(&state.store, opts, |snapshot, ws| {
            let roles = snapshot.acl_roles(Some(ws));
            Ok((
                snapshot.table_index(crate::core::store::TableId::AclRoles),
                roles,
            ))
        })
        .await?;
    let roles: Vec<AclRole> = roles.iter().map(|r| (**r).clone()).collect();
    Ok(RpcResponse::ok(index, &serde_json::json!({ "roles": roles })))
}

/// Lists tokens; federated replicators pull global tokens through this.
pub async fn list_tokens(
    state: &Arc<ServerState>,
    ctx: &AuthContext,
    request: &RpcRequest,
) -> Result<RpcResponse, FlotillaError> {
    ctx.require_management()?;
    let opts = state.query_opts(request.min_query_index, request.max_query_time_ms);
    let (index, tokens) =
        crate::core::store::run_blocking_query(&state.store, opts, |snapshot, ws| {
            let tokens = snapshot.acl_tokens(Some(ws));
            Ok((
                snapshot.table_index(crate::core::store::TableId::AclTokens),
                tokens,
            ))
        })
        .await?;
    let tokens: Vec<AclToken> = tokens.iter().map(|t| (**t).clone()).collect();
    Ok(RpcResponse::ok(
        index,
        &serde_json::json!({ "tokens": tokens }),
    ))
}

/// One-shot cluster bootstrap: mints the first management token. Refused
/// once any management token exists.
pub async fn bootstrap(
    state: &Arc<ServerState>,
    _ctx: &AuthContext,
    _request: &RpcRequest,
) -> Result<RpcResponse, FlotillaError> {
    {
        let snapshot = state.store.snapshot();
        let bootstrapped = snapshot
            .acl_tokens(None)
            .iter()
            .any(|t| t.token_type == TokenType::Management);
        if bootstrapped {
            return Err(FlotillaError::InvalidRequest(
                "ACL bootstrap already done".to_string(),
            ));
        }
    }

    let token = AclToken {
        accessor_id: generate_id(),
        secret_id: generate_id(),
        name: "Bootstrap Token".to_string(),
        token_type: TokenType::Management,
        global: true,
        create_time: Some(chrono::Utc::now()),
        ..Default::default()
    };
    let applied = state.raft.apply(RaftRequest::AclTokenUpsert {
        tokens: vec![token.clone()],
    })?;
    Ok(RpcResponse::ok(
        applied.index,
        &serde_json::json!({ "token": token }),
    ))
}

/// Returns the stored token a secret resolves to. Callers may introspect
/// their own token; looking up another secret requires management.
pub async fn resolve_token(
    state: &Arc<ServerState>,
    ctx: &AuthContext,
    request: &RpcRequest,
) -> Result<RpcResponse, FlotillaError> {
    let ResolveTokenRequest { secret_id } = parse_payload_or_default(request)?;
    let secret = if secret_id.is_empty() {
        ctx.secret.clone()
    } else {
        if secret_id != ctx.secret {
            ctx.require_management()?;
        }
        secret_id
    };

    let snapshot = state.store.snapshot();
    let token = snapshot
        .acl_token_by_secret(&secret)
        .filter(|t| !t.is_expired(chrono::Utc::now()))
        .ok_or(FlotillaError::TokenNotFound)?;
    Ok(RpcResponse::ok(
        snapshot.table_index(crate::core::store::TableId::AclTokens),
        &serde_json::json!({ "token": (*token).clone() }),
    ))
}
