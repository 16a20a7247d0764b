// src/core/rpc/deployment.rs

//! Deployment lifecycle RPCs. `Fail` and `SetAllocHealth` drive the
//! auto-revert path: when a failing deployment's groups request it and a
//! prior stable job version differs from the current one, the revert job
//! commits in the same log entry as the status transition.

use super::paginator::{PageRequest, paginate};
use super::{AuthContext, filter, parse_payload, parse_payload_or_default, request_namespace};
use crate::core::FlotillaError;
use crate::core::acl::NamespaceCapability;
use crate::core::model::deployment::{
    DESC_FAILED_ALLOC_HEALTH, DESC_FAILED_BY_USER, DESC_PAUSED, DESC_RUNNING, desc_rollback_noop,
    desc_with_rollback,
};
use crate::core::model::eval::EVAL_TRIGGER_DEPLOYMENT_WATCHER;
use crate::core::model::{Deployment, DeploymentStatus, Evaluation, Job};
use crate::core::protocol::{RpcRequest, RpcResponse};
use crate::core::raft::RaftRequest;
use crate::core::state::ServerState;
use crate::core::store::{StateSnapshot, TableId, run_blocking_query};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct DeploymentSpecificRequest {
    deployment_id: String,
}

#[derive(Debug, Deserialize)]
struct PauseRequest {
    deployment_id: String,
    pause: bool,
}

#[derive(Debug, Deserialize)]
struct PromoteRequest {
    deployment_id: String,
    #[serde(default)]
    groups: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct AllocHealthRequest {
    deployment_id: String,
    #[serde(default)]
    healthy_allocation_ids: Vec<String>,
    #[serde(default)]
    unhealthy_allocation_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ReapRequest {
    deployment_ids: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ListRequest {
    #[serde(flatten)]
    page: PageRequest,
}

#[derive(Debug, Serialize)]
struct UpdateResponse {
    eval_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    reverted_job_version: Option<u64>,
}

/// Looks up a deployment by exact id or unique prefix and checks the
/// caller can act on its namespace.
fn lookup_deployment(
    snapshot: &StateSnapshot<'_>,
    ctx: &AuthContext,
    deployment_id: &str,
    cap: NamespaceCapability,
) -> Result<Arc<Deployment>, FlotillaError> {
    let deployment = snapshot
        .deployment_by_id(None, deployment_id)
        .map_or_else(|| snapshot.deployment_by_id_prefix(None, deployment_id), |d| Ok(Some(d)))?
        .ok_or_else(|| FlotillaError::NotFound(format!("deployment {deployment_id:?}")))?;
    ctx.require_namespace_cap(&deployment.namespace, cap)?;
    Ok(deployment)
}

/// Computes the auto-revert outcome for a failing deployment: the revert
/// job (when a differing prior stable version exists), the version
/// reverted to, and the final status description.
fn compute_revert(
    snapshot: &StateSnapshot<'_>,
    deployment: &Deployment,
    base_description: &str,
) -> (Option<Job>, Option<u64>, String) {
    if !deployment.has_auto_revert() {
        return (None, None, base_description.to_string());
    }
    let Some(stable) =
        snapshot.latest_stable_job_version(&deployment.namespace, &deployment.job_id)
    else {
        return (None, None, base_description.to_string());
    };
    let Some(current) = snapshot.job_by_id(None, &deployment.namespace, &deployment.job_id) else {
        return (None, None, base_description.to_string());
    };
    if stable.spec_equal(&current) {
        return (None, None, desc_rollback_noop(base_description));
    }
    (
        Some((*stable).clone()),
        Some(stable.version),
        desc_with_rollback(base_description, stable.version),
    )
}

fn watcher_eval(deployment: &Deployment) -> Evaluation {
    let mut eval = Evaluation::new(
        &deployment.namespace,
        &deployment.job_id,
        EVAL_TRIGGER_DEPLOYMENT_WATCHER,
    );
    eval.deployment_id = Some(deployment.id.clone());
    eval
}

pub async fn fail(
    state: &Arc<ServerState>,
    ctx: &AuthContext,
    request: &RpcRequest,
) -> Result<RpcResponse, FlotillaError> {
    let DeploymentSpecificRequest { deployment_id } = parse_payload(request)?;

    let (deployment, revert_job, reverted_version, description) = {
        let snapshot = state.store.snapshot();
        let deployment = lookup_deployment(
            &snapshot,
            ctx,
            &deployment_id,
            NamespaceCapability::SUBMIT_JOB,
        )?;
        if deployment.status.is_terminal() {
            return Err(FlotillaError::InvalidRequest(format!(
                "can't fail terminal deployment ({})",
                deployment.status
            )));
        }
        let (revert_job, reverted_version, description) =
            compute_revert(&snapshot, &deployment, DESC_FAILED_BY_USER);
        (deployment, revert_job, reverted_version, description)
    };

    let eval = watcher_eval(&deployment);
    let eval_id = eval.id.clone();
    let applied = state.raft.apply(RaftRequest::DeploymentStatusUpdate {
        deployment_id: deployment.id.clone(),
        status: DeploymentStatus::Failed,
        description,
        revert_job,
        eval: Some(eval),
    })?;

    Ok(RpcResponse::ok(
        applied.index,
        &UpdateResponse {
            eval_id,
            reverted_job_version: reverted_version,
        },
    ))
}

pub async fn pause(
    state: &Arc<ServerState>,
    ctx: &AuthContext,
    request: &RpcRequest,
) -> Result<RpcResponse, FlotillaError> {
    let PauseRequest {
        deployment_id,
        pause,
    } = parse_payload(request)?;

    let deployment = {
        let snapshot = state.store.snapshot();
        lookup_deployment(
            &snapshot,
            ctx,
            &deployment_id,
            NamespaceCapability::SUBMIT_JOB,
        )?
    };

    let (status, description) = if pause {
        (DeploymentStatus::Paused, DESC_PAUSED)
    } else {
        (DeploymentStatus::Running, DESC_RUNNING)
    };
    let applied = state.raft.apply(RaftRequest::DeploymentStatusUpdate {
        deployment_id: deployment.id.clone(),
        status,
        description: description.to_string(),
        revert_job: None,
        eval: None,
    })?;
    Ok(RpcResponse::ok(
        applied.index,
        &UpdateResponse {
            eval_id: String::new(),
            reverted_job_version: None,
        },
    ))
}

pub async fn promote(
    state: &Arc<ServerState>,
    ctx: &AuthContext,
    request: &RpcRequest,
) -> Result<RpcResponse, FlotillaError> {
    let PromoteRequest {
        deployment_id,
        groups,
    } = parse_payload(request)?;

    let deployment = {
        let snapshot = state.store.snapshot();
        lookup_deployment(
            &snapshot,
            ctx,
            &deployment_id,
            NamespaceCapability::SUBMIT_JOB,
        )?
    };

    let eval = watcher_eval(&deployment);
    let eval_id = eval.id.clone();
    let applied = state.raft.apply(RaftRequest::DeploymentPromote {
        deployment_id: deployment.id.clone(),
        groups,
        eval: Some(eval),
    })?;
    Ok(RpcResponse::ok(
        applied.index,
        &UpdateResponse {
            eval_id,
            reverted_job_version: None,
        },
    ))
}

pub async fn set_alloc_health(
    state: &Arc<ServerState>,
    ctx: &AuthContext,
    request: &RpcRequest,
) -> Result<RpcResponse, FlotillaError> {
    let AllocHealthRequest {
        deployment_id,
        healthy_allocation_ids,
        unhealthy_allocation_ids,
    } = parse_payload(request)?;

    let (deployment, status_update, revert_job, reverted_version, eval) = {
        let snapshot = state.store.snapshot();
        let deployment = lookup_deployment(
            &snapshot,
            ctx,
            &deployment_id,
            NamespaceCapability::SUBMIT_JOB,
        )?;

        // Unhealthy allocations fail the deployment; auto-revert applies
        // exactly as for an operator-initiated failure.
        if unhealthy_allocation_ids.is_empty() {
            (deployment, None, None, None, None)
        } else {
            let (revert_job, reverted_version, description) =
                compute_revert(&snapshot, &deployment, DESC_FAILED_ALLOC_HEALTH);
            let eval = watcher_eval(&deployment);
            (
                deployment,
                Some((DeploymentStatus::Failed, description)),
                revert_job,
                reverted_version,
                Some(eval),
            )
        }
    };

    let eval_id = eval.as_ref().map(|e| e.id.clone()).unwrap_or_default();
    let applied = state.raft.apply(RaftRequest::DeploymentAllocHealth {
        deployment_id: deployment.id.clone(),
        healthy_allocs: healthy_allocation_ids,
        unhealthy_allocs: unhealthy_allocation_ids,
        status_update,
        revert_job,
        eval,
    })?;

    Ok(RpcResponse::ok(
        applied.index,
        &UpdateResponse {
            eval_id,
            reverted_job_version: reverted_version,
        },
    ))
}

pub async fn reap(
    state: &Arc<ServerState>,
    ctx: &AuthContext,
    request: &RpcRequest,
) -> Result<RpcResponse, FlotillaError> {
    ctx.require_management()?;
    let ReapRequest { deployment_ids } = parse_payload(request)?;
    let applied = state.raft.apply(RaftRequest::DeploymentDelete {
        ids: deployment_ids,
    })?;
    Ok(RpcResponse::ok(
        applied.index,
        &applied.output.unwrap_or(serde_json::Value::Null),
    ))
}

pub async fn get_deployment(
    state: &Arc<ServerState>,
    ctx: &AuthContext,
    request: &RpcRequest,
) -> Result<RpcResponse, FlotillaError> {
    let DeploymentSpecificRequest { deployment_id } = parse_payload(request)?;

    let opts = state.query_opts(request.min_query_index, request.max_query_time_ms);
    let (index, deployment) = run_blocking_query(&state.store, opts, |snapshot, ws| {
        let deployment = match snapshot.deployment_by_id(Some(ws), &deployment_id) {
            Some(d) => Some(d),
            None => snapshot.deployment_by_id_prefix(None, &deployment_id)?,
        };
        Ok((snapshot.table_index(TableId::Deployments), deployment))
    })
    .await?;

    if let Some(deployment) = &deployment {
        ctx.require_namespace_cap(&deployment.namespace, NamespaceCapability::READ_JOB)?;
    }
    Ok(RpcResponse::ok(
        index,
        &serde_json::json!({ "deployment": deployment.map(|d| (*d).clone()) }),
    ))
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
    let (index, deployments) = run_blocking_query(&state.store, opts, |snapshot, ws| {
        let deployments = snapshot.deployments_by_namespace(Some(ws), &namespace);
        Ok((snapshot.table_index(TableId::Deployments), deployments))
    })
    .await?;

    let rows: Vec<Deployment> = deployments.iter().map(|d| (**d).clone()).collect();
    let filtered = filter::apply_filter(&page.filter, rows)?;
    let (deployments, meta) = paginate(filtered, &page, |d| d.id.clone());
    Ok(RpcResponse::ok(
        index,
        &serde_json::json!({
            "deployments": deployments,
            "next_token": meta.next_token,
        }),
    ))
}

pub async fn allocations(
    state: &Arc<ServerState>,
    ctx: &AuthContext,
    request: &RpcRequest,
) -> Result<RpcResponse, FlotillaError> {
    let DeploymentSpecificRequest { deployment_id } = parse_payload(request)?;

    let deployment = {
        let snapshot = state.store.snapshot();
        lookup_deployment(&snapshot, ctx, &deployment_id, NamespaceCapability::READ_JOB)?
    };

    let opts = state.query_opts(request.min_query_index, request.max_query_time_ms);
    let (index, allocs) = run_blocking_query(&state.store, opts, |snapshot, ws| {
        let allocs = snapshot.allocs_by_deployment(Some(ws), &deployment.id);
        Ok((snapshot.table_index(TableId::Allocations), allocs))
    })
    .await?;

    let allocs: Vec<_> = allocs.iter().map(|a| (**a).clone()).collect();
    Ok(RpcResponse::ok(
        index,
        &serde_json::json!({ "allocations": allocs }),
    ))
}
