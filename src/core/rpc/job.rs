// src/core/rpc/job.rs

//! Job RPCs: registration through the admission pipeline, deregistration,
//! and reads.

use super::paginator::{PageRequest, paginate};
use super::{AuthContext, filter, parse_payload, parse_payload_or_default, request_namespace};
use crate::core::FlotillaError;
use crate::core::acl::NamespaceCapability;
use crate::core::model::eval::{EVAL_TRIGGER_JOB_DEREGISTER, EVAL_TRIGGER_JOB_REGISTER};
use crate::core::model::{Evaluation, Job};
use crate::core::protocol::{RpcRequest, RpcResponse};
use crate::core::raft::RaftRequest;
use crate::core::state::ServerState;
use crate::core::store::run_blocking_query;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct JobRegisterRequest {
    job: Job,
}

#[derive(Debug, Serialize)]
struct JobRegisterResponse {
    eval_id: String,
    warnings: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct JobDeregisterRequest {
    job_id: String,
    #[serde(default)]
    purge: bool,
}

#[derive(Debug, Deserialize)]
struct JobSpecificRequest {
    job_id: String,
}

#[derive(Debug, Deserialize, Default)]
struct JobListRequest {
    #[serde(flatten)]
    page: PageRequest,
}

#[derive(Debug, Serialize)]
struct JobListResponse {
    jobs: Vec<JobStub>,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_token: Option<String>,
}

/// The compact list form of a job.
#[derive(Debug, Serialize)]
struct JobStub {
    id: String,
    namespace: String,
    #[serde(rename = "type")]
    job_type: String,
    status: String,
    version: u64,
    priority: u8,
    modify_index: u64,
}

impl From<&Job> for JobStub {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            namespace: job.namespace.clone(),
            job_type: job.job_type.clone(),
            status: job.status.to_string(),
            version: job.version,
            priority: job.priority,
            modify_index: job.modify_index,
        }
    }
}

pub async fn register(
    state: &Arc<ServerState>,
    ctx: &AuthContext,
    request: &RpcRequest,
) -> Result<RpcResponse, FlotillaError> {
    let JobRegisterRequest { mut job } = parse_payload(request)?;
    if job.id.is_empty() {
        return Err(FlotillaError::InvalidRequest("job id is required".to_string()));
    }
    if job.namespace.is_empty() {
        job.namespace = request_namespace(request).to_string();
    }
    ctx.require_namespace_cap(&job.namespace, NamespaceCapability::SUBMIT_JOB)?;

    let config = state.config();
    if job.priority > config.job.max_priority {
        return Err(FlotillaError::InvalidRequest(format!(
            "job priority {} exceeds the maximum of {}",
            job.priority, config.job.max_priority
        )));
    }

    let (mut job, warnings) = state.admission.admit(job, &config).await?;
    // The Vault token is used only for admission checks; it never enters
    // the log.
    job.vault_token = None;

    let eval = Evaluation::new(&job.namespace, &job.id, EVAL_TRIGGER_JOB_REGISTER);
    let eval_id = eval.id.clone();
    let applied = state.raft.apply(RaftRequest::JobRegister {
        job,
        eval: Some(eval),
    })?;
    Ok(RpcResponse::ok(
        applied.index,
        &JobRegisterResponse { eval_id, warnings },
    ))
}

pub async fn deregister(
    state: &Arc<ServerState>,
    ctx: &AuthContext,
    request: &RpcRequest,
) -> Result<RpcResponse, FlotillaError> {
    let JobDeregisterRequest { job_id, purge } = parse_payload(request)?;
    let namespace = request_namespace(request).to_string();
    ctx.require_namespace_cap(&namespace, NamespaceCapability::SUBMIT_JOB)?;

    let eval = Evaluation::new(&namespace, &job_id, EVAL_TRIGGER_JOB_DEREGISTER);
    let eval_id = eval.id.clone();
    let applied = state.raft.apply(RaftRequest::JobDeregister {
        namespace,
        job_id,
        purge,
        eval: Some(eval),
    })?;
    Ok(RpcResponse::ok(
        applied.index,
        &JobRegisterResponse {
            eval_id,
            warnings: Vec::new(),
        },
    ))
}

pub async fn get_job(
    state: &Arc<ServerState>,
    ctx: &AuthContext,
    request: &RpcRequest,
) -> Result<RpcResponse, FlotillaError> {
    let JobSpecificRequest { job_id } = parse_payload(request)?;
    let namespace = request_namespace(request).to_string();
    ctx.require_namespace_cap(&namespace, NamespaceCapability::READ_JOB)?;

    let opts = state.query_opts(request.min_query_index, request.max_query_time_ms);
    let (index, job) = run_blocking_query(&state.store, opts, |snapshot, ws| {
        let job = snapshot.job_by_id(Some(ws), &namespace, &job_id);
        Ok((
            snapshot.table_index(crate::core::store::TableId::Jobs),
            job,
        ))
    })
    .await?;

    Ok(RpcResponse::ok(
        index,
        &serde_json::json!({ "job": job.map(|j| (*j).clone()) }),
    ))
}

pub async fn list(
    state: &Arc<ServerState>,
    ctx: &AuthContext,
    request: &RpcRequest,
) -> Result<RpcResponse, FlotillaError> {
    let JobListRequest { page } = parse_payload_or_default(request)?;
    let namespace = request_namespace(request).to_string();
    ctx.require_namespace_cap(&namespace, NamespaceCapability::LIST_JOBS)?;

    let opts = state.query_opts(request.min_query_index, request.max_query_time_ms);
    let (index, jobs) = run_blocking_query(&state.store, opts, |snapshot, ws| {
        let jobs = snapshot.jobs_by_namespace(Some(ws), &namespace);
        Ok((
            snapshot.table_index(crate::core::store::TableId::Jobs),
            jobs,
        ))
    })
    .await?;

    let stubs: Vec<JobStub> = jobs.iter().map(|j| JobStub::from(j.as_ref())).collect();
    let filtered = filter::apply_filter(&page.filter, stubs)?;
    let (jobs, meta) = paginate(filtered, &page, |j| j.id.clone());
    Ok(RpcResponse::ok(
        index,
        &JobListResponse {
            jobs,
            next_token: meta.next_token,
        },
    ))
}
