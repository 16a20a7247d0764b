// src/core/tasks/gc.rs

//! The garbage collector: removes terminal evaluations, deployments, and
//! dead jobs past their age thresholds. Runs periodically on the leader
//! and on demand through `System.GarbageCollect` (which ignores ages).

use crate::core::FlotillaError;
use crate::core::model::JobStatus;
use crate::core::raft::RaftRequest;
use crate::core::state::ServerState;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// What one GC pass removed.
#[derive(Debug, Default)]
pub struct Collected {
    pub evals: usize,
    pub allocs: usize,
    pub deployments: usize,
    pub jobs: usize,
    pub nodes: usize,
}

/// One garbage-collection pass. With `force`, age thresholds are ignored.
pub fn collect(state: &Arc<ServerState>, force: bool) -> Result<Collected, FlotillaError> {
    let config = state.config();
    let now_nanos = chrono::Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or(i64::MAX);
    let eval_cutoff = now_nanos - config.gc.eval_threshold.as_nanos() as i64;
    let mut collected = Collected::default();

    let (eval_ids, alloc_ids, deployment_ids, dead_jobs, down_nodes) = {
        let snapshot = state.store.snapshot();

        // Terminal evaluations past the age threshold.
        let eval_ids: Vec<String> = snapshot
            .all_evals(None)
            .iter()
            .filter(|e| e.status.is_terminal() && (force || e.create_time < eval_cutoff))
            .map(|e| e.id.clone())
            .collect();

        // Terminal allocations whose job is gone or dead.
        let alloc_ids: Vec<String> = snapshot
            .all_allocs(None)
            .iter()
            .filter(|a| {
                if !a.is_terminal() {
                    return false;
                }
                let job = snapshot.job_by_id(None, &a.namespace, &a.job_id);
                force || job.is_none_or(|j| j.status == JobStatus::Dead)
            })
            .map(|a| a.id.clone())
            .collect();

        // Terminal deployments whose job is gone or dead.
        let deployment_ids: Vec<String> = snapshot
            .all_deployments(None)
            .iter()
            .filter(|d| {
                if !d.status.is_terminal() {
                    return false;
                }
                let job = snapshot.job_by_id(None, &d.namespace, &d.job_id);
                force || job.is_none_or(|j| j.status == JobStatus::Dead)
            })
            .map(|d| d.id.clone())
            .collect();

        // Dead jobs with no live allocations left.
        let dead_jobs: Vec<(String, String)> = snapshot
            .all_jobs(None)
            .iter()
            .filter(|j| {
                j.status == JobStatus::Dead
                    && snapshot
                        .allocs_by_job(None, &j.namespace, &j.id)
                        .iter()
                        .all(|a| a.is_terminal())
            })
            .map(|j| (j.namespace.clone(), j.id.clone()))
            .collect();

        // Down nodes with no remaining live allocations.
        let down_nodes: Vec<String> = snapshot
            .nodes(None)
            .iter()
            .filter(|n| {
                n.status == crate::core::model::NodeStatus::Down
                    && snapshot
                        .allocs_by_node(None, &n.id)
                        .iter()
                        .all(|a| a.is_terminal())
            })
            .map(|n| n.id.clone())
            .collect();

        (eval_ids, alloc_ids, deployment_ids, dead_jobs, down_nodes)
    };

    if !eval_ids.is_empty() {
        collected.evals = eval_ids.len();
        state.raft.apply(RaftRequest::EvalDelete { ids: eval_ids })?;
    }
    if !alloc_ids.is_empty() {
        collected.allocs = alloc_ids.len();
        state.raft.apply(RaftRequest::AllocDelete { ids: alloc_ids })?;
    }
    if !deployment_ids.is_empty() {
        collected.deployments = deployment_ids.len();
        state.raft.apply(RaftRequest::DeploymentDelete {
            ids: deployment_ids,
        })?;
    }
    for (namespace, job_id) in dead_jobs {
        collected.jobs += 1;
        state.raft.apply(RaftRequest::JobDeregister {
            namespace,
            job_id,
            purge: true,
            eval: None,
        })?;
    }
    for node_id in down_nodes {
        collected.nodes += 1;
        state.raft.apply(RaftRequest::NodeDeregister { node_id })?;
    }

    let total = collected.evals
        + collected.allocs
        + collected.deployments
        + collected.jobs
        + collected.nodes;
    if total > 0 {
        info!(
            evals = collected.evals,
            allocs = collected.allocs,
            deployments = collected.deployments,
            jobs = collected.jobs,
            nodes = collected.nodes,
            "garbage collection pass complete"
        );
    }
    Ok(collected)
}

/// The periodic GC loop. Skips passes while not leader.
pub async fn run(state: Arc<ServerState>, mut shutdown_rx: broadcast::Receiver<()>) {
    let interval = state.config().gc.interval;
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if !state.raft.is_leader() {
                    continue;
                }
                match collect(&state, false) {
                    Ok(collected) => {
                        debug!(?collected, "scheduled gc pass");
                    }
                    Err(e) => warn!("scheduled gc pass failed: {e}"),
                }
            }
            _ = shutdown_rx.recv() => {
                debug!("gc task shutting down");
                return;
            }
        }
    }
}
