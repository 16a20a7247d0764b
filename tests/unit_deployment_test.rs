// tests/unit_deployment_test.rs

mod common;

use common::{call, test_server};
use flotilla::FlotillaError;
use flotilla::core::model::{
    Allocation, Deployment, DeploymentStatus, DeploymentTaskGroupState, EvalStatus, Job,
    generate_id,
};
use flotilla::core::raft::RaftRequest;
use serde_json::json;
use std::collections::HashMap;

/// Registers a job version through raft and returns it as stored.
fn register_job(server: &common::TestServer, job: Job) -> u64 {
    server
        .state
        .raft
        .apply(RaftRequest::JobRegister { job, eval: None })
        .unwrap();
    server.state.store.latest_index()
}

fn web_job(id: &str) -> Job {
    Job {
        id: id.to_string(),
        namespace: "default".to_string(),
        task_groups: vec![flotilla::core::model::TaskGroup {
            name: "web".to_string(),
            count: 1,
            ..Default::default()
        }],
        ..Default::default()
    }
}

/// Seeds the auto-revert scenario: stable v0, changed v1, a running
/// deployment for v1 with auto_revert, and one alloc in it.
fn seed_failing_deployment(server: &common::TestServer, auto_revert: bool) -> (String, String) {
    let job_id = format!("job-{}", generate_id());
    register_job(server, web_job(&job_id));
    server
        .state
        .raft
        .apply(RaftRequest::JobStabilityUpdate {
            namespace: "default".to_string(),
            job_id: job_id.clone(),
            job_version: 0,
            stable: true,
        })
        .unwrap();

    let mut changed = web_job(&job_id);
    changed.meta.insert("foo".to_string(), "bar".to_string());
    register_job(server, changed);

    let deployment_id = generate_id();
    let mut task_groups = HashMap::new();
    task_groups.insert(
        "web".to_string(),
        DeploymentTaskGroupState {
            desired_total: 1,
            auto_revert,
            ..Default::default()
        },
    );
    server
        .state
        .raft
        .apply(RaftRequest::DeploymentUpsert {
            deployment: Deployment {
                id: deployment_id.clone(),
                namespace: "default".to_string(),
                job_id: job_id.clone(),
                job_version: 1,
                status: DeploymentStatus::Running,
                task_groups,
                ..Default::default()
            },
        })
        .unwrap();

    let alloc = Allocation {
        id: generate_id(),
        namespace: "default".to_string(),
        job_id: job_id.clone(),
        job_version: 1,
        task_group: "web".to_string(),
        desired_status: "run".to_string(),
        deployment_id: Some(deployment_id.clone()),
        ..Default::default()
    };
    server
        .state
        .raft
        .apply(RaftRequest::AllocUpsert {
            allocs: vec![alloc],
        })
        .unwrap();

    (job_id, deployment_id)
}

#[tokio::test]
async fn test_fail_with_auto_revert_restores_stable_version() {
    let server = test_server(false).await;
    let (job_id, deployment_id) = seed_failing_deployment(&server, true);

    let (_, result) = call(
        &server,
        "Deployment.Fail",
        "",
        json!({ "deployment_id": deployment_id }),
    )
    .await
    .unwrap();

    assert_eq!(result["reverted_job_version"], json!(0));
    let eval_id = result["eval_id"].as_str().unwrap();

    let snapshot = server.state.store.snapshot();

    // The watcher eval committed atomically with the transition.
    let eval = snapshot.eval_by_id(None, eval_id).unwrap();
    assert_eq!(eval.status, EvalStatus::Pending);
    assert_eq!(eval.triggered_by, "deployment-watcher");

    // The deployment failed and names the rollback target.
    let deployment = snapshot.deployment_by_id(None, &deployment_id).unwrap();
    assert_eq!(deployment.status, DeploymentStatus::Failed);
    assert!(
        deployment
            .status_description
            .contains("rolling back to job version 0"),
        "description was {:?}",
        deployment.status_description
    );

    // The job advanced to a fresh version whose spec equals v0.
    let current = snapshot.job_by_id(None, "default", &job_id).unwrap();
    assert_eq!(current.version, 2);
    let original = snapshot.job_version("default", &job_id, 0).unwrap();
    assert!(current.spec_equal(&original));
    assert!(!current.meta.contains_key("foo"));
}

#[tokio::test]
async fn test_fail_rollback_is_noop_when_specs_match() {
    let server = test_server(false).await;

    // Stable v0; v1 changes the spec; v2 manually restores the v0 spec.
    // The failing deployment then has nothing to roll back to.
    let job_id = format!("job-{}", generate_id());
    register_job(&server, web_job(&job_id));
    server
        .state
        .raft
        .apply(RaftRequest::JobStabilityUpdate {
            namespace: "default".to_string(),
            job_id: job_id.clone(),
            job_version: 0,
            stable: true,
        })
        .unwrap();
    let mut changed = web_job(&job_id);
    changed.meta.insert("foo".to_string(), "bar".to_string());
    register_job(&server, changed);
    register_job(&server, web_job(&job_id));

    let deployment_id = generate_id();
    let mut task_groups = HashMap::new();
    task_groups.insert(
        "web".to_string(),
        DeploymentTaskGroupState {
            desired_total: 1,
            auto_revert: true,
            ..Default::default()
        },
    );
    server
        .state
        .raft
        .apply(RaftRequest::DeploymentUpsert {
            deployment: Deployment {
                id: deployment_id.clone(),
                namespace: "default".to_string(),
                job_id: job_id.clone(),
                job_version: 2,
                status: DeploymentStatus::Running,
                task_groups,
                ..Default::default()
            },
        })
        .unwrap();

    let (_, result) = call(
        &server,
        "Deployment.Fail",
        "",
        json!({ "deployment_id": deployment_id }),
    )
    .await
    .unwrap();

    assert!(result.get("reverted_job_version").is_none());
    let snapshot = server.state.store.snapshot();
    let deployment = snapshot.deployment_by_id(None, &deployment_id).unwrap();
    assert!(
        deployment.status_description.contains("rollback is a noop"),
        "description was {:?}",
        deployment.status_description
    );
    // No new version was created.
    assert_eq!(
        snapshot.job_by_id(None, "default", &job_id).unwrap().version,
        2
    );
}

#[tokio::test]
async fn test_unhealthy_alloc_health_fails_and_reverts() {
    let server = test_server(false).await;
    let (job_id, deployment_id) = seed_failing_deployment(&server, true);

    let alloc_id = {
        let snapshot = server.state.store.snapshot();
        snapshot.allocs_by_deployment(None, &deployment_id)[0].id.clone()
    };

    let (_, result) = call(
        &server,
        "Deployment.SetAllocHealth",
        "",
        json!({
            "deployment_id": deployment_id,
            "unhealthy_allocation_ids": [alloc_id.clone()],
        }),
    )
    .await
    .unwrap();
    assert_eq!(result["reverted_job_version"], json!(0));

    let snapshot = server.state.store.snapshot();
    let deployment = snapshot.deployment_by_id(None, &deployment_id).unwrap();
    assert_eq!(deployment.status, DeploymentStatus::Failed);
    assert_eq!(deployment.task_groups["web"].unhealthy_allocs, 1);

    let alloc = snapshot.alloc_by_id(None, &alloc_id).unwrap();
    assert_eq!(
        alloc.deployment_status.as_ref().and_then(|s| s.healthy),
        Some(false)
    );
    assert_eq!(
        snapshot.job_by_id(None, "default", &job_id).unwrap().version,
        2
    );
}

#[tokio::test]
async fn test_healthy_allocs_do_not_fail_deployment() {
    let server = test_server(false).await;
    let (_, deployment_id) = seed_failing_deployment(&server, true);

    let alloc_id = {
        let snapshot = server.state.store.snapshot();
        snapshot.allocs_by_deployment(None, &deployment_id)[0].id.clone()
    };

    call(
        &server,
        "Deployment.SetAllocHealth",
        "",
        json!({
            "deployment_id": deployment_id,
            "healthy_allocation_ids": [alloc_id],
        }),
    )
    .await
    .unwrap();

    let snapshot = server.state.store.snapshot();
    let deployment = snapshot.deployment_by_id(None, &deployment_id).unwrap();
    assert_eq!(deployment.status, DeploymentStatus::Running);
    assert_eq!(deployment.task_groups["web"].healthy_allocs, 1);
}

#[tokio::test]
async fn test_pause_and_terminal_guard() {
    let server = test_server(false).await;
    let (_, deployment_id) = seed_failing_deployment(&server, false);

    call(
        &server,
        "Deployment.Pause",
        "",
        json!({ "deployment_id": deployment_id, "pause": true }),
    )
    .await
    .unwrap();
    {
        let snapshot = server.state.store.snapshot();
        let deployment = snapshot.deployment_by_id(None, &deployment_id).unwrap();
        assert_eq!(deployment.status, DeploymentStatus::Paused);
    }

    call(
        &server,
        "Deployment.Fail",
        "",
        json!({ "deployment_id": deployment_id }),
    )
    .await
    .unwrap();

    // A terminal deployment refuses further transitions.
    let err = call(
        &server,
        "Deployment.Fail",
        "",
        json!({ "deployment_id": deployment_id }),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, FlotillaError::InvalidRequest(_)));
}

#[tokio::test]
async fn test_get_deployment_by_prefix() {
    let server = test_server(false).await;
    let (_, deployment_id) = seed_failing_deployment(&server, false);

    let prefix = &deployment_id[..8];
    let (_, result) = call(
        &server,
        "Deployment.GetDeployment",
        "",
        json!({ "deployment_id": prefix }),
    )
    .await
    .unwrap();
    assert_eq!(result["deployment"]["id"], json!(deployment_id));
}

#[tokio::test]
async fn test_reap_removes_deployments() {
    let server = test_server(false).await;
    let (_, deployment_id) = seed_failing_deployment(&server, false);

    let (_, result) = call(
        &server,
        "Deployment.Reap",
        "",
        json!({ "deployment_ids": [deployment_id.clone()] }),
    )
    .await
    .unwrap();
    assert_eq!(result["deleted"], json!(1));

    let snapshot = server.state.store.snapshot();
    assert!(snapshot.deployment_by_id(None, &deployment_id).is_none());
}

#[tokio::test]
async fn test_allocations_lists_deployment_allocs() {
    let server = test_server(false).await;
    let (_, deployment_id) = seed_failing_deployment(&server, false);

    let (_, result) = call(
        &server,
        "Deployment.Allocations",
        "",
        json!({ "deployment_id": deployment_id }),
    )
    .await
    .unwrap();
    assert_eq!(result["allocations"].as_array().unwrap().len(), 1);
}
