// tests/unit_blocking_test.rs

mod common;

use common::test_server;
use flotilla::core::model::{Deployment, DeploymentStatus, generate_id};
use flotilla::core::protocol::RpcRequest;
use flotilla::core::raft::RaftRequest;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn deployment(job_id: &str) -> Deployment {
    Deployment {
        id: generate_id(),
        namespace: "default".to_string(),
        job_id: job_id.to_string(),
        status: DeploymentStatus::Running,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_blocking_deployment_list_returns_on_write() {
    let server = Arc::new(test_server(false).await);

    let current_index = server.state.store.latest_index();

    // A writer lands a deployment 200ms after the query parks.
    let writer = server.clone();
    let handle = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        writer
            .state
            .raft
            .apply(RaftRequest::DeploymentUpsert {
                deployment: deployment("blocked-job"),
            })
            .unwrap()
            .index
    });

    let started = Instant::now();
    let request = RpcRequest {
        method: "Deployment.List".to_string(),
        min_query_index: current_index,
        max_query_time_ms: Some(5_000),
        payload: json!({}),
        ..Default::default()
    };
    let (index, result) = server
        .dispatcher
        .handle(request)
        .await
        .into_result()
        .unwrap();
    let waited = started.elapsed();
    let write_index = handle.await.unwrap();

    assert!(waited >= Duration::from_millis(100), "query must have parked");
    assert!(index >= write_index);
    assert_eq!(result["deployments"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_blocking_query_times_out_with_current_index() {
    let server = test_server(false).await;
    let current_index = server.state.store.latest_index();

    let started = Instant::now();
    let request = RpcRequest {
        method: "Deployment.List".to_string(),
        min_query_index: current_index,
        max_query_time_ms: Some(200),
        payload: json!({}),
        ..Default::default()
    };
    let (index, result) = server
        .dispatcher
        .handle(request)
        .await
        .into_result()
        .unwrap();

    assert!(started.elapsed() >= Duration::from_millis(200));
    assert!(index <= current_index);
    assert_eq!(result["deployments"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_nonblocking_read_returns_immediately() {
    let server = test_server(false).await;
    let started = Instant::now();
    let request = RpcRequest {
        method: "Deployment.List".to_string(),
        payload: json!({}),
        ..Default::default()
    };
    server
        .dispatcher
        .handle(request)
        .await
        .into_result()
        .unwrap();
    assert!(started.elapsed() < Duration::from_millis(100));
}

#[tokio::test]
async fn test_unrelated_write_does_not_satisfy_blocked_query() {
    let server = Arc::new(test_server(false).await);
    let deployment_index = {
        server
            .state
            .raft
            .apply(RaftRequest::DeploymentUpsert {
                deployment: deployment("existing"),
            })
            .unwrap()
            .index
    };

    // Writes to an unrelated table keep the deployment query parked until
    // its own timeout.
    let writer = server.clone();
    let noise = tokio::spawn(async move {
        for _ in 0..3 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            writer
                .state
                .raft
                .apply(RaftRequest::EvalUpsert {
                    evals: vec![flotilla::core::model::Evaluation::new(
                        "default",
                        "noise",
                        "job-register",
                    )],
                })
                .unwrap();
        }
    });

    let request = RpcRequest {
        method: "Deployment.List".to_string(),
        min_query_index: deployment_index,
        max_query_time_ms: Some(300),
        payload: json!({}),
        ..Default::default()
    };
    let started = Instant::now();
    let (index, _) = server
        .dispatcher
        .handle(request)
        .await
        .into_result()
        .unwrap();
    noise.await.unwrap();

    assert!(started.elapsed() >= Duration::from_millis(300));
    assert_eq!(index, deployment_index);
}
