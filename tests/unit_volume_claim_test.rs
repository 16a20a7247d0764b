// tests/unit_volume_claim_test.rs

mod common;

use common::{call, test_server};
use flotilla::core::model::{Allocation, Job, TaskGroup, VolumeRequest, generate_id};
use flotilla::core::raft::RaftRequest;
use serde_json::json;
use std::collections::HashMap;

fn sticky_job(id: &str) -> Job {
    let mut volumes = HashMap::new();
    volumes.insert(
        "data".to_string(),
        VolumeRequest {
            volume_type: "host".to_string(),
            source: "fast-disk".to_string(),
            sticky: true,
            ..Default::default()
        },
    );
    Job {
        id: id.to_string(),
        namespace: "default".to_string(),
        task_groups: vec![TaskGroup {
            name: "db".to_string(),
            count: 1,
            volumes,
            ..Default::default()
        }],
        ..Default::default()
    }
}

fn place_alloc(server: &common::TestServer, job_id: &str, node_id: &str) -> String {
    let alloc = Allocation {
        id: generate_id(),
        namespace: "default".to_string(),
        job_id: job_id.to_string(),
        task_group: "db".to_string(),
        node_id: node_id.to_string(),
        desired_status: "run".to_string(),
        ..Default::default()
    };
    let id = alloc.id.clone();
    server
        .state
        .raft
        .apply(RaftRequest::AllocUpsert { allocs: vec![alloc] })
        .unwrap();
    id
}

#[tokio::test]
async fn test_sticky_volume_records_claim_once() {
    let server = test_server(false).await;
    server
        .state
        .raft
        .apply(RaftRequest::JobRegister {
            job: sticky_job("db-job"),
            eval: None,
        })
        .unwrap();

    place_alloc(&server, "db-job", "node-1");
    // A replacement alloc for the same group keeps the original binding.
    place_alloc(&server, "db-job", "node-2");

    let (_, listed) = call(&server, "TaskGroupHostVolumeClaim.List", "", json!({}))
        .await
        .unwrap();
    let claims = listed["claims"].as_array().unwrap();
    assert_eq!(claims.len(), 1);
    assert_eq!(claims[0]["volume_name"], json!("data"));
    assert_eq!(claims[0]["task_group_name"], json!("db"));
    assert!(
        claims[0]["volume_id"]
            .as_str()
            .unwrap()
            .starts_with("fast-disk@")
    );
}

#[tokio::test]
async fn test_non_sticky_volumes_record_nothing() {
    let server = test_server(false).await;
    let mut job = sticky_job("plain-job");
    job.task_groups[0]
        .volumes
        .get_mut("data")
        .unwrap()
        .sticky = false;
    server
        .state
        .raft
        .apply(RaftRequest::JobRegister { job, eval: None })
        .unwrap();
    place_alloc(&server, "plain-job", "node-1");

    let (_, listed) = call(&server, "TaskGroupHostVolumeClaim.List", "", json!({}))
        .await
        .unwrap();
    assert_eq!(listed["claims"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_claim_delete_allows_rebinding() {
    let server = test_server(false).await;
    server
        .state
        .raft
        .apply(RaftRequest::JobRegister {
            job: sticky_job("db-job"),
            eval: None,
        })
        .unwrap();
    place_alloc(&server, "db-job", "node-1");

    let claim_id = {
        let snapshot = server.state.store.snapshot();
        snapshot.volume_claims(None)[0].id.clone()
    };
    server
        .state
        .raft
        .apply(RaftRequest::VolumeClaimDelete {
            ids: vec![claim_id],
        })
        .unwrap();

    // The next placement binds afresh.
    place_alloc(&server, "db-job", "node-3");
    let snapshot = server.state.store.snapshot();
    let claims = snapshot.volume_claims(None);
    assert_eq!(claims.len(), 1);
    assert!(claims[0].volume_id.ends_with("node-3"));
}

#[tokio::test]
async fn test_claim_list_supports_blocking() {
    let server = std::sync::Arc::new(test_server(false).await);
    server
        .state
        .raft
        .apply(RaftRequest::JobRegister {
            job: sticky_job("db-job"),
            eval: None,
        })
        .unwrap();

    let current_index = server.state.store.latest_index();
    let writer = server.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        place_alloc(&writer, "db-job", "node-1");
    });

    let mut request = common::rpc("TaskGroupHostVolumeClaim.List", "", json!({}));
    request.min_query_index = current_index;
    request.max_query_time_ms = Some(5_000);
    let (index, result) = server
        .dispatcher
        .handle(request)
        .await
        .into_result()
        .unwrap();
    assert!(index > current_index);
    assert_eq!(result["claims"].as_array().unwrap().len(), 1);
}
