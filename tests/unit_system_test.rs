// tests/unit_system_test.rs

mod common;

use common::{call, test_server};
use flotilla::core::model::{Allocation, EvalStatus, Evaluation, Job, JobStatus, generate_id};
use flotilla::core::raft::RaftRequest;
use serde_json::json;

fn seed_job(server: &common::TestServer, id: &str) {
    server
        .state
        .raft
        .apply(RaftRequest::JobRegister {
            job: Job {
                id: id.to_string(),
                namespace: "default".to_string(),
                ..Default::default()
            },
            eval: None,
        })
        .unwrap();
}

#[tokio::test]
async fn test_forced_gc_purges_dead_jobs_and_terminal_evals() {
    let server = test_server(false).await;
    seed_job(&server, "doomed");

    let mut eval = Evaluation::new("default", "doomed", "job-register");
    eval.status = EvalStatus::Complete;
    server
        .state
        .raft
        .apply(RaftRequest::EvalUpsert { evals: vec![eval] })
        .unwrap();
    server
        .state
        .raft
        .apply(RaftRequest::JobDeregister {
            namespace: "default".to_string(),
            job_id: "doomed".to_string(),
            purge: false,
            eval: None,
        })
        .unwrap();

    let (_, result) = call(&server, "System.GarbageCollect", "", serde_json::Value::Null)
        .await
        .unwrap();
    assert_eq!(result["jobs"], json!(1));
    assert_eq!(result["evals"], json!(1));

    let snapshot = server.state.store.snapshot();
    assert!(snapshot.job_by_id(None, "default", "doomed").is_none());
    assert!(snapshot.all_evals(None).is_empty());
}

#[tokio::test]
async fn test_gc_spares_live_state() {
    let server = test_server(false).await;
    seed_job(&server, "alive");

    // A pending eval and a running job survive a forced pass.
    server
        .state
        .raft
        .apply(RaftRequest::EvalUpsert {
            evals: vec![Evaluation::new("default", "alive", "job-register")],
        })
        .unwrap();

    call(&server, "System.GarbageCollect", "", serde_json::Value::Null)
        .await
        .unwrap();

    let snapshot = server.state.store.snapshot();
    assert!(snapshot.job_by_id(None, "default", "alive").is_some());
    assert_eq!(snapshot.all_evals(None).len(), 1);
}

#[tokio::test]
async fn test_reconcile_job_summaries_recomputes_status() {
    let server = test_server(false).await;
    seed_job(&server, "worker");
    server
        .state
        .raft
        .apply(RaftRequest::AllocUpsert {
            allocs: vec![Allocation {
                id: generate_id(),
                namespace: "default".to_string(),
                job_id: "worker".to_string(),
                task_group: "web".to_string(),
                desired_status: "run".to_string(),
                client_status: "running".to_string(),
                ..Default::default()
            }],
        })
        .unwrap();

    let (_, result) = call(
        &server,
        "System.ReconcileJobSummaries",
        "",
        serde_json::Value::Null,
    )
    .await
    .unwrap();
    assert_eq!(result["reconciled"], json!(1));

    let snapshot = server.state.store.snapshot();
    let job = snapshot.job_by_id(None, "default", "worker").unwrap();
    assert_eq!(job.status, JobStatus::Running);
}
