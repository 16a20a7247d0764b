// tests/unit_store_test.rs

mod common;

use common::test_server;
use flotilla::core::model::{Evaluation, Namespace};
use flotilla::core::raft::RaftRequest;
use flotilla::core::store::TableId;

#[tokio::test]
async fn test_index_monotonicity_across_writes() {
    let server = test_server(false).await;
    let store = &server.state.store;

    let mut last_index = store.latest_index();
    for i in 0..10 {
        let eval = Evaluation::new("default", &format!("job-{i}"), "job-register");
        let applied = server
            .state
            .raft
            .apply(RaftRequest::EvalUpsert { evals: vec![eval] })
            .unwrap();
        assert!(
            applied.index > last_index,
            "global index must strictly increase"
        );
        last_index = applied.index;
        assert!(store.table_index(TableId::Evaluations) <= store.latest_index());
    }
}

#[tokio::test]
async fn test_row_modify_index_tracks_commit() {
    let server = test_server(false).await;

    let mut eval = Evaluation::new("default", "job-a", "job-register");
    let first = server
        .state
        .raft
        .apply(RaftRequest::EvalUpsert {
            evals: vec![eval.clone()],
        })
        .unwrap();

    {
        let snapshot = server.state.store.snapshot();
        let row = snapshot.eval_by_id(None, &eval.id).unwrap();
        assert_eq!(row.create_index, first.index);
        assert_eq!(row.modify_index, first.index);
    }

    eval.status = flotilla::core::model::EvalStatus::Complete;
    let second = server
        .state
        .raft
        .apply(RaftRequest::EvalUpsert { evals: vec![eval.clone()] })
        .unwrap();
    assert!(second.index > first.index);

    let snapshot = server.state.store.snapshot();
    let row = snapshot.eval_by_id(None, &eval.id).unwrap();
    assert_eq!(row.create_index, first.index, "create index is immutable");
    assert_eq!(row.modify_index, second.index);
    assert!(row.modify_index <= snapshot.table_index(TableId::Evaluations));
    assert!(snapshot.table_index(TableId::Evaluations) <= snapshot.latest_index());
}

#[tokio::test]
async fn test_namespace_scoped_job_queries() {
    let server = test_server(false).await;
    server
        .state
        .raft
        .apply(RaftRequest::NamespaceUpsert {
            namespaces: vec![Namespace {
                name: "platform".to_string(),
                ..Default::default()
            }],
        })
        .unwrap();

    for (ns, id) in [("default", "a"), ("platform", "b"), ("platform", "c")] {
        let job = flotilla::core::model::Job {
            id: id.to_string(),
            namespace: ns.to_string(),
            ..Default::default()
        };
        server
            .state
            .raft
            .apply(RaftRequest::JobRegister { job, eval: None })
            .unwrap();
    }

    let snapshot = server.state.store.snapshot();
    let platform_jobs = snapshot.jobs_by_namespace(None, "platform");
    assert_eq!(platform_jobs.len(), 2);
    assert!(platform_jobs.iter().all(|j| j.namespace == "platform"));
    assert_eq!(snapshot.jobs_by_namespace(None, "default").len(), 1);
}

#[tokio::test]
async fn test_snapshot_restore_round_trip() {
    let server = test_server(false).await;

    for i in 0..3 {
        let eval = Evaluation::new("default", &format!("job-{i}"), "job-register");
        server
            .state
            .raft
            .apply(RaftRequest::EvalUpsert { evals: vec![eval] })
            .unwrap();
    }
    let job = flotilla::core::model::Job {
        id: "snap-job".to_string(),
        namespace: "default".to_string(),
        ..Default::default()
    };
    server
        .state
        .raft
        .apply(RaftRequest::JobRegister { job, eval: None })
        .unwrap();

    let image = server.state.raft.fsm().snapshot().unwrap();
    let index_before = server.state.store.latest_index();

    let restored = test_server(false).await;
    restored.state.raft.restore_snapshot(image).unwrap();

    let snapshot = restored.state.store.snapshot();
    assert_eq!(snapshot.latest_index(), index_before);
    assert!(snapshot.job_by_id(None, "default", "snap-job").is_some());
    assert_eq!(snapshot.all_evals(None).len(), 3);
    assert!(snapshot.namespace_by_name(None, "default").is_some());
}

#[tokio::test]
async fn test_snapshot_restore_rejects_corruption() {
    let server = test_server(false).await;
    let image = server.state.raft.fsm().snapshot().unwrap();

    let mut corrupted = image.to_vec();
    let mid = corrupted.len() / 2;
    corrupted[mid] ^= 0xFF;

    let err = server
        .state
        .raft
        .restore_snapshot(bytes::Bytes::from(corrupted))
        .unwrap_err();
    assert!(matches!(err, flotilla::FlotillaError::Internal(_)));
}
