// tests/unit_namespace_test.rs

mod common;

use common::{call, test_server};
use flotilla::FlotillaError;
use flotilla::core::model::Job;
use flotilla::core::raft::RaftRequest;
use serde_json::json;

#[tokio::test]
async fn test_default_namespace_exists_at_bootstrap() {
    let server = test_server(false).await;
    let (_, result) = call(&server, "Namespace.Get", "", json!({ "name": "default" }))
        .await
        .unwrap();
    assert_eq!(result["namespace"]["name"], json!("default"));
}

#[tokio::test]
async fn test_default_namespace_is_undeletable() {
    let server = test_server(false).await;
    let err = call(
        &server,
        "Namespace.Delete",
        "",
        json!({ "namespaces": ["default"] }),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, FlotillaError::InvalidRequest(_)));
}

#[tokio::test]
async fn test_occupied_namespace_cannot_be_deleted() {
    let server = test_server(false).await;
    call(
        &server,
        "Namespace.Upsert",
        "",
        json!({ "namespaces": [{ "name": "team-a" }] }),
    )
    .await
    .unwrap();
    server
        .state
        .raft
        .apply(RaftRequest::JobRegister {
            job: Job {
                id: "occupier".to_string(),
                namespace: "team-a".to_string(),
                ..Default::default()
            },
            eval: None,
        })
        .unwrap();

    let err = call(
        &server,
        "Namespace.Delete",
        "",
        json!({ "namespaces": ["team-a"] }),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, FlotillaError::InvalidRequest(_)));

    // After the job is purged the namespace goes away.
    server
        .state
        .raft
        .apply(RaftRequest::JobDeregister {
            namespace: "team-a".to_string(),
            job_id: "occupier".to_string(),
            purge: true,
            eval: None,
        })
        .unwrap();
    call(
        &server,
        "Namespace.Delete",
        "",
        json!({ "namespaces": ["team-a"] }),
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn test_upsert_validates_names() {
    let server = test_server(false).await;
    let err = call(
        &server,
        "Namespace.Upsert",
        "",
        json!({ "namespaces": [{ "name": "bad name!" }] }),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, FlotillaError::InvalidRequest(_)));
}

#[tokio::test]
async fn test_upsert_preserves_create_index() {
    let server = test_server(false).await;
    let (first_index, _) = call(
        &server,
        "Namespace.Upsert",
        "",
        json!({ "namespaces": [{ "name": "team-b" }] }),
    )
    .await
    .unwrap();
    let (second_index, _) = call(
        &server,
        "Namespace.Upsert",
        "",
        json!({ "namespaces": [{ "name": "team-b", "description": "updated" }] }),
    )
    .await
    .unwrap();
    assert!(second_index > first_index);

    let snapshot = server.state.store.snapshot();
    let namespace = snapshot.namespace_by_name(None, "team-b").unwrap();
    assert_eq!(namespace.create_index, first_index);
    assert_eq!(namespace.modify_index, second_index);
    assert_eq!(namespace.description, "updated");
}

#[tokio::test]
async fn test_list_is_visibility_filtered() {
    let server = test_server(true).await;
    let leader = server.state.leader_token.clone();

    call(
        &server,
        "Namespace.Upsert",
        &leader,
        json!({ "namespaces": [{ "name": "platform" }, { "name": "secret" }] }),
    )
    .await
    .unwrap();
    call(
        &server,
        "ACL.UpsertPolicies",
        &leader,
        json!({ "policies": [{
            "name": "platform-read",
            "rules": "[namespace.\"platform\"]\npolicy = \"read\"\n",
        }] }),
    )
    .await
    .unwrap();
    let (_, created) = call(
        &server,
        "ACL.UpsertTokens",
        &leader,
        json!({ "tokens": [{ "type": "client", "policies": ["platform-read"] }] }),
    )
    .await
    .unwrap();
    let secret = created["tokens"][0]["secret_id"].as_str().unwrap();

    let (_, listed) = call(&server, "Namespace.List", secret, json!({}))
        .await
        .unwrap();
    let names: Vec<&str> = listed["namespaces"]
        .as_array()
        .unwrap()
        .iter()
        .map(|n| n["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["platform"]);

    let (_, all) = call(&server, "Namespace.List", &leader, json!({}))
        .await
        .unwrap();
    assert_eq!(all["namespaces"].as_array().unwrap().len(), 3);
}
