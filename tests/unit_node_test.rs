// tests/unit_node_test.rs

mod common;

use common::{call, test_server};
use flotilla::FlotillaError;
use flotilla::core::model::generate_id;
use serde_json::json;

fn node_payload(id: &str, secret: &str) -> serde_json::Value {
    json!({ "node": {
        "id": id,
        "secret_id": secret,
        "name": "worker-1",
        "datacenter": "dc1",
        "node_pool": "default",
        "attributes": { "os.signals": "SIGHUP,SIGINT,SIGTERM" },
    }})
}

#[tokio::test]
async fn test_node_registers_with_own_secret() {
    let server = test_server(true).await;
    let node_id = generate_id();
    let secret = generate_id();

    // The node presents its own secret as the auth token.
    call(&server, "Client.Register", &secret, node_payload(&node_id, &secret))
        .await
        .unwrap();

    // Reads with the same secret see the full node, secret included.
    let (_, result) = call(
        &server,
        "Client.GetNode",
        &secret,
        json!({ "node_id": node_id }),
    )
    .await
    .unwrap();
    assert_eq!(result["node"]["id"], json!(node_id));
    assert_eq!(result["node"]["secret_id"], json!(secret));
}

#[tokio::test]
async fn test_reregistration_requires_matching_secret() {
    let server = test_server(true).await;
    let node_id = generate_id();
    let secret = generate_id();
    call(&server, "Client.Register", &secret, node_payload(&node_id, &secret))
        .await
        .unwrap();

    // An impostor with a fresh secret cannot take over the node id, even
    // with a management token.
    let leader = server.state.leader_token.clone();
    let impostor = generate_id();
    let err = call(
        &server,
        "Client.Register",
        &leader,
        node_payload(&node_id, &impostor),
    )
    .await
    .unwrap_err();
    assert_eq!(err, FlotillaError::PermissionDenied);
}

#[tokio::test]
async fn test_node_secret_is_redacted_for_other_readers() {
    let server = test_server(true).await;
    let node_id = generate_id();
    let secret = generate_id();
    call(&server, "Client.Register", &secret, node_payload(&node_id, &secret))
        .await
        .unwrap();

    // A node-read token sees the node without its secret.
    let leader = server.state.leader_token.clone();
    call(
        &server,
        "ACL.UpsertPolicies",
        &leader,
        json!({ "policies": [{ "name": "node-read", "rules": "[node]\npolicy = \"read\"\n" }] }),
    )
    .await
    .unwrap();
    let (_, created) = call(
        &server,
        "ACL.UpsertTokens",
        &leader,
        json!({ "tokens": [{ "type": "client", "policies": ["node-read"] }] }),
    )
    .await
    .unwrap();
    let reader = created["tokens"][0]["secret_id"].as_str().unwrap();

    let (_, result) = call(
        &server,
        "Client.GetNode",
        reader,
        json!({ "node_id": node_id }),
    )
    .await
    .unwrap();
    assert_eq!(result["node"]["secret_id"], json!(""));
}

#[tokio::test]
async fn test_status_update_and_deregister() {
    let server = test_server(false).await;
    let node_id = generate_id();
    let secret = generate_id();
    call(&server, "Client.Register", &secret, node_payload(&node_id, &secret))
        .await
        .unwrap();

    call(
        &server,
        "Client.UpdateStatus",
        &secret,
        json!({ "node_id": node_id, "status": "ready" }),
    )
    .await
    .unwrap();
    {
        let snapshot = server.state.store.snapshot();
        let node = snapshot.node_by_id(None, &node_id).unwrap();
        assert_eq!(node.status, flotilla::core::model::NodeStatus::Ready);
    }

    call(
        &server,
        "Client.Deregister",
        &secret,
        json!({ "node_id": node_id }),
    )
    .await
    .unwrap();
    let snapshot = server.state.store.snapshot();
    assert!(snapshot.node_by_id(None, &node_id).is_none());
}

#[tokio::test]
async fn test_registration_records_node_session() {
    let server = test_server(false).await;
    let node_id = generate_id();
    let secret = generate_id();
    call(&server, "Client.Register", &secret, node_payload(&node_id, &secret))
        .await
        .unwrap();

    // This server owns the node's session after registration, and loses
    // it on deregistration.
    assert!(
        server
            .state
            .router
            .node_sessions
            .server_for(&node_id)
            .is_some()
    );
    call(
        &server,
        "Client.Deregister",
        &secret,
        json!({ "node_id": node_id }),
    )
    .await
    .unwrap();
    assert!(
        server
            .state
            .router
            .node_sessions
            .server_for(&node_id)
            .is_none()
    );
}
