// tests/unit_service_test.rs

mod common;

use common::{call, test_server};
use flotilla::FlotillaError;
use flotilla::core::model::{Node, generate_id};
use flotilla::core::raft::RaftRequest;
use serde_json::json;

/// Registers a node and returns its secret for node-originated RPCs.
fn seed_node(server: &common::TestServer) -> (String, String) {
    let node_id = generate_id();
    let secret = generate_id();
    server
        .state
        .raft
        .apply(RaftRequest::NodeRegister {
            node: Node {
                id: node_id.clone(),
                secret_id: secret.clone(),
                name: "worker-1".to_string(),
                datacenter: "dc1".to_string(),
                ..Default::default()
            },
        })
        .unwrap();
    (node_id, secret)
}

fn registration(node_id: &str, service_name: &str, address: &str) -> serde_json::Value {
    json!({
        "id": generate_id(),
        "service_name": service_name,
        "namespace": "default",
        "node_id": node_id,
        "datacenter": "dc1",
        "address": address,
        "port": 8080,
    })
}

#[tokio::test]
async fn test_upsert_requires_node_secret() {
    let server = test_server(false).await;
    let (node_id, secret) = seed_node(&server);

    // Without a node secret the registration is refused, even with ACLs
    // disabled.
    let err = call(
        &server,
        "ServiceRegistration.Upsert",
        "",
        json!({ "services": [registration(&node_id, "s1", "10.0.0.1")] }),
    )
    .await
    .unwrap_err();
    assert_eq!(err, FlotillaError::PermissionDenied);

    call(
        &server,
        "ServiceRegistration.Upsert",
        &secret,
        json!({ "services": [registration(&node_id, "s1", "10.0.0.1")] }),
    )
    .await
    .unwrap();

    let (_, listed) = call(&server, "ServiceRegistration.List", "", json!({}))
        .await
        .unwrap();
    assert_eq!(listed["services"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_node_cannot_register_for_other_nodes() {
    let server = test_server(false).await;
    let (_, secret) = seed_node(&server);
    let (other_node, _) = seed_node(&server);

    let err = call(
        &server,
        "ServiceRegistration.Upsert",
        &secret,
        json!({ "services": [registration(&other_node, "s1", "10.0.0.9")] }),
    )
    .await
    .unwrap_err();
    assert_eq!(err, FlotillaError::PermissionDenied);
}

#[tokio::test]
async fn test_get_service_choose_two_of_three() {
    let server = test_server(false).await;
    let (node_id, secret) = seed_node(&server);

    let services: Vec<serde_json::Value> = ["10.0.0.1", "10.0.0.2", "10.0.0.3"]
        .iter()
        .map(|addr| registration(&node_id, "s1", addr))
        .collect();
    call(
        &server,
        "ServiceRegistration.Upsert",
        &secret,
        json!({ "services": services }),
    )
    .await
    .unwrap();

    let (_, first) = call(
        &server,
        "ServiceRegistration.GetService",
        "",
        json!({ "service_name": "s1", "choose": "2|abc123" }),
    )
    .await
    .unwrap();
    let chosen: Vec<String> = first["services"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["address"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(chosen.len(), 2);

    // Deterministic: the same key selects the same pair again.
    let (_, second) = call(
        &server,
        "ServiceRegistration.GetService",
        "",
        json!({ "service_name": "s1", "choose": "2|abc123" }),
    )
    .await
    .unwrap();
    let repeat: Vec<String> = second["services"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["address"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(chosen, repeat);

    // Requesting more than registered falls back to the whole pool.
    let (_, all) = call(
        &server,
        "ServiceRegistration.GetService",
        "",
        json!({ "service_name": "s1", "choose": "5|abc123" }),
    )
    .await
    .unwrap();
    assert_eq!(all["services"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_delete_by_id() {
    let server = test_server(false).await;
    let (node_id, secret) = seed_node(&server);

    let reg = registration(&node_id, "s1", "10.0.0.1");
    let id = reg["id"].as_str().unwrap().to_string();
    call(
        &server,
        "ServiceRegistration.Upsert",
        &secret,
        json!({ "services": [reg] }),
    )
    .await
    .unwrap();

    call(
        &server,
        "ServiceRegistration.DeleteByID",
        "",
        json!({ "id": id.clone() }),
    )
    .await
    .unwrap();

    let err = call(
        &server,
        "ServiceRegistration.DeleteByID",
        "",
        json!({ "id": id }),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, FlotillaError::NotFound(_)));
}

#[tokio::test]
async fn test_list_filters_by_service_name() {
    let server = test_server(false).await;
    let (node_id, secret) = seed_node(&server);

    for (name, addr) in [("api", "10.0.0.1"), ("db", "10.0.0.2")] {
        call(
            &server,
            "ServiceRegistration.Upsert",
            &secret,
            json!({ "services": [registration(&node_id, name, addr)] }),
        )
        .await
        .unwrap();
    }

    let (_, filtered) = call(
        &server,
        "ServiceRegistration.List",
        "",
        json!({ "filter": "service_name == \"api\"" }),
    )
    .await
    .unwrap();
    let services = filtered["services"].as_array().unwrap();
    assert_eq!(services.len(), 1);
    assert_eq!(services[0]["service_name"], json!("api"));
}
