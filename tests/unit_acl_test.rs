// tests/unit_acl_test.rs

mod common;

use chrono::{Duration, Utc};
use common::{call, call_ns, test_server};
use flotilla::FlotillaError;
use flotilla::core::acl::NamespaceCapability;
use flotilla::core::model::{AclPolicy, AclToken, RoleLink, TokenType, generate_id};
use flotilla::core::raft::RaftRequest;
use serde_json::json;

const PLATFORM_WRITE_RULES: &str = r#"
[namespace."platform"]
policy = "write"
"#;

fn client_token(policies: &[&str]) -> AclToken {
    AclToken {
        accessor_id: generate_id(),
        secret_id: generate_id(),
        token_type: TokenType::Client,
        policies: policies.iter().map(|p| p.to_string()).collect(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_token_resolution_grants_scoped_namespace() {
    let server = test_server(true).await;

    server
        .state
        .raft
        .apply(RaftRequest::AclPolicyUpsert {
            policies: vec![AclPolicy {
                name: "platform-write".to_string(),
                rules: PLATFORM_WRITE_RULES.to_string(),
                ..Default::default()
            }],
        })
        .unwrap();
    let token = client_token(&["platform-write"]);
    server
        .state
        .raft
        .apply(RaftRequest::AclTokenUpsert {
            tokens: vec![token.clone()],
        })
        .unwrap();

    let acl = server.state.acl.resolve_token(&token.secret_id).unwrap();
    assert!(acl.allow_namespace_op("platform", NamespaceCapability::LIST_JOBS));
    assert!(acl.allow_namespace_op("platform", NamespaceCapability::SUBMIT_JOB));
    assert!(!acl.allow_namespace_op("default", NamespaceCapability::LIST_JOBS));
    assert!(!acl.is_management());
}

#[tokio::test]
async fn test_expired_token_is_absent() {
    let server = test_server(true).await;

    let mut token = client_token(&["anything"]);
    token.policies = vec!["missing".to_string()];
    token.expiration_time = Some(chrono::DateTime::from_timestamp(0, 0).unwrap());
    server
        .state
        .raft
        .apply(RaftRequest::AclTokenUpsert {
            tokens: vec![token.clone()],
        })
        .unwrap();

    let err = server
        .state
        .acl
        .resolve_token(&token.secret_id)
        .unwrap_err();
    assert_eq!(err, FlotillaError::TokenNotFound);
}

#[tokio::test]
async fn test_cache_invalidation_on_policy_change() {
    let server = test_server(true).await;

    server
        .state
        .raft
        .apply(RaftRequest::AclPolicyUpsert {
            policies: vec![AclPolicy {
                name: "scoped".to_string(),
                rules: "[namespace.\"team-a\"]\npolicy = \"read\"\n".to_string(),
                ..Default::default()
            }],
        })
        .unwrap();
    let token = client_token(&["scoped"]);
    server
        .state
        .raft
        .apply(RaftRequest::AclTokenUpsert {
            tokens: vec![token.clone()],
        })
        .unwrap();

    let before = server.state.acl.resolve_token(&token.secret_id).unwrap();
    assert!(!before.allow_namespace_op("team-a", NamespaceCapability::SUBMIT_JOB));

    // Widen the policy; the cached entry must not survive the upsert.
    server
        .state
        .raft
        .apply(RaftRequest::AclPolicyUpsert {
            policies: vec![AclPolicy {
                name: "scoped".to_string(),
                rules: "[namespace.\"team-a\"]\npolicy = \"write\"\n".to_string(),
                ..Default::default()
            }],
        })
        .unwrap();

    let after = server.state.acl.resolve_token(&token.secret_id).unwrap();
    assert!(after.allow_namespace_op("team-a", NamespaceCapability::SUBMIT_JOB));
}

#[tokio::test]
async fn test_roles_flatten_into_policies() {
    let server = test_server(true).await;

    server
        .state
        .raft
        .apply(RaftRequest::AclPolicyUpsert {
            policies: vec![AclPolicy {
                name: "platform-write".to_string(),
                rules: PLATFORM_WRITE_RULES.to_string(),
                ..Default::default()
            }],
        })
        .unwrap();
    let role_id = generate_id();
    server
        .state
        .raft
        .apply(RaftRequest::AclRoleUpsert {
            roles: vec![flotilla::core::model::AclRole {
                id: role_id.clone(),
                name: "platform-team".to_string(),
                policies: vec!["platform-write".to_string()],
                ..Default::default()
            }],
        })
        .unwrap();

    let mut token = client_token(&[]);
    token.roles = vec![RoleLink {
        id: role_id,
        name: "platform-team".to_string(),
    }];
    server
        .state
        .raft
        .apply(RaftRequest::AclTokenUpsert {
            tokens: vec![token.clone()],
        })
        .unwrap();

    let acl = server.state.acl.resolve_token(&token.secret_id).unwrap();
    assert!(acl.allow_namespace_op("platform", NamespaceCapability::SUBMIT_JOB));
}

#[tokio::test]
async fn test_leader_token_is_management() {
    let server = test_server(true).await;
    let acl = server
        .state
        .acl
        .resolve_token(&server.state.leader_token.clone())
        .unwrap();
    assert!(acl.is_management());
}

#[tokio::test]
async fn test_anonymous_denied_without_anonymous_token() {
    let server = test_server(true).await;
    let acl = server.state.acl.resolve_token("").unwrap();
    assert!(!acl.allow_namespace_op("default", NamespaceCapability::LIST_JOBS));

    // RPC-level: the anonymous caller cannot list jobs.
    let err = call(&server, "Job.List", "", json!({})).await.unwrap_err();
    assert_eq!(err, FlotillaError::PermissionDenied);
}

#[tokio::test]
async fn test_bootstrap_is_one_shot() {
    let server = test_server(true).await;

    let (_, result) = call(&server, "ACL.Bootstrap", "", serde_json::Value::Null)
        .await
        .unwrap();
    let secret = result["token"]["secret_id"].as_str().unwrap().to_string();

    let acl = server.state.acl.resolve_token(&secret).unwrap();
    assert!(acl.is_management());

    let err = call(&server, "ACL.Bootstrap", "", serde_json::Value::Null)
        .await
        .unwrap_err();
    assert!(matches!(err, FlotillaError::InvalidRequest(_)));
}

#[tokio::test]
async fn test_management_gate_on_system_rpcs() {
    let server = test_server(true).await;

    // A namespace-scoped token cannot run System RPCs.
    server
        .state
        .raft
        .apply(RaftRequest::AclPolicyUpsert {
            policies: vec![AclPolicy {
                name: "platform-write".to_string(),
                rules: PLATFORM_WRITE_RULES.to_string(),
                ..Default::default()
            }],
        })
        .unwrap();
    let token = client_token(&["platform-write"]);
    server
        .state
        .raft
        .apply(RaftRequest::AclTokenUpsert {
            tokens: vec![token.clone()],
        })
        .unwrap();

    let err = call(
        &server,
        "System.GarbageCollect",
        &token.secret_id,
        serde_json::Value::Null,
    )
    .await
    .unwrap_err();
    assert_eq!(err, FlotillaError::PermissionDenied);

    let leader = server.state.leader_token.clone();
    call(&server, "System.GarbageCollect", &leader, serde_json::Value::Null)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_token_grants_flow_through_rpc_layer() {
    let server = test_server(true).await;
    let leader = server.state.leader_token.clone();

    call(
        &server,
        "Namespace.Upsert",
        &leader,
        json!({ "namespaces": [{ "name": "platform" }] }),
    )
    .await
    .unwrap();
    call(
        &server,
        "ACL.UpsertPolicies",
        &leader,
        json!({ "policies": [{ "name": "platform-write", "rules": PLATFORM_WRITE_RULES }] }),
    )
    .await
    .unwrap();
    let (_, created) = call(
        &server,
        "ACL.UpsertTokens",
        &leader,
        json!({ "tokens": [{ "type": "client", "policies": ["platform-write"] }] }),
    )
    .await
    .unwrap();
    let secret = created["tokens"][0]["secret_id"].as_str().unwrap();

    // Permitted namespace works; the default namespace is refused.
    call_ns(&server, "Job.List", "platform", secret, json!({}))
        .await
        .unwrap();
    let err = call_ns(&server, "Job.List", "default", secret, json!({}))
        .await
        .unwrap_err();
    assert_eq!(err, FlotillaError::PermissionDenied);
}

#[tokio::test]
async fn test_signed_identity_resolves_job_scoped_policies() {
    let server = test_server(true).await;

    // A live allocation the claims refer to.
    let job = flotilla::core::model::Job {
        id: "api".to_string(),
        namespace: "default".to_string(),
        ..Default::default()
    };
    server
        .state
        .raft
        .apply(RaftRequest::JobRegister { job, eval: None })
        .unwrap();
    let alloc = flotilla::core::model::Allocation {
        id: generate_id(),
        namespace: "default".to_string(),
        job_id: "api".to_string(),
        task_group: "web".to_string(),
        desired_status: "run".to_string(),
        client_status: "running".to_string(),
        ..Default::default()
    };
    server
        .state
        .raft
        .apply(RaftRequest::AllocUpsert {
            allocs: vec![alloc.clone()],
        })
        .unwrap();

    // One policy scoped to the job, one scoped to a different group.
    server
        .state
        .raft
        .apply(RaftRequest::AclPolicyUpsert {
            policies: vec![
                AclPolicy {
                    name: "job-wide".to_string(),
                    rules: "[namespace.\"default\"]\npolicy = \"read\"\n".to_string(),
                    job_scope: Some(flotilla::core::model::JobScope {
                        namespace: "default".to_string(),
                        job_id: "api".to_string(),
                        group: None,
                        task: None,
                    }),
                    ..Default::default()
                },
                AclPolicy {
                    name: "other-group".to_string(),
                    rules: "[namespace.\"default\"]\npolicy = \"write\"\n".to_string(),
                    job_scope: Some(flotilla::core::model::JobScope {
                        namespace: "default".to_string(),
                        job_id: "api".to_string(),
                        group: Some("not-web".to_string()),
                        task: None,
                    }),
                    ..Default::default()
                },
            ],
        })
        .unwrap();

    let claims = flotilla::core::model::IdentityClaims {
        namespace: "default".to_string(),
        job_id: "api".to_string(),
        alloc_id: alloc.id.clone(),
        task: "server".to_string(),
        expiry: Some((Utc::now() + Duration::hours(1)).timestamp()),
        issued_at: Utc::now().timestamp(),
    };
    let signed = server.state.key_manager.sign_claims(&claims).unwrap();

    let acl = server.state.acl.resolve_claims(&signed).unwrap();
    // The group-mismatched policy is excluded under the specificity rule.
    assert!(acl.allow_namespace_op("default", NamespaceCapability::READ_JOB));
    assert!(!acl.allow_namespace_op("default", NamespaceCapability::SUBMIT_JOB));
}

#[tokio::test]
async fn test_tampered_identity_is_rejected() {
    let server = test_server(true).await;
    let claims = flotilla::core::model::IdentityClaims {
        namespace: "default".to_string(),
        job_id: "api".to_string(),
        alloc_id: generate_id(),
        task: "server".to_string(),
        expiry: None,
        issued_at: Utc::now().timestamp(),
    };
    let signed = server.state.key_manager.sign_claims(&claims).unwrap();

    let mut tampered = signed.clone();
    tampered.truncate(signed.len() - 2);
    tampered.push_str("xx");
    assert!(server.state.key_manager.verify_claims(&tampered).is_err());
}
