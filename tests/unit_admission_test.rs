// tests/unit_admission_test.rs

mod common;

use common::test_server;
use flotilla::FlotillaError;
use flotilla::core::model::{
    Check, Connect, Job, Network, Service, ServiceProvider, SidecarService, Task, TaskGroup,
    Template, VaultBlock,
};
use flotilla::core::raft::RaftRequest;

fn base_job(id: &str) -> Job {
    Job {
        id: id.to_string(),
        namespace: "default".to_string(),
        task_groups: vec![TaskGroup {
            name: "web".to_string(),
            count: 1,
            tasks: vec![Task {
                name: "server".to_string(),
                driver: "docker".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        }],
        ..Default::default()
    }
}

#[tokio::test]
async fn test_canonicalizer_fills_defaults() {
    let server = test_server(false).await;
    let config = server.state.config();

    let (job, _) = server
        .state
        .admission
        .admit(base_job("defaults"), &config)
        .await
        .unwrap();
    assert_eq!(job.namespace, "default");
    assert_eq!(job.priority, config.job.default_priority);
    assert_eq!(job.datacenters, vec!["*".to_string()]);
    assert_eq!(job.job_type, "service");
    assert_eq!(job.name, "defaults");
}

#[tokio::test]
async fn test_mutators_are_idempotent() {
    let server = test_server(false).await;
    let config = server.state.config();

    let mut job = base_job("idempotent");
    job.task_groups[0].tasks[0].kill_signal = Some("SIGTERM".to_string());
    job.task_groups[0].tasks[0].vault = Some(VaultBlock {
        change_signal: Some("SIGHUP".to_string()),
        ..Default::default()
    });
    job.task_groups[0].services = vec![Service {
        name: "web".to_string(),
        provider: ServiceProvider::Consul,
        ..Default::default()
    }];

    let mut config = config;
    config.vault.enabled = true;

    let (once, _) = server
        .state
        .admission
        .admit(job, &config)
        .await
        .unwrap();
    let (twice, _) = server
        .state
        .admission
        .admit(once.clone(), &config)
        .await
        .unwrap();
    assert_eq!(once, twice, "running admission twice must change nothing");
}

#[tokio::test]
async fn test_signal_constraint_aggregates_sorted() {
    let server = test_server(false).await;
    let mut config = server.state.config();
    config.vault.enabled = true;

    let mut job = base_job("signals");
    job.task_groups[0].tasks[0].kill_signal = Some("SIGTERM".to_string());
    job.task_groups[0].tasks[0].templates = vec![Template {
        change_mode: "signal".to_string(),
        change_signal: Some("SIGHUP".to_string()),
        ..Default::default()
    }];
    job.task_groups[0].tasks[0].vault = Some(VaultBlock {
        change_signal: Some("SIGUSR1".to_string()),
        ..Default::default()
    });

    let (job, _) = server.state.admission.admit(job, &config).await.unwrap();
    let signal_constraint = job
        .constraints
        .iter()
        .find(|c| c.l_target == "${attr.os.signals}")
        .expect("signal constraint");
    assert_eq!(signal_constraint.operand, "set_contains");
    assert_eq!(signal_constraint.r_target, "SIGHUP,SIGTERM,SIGUSR1");

    // The Vault block also pins a Vault-capable node.
    assert!(
        job.constraints
            .iter()
            .any(|c| c.l_target == "${attr.vault.version}")
    );
}

#[tokio::test]
async fn test_consul_service_constraint_and_cluster_default() {
    let server = test_server(false).await;
    let config = server.state.config();

    let mut job = base_job("consul");
    job.task_groups[0].services = vec![Service {
        name: "web".to_string(),
        provider: ServiceProvider::Consul,
        ..Default::default()
    }];

    let (job, _) = server.state.admission.admit(job, &config).await.unwrap();
    assert_eq!(job.task_groups[0].services[0].cluster, "default");
    let consul = job
        .constraints
        .iter()
        .filter(|c| c.l_target == "${attr.consul.version}")
        .count();
    assert_eq!(consul, 1, "exactly one consul constraint");
}

#[tokio::test]
async fn test_native_provider_gets_discovery_constraint() {
    let server = test_server(false).await;
    let config = server.state.config();

    let mut job = base_job("native");
    job.task_groups[0].services = vec![Service {
        name: "web".to_string(),
        provider: ServiceProvider::Flotilla,
        ..Default::default()
    }];

    let (job, _) = server.state.admission.admit(job, &config).await.unwrap();
    assert!(
        job.constraints
            .iter()
            .any(|c| c.l_target == "${attr.flotilla.service_discovery}" && c.r_target == "true")
    );
}

#[tokio::test]
async fn test_expose_check_generates_path_and_port() {
    let server = test_server(false).await;
    let config = server.state.config();

    let mut job = base_job("expose");
    job.task_groups[0].networks = vec![Network {
        mode: "bridge".to_string(),
        ..Default::default()
    }];
    job.task_groups[0].services = vec![Service {
        name: "api".to_string(),
        provider: ServiceProvider::Consul,
        connect: Some(Connect {
            sidecar_service: Some(SidecarService::default()),
        }),
        checks: vec![Check {
            name: "health".to_string(),
            check_type: "http".to_string(),
            path: "/healthz".to_string(),
            expose: true,
            ..Default::default()
        }],
        ..Default::default()
    }];

    let (admitted, _) = server
        .state
        .admission
        .admit(job.clone(), &config)
        .await
        .unwrap();
    let service = &admitted.task_groups[0].services[0];
    let proxy = service
        .connect
        .as_ref()
        .and_then(|c| c.sidecar_service.as_ref())
        .and_then(|s| s.proxy.as_ref())
        .expect("expose proxy");
    assert_eq!(proxy.expose_paths.len(), 1);
    assert_eq!(proxy.expose_paths[0].path, "/healthz");
    let label = proxy.expose_paths[0].local_path_port.clone();
    assert!(label.starts_with("svc_api_ck_"));
    assert!(
        admitted.task_groups[0].networks[0]
            .dynamic_ports
            .iter()
            .any(|p| p.label == label)
    );

    // The generated label is deterministic across admissions.
    let (again, _) = server.state.admission.admit(job, &config).await.unwrap();
    let proxy_again = again.task_groups[0].services[0]
        .connect
        .as_ref()
        .and_then(|c| c.sidecar_service.as_ref())
        .and_then(|s| s.proxy.as_ref())
        .unwrap();
    assert_eq!(proxy_again.expose_paths[0].local_path_port, label);
}

#[tokio::test]
async fn test_expose_on_task_service_is_rejected() {
    let server = test_server(false).await;
    let config = server.state.config();

    let mut job = base_job("bad-expose");
    job.task_groups[0].tasks[0].services = vec![Service {
        name: "inner".to_string(),
        checks: vec![Check {
            expose: true,
            path: "/x".to_string(),
            ..Default::default()
        }],
        ..Default::default()
    }];

    let err = server.state.admission.admit(job, &config).await.unwrap_err();
    assert!(matches!(err, FlotillaError::InvalidRequest(_)));
}

#[tokio::test]
async fn test_expose_requires_single_bridge_network() {
    let server = test_server(false).await;
    let config = server.state.config();

    let mut job = base_job("no-bridge");
    job.task_groups[0].services = vec![Service {
        name: "api".to_string(),
        connect: Some(Connect {
            sidecar_service: Some(SidecarService::default()),
        }),
        checks: vec![Check {
            path: "/healthz".to_string(),
            expose: true,
            ..Default::default()
        }],
        ..Default::default()
    }];
    // No network block at all.
    let err = server.state.admission.admit(job, &config).await.unwrap_err();
    assert!(matches!(err, FlotillaError::InvalidRequest(_)));
}

#[tokio::test]
async fn test_namespace_driver_capabilities_enforced() {
    let server = test_server(false).await;
    let config = server.state.config();

    server
        .state
        .raft
        .apply(RaftRequest::NamespaceUpsert {
            namespaces: vec![flotilla::core::model::Namespace {
                name: "locked".to_string(),
                capabilities: Some(flotilla::core::model::NamespaceCapabilities {
                    enabled_task_drivers: vec!["exec".to_string()],
                    ..Default::default()
                }),
                ..Default::default()
            }],
        })
        .unwrap();

    let mut job = base_job("restricted");
    job.namespace = "locked".to_string();
    let err = server.state.admission.admit(job, &config).await.unwrap_err();
    assert!(matches!(err, FlotillaError::InvalidRequest(_)));

    let mut ok_job = base_job("allowed");
    ok_job.namespace = "locked".to_string();
    ok_job.task_groups[0].tasks[0].driver = "exec".to_string();
    server.state.admission.admit(ok_job, &config).await.unwrap();
}

#[tokio::test]
async fn test_unknown_namespace_is_rejected() {
    let server = test_server(false).await;
    let config = server.state.config();

    let mut job = base_job("lost");
    job.namespace = "missing".to_string();
    let err = server.state.admission.admit(job, &config).await.unwrap_err();
    assert!(matches!(err, FlotillaError::NotFound(_)));
}

#[tokio::test]
async fn test_vault_requires_server_support() {
    let server = test_server(false).await;
    let config = server.state.config();

    let mut job = base_job("vaulted");
    job.task_groups[0].tasks[0].vault = Some(VaultBlock::default());
    let err = server.state.admission.admit(job, &config).await.unwrap_err();
    assert!(matches!(err, FlotillaError::InvalidRequest(_)));
}

#[tokio::test]
async fn test_submission_size_cap() {
    let server = test_server(false).await;
    let mut config = server.state.config();
    config.job.max_source_size = 16;

    let mut job = base_job("oversized");
    job.source = Some("x".repeat(64));
    let err = server.state.admission.admit(job, &config).await.unwrap_err();
    assert!(matches!(err, FlotillaError::InvalidRequest(_)));
}

#[tokio::test]
async fn test_implicit_identities_injected_from_server_defaults() {
    let server = test_server(false).await;
    let mut config = server.state.config();
    config.consul.service_identity = Some(flotilla::config::IdentityConfig {
        audience: vec!["consul.io".to_string()],
        ..Default::default()
    });
    config.consul.task_identity = Some(flotilla::config::IdentityConfig::default());

    let mut job = base_job("identified");
    job.task_groups[0].services = vec![Service {
        name: "web".to_string(),
        provider: ServiceProvider::Consul,
        ..Default::default()
    }];
    job.task_groups[0].tasks[0].templates = vec![Template::default()];

    let (once, _) = server
        .state
        .admission
        .admit(job, &config)
        .await
        .unwrap();

    let service_identity = once.task_groups[0].services[0].identity.as_ref().unwrap();
    assert_eq!(service_identity.name, "consul-service_web");
    assert_eq!(service_identity.audience, vec!["consul.io".to_string()]);
    assert!(
        once.task_groups[0].tasks[0]
            .identities
            .iter()
            .any(|wi| wi.name == "consul_default")
    );
    // Injection brings the identity-capable client constraint along.
    assert!(
        once.constraints
            .iter()
            .any(|c| c.l_target == "${attr.flotilla.version}")
    );

    let (twice, _) = server
        .state
        .admission
        .admit(once.clone(), &config)
        .await
        .unwrap();
    assert_eq!(once, twice);
}

#[tokio::test]
async fn test_consul_partition_constraint() {
    let server = test_server(false).await;
    let config = server.state.config();

    let mut job = base_job("partitioned");
    job.task_groups[0].tasks[0].consul_partition = "edge".to_string();

    let (job, _) = server.state.admission.admit(job, &config).await.unwrap();
    assert!(
        job.constraints
            .iter()
            .any(|c| c.l_target == "${attr.consul.partition}"
                && c.operand == "="
                && c.r_target == "edge")
    );
}
