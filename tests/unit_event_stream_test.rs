// tests/unit_event_stream_test.rs

mod common;

use common::test_server;
use flotilla::FlotillaError;
use flotilla::core::events::Topic;
use flotilla::core::model::{AclPolicy, AclToken, Job, TokenType, generate_id};
use flotilla::core::raft::RaftRequest;
use flotilla::core::stream::broker::{BrokerFrame, SubscribeRequest};
use std::collections::HashMap;
use std::time::Duration;

fn job_topic_request(token: &AclToken) -> SubscribeRequest {
    let mut topics = HashMap::new();
    topics.insert(Topic::Job, vec![]);
    SubscribeRequest {
        topics,
        namespace: Some("default".to_string()),
        token_secret: token.secret_id.clone(),
        token_accessor: Some(token.accessor_id.clone()),
    }
}

fn seed_token(server: &common::TestServer, expiration: Option<chrono::DateTime<chrono::Utc>>) -> AclToken {
    server
        .state
        .raft
        .apply(RaftRequest::AclPolicyUpsert {
            policies: vec![AclPolicy {
                name: "default-read".to_string(),
                rules: "[namespace.\"default\"]\npolicy = \"read\"\n".to_string(),
                ..Default::default()
            }],
        })
        .unwrap();
    let token = AclToken {
        accessor_id: generate_id(),
        secret_id: generate_id(),
        token_type: TokenType::Client,
        policies: vec!["default-read".to_string()],
        expiration_time: expiration,
        ..Default::default()
    };
    server
        .state
        .raft
        .apply(RaftRequest::AclTokenUpsert {
            tokens: vec![token.clone()],
        })
        .unwrap();
    token
}

fn register_job(server: &common::TestServer, id: &str) {
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
async fn test_events_delivered_in_publish_order() {
    let server = test_server(true).await;
    let token = seed_token(&server, None);
    let mut subscription = server.state.broker.subscribe(job_topic_request(&token)).unwrap();

    for i in 0..3 {
        register_job(&server, &format!("job-{i}"));
    }

    let mut seen = Vec::new();
    while seen.len() < 3 {
        match subscription.next().await.unwrap() {
            BrokerFrame::Events(events) => {
                for event in events.events {
                    assert_eq!(event.topic, Topic::Job);
                    seen.push((events.index, event.key));
                }
            }
            BrokerFrame::Heartbeat => {}
        }
    }
    let keys: Vec<&str> = seen.iter().map(|(_, k)| k.as_str()).collect();
    assert_eq!(keys, vec!["job-0", "job-1", "job-2"]);
    let indexes: Vec<u64> = seen.iter().map(|(i, _)| *i).collect();
    assert!(indexes.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test]
async fn test_topic_and_namespace_filtering() {
    let server = test_server(true).await;
    let token = seed_token(&server, None);

    // Subscribed to Job only; eval and node events must not arrive.
    let mut subscription = server.state.broker.subscribe(job_topic_request(&token)).unwrap();

    server
        .state
        .raft
        .apply(RaftRequest::EvalUpsert {
            evals: vec![flotilla::core::model::Evaluation::new(
                "default",
                "job-x",
                "job-register",
            )],
        })
        .unwrap();
    register_job(&server, "job-x");

    match subscription.next().await.unwrap() {
        BrokerFrame::Events(events) => {
            assert!(events.events.iter().all(|e| e.topic == Topic::Job));
        }
        BrokerFrame::Heartbeat => panic!("expected events"),
    }
}

#[tokio::test]
async fn test_key_filter_restricts_delivery() {
    let server = test_server(true).await;
    let token = seed_token(&server, None);

    let mut topics = HashMap::new();
    topics.insert(Topic::Job, vec!["job-wanted".to_string()]);
    let mut subscription = server
        .state
        .broker
        .subscribe(SubscribeRequest {
            topics,
            namespace: Some("default".to_string()),
            token_secret: token.secret_id.clone(),
            token_accessor: Some(token.accessor_id.clone()),
        })
        .unwrap();

    register_job(&server, "job-ignored");
    register_job(&server, "job-wanted");

    match subscription.next().await.unwrap() {
        BrokerFrame::Events(events) => {
            assert_eq!(events.events.len(), 1);
            assert_eq!(events.events[0].key, "job-wanted");
        }
        BrokerFrame::Heartbeat => panic!("expected events"),
    }
}

#[tokio::test]
async fn test_subscription_closed_on_token_delete() {
    let server = test_server(true).await;
    let token = seed_token(&server, None);
    let mut subscription = server.state.broker.subscribe(job_topic_request(&token)).unwrap();

    register_job(&server, "job-before");
    // Drain the first delivery.
    subscription.next().await.unwrap();

    server
        .state
        .raft
        .apply(RaftRequest::AclTokenDelete {
            accessor_ids: vec![token.accessor_id.clone()],
        })
        .unwrap();

    // The revalidation sweep closes the subscription.
    let resolver = server.state.acl.clone();
    server
        .state
        .broker
        .revalidate(move |accessor| resolver.resolve_accessor(accessor));

    let err = subscription.next().await.unwrap_err();
    assert_eq!(err, FlotillaError::SubscriptionClosed);
    assert_eq!(server.state.broker.subscription_count(), 0);
}

#[tokio::test]
async fn test_subscription_closed_on_token_expiry() {
    let server = test_server(true).await;
    let token = seed_token(
        &server,
        Some(chrono::Utc::now() + chrono::Duration::milliseconds(100)),
    );
    let mut subscription = server.state.broker.subscribe(job_topic_request(&token)).unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;

    let resolver = server.state.acl.clone();
    server
        .state
        .broker
        .revalidate(move |accessor| resolver.resolve_accessor(accessor));

    let err = subscription.next().await.unwrap_err();
    assert_eq!(err, FlotillaError::TokenExpired);
}

#[tokio::test]
async fn test_slow_subscriber_is_dropped_not_blocked() {
    let server = test_server(true).await;
    let token = seed_token(&server, None);
    let mut subscription = server.state.broker.subscribe(job_topic_request(&token)).unwrap();

    // Overrun the per-subscriber buffer without consuming anything.
    let buffer = server.state.config().event_broker.event_buffer_size;
    for i in 0..buffer + 2 {
        register_job(&server, &format!("flood-{i}"));
    }

    // The tail of the stream is the close, not an unbounded backlog.
    let mut result = subscription.next().await;
    while let Ok(BrokerFrame::Events(_)) = result {
        result = subscription.next().await;
    }
    assert_eq!(result.unwrap_err(), FlotillaError::SubscriptionClosed);
    assert_eq!(server.state.broker.subscription_count(), 0);
}

#[tokio::test]
async fn test_wildcard_topic_requires_management() {
    use flotilla::core::stream::broker::subscription_allowed;

    let server = test_server(true).await;
    let token = seed_token(&server, None);
    let acl = server.state.acl.resolve_token(&token.secret_id).unwrap();

    let mut wildcard = HashMap::new();
    wildcard.insert(Topic::All, vec![]);
    assert!(!subscription_allowed(&acl, &wildcard, Some("default")));

    let mut jobs = HashMap::new();
    jobs.insert(Topic::Job, vec![]);
    assert!(subscription_allowed(&acl, &jobs, Some("default")));
    // Node events need node read, which this token lacks.
    let mut nodes = HashMap::new();
    nodes.insert(Topic::Node, vec![]);
    assert!(!subscription_allowed(&acl, &nodes, Some("default")));

    let management = server
        .state
        .acl
        .resolve_token(&server.state.leader_token.clone())
        .unwrap();
    assert!(subscription_allowed(&management, &wildcard, None));
}

#[tokio::test]
async fn test_broker_disabled_refuses_subscriptions() {
    let server = test_server(true).await;
    let token = seed_token(&server, None);

    let broker = flotilla::core::stream::EventBroker::new(false, 10);
    let err = broker.subscribe(job_topic_request(&token)).unwrap_err();
    assert_eq!(err, FlotillaError::BrokerDisabled);
}
