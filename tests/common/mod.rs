// tests/common/mod.rs

//! Shared helpers for integration tests: an in-process server with a
//! temporary keystore, plus envelope builders.

use flotilla::config::Config;
use flotilla::core::FlotillaError;
use flotilla::core::protocol::RpcRequest;
use flotilla::core::rpc::Dispatcher;
use flotilla::core::state::ServerState;
use flotilla::core::stream::MonitorSink;
use std::sync::Arc;
use tempfile::TempDir;

pub struct TestServer {
    pub state: Arc<ServerState>,
    pub dispatcher: Dispatcher,
    // Held so the keystore directory outlives the test.
    _data_dir: TempDir,
}

pub async fn test_server(acl_enabled: bool) -> TestServer {
    let data_dir = TempDir::new().expect("tempdir");
    let mut config = Config::default();
    config.data_dir = data_dir.path().to_string_lossy().into_owned();
    config.dev_mode = true;
    config.acl.enabled = acl_enabled;
    let state = ServerState::initialize(config, MonitorSink::new(), None)
        .await
        .expect("server state");
    TestServer {
        dispatcher: Dispatcher::new(state.clone()),
        state,
        _data_dir: data_dir,
    }
}

pub fn rpc(method: &str, auth_token: &str, payload: serde_json::Value) -> RpcRequest {
    RpcRequest {
        method: method.to_string(),
        auth_token: auth_token.to_string(),
        payload,
        ..Default::default()
    }
}

/// Dispatches a request and unwraps the wire envelope.
pub async fn call(
    server: &TestServer,
    method: &str,
    auth_token: &str,
    payload: serde_json::Value,
) -> Result<(u64, serde_json::Value), FlotillaError> {
    server
        .dispatcher
        .handle(rpc(method, auth_token, payload))
        .await
        .into_result()
}

/// As `call`, with an explicit request namespace.
pub async fn call_ns(
    server: &TestServer,
    method: &str,
    namespace: &str,
    auth_token: &str,
    payload: serde_json::Value,
) -> Result<(u64, serde_json::Value), FlotillaError> {
    let mut request = rpc(method, auth_token, payload);
    request.namespace = namespace.to_string();
    server.dispatcher.handle(request).await.into_result()
}
