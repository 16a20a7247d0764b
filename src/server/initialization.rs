// src/server/initialization.rs

//! Builds the shared server state and binds the RPC listener.

use super::context::ServerContext;
use crate::config::Config;
use crate::core::rpc::Dispatcher;
use crate::core::state::ServerState;
use crate::core::stream::MonitorSink;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::info;

pub async fn setup(config: Config, monitor: MonitorSink) -> Result<ServerContext> {
    let bind_addr = config.bind_addr();
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind RPC listener on {bind_addr}"))?;
    info!(
        region = %config.region,
        addr = %bind_addr,
        "Flotilla server listening"
    );

    let state = ServerState::initialize(config, monitor, None)
        .await
        .context("Failed to initialize server state")?;
    let dispatcher = Arc::new(Dispatcher::new(state.clone()));

    let (shutdown_tx, _) = broadcast::channel(1);
    Ok(ServerContext {
        state,
        dispatcher,
        listener,
        shutdown_tx,
        background_tasks: JoinSet::new(),
    })
}
