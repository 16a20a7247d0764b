// src/server/context.rs

//! The assembled runtime context handed between server setup phases.

use crate::core::rpc::Dispatcher;
use crate::core::state::ServerState;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinSet;

pub struct ServerContext {
    pub state: Arc<ServerState>,
    pub dispatcher: Arc<Dispatcher>,
    pub listener: TcpListener,
    /// Fanned out to every background task and connection for graceful
    /// shutdown.
    pub shutdown_tx: broadcast::Sender<()>,
    pub background_tasks: JoinSet<()>,
}
