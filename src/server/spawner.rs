// src/server/spawner.rs

//! Spawns all of the server's long-running background tasks.

use super::context::ServerContext;
use crate::core::tasks::{gc, replication, token_watch};
use tracing::info;

/// Spawns all critical background tasks into the context's JoinSet.
pub fn spawn_all(ctx: &mut ServerContext) {
    let state = ctx.state.clone();
    let shutdown_rx = ctx.shutdown_tx.subscribe();
    ctx.background_tasks
        .spawn(async move { gc::run(state, shutdown_rx).await });

    let state = ctx.state.clone();
    let shutdown_rx = ctx.shutdown_tx.subscribe();
    ctx.background_tasks
        .spawn(async move { token_watch::run(state, shutdown_rx).await });

    if ctx.state.config().is_authoritative() {
        info!("authoritative region; federated replication disabled");
    } else {
        let state = ctx.state.clone();
        let shutdown_rx = ctx.shutdown_tx.subscribe();
        ctx.background_tasks
            .spawn(async move { replication::run(state, shutdown_rx).await });
    }
}
