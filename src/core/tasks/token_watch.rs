// src/core/tasks/token_watch.rs

//! Watches the ACL token table and the clock, revalidating live event
//! subscriptions: a deleted, downgraded, or expired token closes every
//! subscription bound to it.

use crate::core::state::ServerState;
use crate::core::store::WatchSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::debug;

/// Upper bound on how long an expired token's subscription may linger when
/// no ACL write wakes the watcher earlier.
const EXPIRY_POLL_INTERVAL: Duration = Duration::from_secs(1);

pub async fn run(state: Arc<ServerState>, mut shutdown_rx: broadcast::Receiver<()>) {
    loop {
        // Arm the token table, then wait for a change or the poll tick.
        let mut ws = WatchSet::new();
        {
            let snapshot = state.store.snapshot();
            let _ = snapshot.acl_tokens(Some(&mut ws));
        }
        let deadline = tokio::time::Instant::now() + EXPIRY_POLL_INTERVAL;
        tokio::select! {
            _ = ws.wait_until(deadline) => {}
            _ = shutdown_rx.recv() => {
                debug!("token watcher shutting down");
                return;
            }
        }

        state.acl.purge_expired();
        let resolver = state.acl.clone();
        state
            .broker
            .revalidate(move |accessor| resolver.resolve_accessor(accessor));
    }
}
