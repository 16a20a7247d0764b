// src/core/store/blocking.rs

//! The blocking-query framework.
//!
//! A reader supplies `min_query_index` and a wait window. The query runs
//! against a snapshot, arming watch tokens as it reads; if the returned
//! index already exceeds `min_query_index` it returns immediately,
//! otherwise the task parks on the watch set, re-running on every wake
//! until the index advances or the deadline fires.

use super::watch::{DEFAULT_BLOCKING_WAIT, MAX_BLOCKING_WAIT};
use super::{StateSnapshot, StateStore, WatchSet};
use crate::core::FlotillaError;
use std::time::Duration;
use tokio::time::Instant;

/// Blocking parameters carried by read RPCs.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryOptions {
    /// Block until the result index exceeds this value. Zero disables
    /// blocking.
    pub min_query_index: u64,
    /// How long to wait at most. Clamped to the server maximum; defaults to
    /// the server window when unset.
    pub max_query_time: Option<Duration>,
}

impl QueryOptions {
    pub fn wait(&self) -> Duration {
        self.max_query_time
            .unwrap_or(DEFAULT_BLOCKING_WAIT)
            .min(MAX_BLOCKING_WAIT)
    }
}

/// Runs `query` under the blocking protocol. The closure receives a fresh
/// snapshot and watch set per attempt and returns `(index, result)` where
/// `index` is the high-water mark of the tables it read.
pub async fn run_blocking_query<T, F>(
    store: &StateStore,
    opts: QueryOptions,
    mut query: F,
) -> Result<(u64, T), FlotillaError>
where
    F: FnMut(&StateSnapshot<'_>, &mut WatchSet) -> Result<(u64, T), FlotillaError>,
{
    let deadline = Instant::now() + opts.wait();

    loop {
        let mut ws = WatchSet::new();
        let (index, result) = {
            let snapshot = store.snapshot();
            query(&snapshot, &mut ws)?
        };

        if opts.min_query_index == 0 || index > opts.min_query_index {
            return Ok((index, result));
        }

        // Park until something we read changes, then re-run. On timeout the
        // query runs once more so the caller sees the freshest state.
        if !ws.wait_until(deadline).await {
            let mut ws = WatchSet::new();
            let snapshot = store.snapshot();
            return query(&snapshot, &mut ws);
        }
    }
}
