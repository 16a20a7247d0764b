// src/core/store/watch.rs

//! The watch-set mechanism backing blocking queries.
//!
//! Rather than observer objects held by entities, watches are a registry of
//! version channels keyed by token (table, row, or prefix). A read arms
//! tokens into a `WatchSet`, recording the version already seen; a write
//! bumps every token it invalidates. Arming records the seen version, so a
//! bump that lands between query execution and parking is still observed.

use super::TableId;
use dashmap::DashMap;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

/// A token naming a unit of state a query depends on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WatchToken {
    /// Any write to the table.
    Table(TableId),
    /// A write touching one row, by primary key.
    Row(TableId, String),
    /// A write touching any row whose key starts with the prefix.
    Prefix(TableId, String),
}

/// The process-wide watch registry.
#[derive(Debug, Default)]
pub struct WatchRegistry {
    channels: DashMap<WatchToken, watch::Sender<u64>>,
}

impl WatchRegistry {
    pub fn new() -> Self {
        Default::default()
    }

    /// Subscribes to a token, marking the current version as seen.
    fn subscribe(&self, token: WatchToken) -> watch::Receiver<u64> {
        let entry = self
            .channels
            .entry(token)
            .or_insert_with(|| watch::channel(0).0);
        let mut rx = entry.subscribe();
        rx.borrow_and_update();
        rx
    }

    /// Wakes every watcher invalidated by a write touching `keys` in
    /// `table`: the table token, the exact row tokens, and any armed prefix
    /// covering one of the keys.
    pub fn wake(&self, table: TableId, keys: &[String]) {
        for entry in self.channels.iter() {
            let fire = match entry.key() {
                WatchToken::Table(t) => *t == table,
                WatchToken::Row(t, key) => *t == table && keys.iter().any(|k| k == key),
                WatchToken::Prefix(t, prefix) => {
                    *t == table && keys.iter().any(|k| k.starts_with(prefix.as_str()))
                }
            };
            if fire {
                entry.value().send_modify(|v| *v += 1);
            }
        }
    }

    /// Wakes every watcher regardless of token. Used after a snapshot
    /// restore, when any query result may have changed.
    pub fn wake_all(&self) {
        for entry in self.channels.iter() {
            entry.value().send_modify(|v| *v += 1);
        }
    }

    /// Drops channels that no longer have any subscriber. Called
    /// opportunistically after wakes to keep the registry bounded.
    pub fn purge(&self) -> usize {
        let mut purged = 0;
        self.channels.retain(|_, sender| {
            if sender.receiver_count() == 0 {
                purged += 1;
                false
            } else {
                true
            }
        });
        if purged > 0 {
            debug!("Purged {} idle watch channels.", purged);
        }
        purged
    }
}

/// The set of tokens one blocking query armed during its read.
#[derive(Debug, Default)]
pub struct WatchSet {
    receivers: Vec<watch::Receiver<u64>>,
}

impl WatchSet {
    pub fn new() -> Self {
        Default::default()
    }

    /// Arms a token against the registry.
    pub fn arm(&mut self, registry: &WatchRegistry, token: WatchToken) {
        self.receivers.push(registry.subscribe(token));
    }

    pub fn is_empty(&self) -> bool {
        self.receivers.is_empty()
    }

    /// Parks until any armed token fires or the deadline passes. Returns
    /// true when a token fired, false on timeout. A token that fired after
    /// arming but before this call resolves immediately.
    pub async fn wait_until(mut self, deadline: tokio::time::Instant) -> bool {
        if self.receivers.is_empty() {
            tokio::time::sleep_until(deadline).await;
            return false;
        }
        let changed: Vec<_> = self
            .receivers
            .iter_mut()
            .map(|rx| Box::pin(rx.changed()))
            .collect();
        tokio::select! {
            _ = futures::future::select_all(changed) => true,
            _ = tokio::time::sleep_until(deadline) => false,
        }
    }
}

/// The default blocking window applied when a caller sets `min_query_index`
/// without a wait, and the hard cap applied to caller-supplied waits.
pub const DEFAULT_BLOCKING_WAIT: Duration = Duration::from_secs(300);
pub const MAX_BLOCKING_WAIT: Duration = Duration::from_secs(600);
