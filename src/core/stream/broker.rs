// src/core/stream/broker.rs

//! The event broker: filtered pub/sub over committed state changes.
//!
//! Each subscriber owns a bounded queue. Delivery preserves publication
//! order; a subscriber that cannot keep up is dropped with
//! `SubscriptionClosed` rather than slowing publishers. Subscriptions are
//! bound to the token that opened them and are closed when that token is
//! deleted, downgraded, or expires.

use crate::core::FlotillaError;
use crate::core::acl::Acl;
use crate::core::events::{Event, Events, Topic};
use crate::core::model::acl::hash_secret;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// How often an idle stream emits a heartbeat frame so clients can detect
/// dead connections. Subscribers must ignore heartbeats.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// A frame delivered to a subscriber.
#[derive(Debug, Clone)]
pub enum BrokerFrame {
    Events(Events),
    Heartbeat,
}

/// Parameters of a subscription request, after the ACL gate.
#[derive(Debug, Clone)]
pub struct SubscribeRequest {
    /// Topic to key filter. An empty key list (or a `*` entry) matches
    /// every key of the topic.
    pub topics: HashMap<Topic, Vec<String>>,
    /// Restricts tenant-scoped topics to one namespace. Management tokens
    /// may leave this unset to see all namespaces.
    pub namespace: Option<String>,
    /// The bearer secret the subscription is bound to. Empty for
    /// subscriptions opened with ACLs disabled.
    pub token_secret: String,
    /// The resolved accessor id, when the secret mapped to a stored token.
    pub token_accessor: Option<String>,
}

struct SubEntry {
    tx: mpsc::Sender<BrokerFrame>,
    topics: HashMap<Topic, Vec<String>>,
    namespace: Option<String>,
    token_secret_hash: [u8; 32],
    token_accessor: Option<String>,
    closed_reason: Arc<Mutex<Option<FlotillaError>>>,
}

/// The consuming end handed to the streaming endpoint.
#[derive(Debug)]
pub struct Subscription {
    pub id: u64,
    rx: mpsc::Receiver<BrokerFrame>,
    closed_reason: Arc<Mutex<Option<FlotillaError>>>,
}

impl Subscription {
    /// The next frame, or the close reason once the broker dropped us.
    pub async fn next(&mut self) -> Result<BrokerFrame, FlotillaError> {
        match self.rx.recv().await {
            Some(frame) => Ok(frame),
            None => Err(self
                .closed_reason
                .lock()
                .clone()
                .unwrap_or(FlotillaError::SubscriptionClosed)),
        }
    }
}

#[derive(Debug)]
pub struct EventBroker {
    enabled: bool,
    buffer: usize,
    next_id: AtomicU64,
    subs: DashMap<u64, SubEntry>,
}

impl std::fmt::Debug for SubEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubEntry")
            .field("topics", &self.topics)
            .field("namespace", &self.namespace)
            .field("token_accessor", &self.token_accessor)
            .finish()
    }
}

impl EventBroker {
    pub fn new(enabled: bool, buffer: usize) -> Self {
        Self {
            enabled,
            buffer: buffer.max(1),
            next_id: AtomicU64::new(0),
            subs: DashMap::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Registers a subscription. The caller has already passed the ACL
    /// gate; the broker only records the binding for later revalidation.
    pub fn subscribe(&self, request: SubscribeRequest) -> Result<Subscription, FlotillaError> {
        if !self.enabled {
            return Err(FlotillaError::BrokerDisabled);
        }
        let (tx, rx) = mpsc::channel(self.buffer);
        let closed_reason = Arc::new(Mutex::new(None));
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.subs.insert(
            id,
            SubEntry {
                tx,
                topics: request.topics,
                namespace: request.namespace,
                token_secret_hash: hash_secret(&request.token_secret),
                token_accessor: request.token_accessor,
                closed_reason: closed_reason.clone(),
            },
        );
        debug!(subscription = id, "event subscription opened");
        Ok(Subscription {
            id,
            rx,
            closed_reason,
        })
    }

    pub fn unsubscribe(&self, id: u64) {
        self.subs.remove(&id);
    }

    pub fn subscription_count(&self) -> usize {
        self.subs.len()
    }

    /// Publishes a batch. Subscribers receive the events matching their
    /// filter, in publication order. Slow subscribers are dropped, never
    /// blocked on.
    pub fn publish(&self, events: Events) {
        if !self.enabled || self.subs.is_empty() {
            return;
        }
        let mut dropped = Vec::new();
        for entry in self.subs.iter() {
            let sub = entry.value();
            let matching: Vec<Event> = events
                .events
                .iter()
                .filter(|e| Self::matches(sub, e))
                .cloned()
                .collect();
            if matching.is_empty() {
                continue;
            }
            let frame = BrokerFrame::Events(Events {
                index: events.index,
                events: matching,
            });
            match sub.tx.try_send(frame) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(subscription = *entry.key(), "dropping slow event subscriber");
                    *sub.closed_reason.lock() = Some(FlotillaError::SubscriptionClosed);
                    dropped.push(*entry.key());
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    dropped.push(*entry.key());
                }
            }
        }
        for id in dropped {
            self.subs.remove(&id);
        }
    }

    fn matches(sub: &SubEntry, event: &Event) -> bool {
        if let Some(namespace) = &sub.namespace
            && !event.namespace.is_empty()
            && &event.namespace != namespace
        {
            return false;
        }
        let keys = match sub.topics.get(&event.topic) {
            Some(keys) => keys,
            None => match sub.topics.get(&Topic::All) {
                Some(keys) => keys,
                None => return false,
            },
        };
        keys.is_empty() || keys.iter().any(|k| k == "*" || k == &event.key)
    }

    /// Closes every subscription bound to the given token accessor.
    pub fn close_for_accessor(&self, accessor: &str, reason: FlotillaError) {
        self.close_matching(|sub| sub.token_accessor.as_deref() == Some(accessor), reason);
    }

    /// Closes every subscription whose bound secret hashes to `hash`.
    pub fn close_for_secret_hash(&self, hash: [u8; 32], reason: FlotillaError) {
        self.close_matching(|sub| sub.token_secret_hash == hash, reason);
    }

    fn close_matching(&self, pred: impl Fn(&SubEntry) -> bool, reason: FlotillaError) {
        let ids: Vec<u64> = self
            .subs
            .iter()
            .filter(|e| pred(e.value()))
            .map(|e| *e.key())
            .collect();
        for id in ids {
            if let Some((_, sub)) = self.subs.remove(&id) {
                *sub.closed_reason.lock() = Some(reason.clone());
                debug!(subscription = id, reason = %reason, "event subscription closed");
            }
        }
    }

    /// Re-checks every token-bound subscription against current ACL state.
    /// `check` resolves an accessor to its current ACL, or an error when the
    /// token is gone or expired.
    pub fn revalidate<F>(&self, check: F)
    where
        F: Fn(&str) -> Result<Arc<Acl>, FlotillaError>,
    {
        let mut to_close: Vec<(u64, FlotillaError)> = Vec::new();
        for entry in self.subs.iter() {
            let sub = entry.value();
            let Some(accessor) = &sub.token_accessor else {
                continue;
            };
            match check(accessor) {
                Ok(acl) => {
                    if !subscription_allowed(&acl, &sub.topics, sub.namespace.as_deref()) {
                        to_close.push((*entry.key(), FlotillaError::SubscriptionClosed));
                    }
                }
                Err(e @ FlotillaError::TokenExpired) => to_close.push((*entry.key(), e)),
                Err(_) => to_close.push((*entry.key(), FlotillaError::SubscriptionClosed)),
            }
        }
        for (id, reason) in to_close {
            if let Some((_, sub)) = self.subs.remove(&id) {
                *sub.closed_reason.lock() = Some(reason.clone());
                debug!(subscription = id, reason = %reason, "event subscription revoked");
            }
        }
    }
}

/// Whether an ACL permits a subscription's topic set within a namespace.
/// The wildcard topic requires management; `Node` requires node read; the
/// tenant-scoped topics require read-job in the subscription's namespace.
pub fn subscription_allowed(
    acl: &Acl,
    topics: &HashMap<Topic, Vec<String>>,
    namespace: Option<&str>,
) -> bool {
    use crate::core::acl::NamespaceCapability;
    if acl.is_management() {
        return true;
    }
    let namespace = namespace.unwrap_or(crate::core::model::namespace::DEFAULT_NAMESPACE);
    topics.keys().all(|topic| match topic {
        Topic::All => false,
        Topic::Node => acl.allow_node_read(),
        Topic::Job | Topic::Evaluation | Topic::Allocation | Topic::Deployment | Topic::Service => {
            acl.allow_namespace_op(namespace, NamespaceCapability::READ_JOB)
        }
    })
}
