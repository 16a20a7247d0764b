// src/core/events.rs

//! Event types published by the FSM on every commit and consumed by the
//! event broker's subscribers.

use serde::{Deserialize, Serialize};

/// Event topics. `All` is the wildcard and requires a management token to
/// subscribe to.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
pub enum Topic {
    Job,
    Evaluation,
    Allocation,
    Deployment,
    Node,
    Service,
    #[serde(rename = "*")]
    #[strum(serialize = "*")]
    All,
}

/// A single state-change event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub topic: Topic,
    /// The type of change, e.g. `JobRegistered`, `TokenDeleted`.
    pub event_type: String,
    #[serde(default)]
    pub namespace: String,
    /// The primary key of the entity the event describes.
    pub key: String,
    pub index: u64,
    /// The entity itself, JSON-encoded.
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// A batch of events sharing one commit index. Delivery to a subscriber
/// preserves publication order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Events {
    pub index: u64,
    pub events: Vec<Event>,
}

impl Event {
    pub fn new<T: Serialize>(
        topic: Topic,
        event_type: &str,
        namespace: &str,
        key: &str,
        index: u64,
        payload: &T,
    ) -> Self {
        Self {
            topic,
            event_type: event_type.to_string(),
            namespace: namespace.to_string(),
            key: key.to_string(),
            index,
            payload: serde_json::to_value(payload).unwrap_or(serde_json::Value::Null),
        }
    }
}
