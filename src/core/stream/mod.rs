// src/core/stream/mod.rs

//! The streaming hub: the event broker (topic/namespace filtered pub/sub)
//! and the framed log stream, plus duplex bridging for node-targeted
//! streams.

pub mod bridge;
pub mod broker;
pub mod framer;
pub mod monitor;

pub use broker::{BrokerFrame, EventBroker, SubscribeRequest, Subscription};
pub use framer::{LogFramer, StreamFrame};
pub use monitor::MonitorSink;
