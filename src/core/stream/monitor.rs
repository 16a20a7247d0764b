// src/core/stream/monitor.rs

//! The monitor sink: a tracing layer that mirrors formatted log events
//! into a broadcast channel so `Agent.Monitor` streams can tail them.

use bytes::Bytes;
use tokio::sync::broadcast;
use tracing::field::{Field, Visit};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;

const MONITOR_BUS_CAPACITY: usize = 1024;

/// The shared bus log lines are mirrored onto.
#[derive(Debug, Clone)]
pub struct MonitorSink {
    tx: broadcast::Sender<Bytes>,
}

impl Default for MonitorSink {
    fn default() -> Self {
        Self::new()
    }
}

impl MonitorSink {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(MONITOR_BUS_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Bytes> {
        self.tx.subscribe()
    }

    pub fn layer(&self) -> MonitorLayer {
        MonitorLayer { tx: self.tx.clone() }
    }
}

/// The tracing-subscriber layer feeding the sink. Dropped lines (no
/// active monitor) are fine; broadcast send errors are ignored.
pub struct MonitorLayer {
    tx: broadcast::Sender<Bytes>,
}

struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        }
    }
}

impl<S> tracing_subscriber::Layer<S> for MonitorLayer
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        if self.tx.receiver_count() == 0 {
            return;
        }
        let mut visitor = MessageVisitor {
            message: String::new(),
        };
        event.record(&mut visitor);
        let metadata = event.metadata();
        let line = format!(
            "{} {} {}: {}\n",
            chrono::Utc::now().to_rfc3339(),
            metadata.level(),
            metadata.target(),
            visitor.message
        );
        let _ = self.tx.send(Bytes::from(line));
    }
}
