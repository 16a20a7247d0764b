// src/core/stream/framer.rs

//! The log framer: batches raw bytes into wire frames with a size cap and
//! a flush interval, for agent monitor and log-tail streams.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;

/// Frame payload cap before a send is forced.
pub const DEFAULT_FRAME_SIZE: usize = 16 * 1024;
/// How often buffered bytes are flushed even when below the size cap.
pub const FLUSH_INTERVAL: Duration = Duration::from_millis(200);
/// Idle heartbeat cadence for framed streams.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

mod base64_bytes {
    //! Frames carry binary data; the JSON wire form is base64.

    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// One frame of a log stream. A frame with empty data and no file event is
/// a heartbeat; subscribers must ignore it.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct StreamFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_event: Option<String>,
    #[serde(with = "base64_bytes", default)]
    pub data: Vec<u8>,
    #[serde(default)]
    pub offset: u64,
}

impl StreamFrame {
    pub fn heartbeat() -> Self {
        Default::default()
    }

    pub fn is_heartbeat(&self) -> bool {
        self.data.is_empty() && self.file_event.is_none()
    }
}

/// Accumulates bytes and emits frames through a bounded channel. The owner
/// drives `append` from the byte producer and `flush` from an interval
/// timer; a full downstream channel applies backpressure to the producer
/// via the async sends.
pub struct LogFramer {
    tx: mpsc::Sender<StreamFrame>,
    file: Option<String>,
    buffer: Vec<u8>,
    offset: u64,
    max_frame_size: usize,
}

impl LogFramer {
    pub fn new(tx: mpsc::Sender<StreamFrame>, file: Option<String>) -> Self {
        Self {
            tx,
            file,
            buffer: Vec::with_capacity(DEFAULT_FRAME_SIZE),
            offset: 0,
            max_frame_size: DEFAULT_FRAME_SIZE,
        }
    }

    pub fn with_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size.max(1);
        self
    }

    /// Buffers bytes, emitting full frames as the size cap is crossed.
    /// Returns false once the receiver is gone.
    pub async fn append(&mut self, mut data: &[u8]) -> bool {
        while !data.is_empty() {
            let room = self.max_frame_size - self.buffer.len();
            let take = room.min(data.len());
            self.buffer.extend_from_slice(&data[..take]);
            data = &data[take..];
            if self.buffer.len() >= self.max_frame_size && !self.flush().await {
                return false;
            }
        }
        true
    }

    /// Emits whatever is buffered. A flush with an empty buffer is a no-op.
    pub async fn flush(&mut self) -> bool {
        if self.buffer.is_empty() {
            return true;
        }
        let data = std::mem::take(&mut self.buffer);
        let frame = StreamFrame {
            file: self.file.clone(),
            file_event: None,
            offset: self.offset,
            data,
        };
        self.offset += frame.data.len() as u64;
        self.tx.send(frame).await.is_ok()
    }

    /// Emits a file event (truncation, rotation) with no data.
    pub async fn file_event(&mut self, event: &str) -> bool {
        if !self.flush().await {
            return false;
        }
        let frame = StreamFrame {
            file: self.file.clone(),
            file_event: Some(event.to_string()),
            offset: self.offset,
            data: Vec::new(),
        };
        self.tx.send(frame).await.is_ok()
    }
}
