// src/core/protocol/mod.rs

//! The RPC wire protocol: length-delimited JSON envelopes.
//!
//! Every connection speaks frames of `LengthDelimitedCodec`; each frame is
//! one JSON document. Unary RPCs exchange one `RpcRequest` for one
//! `RpcResponse`; streaming RPCs keep the connection and deliver
//! `StreamWireFrame`s until either side closes.

use crate::core::FlotillaError;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// The request envelope carried by every RPC.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RpcRequest {
    pub method: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub auth_token: String,
    /// Blocking-query floor; zero disables blocking.
    #[serde(default)]
    pub min_query_index: u64,
    /// Blocking-query wait in milliseconds.
    #[serde(default)]
    pub max_query_time_ms: Option<u64>,
    /// Set by the first server that forwards the request, to prevent loops.
    #[serde(default)]
    pub forwarded: bool,
    /// Method-specific fields.
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// An error as carried on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireError {
    pub code: String,
    pub message: String,
}

impl From<&FlotillaError> for WireError {
    fn from(e: &FlotillaError) -> Self {
        Self {
            code: e.code().to_string(),
            message: e.to_string(),
        }
    }
}

impl WireError {
    pub fn into_error(self) -> FlotillaError {
        FlotillaError::from_wire(&self.code, &self.message)
    }
}

/// The unary response envelope. Exactly one of `result`/`error` is set.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RpcResponse {
    /// The index the response was generated at (reads) or committed at
    /// (writes).
    #[serde(default)]
    pub index: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

impl RpcResponse {
    pub fn ok<T: Serialize>(index: u64, result: &T) -> Self {
        Self {
            index,
            result: serde_json::to_value(result).ok(),
            error: None,
        }
    }

    pub fn from_error(e: &FlotillaError) -> Self {
        Self {
            index: 0,
            result: None,
            error: Some(WireError::from(e)),
        }
    }

    pub fn into_result(self) -> Result<(u64, serde_json::Value), FlotillaError> {
        match self.error {
            Some(wire) => Err(wire.into_error()),
            None => Ok((self.index, self.result.unwrap_or(serde_json::Value::Null))),
        }
    }
}

/// One frame of a streaming RPC. Streams deliver errors as a framed
/// wrapper and then close; heartbeats must be ignored by clients.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StreamWireFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(default)]
    pub heartbeat: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

impl StreamWireFrame {
    pub fn payload<T: Serialize>(value: &T) -> Self {
        Self {
            payload: serde_json::to_value(value).ok(),
            ..Default::default()
        }
    }

    pub fn heartbeat() -> Self {
        Self {
            heartbeat: true,
            ..Default::default()
        }
    }

    pub fn from_error(e: &FlotillaError) -> Self {
        Self {
            error: Some(WireError::from(e)),
            ..Default::default()
        }
    }
}

/// Encodes one frame for the length-delimited transport.
pub fn encode_frame<T: Serialize>(value: &T) -> Result<Bytes, FlotillaError> {
    Ok(Bytes::from(serde_json::to_vec(value)?))
}

/// Decodes one frame from the length-delimited transport.
pub fn decode_frame<T: DeserializeOwned>(data: &[u8]) -> Result<T, FlotillaError> {
    Ok(serde_json::from_slice(data)?)
}
