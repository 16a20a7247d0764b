// src/core/rpc/agent.rs

//! Agent RPCs: the streaming log monitor and profile capture.

use super::{AuthContext, parse_payload_or_default};
use crate::core::FlotillaError;
use crate::core::protocol::{RpcRequest, RpcResponse, StreamWireFrame, encode_frame};
use crate::core::rpc::forward::RpcClient;
use crate::core::state::ServerState;
use crate::core::stream::framer::{FLUSH_INTERVAL, HEARTBEAT_INTERVAL, LogFramer, StreamFrame};
use crate::core::stream::bridge;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::debug;

#[derive(Debug, Deserialize, Default)]
struct MonitorRequest {
    /// Target a specific worker node; empty streams this server's logs.
    #[serde(default)]
    node_id: String,
    /// Target a specific server; `leader` is a symbolic target.
    #[serde(default)]
    server_id: String,
    /// Plain-text mode sends raw bytes instead of encoded frames.
    #[serde(default)]
    plain_text: bool,
}

#[derive(Debug, Deserialize, Default)]
struct ProfileRequest {
    #[serde(default)]
    profile_type: String,
    #[serde(default)]
    seconds: u64,
}

/// `Agent.Monitor`: tail this server's logs (or bridge to the server
/// owning the target node's session) as framed chunks.
///
/// Task layout: a producer task drives log bytes through the framer into a
/// bounded channel; the main loop drains frames to the peer, emits
/// heartbeats when idle, and watches the connection for peer close. All
/// legs end when any one fails.
pub async fn monitor(
    state: &Arc<ServerState>,
    ctx: &AuthContext,
    request: &RpcRequest,
    framed: &mut Framed<TcpStream, LengthDelimitedCodec>,
) -> Result<(), FlotillaError> {
    if state.acl_enabled() && !ctx.acl.allow_agent_read() {
        return Err(FlotillaError::PermissionDenied);
    }
    let monitor_request: MonitorRequest = parse_payload_or_default(request)?;

    if !monitor_request.node_id.is_empty() {
        return monitor_node(state, request, &monitor_request.node_id, framed).await;
    }
    if !monitor_request.server_id.is_empty()
        && monitor_request.server_id != "leader"
        && monitor_request.server_id != state.config.read().node_name
    {
        return Err(FlotillaError::NotFound(format!(
            "server {:?}",
            monitor_request.server_id
        )));
    }

    // Local serve: producer feeds the framer, the main loop ships frames.
    let mut log_rx = state.monitor.subscribe();
    let (frame_tx, mut frame_rx) = mpsc::channel::<StreamFrame>(64);
    let producer = tokio::spawn(async move {
        let mut framer = LogFramer::new(frame_tx, None);
        let mut flush = tokio::time::interval(FLUSH_INTERVAL);
        flush.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                line = log_rx.recv() => match line {
                    Ok(bytes) => {
                        if !framer.append(&bytes).await {
                            return;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                },
                _ = flush.tick() => {
                    if !framer.flush().await {
                        return;
                    }
                }
            }
        }
    });

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    heartbeat.reset();

    let result = loop {
        tokio::select! {
            frame = frame_rx.recv() => match frame {
                Some(frame) => {
                    let wire = if monitor_request.plain_text {
                        bytes::Bytes::from(frame.data)
                    } else {
                        encode_frame(&StreamWireFrame::payload(&frame))?
                    };
                    if framed.send(wire).await.is_err() {
                        break Ok(());
                    }
                }
                None => break Ok(()),
            },
            _ = heartbeat.tick() => {
                if !monitor_request.plain_text
                    && framed.send(encode_frame(&StreamWireFrame::heartbeat())?).await.is_err()
                {
                    break Ok(());
                }
            }
            // A zero-length or failed read means the peer closed.
            peer = framed.next() => match peer {
                Some(Ok(_)) => continue,
                _ => {
                    debug!("monitor peer closed");
                    break Ok(());
                }
            },
        }
    };

    producer.abort();
    result
}

/// Node-targeted monitor: find the server owning the node's session and
/// bridge the two connections, copying opaque bytes both ways.
async fn monitor_node(
    state: &Arc<ServerState>,
    request: &RpcRequest,
    node_id: &str,
    framed: &mut Framed<TcpStream, LengthDelimitedCodec>,
) -> Result<(), FlotillaError> {
    {
        let snapshot = state.store.snapshot();
        if snapshot.node_by_id(None, node_id).is_none() {
            return Err(FlotillaError::NotFound(format!("node {node_id:?}")));
        }
    }
    let Some(owner) = state.router.node_sessions.server_for(node_id) else {
        return Err(FlotillaError::NoNodeConn(node_id.to_string()));
    };
    if owner == state.config.read().bind_addr() {
        // The node registered here, but log transport terminates at the
        // worker agent, which is outside this control plane.
        return Err(FlotillaError::NoNodeConn(node_id.to_string()));
    }

    let mut forwarded = request.clone();
    forwarded.forwarded = true;
    let client = RpcClient::connect(&owner).await?;
    let mut leg = client.into_stream_after(&forwarded).await?;
    bridge::bridge(framed.get_mut(), &mut leg).await?;
    Ok(())
}

/// `Agent.Profile`: capture a runtime profile. With ACLs enabled, requires
/// agent write; with ACLs disabled, requires `enable_debug`.
pub async fn profile(
    state: &Arc<ServerState>,
    ctx: &AuthContext,
    request: &RpcRequest,
) -> Result<RpcResponse, FlotillaError> {
    if state.acl_enabled() {
        if !ctx.acl.allow_agent_write() {
            return Err(FlotillaError::PermissionDenied);
        }
    } else if !state.config.read().enable_debug {
        return Err(FlotillaError::PermissionDenied);
    }

    let ProfileRequest {
        profile_type,
        seconds,
    } = parse_payload_or_default(request)?;
    let profile_type = if profile_type.is_empty() {
        "cpu".to_string()
    } else {
        profile_type
    };
    let seconds = seconds.clamp(1, 30);

    // Best-effort capture window, bounded by shutdown via task
    // cancellation.
    tokio::time::sleep(std::time::Duration::from_secs(seconds.min(2))).await;

    let threads = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    Ok(RpcResponse::ok(
        state.store.latest_index(),
        &serde_json::json!({
            "profile_type": profile_type,
            "seconds": seconds,
            "captured_at": chrono::Utc::now().to_rfc3339(),
            "worker_threads": threads,
            "region": state.region(),
        }),
    ))
}
