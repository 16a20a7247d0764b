// src/core/rpc/forward.rs

//! Request forwarding: the internal RPC client, the region router, and the
//! node-session table.

use crate::core::FlotillaError;
use crate::core::protocol::{RpcRequest, RpcResponse, decode_frame, encode_frame};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::debug;

// Timeout constants for robust network operations.
const CLIENT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const CLIENT_WRITE_TIMEOUT: Duration = Duration::from_secs(2);
const CLIENT_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// An internal client for sending RPCs to other servers.
pub struct RpcClient {
    framed: Framed<TcpStream, LengthDelimitedCodec>,
}

impl RpcClient {
    /// Creates a TCP connection to the target server with a timeout.
    pub async fn connect(addr: &str) -> Result<Self, FlotillaError> {
        let stream = tokio::time::timeout(CLIENT_CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| FlotillaError::ForwardingError(format!("connect timeout to {addr}")))?
            .map_err(|e| FlotillaError::ForwardingError(format!("connect to {addr}: {e}")))?;
        Ok(Self {
            framed: Framed::new(stream, LengthDelimitedCodec::new()),
        })
    }

    /// Sends one request envelope and awaits one response envelope.
    pub async fn call(&mut self, request: &RpcRequest) -> Result<RpcResponse, FlotillaError> {
        let frame = encode_frame(request)?;
        tokio::time::timeout(CLIENT_WRITE_TIMEOUT, self.framed.send(frame))
            .await
            .map_err(|_| FlotillaError::ForwardingError("write timeout".to_string()))?
            .map_err(|e| FlotillaError::ForwardingError(format!("write: {e}")))?;

        match tokio::time::timeout(CLIENT_READ_TIMEOUT, self.framed.next()).await {
            Ok(Some(Ok(frame))) => decode_frame(&frame),
            Ok(Some(Err(e))) => Err(FlotillaError::ForwardingError(format!("read: {e}"))),
            Ok(None) => Err(FlotillaError::ForwardingError(
                "connection closed by peer".to_string(),
            )),
            Err(_) => Err(FlotillaError::ForwardingError(
                "read timeout while waiting for response".to_string(),
            )),
        }
    }

    /// Hands the underlying connection back for raw bridging after the
    /// request envelope has been sent.
    pub async fn into_stream_after(
        mut self,
        request: &RpcRequest,
    ) -> Result<TcpStream, FlotillaError> {
        let frame = encode_frame(request)?;
        tokio::time::timeout(CLIENT_WRITE_TIMEOUT, self.framed.send(frame))
            .await
            .map_err(|_| FlotillaError::ForwardingError("write timeout".to_string()))?
            .map_err(|e| FlotillaError::ForwardingError(format!("write: {e}")))?;
        Ok(self.framed.into_inner())
    }
}

/// Tracks which server owns the session to each worker node. Consulted on
/// every node-targeted RPC.
#[derive(Debug, Default)]
pub struct NodeSessionTable {
    sessions: DashMap<String, String>,
}

impl NodeSessionTable {
    pub fn register(&self, node_id: &str, server_addr: &str) {
        self.sessions
            .insert(node_id.to_string(), server_addr.to_string());
    }

    pub fn deregister(&self, node_id: &str) {
        self.sessions.remove(node_id);
    }

    pub fn server_for(&self, node_id: &str) -> Option<String> {
        self.sessions.get(node_id).map(|s| s.value().clone())
    }
}

/// Knows the server addresses of every region and forwards requests.
#[derive(Debug)]
pub struct RegionRouter {
    local_region: String,
    regions: RwLock<HashMap<String, Vec<String>>>,
    pub node_sessions: NodeSessionTable,
}

impl RegionRouter {
    pub fn new(local_region: String, regions: HashMap<String, Vec<String>>) -> Self {
        Self {
            local_region,
            regions: RwLock::new(regions),
            node_sessions: NodeSessionTable::default(),
        }
    }

    pub fn local_region(&self) -> &str {
        &self.local_region
    }

    pub fn known_regions(&self) -> Vec<String> {
        let mut regions: Vec<String> = self.regions.read().keys().cloned().collect();
        if !regions.contains(&self.local_region) {
            regions.push(self.local_region.clone());
        }
        regions.sort();
        regions
    }

    pub fn set_region_servers(&self, region: &str, servers: Vec<String>) {
        self.regions.write().insert(region.to_string(), servers);
    }

    /// A random server address in the region, for forwarding.
    pub fn pick_server(&self, region: &str) -> Option<String> {
        let regions = self.regions.read();
        let servers = regions.get(region)?;
        servers.choose(&mut rand::thread_rng()).cloned()
    }

    /// Forwards a request to any server in another region.
    pub async fn forward_region(
        &self,
        region: &str,
        request: &RpcRequest,
    ) -> Result<RpcResponse, FlotillaError> {
        let Some(addr) = self.pick_server(region) else {
            return Err(FlotillaError::ForwardingError(format!(
                "no known servers in region {region:?}"
            )));
        };
        debug!(region, addr, method = %request.method, "forwarding request to region");
        let mut client = RpcClient::connect(&addr).await?;
        client.call(request).await
    }

    /// Forwards a write to the region leader. With no gossip transport in
    /// the core, the leader is unreachable from a non-leader and the
    /// request fails as `NoLeader` for the caller to retry.
    pub async fn forward_leader(
        &self,
        _request: &RpcRequest,
    ) -> Result<RpcResponse, FlotillaError> {
        Err(FlotillaError::NoLeader)
    }
}
