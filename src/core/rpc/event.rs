// src/core/rpc/event.rs

//! `Event.Stream`: the topic-filtered event bus endpoint.

use super::{AuthContext, parse_payload};
use crate::core::FlotillaError;
use crate::core::events::Topic;
use crate::core::protocol::{RpcRequest, StreamWireFrame, encode_frame};
use crate::core::state::ServerState;
use crate::core::stream::broker::{
    BrokerFrame, HEARTBEAT_INTERVAL, SubscribeRequest, subscription_allowed,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::debug;

#[derive(Debug, Deserialize)]
struct EventStreamRequest {
    /// Topic name to key filters; `*` is the wildcard topic.
    topics: HashMap<String, Vec<String>>,
    #[serde(default)]
    namespace: Option<String>,
}

/// Serves one event subscription until the peer closes, the broker drops
/// us, or the bound token is revoked.
pub async fn stream(
    state: &Arc<ServerState>,
    ctx: &AuthContext,
    request: &RpcRequest,
    framed: &mut Framed<TcpStream, LengthDelimitedCodec>,
) -> Result<(), FlotillaError> {
    if !state.broker.is_enabled() {
        return Err(FlotillaError::BrokerDisabled);
    }
    let EventStreamRequest { topics, namespace } = parse_payload(request)?;

    let mut parsed_topics: HashMap<Topic, Vec<String>> = HashMap::new();
    for (name, keys) in topics {
        let topic = Topic::from_str(&name)
            .map_err(|_| FlotillaError::InvalidRequest(format!("unknown topic {name:?}")))?;
        parsed_topics.insert(topic, keys);
    }
    if parsed_topics.is_empty() {
        return Err(FlotillaError::InvalidRequest(
            "at least one topic is required".to_string(),
        ));
    }

    // Non-management subscribers are confined to one namespace and to
    // topics their ACL can read.
    let namespace = if ctx.acl.is_management() {
        namespace
    } else {
        Some(
            namespace
                .unwrap_or_else(|| crate::core::model::namespace::DEFAULT_NAMESPACE.to_string()),
        )
    };
    if state.acl_enabled()
        && !subscription_allowed(&ctx.acl, &parsed_topics, namespace.as_deref())
    {
        return Err(FlotillaError::PermissionDenied);
    }

    let mut subscription = state.broker.subscribe(SubscribeRequest {
        topics: parsed_topics,
        namespace,
        token_secret: ctx.secret.clone(),
        token_accessor: ctx.token_accessor.clone(),
    })?;
    let subscription_id = subscription.id;

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let result = loop {
        tokio::select! {
            frame = subscription.next() => match frame {
                Ok(BrokerFrame::Events(events)) => {
                    if framed.send(encode_frame(&StreamWireFrame::payload(&events))?).await.is_err() {
                        break Ok(());
                    }
                }
                Ok(BrokerFrame::Heartbeat) => {
                    if framed.send(encode_frame(&StreamWireFrame::heartbeat())?).await.is_err() {
                        break Ok(());
                    }
                }
                // The broker closed us; the connection loop delivers the
                // error as a framed wrapper before closing.
                Err(e) => break Err(e),
            },
            _ = heartbeat.tick() => {
                if framed.send(encode_frame(&StreamWireFrame::heartbeat())?).await.is_err() {
                    break Ok(());
                }
            }
            peer = framed.next() => match peer {
                Some(Ok(_)) => continue,
                _ => {
                    debug!(subscription = subscription_id, "event stream peer closed");
                    break Ok(());
                }
            },
        }
    };

    state.broker.unsubscribe(subscription_id);
    result
}
