// src/server/connection_loop.rs

//! Contains the main server loop for accepting connections and handling
//! graceful shutdown, plus the per-connection envelope loop.

use super::context::ServerContext;
use crate::core::protocol::{RpcRequest, RpcResponse, StreamWireFrame, decode_frame, encode_frame};
use crate::core::rpc::{Dispatcher, agent, event};
use crate::core::FlotillaError;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{debug, error, info, warn};

// Platform-specific signal handling imports
#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Waits for a shutdown signal. On Unix this is SIGINT or SIGTERM; other
/// platforms fall back to Ctrl+C.
async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigint = match signal(SignalKind::interrupt()) {
            Ok(s) => s,
            Err(e) => {
                error!("Failed to install SIGINT handler: {e}");
                return std::future::pending().await;
            }
        };
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                return std::future::pending().await;
            }
        };
        tokio::select! {
            _ = sigint.recv() => info!("SIGINT received, initiating graceful shutdown."),
            _ = sigterm.recv() => info!("SIGTERM received, initiating graceful shutdown."),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Ctrl-C received, initiating graceful shutdown.");
    }
}

/// The main accept loop.
pub async fn run(mut ctx: ServerContext) {
    let mut connection_tasks: JoinSet<()> = JoinSet::new();

    loop {
        tokio::select! {
            biased; // Prioritize shutdown over new work.

            _ = await_shutdown_signal() => {
                break;
            },

            // Background tasks ending early is unexpected outside shutdown.
            Some(result) = ctx.background_tasks.join_next() => {
                match result {
                    Ok(()) => debug!("A background task has completed."),
                    Err(e) => { error!("CRITICAL: Background task panicked: {e:?}. Shutting down."); break; }
                }
            },

            accepted = ctx.listener.accept() => {
                match accepted {
                    Ok((socket, addr)) => {
                        debug!("Accepted new connection from: {}", addr);
                        let dispatcher = ctx.dispatcher.clone();
                        let shutdown_rx = ctx.shutdown_tx.subscribe();
                        connection_tasks.spawn(async move {
                            handle_connection(dispatcher, socket, shutdown_rx).await;
                        });
                    }
                    Err(e) => warn!("Failed to accept connection: {e}"),
                }
            },

            // Reap finished connection tasks so the set stays bounded.
            Some(_) = connection_tasks.join_next() => {},
        }
    }

    info!("Broadcasting shutdown to all tasks.");
    let _ = ctx.shutdown_tx.send(());
    connection_tasks.abort_all();
    ctx.background_tasks.shutdown().await;
}

/// One connection: a loop of unary request/response envelopes, until the
/// peer upgrades it to a streaming RPC or closes.
async fn handle_connection(
    dispatcher: Arc<Dispatcher>,
    socket: TcpStream,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut framed = Framed::new(socket, LengthDelimitedCodec::new());

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => return,

            frame = framed.next() => {
                let bytes = match frame {
                    Some(Ok(bytes)) => bytes,
                    Some(Err(e)) => {
                        debug!("connection read error: {e}");
                        return;
                    }
                    None => return,
                };
                let request: RpcRequest = match decode_frame(&bytes) {
                    Ok(request) => request,
                    Err(e) => {
                        let response = RpcResponse::from_error(&e);
                        let _ = send_response(&mut framed, &response).await;
                        return;
                    }
                };

                if Dispatcher::is_streaming(&request.method) {
                    // Streams own the connection until they end.
                    serve_stream(&dispatcher, request, &mut framed).await;
                    return;
                }

                let response = dispatcher.handle(request).await;
                if send_response(&mut framed, &response).await.is_err() {
                    return;
                }
            }
        }
    }
}

async fn send_response(
    framed: &mut Framed<TcpStream, LengthDelimitedCodec>,
    response: &RpcResponse,
) -> Result<(), FlotillaError> {
    let frame = encode_frame(response)?;
    framed
        .send(frame)
        .await
        .map_err(|e| FlotillaError::Internal(format!("write response: {e}")))
}

/// Runs a streaming method; failures are delivered as a framed error
/// wrapper before the stream closes.
async fn serve_stream(
    dispatcher: &Arc<Dispatcher>,
    request: RpcRequest,
    framed: &mut Framed<TcpStream, LengthDelimitedCodec>,
) {
    let state = dispatcher.state();
    let result = match dispatcher.authenticate(&request) {
        Ok(ctx) => match request.method.as_str() {
            "Event.Stream" => event::stream(state, &ctx, &request, framed).await,
            "Agent.Monitor" => agent::monitor(state, &ctx, &request, framed).await,
            method => Err(FlotillaError::UnknownMethod(method.to_string())),
        },
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        debug!(method = %request.method, error = %e, "stream ended with error");
        if let Ok(frame) = encode_frame(&StreamWireFrame::from_error(&e)) {
            let _ = framed.send(frame).await;
        }
    }
}
