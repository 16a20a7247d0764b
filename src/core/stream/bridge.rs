// src/core/stream/bridge.rs

//! Duplex byte bridging between two stream legs.
//!
//! Used when a streaming RPC targets a node whose session lives on another
//! server: this server opens a leg to the owner and copies bytes both ways
//! until either side closes. Both halves transport opaque bytes; frame
//! boundaries survive because both ends speak the same wire.

use crate::core::FlotillaError;
use tokio::io::{AsyncRead, AsyncWrite, copy_bidirectional};
use tracing::debug;

/// Copies bytes in both directions until either side closes or errors.
/// Returns the byte counts (a-to-b, b-to-a).
pub async fn bridge<A, B>(a: &mut A, b: &mut B) -> Result<(u64, u64), FlotillaError>
where
    A: AsyncRead + AsyncWrite + Unpin + ?Sized,
    B: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    match copy_bidirectional(a, b).await {
        Ok((a_to_b, b_to_a)) => {
            debug!(a_to_b, b_to_a, "stream bridge closed");
            Ok((a_to_b, b_to_a))
        }
        Err(e) => Err(e.into()),
    }
}
