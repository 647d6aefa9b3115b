//! Replays a `TestInstruction` against one buffered server reply.

use super::dsl::Action;
use crate::metrics;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// How much of the reply reached the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The reply was flushed by `sendAll` or by the implicit flush; the
    /// stream is still correctly framed.
    Complete,
    /// The instruction ended without a flush. `sent` bytes were written and
    /// the client side gets half-closed, even if `sent` covers the reply.
    Partial { sent: usize },
}

/// Apply `actions` in order against `reply`, writing to `sink`.
///
/// Each step waits first (if `delayMs` is set), then sends `sendBytes` from
/// the current offset, then flushes the remainder if `sendAll` is present,
/// whatever its value. An instruction with no send step delivers the whole
/// reply once its delays have elapsed. Only a flush yields `Complete`.
pub async fn apply_actions<W>(
    reply: &[u8],
    actions: &[Action],
    sink: &mut W,
) -> std::io::Result<Delivery>
where
    W: AsyncWrite + Unpin,
{
    let mut offset = 0usize;
    let mut sent_explicitly = false;
    let mut flushed = false;

    for action in actions {
        if let Some(delay_ms) = action.delay_ms {
            debug!(delay_ms, offset, "Delaying reply");
            metrics::record_action("delay");
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }

        if let Some(send_bytes) = action.send_bytes {
            let end = offset.saturating_add(send_bytes).min(reply.len());
            debug!(send_bytes, offset, sent = end - offset, "Sending partial reply");
            metrics::record_action("send_bytes");
            write_chunk(sink, &reply[offset..end]).await?;
            offset = end;
            sent_explicitly = true;
        }

        if action.send_all.is_some() {
            debug!(offset, remaining = reply.len() - offset, "Sending rest of reply");
            metrics::record_action("send_all");
            write_chunk(sink, &reply[offset..]).await?;
            offset = reply.len();
            sent_explicitly = true;
            flushed = true;
        }
    }

    if !sent_explicitly {
        write_chunk(sink, &reply[offset..]).await?;
        offset = reply.len();
        flushed = true;
    }

    if flushed {
        Ok(Delivery::Complete)
    } else {
        Ok(Delivery::Partial { sent: offset })
    }
}

async fn write_chunk<W>(sink: &mut W, chunk: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    if chunk.is_empty() {
        return Ok(());
    }
    sink.write_all(chunk).await?;
    sink.flush().await
}
