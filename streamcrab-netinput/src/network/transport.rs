//! Adapter from an async byte stream (e.g. a TCP connection) into a channel queue.

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt};

use super::channel::InputChannelSender;

/// Read `reader` to EOF and push its bytes into `sender` in chunks of at most
/// `chunk_size` bytes. The final chunk is flagged `is_last`; an empty stream still
/// produces one empty final chunk.
///
/// A full queue makes the pump yield until the consumer drains it.
///
/// Returns the total number of bytes forwarded.
pub async fn pump_reader<R>(
    mut reader: R,
    sender: &InputChannelSender,
    chunk_size: usize,
) -> Result<u64>
where
    R: AsyncRead + Unpin,
{
    let chunk_size = chunk_size.max(1);
    let mut total = 0u64;
    let mut pending: Option<Vec<u8>> = None;

    loop {
        let mut buf = vec![0u8; chunk_size];
        let n = reader
            .read(&mut buf)
            .await
            .with_context(|| format!("read from transport failed on {}", sender.channel_id()))?;
        if n == 0 {
            break;
        }
        buf.truncate(n);
        total += n as u64;
        // Hold one chunk back so the last one can carry the end flag.
        if let Some(previous) = pending.replace(buf) {
            sender.send_chunk(previous, false).await?;
        }
    }

    sender
        .send_chunk(pending.unwrap_or_default(), true)
        .await?;
    tracing::debug!(channel = %sender.channel_id(), bytes = total, "transport stream finished");
    Ok(total)
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
