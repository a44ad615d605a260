//! Envelope framing over a byte stream.

use anyhow::{Context, Result};
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use jobwire_core::wire::{EnvelopeHeader, HEADER_LEN};
use jobwire_services::ConnectionId;

/// Read one complete frame (header + body).
///
/// `Ok(None)` on a clean end of stream between frames. Only the length is
/// checked here; a frame with a bad version or reserved bytes is returned
/// whole and rejected by the dispatcher, so the stream stays in sync. An
/// oversize length is an error: the next frame boundary cannot be trusted.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    let mut filled = 0;
    while filled < HEADER_LEN {
        let n = reader
            .read(&mut header[filled..])
            .await
            .context("failed to read frame header")?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            anyhow::bail!("connection closed mid-header ({filled} of {HEADER_LEN} bytes)");
        }
        filled += n;
    }

    let parsed = EnvelopeHeader::peek(&header).context("unreadable frame header")?;

    let mut frame = vec![0u8; HEADER_LEN + parsed.body_len()];
    frame[..HEADER_LEN].copy_from_slice(&header);
    reader
        .read_exact(&mut frame[HEADER_LEN..])
        .await
        .context("connection closed mid-body")?;
    Ok(Some(frame))
}

/// Writer task for one connection: drains queued frames onto the socket
/// until the handle is dropped or a write fails.
pub async fn write_frames<W>(
    mut writer: W,
    mut frames: mpsc::UnboundedReceiver<Bytes>,
    connection: ConnectionId,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = frames.recv().await {
        if let Err(e) = writer.write_all(&frame).await {
            tracing::warn!(connection, error = %e, "frame write failed, closing writer");
            return;
        }
    }
    let _ = writer.shutdown().await;
}
