//! Frame codec: form-feed-delimited JSON documents.
//!
//! Each message on the wire is a JSON document terminated by a single
//! `\x0c` (form feed) byte, matching the framing used by node-ipc peers.
//! JSON never contains a raw form feed (it must be escaped as `\f` inside
//! strings), so the delimiter is unambiguous.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// The byte that terminates every frame.
pub const FRAME_DELIMITER: u8 = 0x0c;

/// Reads one frame, without its delimiter.
///
/// Returns `Ok(None)` on a clean end-of-stream. A final unterminated frame
/// (peer died mid-write) is returned as-is; the packet codec rejects it.
pub async fn read_frame<R>(reader: &mut R) -> std::io::Result<Option<Vec<u8>>>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let n = reader.read_until(FRAME_DELIMITER, &mut buf).await?;
    if n == 0 {
        return Ok(None);
    }
    if buf.last() == Some(&FRAME_DELIMITER) {
        buf.pop();
    }
    Ok(Some(buf))
}

/// Writes one frame followed by its delimiter and flushes.
pub async fn write_frame<W>(writer: &mut W, data: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(data).await?;
    writer.write_all(&[FRAME_DELIMITER]).await?;
    writer.flush().await
}
