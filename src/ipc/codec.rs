//! Frame codec for the sidecar <-> runtime wire protocol.
//!
//! Frame format:
//! ```text
//! ┌──────────┬────────────────────────┐
//! │ len (4B) │   UTF-8 JSON body      │
//! │ u32 BE   │                        │
//! └──────────┴────────────────────────┘
//! ```
//! Length covers the body only, NOT the 4-byte prefix. A zero-length body is
//! a valid frame at this layer; it fails later as a JSON parse error.

use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Read one frame from the stream.
///
/// Returns the body bytes, or `None` on clean EOF before the length prefix.
/// `max_frame_bytes` caps the maximum accepted body size.
pub async fn read_frame<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    max_frame_bytes: u32,
) -> std::io::Result<Option<Vec<u8>>> {
    // Read 4-byte length prefix
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let frame_len = u32::from_be_bytes(len_buf);
    if frame_len > max_frame_bytes {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Frame too large: {} bytes", frame_len),
        ));
    }

    let mut body = vec![0u8; frame_len as usize];
    reader.read_exact(&mut body).await?;

    Ok(Some(body))
}

/// Write one frame to the stream.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    body: &[u8],
) -> std::io::Result<()> {
    let frame_len = body.len() as u32;
    writer.write_all(&frame_len.to_be_bytes()).await?;
    writer.write_all(body).await?;
    writer.flush().await?;
    Ok(())
}
