//! Event channel framing
//!
//! Each frame is a little-endian `u32` length followed by that many bytes of
//! JSON. The same framing carries records one way and acknowledgments back.

use std::io;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Maximum frame size (10 MB)
const MAX_FRAME_SIZE: u32 = 10 * 1024 * 1024;

/// Send a length-prefixed frame
pub async fn send_frame<W: AsyncWriteExt + Unpin>(writer: &mut W, data: &[u8]) -> io::Result<()> {
    if data.len() > MAX_FRAME_SIZE as usize {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "Frame too large"));
    }

    let len = data.len() as u32;
    writer.write_all(&len.to_le_bytes()).await?;
    writer.write_all(data).await?;
    writer.flush().await?;
    Ok(())
}

/// Receive a length-prefixed frame
pub async fn recv_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_le_bytes(len_buf);

    if len > MAX_FRAME_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Frame too large: {} bytes", len),
        ));
    }

    let mut data = vec![0u8; len as usize];
    reader.read_exact(&mut data).await?;
    Ok(data)
}
