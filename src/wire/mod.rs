//! Multipart frame transport
//!
//! Every message on every channel is an ordered sequence of frames. On the
//! wire a message is a big-endian `u32` frame count followed by each frame as
//! a `u32` length prefix plus payload bytes. Frame counts and lengths are
//! bounded so garbage input cannot make the broker allocate unboundedly.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// A single wire frame.
pub type Frame = Vec<u8>;

/// Upper bound on frames per message. The largest legitimate message is a
/// replayed event: the SYNC tag plus six event frames.
pub const MAX_FRAMES: u32 = 16;

/// Upper bound on a single frame's payload (16 MiB).
pub const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

/// Write one multipart message.
pub async fn write_message<W>(writer: &mut W, frames: &[Frame]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_u32(frames.len() as u32).await?;
    for frame in frames {
        writer.write_u32(frame.len() as u32).await?;
        writer.write_all(frame).await?;
    }
    writer.flush().await
}

/// Read one multipart message.
///
/// Returns `Ok(None)` on a clean end-of-stream (peer closed between
/// messages); a close mid-message is an error like any other truncation.
pub async fn read_message<R>(reader: &mut R) -> io::Result<Option<Vec<Frame>>>
where
    R: AsyncRead + Unpin,
{
    let count = match reader.read_u32().await {
        Ok(count) => count,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    };
    if count > MAX_FRAMES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame count {} exceeds limit {}", count, MAX_FRAMES),
        ));
    }

    let mut frames = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let len = reader.read_u32().await?;
        if len > MAX_FRAME_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame length {} exceeds limit {}", len, MAX_FRAME_LEN),
            ));
        }
        let mut frame = vec![0u8; len as usize];
        reader.read_exact(&mut frame).await?;
        frames.push(frame);
    }

    Ok(Some(frames))
}
