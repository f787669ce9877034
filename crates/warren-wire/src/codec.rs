//! Length-prefixed postcard framing over async streams.
//!
//! A frame is a `u32` little-endian payload length followed by the
//! postcard encoding of the value. Frames above [`MAX_FRAME_SIZE`] are
//! rejected on both sides; a short read mid-frame surfaces as a clean
//! end-of-stream only at a frame boundary.

use serde::{Serialize, de::DeserializeOwned};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Bytes of the length prefix.
pub const FRAME_HEADER_SIZE: usize = 4;

/// Upper bound on a single frame. Snapshot transfers dominate sizing.
pub const MAX_FRAME_SIZE: usize = 64 << 20;

/// Errors from framing and encoding.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec: {0}")]
    Codec(#[from] postcard::Error),

    #[error("frame of {0} bytes exceeds the {MAX_FRAME_SIZE} byte limit")]
    FrameTooLarge(usize),

    #[error("connection closed mid-frame")]
    Truncated,

    #[error("envelope schema {got} is newer than supported {supported}")]
    SchemaTooNew { got: u16, supported: u16 },

    #[error("envelope kind does not match its payload")]
    KindMismatch,
}

/// Writes one value as a frame and flushes.
pub async fn write_frame<T, W>(writer: &mut W, value: &T) -> crate::Result<()>
where
    T: Serialize,
    W: AsyncWrite + Unpin,
{
    let payload = postcard::to_allocvec(value)?;
    if payload.len() > MAX_FRAME_SIZE {
        return Err(WireError::FrameTooLarge(payload.len()));
    }
    let len = payload.len() as u32;
    writer.write_all(&len.to_le_bytes()).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one frame. `Ok(None)` is a clean close at a frame boundary; a
/// close inside a frame is [`WireError::Truncated`].
pub async fn read_frame<T, R>(reader: &mut R) -> crate::Result<Option<T>>
where
    T: DeserializeOwned,
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; FRAME_HEADER_SIZE];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_le_bytes(header) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(WireError::FrameTooLarge(len));
    }

    let mut payload = vec![0u8; len];
    match reader.read_exact(&mut payload).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(WireError::Truncated);
        }
        Err(e) => return Err(e.into()),
    }

    Ok(Some(postcard::from_bytes(&payload)?))
}
