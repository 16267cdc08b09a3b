//! Length-prefixed JSON framing.
//!
//! Every frame on the wire is a big-endian `u32` byte length followed
//! by exactly that many bytes of JSON. The length covers the JSON body
//! only. Frames above [`MAX_FRAME_BYTES`] are rejected without
//! allocating.
//!
//! ```text
//! ┌──────────────┬──────────────────────────────┐
//! │ len: u32 BE  │ body: len bytes of JSON      │
//! └──────────────┴──────────────────────────────┘
//! ```

use crate::error::ProtoError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Upper bound on a single frame body. Matches the scanner's 1 MiB
/// line limit; no legitimate frame comes close.
pub const MAX_FRAME_BYTES: usize = 1 << 20;

/// Writes one frame and flushes.
///
/// # Errors
///
/// [`ProtoError::FrameTooLarge`] if the encoded body exceeds
/// [`MAX_FRAME_BYTES`]; [`ProtoError::Io`] on transport failure.
pub async fn write_frame<W, T>(writer: &mut W, value: &T) -> Result<(), ProtoError>
where
    W: AsyncWriteExt + Unpin,
    T: Serialize,
{
    let body = serde_json::to_vec(value)?;
    if body.len() > MAX_FRAME_BYTES {
        return Err(ProtoError::FrameTooLarge(body.len() as u32));
    }
    writer.write_u32(body.len() as u32).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one frame.
///
/// # Errors
///
/// [`ProtoError::Closed`] on clean EOF at a frame boundary,
/// [`ProtoError::FrameTooLarge`] on an oversize announcement,
/// [`ProtoError::Codec`] on malformed JSON, [`ProtoError::Io`]
/// otherwise.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<T, ProtoError>
where
    R: AsyncReadExt + Unpin,
    T: DeserializeOwned,
{
    let len = match reader.read_u32().await {
        Ok(len) => len,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(ProtoError::Closed);
        }
        Err(e) => return Err(e.into()),
    };
    if len as usize > MAX_FRAME_BYTES {
        return Err(ProtoError::FrameTooLarge(len));
    }
    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;
    Ok(serde_json::from_slice(&body)?)
}
