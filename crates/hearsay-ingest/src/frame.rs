//! Wire framing for the utterance transport.
//!
//! The stream after authentication is a sequence of 4-byte big-endian
//! prefixes. Two values are reserved as utterance delimiters; anything else
//! is the byte length of the payload frame that follows. Payload bytes are
//! little-endian 16-bit mono samples.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{IngestError, IngestResult};

/// Start-of-utterance delimiter; carries no payload.
pub const START_MARKER: u32 = 0xFFFF_FFFF;
/// End-of-utterance delimiter; carries no payload.
pub const END_MARKER: u32 = 0x0000_0000;
/// Cap on a single payload frame; generous for audio chunks, small enough to
/// bound what a hostile peer can make the server allocate.
pub const MAX_CHUNK_BYTES: u32 = 1024 * 1024;

/// One decoded prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame {
    Start,
    End,
    /// Payload frame of this many bytes, still unread on the stream.
    Chunk(u32),
}

/// Read and decode the next prefix. A chunk length above `max_chunk` is a
/// protocol violation; the delimiter values can never alias a chunk length.
pub async fn read_frame<R>(reader: &mut R, max_chunk: u32) -> IngestResult<Frame>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; 4];
    reader.read_exact(&mut prefix).await?;
    match u32::from_be_bytes(prefix) {
        START_MARKER => Ok(Frame::Start),
        END_MARKER => Ok(Frame::End),
        len if len > max_chunk => Err(IngestError::ChunkTooLarge { len, max: max_chunk }),
        len => Ok(Frame::Chunk(len)),
    }
}

/// Write the start-of-utterance delimiter.
pub async fn write_start<W>(writer: &mut W) -> IngestResult<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&START_MARKER.to_be_bytes()).await?;
    Ok(())
}

/// Write the end-of-utterance delimiter.
pub async fn write_end<W>(writer: &mut W) -> IngestResult<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&END_MARKER.to_be_bytes()).await?;
    Ok(())
}

/// Write a payload frame. Lengths of zero, above the cap, or equal to a
/// delimiter value are refused rather than emitted as ambiguous prefixes.
pub async fn write_chunk<W>(writer: &mut W, payload: &[u8]) -> IngestResult<()>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(payload.len())
        .map_err(|_| IngestError::Unframeable { len: payload.len() })?;
    if len == END_MARKER || len == START_MARKER || len > MAX_CHUNK_BYTES {
        return Err(IngestError::Unframeable { len: payload.len() });
    }
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    Ok(())
}
