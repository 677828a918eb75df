//! Newline-delimited framing: one JSON envelope per line.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::envelope::{self, Decoded, Envelope};
use crate::error::RelayError;

/// Read the next non-empty frame, without its line terminator.
///
/// Returns `Ok(None)` on a clean EOF. A line longer than `max_len` bytes is a
/// `MalformedEnvelope`; the stream cannot be resynchronized after that, so
/// callers should drop the connection.
pub async fn read_frame<R>(reader: &mut R, max_len: usize) -> Result<Option<Vec<u8>>, RelayError>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let mut buf = Vec::new();
        let limit = max_len as u64 + 1;
        let n = (&mut *reader).take(limit).read_until(b'\n', &mut buf).await?;
        if n == 0 {
            return Ok(None);
        }

        if buf.last() == Some(&b'\n') {
            buf.pop();
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
        } else if buf.len() > max_len {
            return Err(RelayError::MalformedEnvelope(format!(
                "frame exceeds {max_len} bytes"
            )));
        }

        if !buf.is_empty() {
            return Ok(Some(buf));
        }
    }
}

/// Write one frame followed by a newline and flush.
pub async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> Result<(), RelayError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

/// Encode and write one envelope.
pub async fn write_envelope<W>(writer: &mut W, env: &Envelope) -> Result<(), RelayError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = envelope::encode(env)?;
    write_frame(writer, &bytes).await
}

/// Read and decode the next envelope. `Ok(None)` on EOF.
pub async fn read_envelope<R>(reader: &mut R, max_len: usize) -> Result<Option<Decoded>, RelayError>
where
    R: AsyncBufRead + Unpin,
{
    match read_frame(reader, max_len).await? {
        Some(frame) => envelope::decode(&frame).map(Some),
        None => Ok(None),
    }
}
