//! Wire format for ingest framing.
//!
//! Records are length-prefixed: [4 bytes big-endian u32][payload]

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;

use crate::error::{DaemonError, ProtocolErrorKind};

/// Maximum record size. Advertisement payloads are tiny; anything near this
/// is garbage.
pub const DEFAULT_MAX_RECORD_SIZE: usize = 4096;

/// Read a length-prefixed message from the reader.
///
/// Returns the raw bytes of the message payload.
/// Returns an error if the message is too large or if reading fails.
pub async fn read_message<R>(reader: &mut R, max_size: usize) -> Result<Vec<u8>, DaemonError>
where
    R: AsyncReadExt + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(DaemonError::Protocol {
                kind: ProtocolErrorKind::ConnectionClosed,
            });
        }
        Err(e) => return Err(DaemonError::Io(e)),
    }

    let len = u32::from_be_bytes(len_buf) as usize;

    if len > max_size {
        return Err(DaemonError::Protocol {
            kind: ProtocolErrorKind::MessageTooLarge {
                size: len,
                max: max_size,
            },
        });
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;

    Ok(buf)
}

/// Write a length-prefixed message to the writer.
pub async fn write_message<W>(writer: &mut W, data: &[u8]) -> Result<(), DaemonError>
where
    W: AsyncWriteExt + Unpin,
{
    let len = (data.len() as u32).to_be_bytes();
    writer.write_all(&len).await?;
    writer.write_all(data).await?;
    writer.flush().await?;
    Ok(())
}

/// Read a length-prefixed message with a timeout.
///
/// Returns a ConnectionTimeout error if the read takes longer than the specified duration.
pub async fn read_message_with_timeout<R>(
    reader: &mut R,
    max_size: usize,
    timeout_duration: Duration,
) -> Result<Vec<u8>, DaemonError>
where
    R: AsyncReadExt + Unpin,
{
    timeout(timeout_duration, read_message(reader, max_size))
        .await
        .map_err(|_| DaemonError::Protocol {
            kind: ProtocolErrorKind::ConnectionTimeout,
        })?
}
