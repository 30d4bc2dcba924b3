//! Newline-delimited JSON codec.
//!
//! One frame per line: serialize, write, `\n`, flush. Reads skip blank
//! lines; EOF surfaces as a closed channel so callers can fold it into the
//! Faulted-worker path.

use flotilla_core::EngineError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// Write one frame as a JSON line and flush.
pub async fn write_frame<W, T>(writer: &mut W, frame: &T) -> Result<(), EngineError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let json = serde_json::to_string(frame)
        .map_err(|e| EngineError::Protocol(format!("frame serialization failed: {}", e)))?;
    trace!(bytes = json.len(), "writing frame");

    writer
        .write_all(json.as_bytes())
        .await
        .map_err(|e| EngineError::ChannelClosed(e.to_string()))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| EngineError::ChannelClosed(e.to_string()))?;
    writer
        .flush()
        .await
        .map_err(|e| EngineError::ChannelClosed(e.to_string()))?;
    Ok(())
}

/// Read the next frame, skipping blank lines.
///
/// EOF and I/O errors surface as [`EngineError::ChannelClosed`]; a line that
/// is not a valid frame surfaces as [`EngineError::Protocol`].
pub async fn read_frame<R, T>(reader: &mut R) -> Result<T, EngineError>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    let mut line = String::new();
    loop {
        line.clear();
        let bytes_read = reader
            .read_line(&mut line)
            .await
            .map_err(|e| EngineError::ChannelClosed(e.to_string()))?;

        if bytes_read == 0 {
            return Err(EngineError::ChannelClosed("stream closed".to_string()));
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        trace!(bytes = bytes_read, "read frame");
        return serde_json::from_str(trimmed)
            .map_err(|e| EngineError::Protocol(format!("unparseable frame: {}", e)));
    }
}
