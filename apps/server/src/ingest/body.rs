use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt};

use crate::error::{AppError, AppResult};

/// Largest webhook body read, matching GitHub's 25 MB payload cap
pub const MAX_PAYLOAD_BYTES: usize = 25 * 1024 * 1024;

/// Reads a request body, keeping at most `limit` bytes.
///
/// Anything beyond the limit is dropped rather than rejected. A truncated
/// payload no longer matches its signature, so it is refused there.
pub async fn read_limited<S, E>(mut stream: S, limit: usize) -> AppResult<Bytes>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    let mut body = BytesMut::new();

    while let Some(chunk) = stream.next().await {
        let chunk =
            chunk.map_err(|e| AppError::Validation(format!("Failed to read request body: {}", e)))?;

        let remaining = limit - body.len();
        if chunk.len() >= remaining {
            body.extend_from_slice(&chunk[..remaining]);
            log::debug!("Request body truncated at {} bytes", limit);
            break;
        }
        body.extend_from_slice(&chunk);
    }

    Ok(body.freeze())
}
