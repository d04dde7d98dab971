//! Connection handshake.
//!
//! The first thing on every connection is a single [`Options`] record sent
//! by the client, serialized as one JSON line. JSON-with-newline is a fixed,
//! well-known format the server can parse before it knows which codec the
//! connection will use; everything after the newline belongs to the
//! negotiated codec.
//!
//! The server validates the magic constant and resolves the codec tag
//! against the codec registry; a mismatch on either drops the connection
//! without a reply.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::RpcError;
use crate::protocol::codec::BINARY_CODEC;
use crate::protocol::HANDSHAKE_MAGIC;

/// Connect timeout applied when the caller does not choose one.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// A handshake line longer than this is not a handshake.
const MAX_HANDSHAKE_LENGTH: usize = 4096;

/// Per-connection handshake record.
///
/// `connect_timeout` bounds the dialing side's connection setup and is
/// ignored by the server; `handle_timeout` is honored by the server for
/// every request on the connection that sent it. Zero disables either
/// limit. Timeouts travel as integer milliseconds.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Options {
    /// Must be [`HANDSHAKE_MAGIC`].
    pub magic: u32,
    /// Registered codec tag for everything after the handshake.
    pub codec: String,
    /// Bound on connection setup (dial + handshake); zero means no limit.
    #[serde(default, with = "duration_millis")]
    pub connect_timeout: Duration,
    /// Bound on server-side handling of one request; zero disables it.
    #[serde(default, with = "duration_millis")]
    pub handle_timeout: Duration,
}

impl Default for Options {
    fn default() -> Options {
        Options {
            magic: HANDSHAKE_MAGIC,
            codec: BINARY_CODEC.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            handle_timeout: Duration::ZERO,
        }
    }
}

/// Durations ride the handshake as integer milliseconds.
mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

/// Sends the options record followed by the line delimiter.
pub async fn write_options<W>(stream: &mut W, options: &Options) -> Result<(), RpcError>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_vec(options)
        .map_err(|e| RpcError::BadHandshake(format!("cannot encode options: {e}")))?;
    line.push(b'\n');
    stream.write_all(&line).await?;
    stream.flush().await?;
    Ok(())
}

/// Reads exactly one options record.
///
/// Bytes are consumed one at a time up to the newline so nothing belonging
/// to the negotiated codec is read ahead. Exactly one JSON value may appear
/// on the line; trailing content makes the handshake invalid.
pub async fn read_options<R>(stream: &mut R) -> Result<Options, RpcError>
where
    R: AsyncRead + Unpin,
{
    let mut line = Vec::with_capacity(128);
    loop {
        let mut byte = [0u8; 1];
        if stream.read(&mut byte).await? == 0 {
            return Err(RpcError::BadHandshake(
                "connection closed before the options record was complete".to_string(),
            ));
        }
        if byte[0] == b'\n' {
            break;
        }
        line.push(byte[0]);
        if line.len() > MAX_HANDSHAKE_LENGTH {
            return Err(RpcError::BadHandshake(format!(
                "options record exceeds {MAX_HANDSHAKE_LENGTH} bytes"
            )));
        }
    }
    serde_json::from_slice(&line)
        .map_err(|e| RpcError::BadHandshake(format!("malformed options record: {e}")))
}
