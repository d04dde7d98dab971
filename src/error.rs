//! Error types surfaced by clients, servers, and codecs.

use std::fmt;
use std::sync::Arc;

use crate::protocol::HANDSHAKE_MAGIC;

/// All error kinds produced by the framework.
///
/// The enum is `Clone` so a single transport failure can be fanned out to
/// every call still pending on a connection; the underlying I/O error is
/// shared behind an `Arc` for the same reason.
#[derive(Debug, Clone)]
pub enum RpcError {
    /// Connection setup (dial + handshake) exceeded the connect timeout.
    ConnectTimeout,

    /// The handshake named a codec tag with no registered constructor.
    UnknownCodec(String),

    /// The handshake magic did not match; the peer is not speaking this
    /// protocol.
    BadMagic(u32),

    /// The options record was missing, oversized, or unparseable.
    BadHandshake(String),

    /// Cancellation was signalled while waiting for a reply.
    Cancelled,

    /// The operation ran against a client that is closed or shut down.
    Closed,

    /// Error string reported by the server in a reply header.
    Server(String),

    /// Read, write, or close failure on the underlying stream.
    Transport(Arc<std::io::Error>),

    /// A value or frame on the wire could not be decoded.
    Decode(String),

    /// The service or method could not be resolved, or the
    /// `Service.Method` name was malformed.
    Dispatch(String),

    /// Server-side handling of the request exceeded the handle timeout.
    HandleTimeout,

    /// Clean end-of-stream between messages.
    Eof,

    /// A caller-supplied value was rejected (registration names, oversized
    /// bodies, unencodable arguments).
    InvalidArgument(String),
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpcError::ConnectTimeout => write!(f, "connection setup timed out"),
            RpcError::UnknownCodec(tag) => write!(f, "codec {tag:?} is not registered"),
            RpcError::BadMagic(found) => {
                write!(f, "handshake magic {found:#x} is not {HANDSHAKE_MAGIC:#x}")
            }
            RpcError::BadHandshake(msg) => write!(f, "invalid handshake: {msg}"),
            RpcError::Cancelled => write!(f, "call cancelled while waiting for reply"),
            RpcError::Closed => write!(f, "client is closed"),
            RpcError::Server(msg) => write!(f, "server error: {msg}"),
            RpcError::Transport(err) => write!(f, "transport error: {err}"),
            RpcError::Decode(msg) => write!(f, "decode error: {msg}"),
            RpcError::Dispatch(msg) => write!(f, "dispatch error: {msg}"),
            RpcError::HandleTimeout => write!(f, "request handling timed out"),
            RpcError::Eof => write!(f, "connection closed"),
            RpcError::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
        }
    }
}

impl std::error::Error for RpcError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RpcError::Transport(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for RpcError {
    fn from(err: std::io::Error) -> Self {
        RpcError::Transport(Arc::new(err))
    }
}
