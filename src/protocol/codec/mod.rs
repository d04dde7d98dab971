//! Codec abstraction and registry.
//!
//! A codec turns a duplex byte stream into a sequence of `(Header, body)`
//! message pairs. Reading and writing are split into independent halves so
//! that one task can sit in a read loop while others write under a send
//! lock, which is how both the client and the server use a connection.
//!
//! Codecs are looked up by tag through a process-wide registry. The
//! built-in [`binary`] codec is always present; additional codecs register
//! themselves before the first connection that names them.

use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::RpcError;
use crate::protocol::Header;

pub mod binary;

/// Tag of the built-in tagged-binary codec.
pub const BINARY_CODEC: &str = "application/x-tagged-binary";

/// Any duplex byte stream a codec can run over.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + 'static> Transport for T {}

/// Read half of a negotiated codec. Owned by exactly one read loop.
#[async_trait]
pub trait CodecRead: Send {
    /// Decodes the next header into `header`.
    ///
    /// Clean end-of-stream is [`RpcError::Eof`]; truncation mid-frame is a
    /// transport error; a malformed header is a decode error.
    async fn read_header(&mut self, header: &mut Header) -> Result<(), RpcError>;

    /// Consumes the next body frame and returns its payload.
    ///
    /// Every header is followed by exactly one body; callers that do not
    /// want the payload still call this and drop the bytes, which keeps the
    /// stream framing intact.
    async fn read_body(&mut self) -> Result<Vec<u8>, RpcError>;
}

/// Write half of a negotiated codec.
///
/// Atomicity of `write` with respect to other writers is the caller's job;
/// both the client and the server hold a send lock around it.
#[async_trait]
pub trait CodecWrite: Send {
    /// Encodes `header` then `body` and flushes them to the transport.
    ///
    /// A failure mid-write leaves the stream unusable, so the transport is
    /// shut down before the error is returned.
    async fn write(&mut self, header: &Header, body: &[u8]) -> Result<(), RpcError>;

    /// Releases the transport. Idempotent.
    async fn close(&mut self) -> Result<(), RpcError>;
}

/// Constructs a codec's read/write halves over a transport.
pub type NewCodecFn = fn(Box<dyn Transport>) -> (Box<dyn CodecRead>, Box<dyn CodecWrite>);

fn registry() -> &'static RwLock<HashMap<String, NewCodecFn>> {
    static REGISTRY: OnceLock<RwLock<HashMap<String, NewCodecFn>>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut codecs: HashMap<String, NewCodecFn> = HashMap::new();
        codecs.insert(BINARY_CODEC.to_string(), binary::BinaryCodec::over);
        RwLock::new(codecs)
    })
}

/// Registers a codec constructor under `tag`.
///
/// Returns false when the tag is already taken; the existing constructor is
/// left in place.
pub fn register_codec(tag: &str, constructor: NewCodecFn) -> bool {
    let mut codecs = registry().write().expect("codec registry lock poisoned");
    if codecs.contains_key(tag) {
        return false;
    }
    codecs.insert(tag.to_string(), constructor);
    true
}

/// Looks up the constructor registered under `tag`.
pub fn lookup_codec(tag: &str) -> Option<NewCodecFn> {
    registry().read().expect("codec registry lock poisoned").get(tag).copied()
}
