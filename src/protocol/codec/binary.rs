//! Built-in codec: length-delimited frames of tagged-binary values.
//!
//! Every message is two frames, header then body. A frame is a 4-byte big
//! endian length followed by that many payload bytes; header payloads are
//! the wire encoding of [`Header`], body payloads are opaque to the codec.
//! Writes are buffered and flushed once per message.

use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter, ReadHalf, WriteHalf};
use tracing::trace;

use crate::error::RpcError;
use crate::protocol::codec::{CodecRead, CodecWrite, Transport};
use crate::protocol::wire::{Decode, Encode};
use crate::protocol::{Header, MAX_FRAME_LENGTH};

/// Constructor type for the built-in codec; see [`BinaryCodec::over`].
pub struct BinaryCodec;

impl BinaryCodec {
    /// Splits `transport` into buffered codec halves.
    pub fn over(
        transport: Box<dyn Transport>,
    ) -> (Box<dyn CodecRead>, Box<dyn CodecWrite>) {
        let (reader, writer) = tokio::io::split(transport);
        (
            Box::new(BinaryReader { stream: reader }),
            Box::new(BinaryWriter { stream: BufWriter::new(writer), closed: false }),
        )
    }
}

struct BinaryReader {
    stream: ReadHalf<Box<dyn Transport>>,
}

impl BinaryReader {
    /// Reads one length-delimited frame.
    ///
    /// End-of-stream on the frame boundary is a clean [`RpcError::Eof`];
    /// running dry inside a frame is a transport error.
    async fn read_frame(&mut self) -> Result<Vec<u8>, RpcError> {
        let mut length_buf = [0u8; 4];
        if self.stream.read(&mut length_buf[..1]).await? == 0 {
            return Err(RpcError::Eof);
        }
        self.stream.read_exact(&mut length_buf[1..]).await.map_err(truncated)?;

        let length = u32::from_be_bytes(length_buf) as usize;
        if length > MAX_FRAME_LENGTH {
            return Err(RpcError::Decode(format!(
                "frame length {length} exceeds max {MAX_FRAME_LENGTH}"
            )));
        }
        trace!(length, "reading frame");

        let mut payload = vec![0u8; length];
        self.stream.read_exact(&mut payload).await.map_err(truncated)?;
        Ok(payload)
    }
}

fn truncated(e: std::io::Error) -> RpcError {
    RpcError::Transport(Arc::new(std::io::Error::new(
        std::io::ErrorKind::UnexpectedEof,
        format!("stream ended inside a frame: {e}"),
    )))
}

#[async_trait]
impl CodecRead for BinaryReader {
    async fn read_header(&mut self, header: &mut Header) -> Result<(), RpcError> {
        let frame = self.read_frame().await?;
        let mut cursor = Cursor::new(frame.as_slice());
        header
            .decode(&mut cursor)
            .map_err(|e| RpcError::Decode(format!("malformed header: {e}")))?;
        if cursor.position() as usize != frame.len() {
            return Err(RpcError::Decode("trailing bytes after header".to_string()));
        }
        Ok(())
    }

    async fn read_body(&mut self) -> Result<Vec<u8>, RpcError> {
        self.read_frame().await
    }
}

struct BinaryWriter {
    stream: BufWriter<WriteHalf<Box<dyn Transport>>>,
    closed: bool,
}

impl BinaryWriter {
    async fn write_frame(&mut self, payload: &[u8]) -> std::io::Result<()> {
        let length = payload.len() as u32;
        self.stream.write_all(&length.to_be_bytes()).await?;
        self.stream.write_all(payload).await?;
        Ok(())
    }
}

#[async_trait]
impl CodecWrite for BinaryWriter {
    async fn write(&mut self, header: &Header, body: &[u8]) -> Result<(), RpcError> {
        if body.len() > MAX_FRAME_LENGTH {
            return Err(RpcError::InvalidArgument(format!(
                "body of {} bytes exceeds max frame length {MAX_FRAME_LENGTH}",
                body.len()
            )));
        }

        let mut header_frame = Vec::with_capacity(64);
        header
            .encode(&mut header_frame)
            .map_err(|e| RpcError::Decode(format!("cannot encode header: {e}")))?;

        let outcome = async {
            self.write_frame(&header_frame).await?;
            self.write_frame(body).await?;
            self.stream.flush().await
        }
        .await;

        if let Err(e) = outcome {
            // The stream may now hold half a message; nothing sane can
            // follow it.
            let _ = self.stream.shutdown().await;
            self.closed = true;
            return Err(e.into());
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), RpcError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.stream.shutdown().await?;
        Ok(())
    }
}
