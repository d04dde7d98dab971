use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::time::timeout;

use minrpc::protocol::codec::binary::BinaryCodec;
use minrpc::protocol::codec::{
    lookup_codec, register_codec, CodecRead, CodecWrite, Transport, BINARY_CODEC,
};
use minrpc::protocol::MAX_FRAME_LENGTH;
use minrpc::{Header, RpcError};

fn pipe_codecs() -> (
    (Box<dyn CodecRead>, Box<dyn CodecWrite>),
    (Box<dyn CodecRead>, Box<dyn CodecWrite>),
) {
    let (a, b) = tokio::io::duplex(64 * 1024);
    (BinaryCodec::over(Box::new(a)), BinaryCodec::over(Box::new(b)))
}

#[tokio::test]
async fn header_and_body_round_trip() {
    let ((_, mut writer), (mut reader, _)) = pipe_codecs();

    let sent = Header { service_method: "Echo.Say".to_string(), seq: 9, error: String::new() };
    writer.write(&sent, b"payload bytes").await.expect("write message");

    let mut received = Header::default();
    reader.read_header(&mut received).await.expect("read header");
    assert_eq!(received, sent);

    let body = reader.read_body().await.expect("read body");
    assert_eq!(body, b"payload bytes");
}

#[tokio::test]
async fn empty_sentinel_body_keeps_framing() {
    let ((_, mut writer), (mut reader, _)) = pipe_codecs();

    let failed = Header { service_method: "A.B".to_string(), seq: 1, error: "nope".to_string() };
    let ok = Header { service_method: "A.B".to_string(), seq: 2, error: String::new() };
    writer.write(&failed, &[]).await.expect("write error reply");
    writer.write(&ok, b"real").await.expect("write ok reply");

    let mut header = Header::default();
    reader.read_header(&mut header).await.expect("read first header");
    assert_eq!(header.error, "nope");
    assert!(reader.read_body().await.expect("read sentinel").is_empty());

    reader.read_header(&mut header).await.expect("read second header");
    assert_eq!(header.seq, 2);
    assert_eq!(reader.read_body().await.expect("read body"), b"real");
}

#[tokio::test]
async fn rejects_oversized_frame() {
    let (raw, b) = tokio::io::duplex(64 * 1024);
    let (mut reader, _writer) = BinaryCodec::over(Box::new(b));

    let mut raw = raw;
    let oversized = (MAX_FRAME_LENGTH + 1) as u32;
    raw.write_all(&oversized.to_be_bytes()).await.expect("write frame length");

    let mut header = Header::default();
    let err = timeout(Duration::from_secs(1), reader.read_header(&mut header))
        .await
        .expect("read timeout")
        .expect_err("expected oversize error");
    assert!(
        matches!(&err, RpcError::Decode(msg) if msg.contains("exceeds max")),
        "unexpected error: {err:?}"
    );
}

#[tokio::test]
async fn clean_end_of_stream_is_eof() {
    let (a, b) = tokio::io::duplex(4096);
    let (mut reader, _writer) = BinaryCodec::over(Box::new(b));
    drop(a);

    let mut header = Header::default();
    let err = reader.read_header(&mut header).await.expect_err("expected eof");
    assert!(matches!(err, RpcError::Eof), "unexpected error: {err:?}");
}

#[tokio::test]
async fn truncation_inside_frame_is_a_transport_error() {
    let (raw, b) = tokio::io::duplex(4096);
    let (mut reader, _writer) = BinaryCodec::over(Box::new(b));

    let mut raw = raw;
    raw.write_all(&100u32.to_be_bytes()).await.expect("write frame length");
    raw.write_all(&[0u8; 10]).await.expect("write partial payload");
    drop(raw);

    let mut header = Header::default();
    let err = reader.read_header(&mut header).await.expect_err("expected truncation error");
    assert!(matches!(err, RpcError::Transport(_)), "unexpected error: {err:?}");
}

#[tokio::test]
async fn close_is_idempotent() {
    let ((_, mut writer), _other) = pipe_codecs();
    writer.close().await.expect("first close");
    writer.close().await.expect("second close");
}

#[test]
fn registry_knows_the_builtin_codec() {
    assert!(lookup_codec(BINARY_CODEC).is_some());
    assert!(lookup_codec("application/x-nonesuch").is_none());
}

#[test]
fn registry_is_insert_only() {
    fn custom(transport: Box<dyn Transport>) -> (Box<dyn CodecRead>, Box<dyn CodecWrite>) {
        BinaryCodec::over(transport)
    }

    assert!(register_codec("application/x-codec-test", custom));
    assert!(!register_codec("application/x-codec-test", custom));
    assert!(lookup_codec("application/x-codec-test").is_some());
}
