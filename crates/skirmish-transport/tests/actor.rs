//! Integration tests for the connection actor.
//!
//! A `tokio::io::duplex` pair stands in for the socket: the test holds one
//! end and the actor drives the other, so every scenario is deterministic.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use skirmish_transport::{
    ConnectionConfig, ConnectionHandle, ConnectionId, EventSink, Framing, TransportError,
    spawn_actor,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;

// =========================================================================
// Helpers
// =========================================================================

/// Newline-delimited frames; a line starting with `!` is malformed.
struct LineFraming;

impl Framing for LineFraming {
    type Frame = String;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, TransportError> {
        let Some(pos) = buf.iter().position(|b| *b == b'\n') else {
            return Ok(None);
        };
        let line = buf.split_to(pos);
        buf.advance(1);
        if line.first() == Some(&b'!') {
            return Err(TransportError::MalformedFrame("bang".into()));
        }
        Ok(Some(String::from_utf8_lossy(&line).into_owned()))
    }
}

#[derive(Debug, PartialEq)]
enum Seen {
    Open(ConnectionId),
    Frame(String),
    Closed(ConnectionId),
}

struct RecordingSink {
    tx: mpsc::UnboundedSender<Seen>,
}

impl EventSink<String> for RecordingSink {
    fn on_open(&self, conn: ConnectionHandle) {
        let _ = self.tx.send(Seen::Open(conn.id()));
    }

    fn on_frame(&self, _id: ConnectionId, frame: String) {
        let _ = self.tx.send(Seen::Frame(frame));
    }

    fn on_closed(&self, id: ConnectionId) {
        let _ = self.tx.send(Seen::Closed(id));
    }
}

fn addr() -> SocketAddr {
    "127.0.0.1:9".parse().unwrap()
}

fn start(
    config: ConnectionConfig,
) -> (
    ConnectionHandle,
    tokio::io::DuplexStream,
    mpsc::UnboundedReceiver<Seen>,
) {
    let (ours, theirs) = tokio::io::duplex(1024);
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = spawn_actor(theirs, addr(), LineFraming, Arc::new(RecordingSink { tx }), config);
    (handle, ours, rx)
}

async fn next(rx: &mut mpsc::UnboundedReceiver<Seen>) -> Seen {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("event should arrive")
        .expect("sink should be alive")
}

// =========================================================================
// Tests
// =========================================================================

#[tokio::test]
async fn test_open_is_reported_before_any_frame() {
    let (handle, mut client, mut rx) = start(ConnectionConfig::default());
    client.write_all(b"hello\n").await.unwrap();

    assert_eq!(next(&mut rx).await, Seen::Open(handle.id()));
    assert_eq!(next(&mut rx).await, Seen::Frame("hello".into()));
}

#[tokio::test]
async fn test_frames_split_across_reads_are_reassembled_in_order() {
    let (_handle, mut client, mut rx) = start(ConnectionConfig::default());
    let _ = next(&mut rx).await;

    client.write_all(b"fir").await.unwrap();
    client.flush().await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    client.write_all(b"st\nsecond\nthi").await.unwrap();
    client.write_all(b"rd\n").await.unwrap();

    assert_eq!(next(&mut rx).await, Seen::Frame("first".into()));
    assert_eq!(next(&mut rx).await, Seen::Frame("second".into()));
    assert_eq!(next(&mut rx).await, Seen::Frame("third".into()));
}

#[tokio::test]
async fn test_peer_hangup_emits_exactly_one_close() {
    let (handle, client, mut rx) = start(ConnectionConfig::default());
    assert_eq!(next(&mut rx).await, Seen::Open(handle.id()));

    // Dropping our end makes the actor's next read return zero bytes.
    drop(client);

    assert_eq!(next(&mut rx).await, Seen::Closed(handle.id()));
    assert!(handle.is_closed());

    // The sink is dropped after the close event, so the channel ends.
    let rest = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("channel should end");
    assert_eq!(rest, None);
}

#[tokio::test]
async fn test_peer_hangup_still_delivers_frames_read_before_eof() {
    let (handle, mut client, mut rx) = start(ConnectionConfig::default());
    assert_eq!(next(&mut rx).await, Seen::Open(handle.id()));

    client.write_all(b"first\nlast\n").await.unwrap();
    drop(client);

    assert_eq!(next(&mut rx).await, Seen::Frame("first".into()));
    assert_eq!(next(&mut rx).await, Seen::Frame("last".into()));
    assert_eq!(next(&mut rx).await, Seen::Closed(handle.id()));
}

#[tokio::test]
async fn test_send_reaches_the_peer() {
    let (handle, mut client, _rx) = start(ConnectionConfig::default());

    handle.send(b"pong").unwrap();
    handle.send(b"!").unwrap();

    let mut buf = [0u8; 5];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"pong!");
}

#[tokio::test]
async fn test_malformed_frame_closes_without_delivering_later_frames() {
    let (handle, mut client, mut rx) = start(ConnectionConfig::default());
    let _ = next(&mut rx).await;

    client.write_all(b"ok\n!bad\nnever\n").await.unwrap();

    assert_eq!(next(&mut rx).await, Seen::Frame("ok".into()));
    assert_eq!(next(&mut rx).await, Seen::Closed(handle.id()));
}

#[tokio::test]
async fn test_close_after_flush_delivers_queued_bytes_then_closes() {
    let (handle, mut client, mut rx) = start(ConnectionConfig::default());
    let _ = next(&mut rx).await;

    handle.send(b"bye").unwrap();
    handle.close_after_flush();
    assert!(handle.send(b"late").is_err());

    let mut out = Vec::new();
    client.read_to_end(&mut out).await.unwrap();
    assert_eq!(out, b"bye");
    assert_eq!(next(&mut rx).await, Seen::Closed(handle.id()));
}

#[tokio::test]
async fn test_close_rejects_further_sends() {
    let (handle, _client, mut rx) = start(ConnectionConfig::default());
    let _ = next(&mut rx).await;

    handle.close();

    assert!(matches!(
        handle.send(b"x"),
        Err(TransportError::ConnectionClosed(_))
    ));
    assert_eq!(next(&mut rx).await, Seen::Closed(handle.id()));
}

#[tokio::test(start_paused = true)]
async fn test_silent_peer_hits_read_deadline() {
    let config = ConnectionConfig {
        read_timeout: Duration::from_secs(30),
        ..ConnectionConfig::default()
    };
    let (handle, _client, mut rx) = start(config);
    let _ = next(&mut rx).await;

    // Paused time auto-advances while every task is idle.
    handle.closed().await;
    assert_eq!(next(&mut rx).await, Seen::Closed(handle.id()));
}
