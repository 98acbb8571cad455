//! Stream relay tests over in-memory duplex connections.

use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use skirmish_handoff::{HandoffRecord, HandoffStore, MemoryHandoffStore};
use skirmish_protocol::{
    BattleCode, Chunk, ChunkFraming, FIN_SENTINEL, Faction, STREAM_GREETING, SessionToken, UserId,
    encode_chunks,
};
use skirmish_relay::{RelayHub, StreamRelay};
use skirmish_transport::{ConnectionConfig, ConnectionHandle, Framing, spawn_actor};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

fn code() -> BattleCode {
    BattleCode::from_millis(1_700_000_000_000)
}

struct Harness {
    store: Arc<MemoryHandoffStore>,
    hub: Arc<RelayHub>,
    relay: Arc<StreamRelay>,
}

impl Harness {
    fn new() -> Self {
        let store = Arc::new(MemoryHandoffStore::default());
        let hub = Arc::new(RelayHub::new(store.clone()));
        let relay = Arc::new(StreamRelay::new(hub.clone()));
        Self { store, hub, relay }
    }

    fn publish(&self, user: &str, faction: Faction) -> SessionToken {
        let record = HandoffRecord::issue(code(), UserId::new(user), faction);
        let token = record.token.clone();
        self.store.put(record).unwrap();
        token
    }

    async fn occupied(&self, expected: usize) {
        for _ in 0..200 {
            let occupied = self.hub.room(&code()).map_or(0, |r| r.occupied());
            if occupied == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("room never reached {expected} occupants");
    }

    /// Connects, checks the greeting and presents `token`.
    async fn join(&self, token: &SessionToken, expected_occupancy: usize) -> Client {
        let mut client = Client::connect(self).await;
        client.send(token.as_str().as_bytes()).await;
        self.occupied(expected_occupancy).await;
        client
    }
}

struct Client {
    stream: DuplexStream,
    buf: BytesMut,
    handle: ConnectionHandle,
}

impl Client {
    async fn connect(h: &Harness) -> Self {
        let (mut ours, theirs) = tokio::io::duplex(16 * 1024);
        let handle = spawn_actor(
            theirs,
            "127.0.0.1:60000".parse().unwrap(),
            ChunkFraming,
            h.relay.clone(),
            ConnectionConfig::default(),
        );
        let mut greeting = [0u8; STREAM_GREETING.len()];
        ours.read_exact(&mut greeting).await.unwrap();
        assert_eq!(greeting, STREAM_GREETING);
        Self {
            stream: ours,
            buf: BytesMut::new(),
            handle,
        }
    }

    async fn send(&mut self, payload: &[u8]) {
        let mut out = BytesMut::new();
        encode_chunks(payload, &mut out);
        self.stream.write_all(&out).await.unwrap();
    }

    async fn recv(&mut self) -> Chunk {
        loop {
            if let Some(chunk) = ChunkFraming.decode(&mut self.buf).unwrap() {
                return chunk;
            }
            let n = tokio::time::timeout(Duration::from_secs(5), self.stream.read_buf(&mut self.buf))
                .await
                .expect("chunk should arrive")
                .unwrap();
            assert!(n > 0, "connection closed while waiting for a chunk");
        }
    }

    async fn expect_closed(&mut self) {
        loop {
            let n = tokio::time::timeout(Duration::from_secs(5), self.stream.read_buf(&mut self.buf))
                .await
                .expect("server should hang up")
                .unwrap();
            if n == 0 {
                return;
            }
        }
    }
}

fn data(bytes: &'static [u8]) -> Chunk {
    Chunk::Data(Bytes::from_static(bytes))
}

#[tokio::test]
async fn test_payload_reaches_other_peers_only() {
    let h = Harness::new();
    let ta = h.publish("A00001", Faction::A);
    let tb = h.publish("B00001", Faction::B);
    let tc = h.publish("B00002", Faction::B);
    let mut a = h.join(&ta, 1).await;
    let mut b = h.join(&tb, 2).await;
    let mut c = h.join(&tc, 3).await;

    a.send(b"fire").await;
    b.send(b"dodge").await;

    assert_eq!(b.recv().await, data(b"fire"));
    assert_eq!(c.recv().await, data(b"fire"));
    assert_eq!(c.recv().await, data(b"dodge"));
    // Nothing of its own comes back to A: the first thing it sees is B's.
    assert_eq!(a.recv().await, data(b"dodge"));
}

#[tokio::test]
async fn test_chunks_in_one_write_are_relayed_separately() {
    let h = Harness::new();
    let ta = h.publish("A00001", Faction::A);
    let tb = h.publish("B00001", Faction::B);
    let mut a = h.join(&ta, 1).await;
    let mut b = h.join(&tb, 2).await;

    a.stream.write_all(&[3, b'a', b'b', 2, b'c']).await.unwrap();

    assert_eq!(b.recv().await, data(b"ab"));
    assert_eq!(b.recv().await, data(b"c"));
}

#[tokio::test]
async fn test_long_payload_is_split_into_chunks() {
    let h = Harness::new();
    let ta = h.publish("A00001", Faction::A);
    let tb = h.publish("B00001", Faction::B);
    let mut a = h.join(&ta, 1).await;
    let mut b = h.join(&tb, 2).await;

    let payload: Vec<u8> = (0..300u32).map(|i| i as u8).collect();
    a.send(&payload).await;

    let mut received = Vec::new();
    while received.len() < payload.len() {
        match b.recv().await {
            Chunk::Data(d) => received.extend_from_slice(&d),
            Chunk::Fin => panic!("unexpected fin"),
        }
    }
    assert_eq!(received, payload);
}

#[tokio::test]
async fn test_unknown_token_closes_only_that_connection() {
    let h = Harness::new();
    let ta = h.publish("A00001", Faction::A);
    let tb = h.publish("B00001", Faction::B);
    let mut a = h.join(&ta, 1).await;
    let mut b = h.join(&tb, 2).await;

    let mut intruder = Client::connect(&h).await;
    intruder.send(b"0123456789abcdef0123456789abcdef").await;
    intruder.expect_closed().await;

    a.send(b"still here").await;
    assert_eq!(b.recv().await, data(b"still here"));
    assert_eq!(h.hub.room(&code()).unwrap().occupied(), 2);
}

#[tokio::test]
async fn test_fin_ends_session_and_last_exit_disposes_room() {
    let h = Harness::new();
    let ta = h.publish("A00001", Faction::A);
    let tb = h.publish("B00001", Faction::B);
    // A participant who never shows up.
    h.publish("B00002", Faction::B);
    let mut a = h.join(&ta, 1).await;
    let b = h.join(&tb, 2).await;

    a.stream.write_all(&FIN_SENTINEL).await.unwrap();
    a.expect_closed().await;
    a.handle.closed().await;
    h.occupied(1).await;
    assert_eq!(h.store.len(), 3);

    drop(b.stream);
    b.handle.closed().await;
    for _ in 0..200 {
        if h.hub.room_count() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(h.hub.room_count(), 0);
    assert!(h.store.is_empty());
    assert_eq!(h.relay.connection_count(), 0);
}

#[tokio::test]
async fn test_peer_can_rejoin_with_same_token() {
    let h = Harness::new();
    let ta = h.publish("A00001", Faction::A);
    let tb = h.publish("B00001", Faction::B);
    let a = h.join(&ta, 1).await;
    let mut b = h.join(&tb, 2).await;

    drop(a.stream);
    a.handle.closed().await;
    h.occupied(1).await;

    let mut again = h.join(&ta, 2).await;
    again.send(b"back").await;
    assert_eq!(b.recv().await, data(b"back"));
}
