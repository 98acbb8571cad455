//! Stream transport of the relay: TCP connections cut into length-prefixed
//! chunks.
//!
//! The server greets each connection with [`STREAM_GREETING`]. The
//! client's first chunk is its session token; every later data chunk is
//! gameplay payload relayed to the rest of the room, and a
//! [`FIN_SENTINEL`](skirmish_protocol::FIN_SENTINEL) chunk ends the
//! session.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::Mutex;
use skirmish_protocol::{Chunk, ChunkFraming, STREAM_GREETING, SessionToken, decode_text, encode_chunks};
use skirmish_transport::{ConnectionHandle, ConnectionId, EventSink, TcpTransport};
use tokio_util::sync::CancellationToken;

use crate::{Membership, RelayHub, RelayMessage, RelayPeer};

/// Writes relayed payloads to one stream connection.
struct StreamOutlet {
    handle: ConnectionHandle,
}

impl RelayPeer for StreamOutlet {
    fn deliver(&self, msg: &RelayMessage) {
        let mut buf = BytesMut::new();
        encode_chunks(&msg.payload, &mut buf);
        if let Err(e) = self.handle.send(&buf) {
            tracing::trace!(id = %self.handle.id(), error = %e, "relay delivery dropped");
        }
    }

    fn close(&self) {
        self.handle.close();
    }
}

struct StreamPeer {
    handle: ConnectionHandle,
    /// `None` until the token chunk has been accepted.
    membership: Option<Membership>,
}

/// [`EventSink`] shared by every stream relay connection.
pub struct StreamRelay {
    hub: Arc<RelayHub>,
    peers: Mutex<HashMap<ConnectionId, StreamPeer>>,
}

impl StreamRelay {
    pub fn new(hub: Arc<RelayHub>) -> Self {
        Self {
            hub,
            peers: Mutex::new(HashMap::new()),
        }
    }

    /// Number of open stream connections, joined or not.
    pub fn connection_count(&self) -> usize {
        self.peers.lock().len()
    }

    /// Accepts connections on `transport` until `cancel` fires.
    pub async fn serve(self: Arc<Self>, transport: TcpTransport, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = transport.accept(ChunkFraming, Arc::clone(&self)) => {
                    if let Err(e) = accepted {
                        tracing::warn!(error = %e, "stream relay accept failed");
                    }
                }
            }
        }
        let handles: Vec<ConnectionHandle> =
            self.peers.lock().values().map(|p| p.handle.clone()).collect();
        for handle in handles {
            handle.close();
        }
        tracing::info!("stream relay stopped");
    }

    fn on_token(&self, id: ConnectionId, handle: &ConnectionHandle, data: &[u8]) {
        let token = SessionToken(decode_text(data));
        let outlet = Arc::new(StreamOutlet {
            handle: handle.clone(),
        });
        match self.hub.join(&token, outlet) {
            Ok(membership) => {
                tracing::debug!(%id, battle_code = %membership.room.code(), "stream peer joined");
                let mut peers = self.peers.lock();
                match peers.get_mut(&id) {
                    Some(peer) => peer.membership = Some(membership),
                    // Closed while joining.
                    None => {
                        drop(peers);
                        self.hub.leave(&membership);
                    }
                }
            }
            Err(e) => {
                tracing::warn!(%id, %token, error = %e, "stream relay join refused");
                handle.close();
            }
        }
    }
}

impl EventSink<Chunk> for StreamRelay {
    fn on_open(&self, conn: ConnectionHandle) {
        tracing::debug!(id = %conn.id(), peer = %conn.peer_addr(), "stream relay connection");
        if let Err(e) = conn.send(&STREAM_GREETING) {
            tracing::debug!(id = %conn.id(), error = %e, "greeting not sent");
            return;
        }
        self.peers.lock().insert(
            conn.id(),
            StreamPeer {
                handle: conn,
                membership: None,
            },
        );
    }

    fn on_frame(&self, id: ConnectionId, chunk: Chunk) {
        // Copied out so no map lock is held while room and hub locks are taken.
        let Some((handle, membership)) = self
            .peers
            .lock()
            .get(&id)
            .map(|p| (p.handle.clone(), p.membership.clone()))
        else {
            return;
        };

        match (chunk, membership) {
            (Chunk::Data(data), None) => self.on_token(id, &handle, &data),
            (Chunk::Data(data), Some(m)) => {
                m.room.broadcast(m.slot, data);
            }
            (Chunk::Fin, _) => {
                tracing::info!(%id, "stream relay session finished by peer");
                handle.close_after_flush();
            }
        }
    }

    fn on_closed(&self, id: ConnectionId) {
        let peer = self.peers.lock().remove(&id);
        if let Some(m) = peer.and_then(|p| p.membership) {
            self.hub.leave(&m);
        }
        tracing::debug!(%id, "stream relay connection closed");
    }
}
