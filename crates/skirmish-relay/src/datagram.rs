//! Datagram transport of the relay: one [`RelayPacket`] per UDP datagram,
//! with the reliable-in-order layer on top.
//!
//! A client says `HelloServer` with its session token as the session id.
//! Once joined, every peer gets its own tick task that resends the
//! unacknowledged window, carries the current ack, and closes the peer
//! after [`DatagramConfig::idle_timeout`] of silence. Pings are answered
//! from the receive loop and never enter the window.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use skirmish_protocol::{BattleMessage, Codec, PacketBody, RelayPacket, SessionToken, UserId};
use skirmish_tick::{TickConfig, TickScheduler};
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{
    Membership, OrderFilter, RelayError, RelayHub, RelayMessage, RelayPeer, ReliableChannel,
    WINDOW_CAPACITY,
};

/// Largest datagram the receive loop accepts.
const MAX_DATAGRAM: usize = 64 * 1024;

/// Timing and sizing of the datagram relay.
#[derive(Debug, Clone)]
pub struct DatagramConfig {
    /// Period of each peer's resend tick. Default: 16 ms, one game frame.
    pub tick_period: Duration,
    /// Most messages carried by one `Battle` packet. Default: 50.
    pub batch_size: usize,
    /// Silence after which a peer is closed. Default: 10 s.
    pub idle_timeout: Duration,
    /// Unacknowledged messages a peer may owe before it is closed.
    pub window: usize,
}

impl Default for DatagramConfig {
    fn default() -> Self {
        Self {
            tick_period: Duration::from_millis(16),
            batch_size: 50,
            idle_timeout: Duration::from_secs(10),
            window: WINDOW_CAPACITY,
        }
    }
}

impl DatagramConfig {
    pub fn with_tick_period(mut self, period: Duration) -> Self {
        self.tick_period = period;
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window;
        self
    }
}

/// Lifecycle of a datagram peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Connecting,
    Joined,
    Closing,
    Closed,
}

#[derive(Debug, Clone)]
struct CloseCause {
    reason: String,
    /// Send a `Fin` to the client. Not done when the client sent one.
    notify: bool,
}

#[derive(Debug, Clone)]
struct Outgoing {
    sender: UserId,
    body: Bytes,
}

struct PeerInner {
    state: PeerState,
    channel: ReliableChannel<Outgoing>,
    filter: OrderFilter<UserId>,
    last_seen: Instant,
    membership: Option<Membership>,
    close: Option<CloseCause>,
}

/// One client address of the datagram relay.
struct DatagramPeer {
    addr: SocketAddr,
    session_id: String,
    inner: Mutex<PeerInner>,
    cancel: CancellationToken,
}

impl DatagramPeer {
    fn new(addr: SocketAddr, session_id: String, window: usize, cancel: CancellationToken) -> Self {
        Self {
            addr,
            session_id,
            inner: Mutex::new(PeerInner {
                state: PeerState::Connecting,
                channel: ReliableChannel::with_capacity(window),
                filter: OrderFilter::new(),
                last_seen: Instant::now(),
                membership: None,
                close: None,
            }),
            cancel,
        }
    }

    fn state(&self) -> PeerState {
        self.inner.lock().state
    }

    fn touch(&self) {
        self.inner.lock().last_seen = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.inner.lock().last_seen.elapsed()
    }

    fn set_joined(&self, membership: Membership) {
        let mut inner = self.inner.lock();
        inner.membership = Some(membership);
        inner.state = PeerState::Joined;
    }

    /// Asks the tick task to close the peer. The first reason wins.
    fn request_close(&self, reason: impl Into<String>, notify: bool) {
        {
            let mut inner = self.inner.lock();
            if inner.close.is_none() {
                inner.close = Some(CloseCause {
                    reason: reason.into(),
                    notify,
                });
            }
            if inner.state != PeerState::Closed {
                inner.state = PeerState::Closing;
            }
        }
        self.cancel.cancel();
    }

    /// The packet for this tick: the current seq/ack pair and the oldest
    /// unacknowledged messages, which may be none.
    fn next_packet(&self, batch_size: usize) -> RelayPacket {
        let batch = self.inner.lock().channel.send_batch(batch_size);
        let messages = batch
            .messages
            .into_iter()
            .map(|(seq, out)| BattleMessage {
                user_id: out.sender.to_string(),
                seq,
                body: out.body.to_vec(),
            })
            .collect();
        RelayPacket {
            session_id: self.session_id.clone(),
            seq: batch.seq,
            ack: batch.ack,
            body: PacketBody::Battle(messages),
        }
    }

    /// Filters inbound battle messages and applies the packet's ack.
    /// Returns the membership and the payloads to relay, in order.
    fn receive(&self, ack: u32, messages: Vec<BattleMessage>) -> Option<(Membership, Vec<Bytes>)> {
        let mut inner = self.inner.lock();
        let membership = inner.membership.clone()?;
        let source = membership.record.user_id.clone();

        let mut accepted = Vec::with_capacity(messages.len());
        for msg in messages {
            if inner.filter.accept(source.clone(), msg.seq) {
                accepted.push(Bytes::from(msg.body));
            } else {
                tracing::trace!(peer = %self.addr, seq = msg.seq, "out-of-order message dropped");
            }
        }
        let consumed = inner.filter.last(&source).unwrap_or(0);
        inner.channel.apply_seq_ack(consumed, ack);
        Some((membership, accepted))
    }

    fn apply_ack(&self, ack: u32) {
        let mut inner = self.inner.lock();
        let recv = inner.channel.recv_seq();
        inner.channel.apply_seq_ack(recv, ack);
    }

    /// Moves to `Closing` and hands back the cause and membership.
    fn begin_close(&self) -> (CloseCause, Option<Membership>) {
        let mut inner = self.inner.lock();
        inner.state = PeerState::Closing;
        let cause = inner.close.clone().unwrap_or(CloseCause {
            reason: "server shutdown".into(),
            notify: true,
        });
        (cause, inner.membership.take())
    }
}

impl RelayPeer for DatagramPeer {
    fn deliver(&self, msg: &RelayMessage) {
        let pushed = {
            let mut inner = self.inner.lock();
            if !matches!(inner.state, PeerState::Connecting | PeerState::Joined) {
                return;
            }
            inner.channel.push(Outgoing {
                sender: msg.sender.clone(),
                body: msg.payload.clone(),
            })
        };
        if let Err(e) = pushed {
            tracing::warn!(peer = %self.addr, error = %e, "peer stopped acknowledging");
            self.request_close("send window full", true);
        }
    }

    fn close(&self) {
        self.request_close("closed by server", true);
    }
}

// ---------------------------------------------------------------------------
// DatagramRelay
// ---------------------------------------------------------------------------

/// The UDP side of the relay, generic over the envelope codec.
pub struct DatagramRelay<C: Codec> {
    socket: UdpSocket,
    hub: Arc<RelayHub>,
    codec: C,
    config: DatagramConfig,
    peers: Mutex<HashMap<SocketAddr, Arc<DatagramPeer>>>,
}

impl<C: Codec> DatagramRelay<C> {
    /// Binds the relay socket.
    pub async fn bind(
        addr: &str,
        hub: Arc<RelayHub>,
        codec: C,
        config: DatagramConfig,
    ) -> Result<Self, RelayError> {
        let socket = UdpSocket::bind(addr).await.map_err(RelayError::Bind)?;
        tracing::info!(addr, "datagram relay listening");
        Ok(Self {
            socket,
            hub,
            codec,
            config,
            peers: Mutex::new(HashMap::new()),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, RelayError> {
        self.socket.local_addr().map_err(RelayError::Io)
    }

    pub fn config(&self) -> &DatagramConfig {
        &self.config
    }

    /// Number of peers not yet retired.
    pub fn peer_count(&self) -> usize {
        self.peers.lock().len()
    }

    /// State of the peer at `addr`, while it is registered.
    pub fn peer_state(&self, addr: &SocketAddr) -> Option<PeerState> {
        self.peers.lock().get(addr).map(|p| p.state())
    }

    /// Receives datagrams until `cancel` fires. Every peer's tick task
    /// observes the same token and retires its peer.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok((n, from)) => self.on_datagram(from, &buf[..n], &cancel).await,
                    // ICMP errors from departed clients surface here on some
                    // platforms; the socket itself is still fine.
                    Err(e) => tracing::debug!(error = %e, "datagram receive failed"),
                },
            }
        }
        tracing::info!(peers = self.peer_count(), "datagram relay stopped");
    }

    async fn on_datagram(self: &Arc<Self>, from: SocketAddr, data: &[u8], cancel: &CancellationToken) {
        let packet: RelayPacket = match self.codec.decode(data) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::trace!(peer = %from, error = %e, "undecodable datagram dropped");
                return;
            }
        };
        let peer = self.peers.lock().get(&from).cloned();
        tracing::trace!(peer = %from, seq = packet.seq, ack = packet.ack, "datagram");

        match packet.body {
            PacketBody::Ping { timestamp } => {
                if let Some(peer) = &peer {
                    peer.touch();
                }
                self.send(from, &control(packet.session_id, PacketBody::Pong { timestamp }))
                    .await;
            }
            PacketBody::HelloServer { .. } => match peer {
                // The first answer may have been lost.
                Some(peer) if peer.session_id == packet.session_id => {
                    peer.touch();
                    self.send(from, &control(packet.session_id, PacketBody::HelloServer { accepted: true }))
                        .await;
                }
                Some(_) => tracing::debug!(peer = %from, "hello for another session ignored"),
                None => self.accept(from, packet.session_id, cancel).await,
            },
            body => {
                let Some(peer) = peer.filter(|p| p.session_id == packet.session_id) else {
                    tracing::trace!(peer = %from, "datagram from unknown peer dropped");
                    return;
                };
                peer.touch();
                match body {
                    PacketBody::Battle(messages) => {
                        if let Some((membership, accepted)) = peer.receive(packet.ack, messages) {
                            for payload in accepted {
                                membership.room.broadcast(membership.slot, payload);
                            }
                        }
                    }
                    PacketBody::Fin { reason } => {
                        peer.apply_ack(packet.ack);
                        tracing::info!(peer = %from, %reason, "datagram peer sent fin");
                        peer.request_close(reason, false);
                    }
                    _ => peer.apply_ack(packet.ack),
                }
            }
        }
    }

    /// Admits a new peer whose hello carried `session_id`.
    async fn accept(self: &Arc<Self>, from: SocketAddr, session_id: String, cancel: &CancellationToken) {
        let peer = Arc::new(DatagramPeer::new(
            from,
            session_id.clone(),
            self.config.window,
            cancel.child_token(),
        ));
        let token = SessionToken(session_id.clone());
        match self.hub.join(&token, Arc::clone(&peer) as Arc<dyn RelayPeer>) {
            Ok(membership) => {
                tracing::info!(
                    peer = %from,
                    battle_code = %membership.room.code(),
                    slot = membership.slot,
                    "datagram peer joined"
                );
                peer.set_joined(membership);
                self.peers.lock().insert(from, Arc::clone(&peer));
                self.send(from, &control(session_id, PacketBody::HelloServer { accepted: true }))
                    .await;
                tokio::spawn(Arc::clone(self).drive_peer(peer));
            }
            Err(e) => {
                tracing::warn!(peer = %from, %token, error = %e, "datagram relay join refused");
                self.send(from, &control(session_id, PacketBody::HelloServer { accepted: false }))
                    .await;
            }
        }
    }

    /// The peer's tick loop: resend, ack, and watch for silence.
    async fn drive_peer(self: Arc<Self>, peer: Arc<DatagramPeer>) {
        let period = self.config.tick_period;
        let mut scheduler = TickScheduler::new(TickConfig::every(period).with_initial_jitter(period));
        loop {
            tokio::select! {
                _ = peer.cancel.cancelled() => break,
                info = scheduler.wait_for_tick() => {
                    if info.overrun {
                        tracing::trace!(peer = %peer.addr, skipped = info.ticks_skipped, "relay tick overrun");
                    }
                    if peer.idle_for() > self.config.idle_timeout {
                        tracing::info!(peer = %peer.addr, "datagram peer idle");
                        peer.request_close("idle timeout", true);
                        break;
                    }
                    let packet = peer.next_packet(self.config.batch_size);
                    self.send(peer.addr, &packet).await;
                    scheduler.record_tick_end();
                }
            }
        }
        self.retire(&peer).await;
    }

    async fn retire(&self, peer: &Arc<DatagramPeer>) {
        let (cause, membership) = peer.begin_close();
        {
            let mut peers = self.peers.lock();
            if peers.get(&peer.addr).is_some_and(|p| Arc::ptr_eq(p, peer)) {
                peers.remove(&peer.addr);
            }
        }
        if cause.notify {
            let fin = PacketBody::Fin {
                reason: cause.reason.clone(),
            };
            self.send(peer.addr, &control(peer.session_id.clone(), fin)).await;
        }
        if let Some(membership) = membership {
            self.hub.leave(&membership);
        }
        peer.inner.lock().state = PeerState::Closed;
        tracing::info!(peer = %peer.addr, reason = %cause.reason, "datagram peer closed");
    }

    async fn send(&self, to: SocketAddr, packet: &RelayPacket) {
        let bytes = match self.codec.encode(packet) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(peer = %to, error = %e, "packet not encodable");
                return;
            }
        };
        if let Err(e) = self.socket.send_to(&bytes, to).await {
            tracing::debug!(peer = %to, error = %e, "datagram send failed");
        }
    }
}

/// A packet outside the reliable layer.
fn control(session_id: String, body: PacketBody) -> RelayPacket {
    RelayPacket {
        session_id,
        seq: 0,
        ack: 0,
        body,
    }
}
