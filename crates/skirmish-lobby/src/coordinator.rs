//! The coordinator: sole owner of peers, lobbies, rooms and battles.
//!
//! Runs as one Tokio task draining an unbounded [`Event`] queue in arrival
//! order. Nothing else touches its state; connection actors and outer
//! surfaces talk to it through a [`CoordinatorHandle`](crate::CoordinatorHandle).

use std::collections::{BTreeMap, HashMap};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use serde::Serialize;
use skirmish_handoff::{HandoffRecord, HandoffStore};
use skirmish_protocol::{
    BattleCode, BodyWriter, Faction, LobbyId, Message, UserId, command,
};
use skirmish_transport::{ConnectionHandle, ConnectionId};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::battle::battle_code_now;
use crate::{
    Allocation, Battle, BattleEntry, CoordinatorConfig, Lobby, LobbyError, Participant,
    Persistence, RelayAllocator, RoomState,
};

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Everything the coordinator reacts to.
pub enum Event {
    /// A lobby connection was accepted.
    Connected { handle: ConnectionHandle },
    /// A complete message arrived on a lobby connection.
    Message { id: ConnectionId, msg: Message },
    /// A lobby connection is gone.
    Disconnected { id: ConnectionId },
    /// Periodic housekeeping.
    Tick,
    /// Arbitrary work run with exclusive access to the state.
    Exclusive(Box<dyn FnOnce(&mut Coordinator) + Send>),
}

// ---------------------------------------------------------------------------
// Status snapshot
// ---------------------------------------------------------------------------

/// Point-in-time counts, for an ops surface.
#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorStatus {
    pub peers: usize,
    pub users: usize,
    pub battles: usize,
    pub lobbies: Vec<LobbyStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LobbyStatus {
    pub id: LobbyId,
    pub name: String,
    pub members: [usize; 2],
    pub queued: [usize; 2],
    pub open_rooms: usize,
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

/// A lobby connection and what its user is doing.
pub(crate) struct Peer {
    pub(crate) handle: ConnectionHandle,
    pub(crate) user: Option<UserId>,
    pub(crate) lobby: Option<LobbyId>,
    pub(crate) room: Option<usize>,
    pub(crate) last_seen: Instant,
}

pub struct Coordinator {
    pub(crate) config: CoordinatorConfig,
    pub(crate) persistence: Arc<dyn Persistence>,
    allocator: Arc<dyn RelayAllocator>,
    pub(crate) handoff: Arc<dyn HandoffStore>,
    pub(crate) peers: HashMap<ConnectionId, Peer>,
    pub(crate) users: HashMap<UserId, ConnectionId>,
    pub(crate) lobbies: BTreeMap<LobbyId, Lobby>,
    pub(crate) battles: HashMap<BattleCode, Battle>,
}

/// Where a battle's participants came from.
enum Source {
    Rooms(Vec<usize>),
    Queue,
}

impl Coordinator {
    /// Builds the state, creating one lobby per preset the persistence
    /// layer returns.
    pub fn new(
        config: CoordinatorConfig,
        persistence: Arc<dyn Persistence>,
        allocator: Arc<dyn RelayAllocator>,
        handoff: Arc<dyn HandoffStore>,
    ) -> Self {
        let lobbies = persistence
            .lobby_presets()
            .into_iter()
            .map(|preset| (preset.id, Lobby::new(preset)))
            .collect();
        Self {
            config,
            persistence,
            allocator,
            handoff,
            peers: HashMap::new(),
            users: HashMap::new(),
            lobbies,
            battles: HashMap::new(),
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Drains `events` until `cancel` fires, then closes every lobby
    /// connection.
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<Event>, cancel: CancellationToken) {
        tracing::info!(lobbies = self.lobbies.len(), "coordinator started");

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            self.handle_event(event);
        }

        for peer in self.peers.values() {
            peer.handle.close();
        }
        tracing::info!(peers = self.peers.len(), "coordinator stopped");
    }

    pub fn handle_event(&mut self, event: Event) {
        match event {
            Event::Connected { handle } => self.on_connected(handle),
            Event::Message { id, msg } => self.on_message(id, msg),
            Event::Disconnected { id } => self.on_disconnected(id),
            Event::Tick => self.on_tick(),
            Event::Exclusive(work) => work(self),
        }
    }

    // -- Connection lifecycle ----------------------------------------------

    fn on_connected(&mut self, handle: ConnectionHandle) {
        let id = handle.id();
        tracing::info!(%id, peer = %handle.peer_addr(), "lobby connection opened");
        self.peers.insert(
            id,
            Peer {
                handle,
                user: None,
                lobby: None,
                room: None,
                last_seen: Instant::now(),
            },
        );
    }

    fn on_disconnected(&mut self, id: ConnectionId) {
        // Already gone when the liveness sweep or a newer login dropped it.
        if self.peers.contains_key(&id) {
            self.drop_peer(id);
        }
    }

    /// Removes a peer with the full exit cascade: room, entry queue, lobby.
    pub(crate) fn drop_peer(&mut self, id: ConnectionId) {
        if self.peers.get(&id).is_some_and(|p| p.room.is_some()) {
            if let Err(e) = self.leave_room(id) {
                tracing::warn!(%id, error = %e, "room exit during disconnect failed");
            }
        }
        if self.peers.get(&id).is_some_and(|p| p.lobby.is_some()) {
            if let Err(e) = self.leave_lobby(id) {
                tracing::warn!(%id, error = %e, "lobby exit during disconnect failed");
            }
        }

        let Some(peer) = self.peers.remove(&id) else {
            return;
        };
        if let Some(user) = &peer.user {
            if self.users.get(user) == Some(&id) {
                self.users.remove(user);
            }
        }
        tracing::info!(%id, user = ?peer.user.as_ref().map(UserId::as_str), "lobby connection closed");
    }

    /// Takes the peer's user out of its room. The last exit resets the room.
    pub(crate) fn leave_room(&mut self, id: ConnectionId) -> Result<(), LobbyError> {
        let peer = self.peers.get_mut(&id).ok_or(LobbyError::NotLoggedIn)?;
        let user = peer.user.clone().ok_or(LobbyError::NotLoggedIn)?;
        let (Some(lobby_id), Some(index)) = (peer.lobby, peer.room.take()) else {
            return Err(LobbyError::NotInRoom(user));
        };
        let lobby = self
            .lobbies
            .get_mut(&lobby_id)
            .ok_or(LobbyError::UnknownLobby(lobby_id))?;
        let emptied = lobby.room_mut(index)?.leave(&user)?;
        tracing::debug!(%user, lobby = %lobby_id, room = index, emptied, "room exit");
        Ok(())
    }

    /// Takes the peer's user out of its lobby, leaving its room first.
    pub(crate) fn leave_lobby(&mut self, id: ConnectionId) -> Result<(), LobbyError> {
        if self.peers.get(&id).is_some_and(|p| p.room.is_some()) {
            self.leave_room(id)?;
        }
        let peer = self.peers.get_mut(&id).ok_or(LobbyError::NotLoggedIn)?;
        let user = peer.user.clone().ok_or(LobbyError::NotLoggedIn)?;
        let lobby_id = peer.lobby.take().ok_or_else(|| LobbyError::NotInLobby(user.clone()))?;
        if let Some(lobby) = self.lobbies.get_mut(&lobby_id) {
            lobby.exit(&user);
        }
        tracing::debug!(%user, lobby = %lobby_id, "lobby exit");
        Ok(())
    }

    /// `true` if `user` is logged in on a connection that is still up.
    pub fn is_connected(&self, user: &UserId) -> bool {
        self.users
            .get(user)
            .and_then(|id| self.peers.get(id))
            .is_some_and(|p| !p.handle.is_closed())
    }

    // -- Sending ------------------------------------------------------------

    pub(crate) fn send(&self, id: ConnectionId, msg: &Message) {
        let Some(peer) = self.peers.get(&id) else {
            return;
        };
        match msg.encode() {
            Ok(bytes) => {
                if let Err(e) = peer.handle.send(&bytes) {
                    tracing::debug!(%id, error = %e, "send to closing connection dropped");
                }
            }
            Err(e) => {
                tracing::warn!(%id, command = command::name(msg.command), error = %e, "message not encodable");
            }
        }
    }

    fn send_to_user(&self, user: &UserId, msg: &Message) {
        if let Some(id) = self.users.get(user) {
            self.send(*id, msg);
        }
    }

    fn peer_of_user_mut(&mut self, user: &UserId) -> Option<&mut Peer> {
        let id = self.users.get(user)?;
        self.peers.get_mut(id)
    }

    // -- Tick ---------------------------------------------------------------

    pub(crate) fn on_tick(&mut self) {
        let now = Instant::now();
        self.sweep_idle(now);
        self.close_expired_rooms(now);
        self.form_battles();
        self.expire_battles(now);
    }

    fn sweep_idle(&mut self, now: Instant) {
        let idle: Vec<ConnectionId> = self
            .peers
            .iter()
            .filter(|(_, p)| now.saturating_duration_since(p.last_seen) > self.config.idle_timeout)
            .map(|(id, _)| *id)
            .collect();
        for id in idle {
            tracing::info!(%id, "idle lobby connection dropped");
            if let Some(peer) = self.peers.get(&id) {
                peer.handle.close();
            }
            self.drop_peer(id);
        }
    }

    fn close_expired_rooms(&mut self, now: Instant) {
        let mut closed = Vec::new();
        for lobby in self.lobbies.values_mut() {
            let expired: Vec<usize> = lobby
                .rooms()
                .iter()
                .filter(|r| r.state() != RoomState::Empty && r.is_expired(now))
                .map(|r| r.index())
                .collect();
            let lobby_id = lobby.id();
            for index in expired {
                if let Ok(room) = lobby.room_mut(index) {
                    closed.push((lobby_id, index, room.users().to_vec()));
                    room.reset();
                }
            }
        }

        for (lobby_id, index, users) in closed {
            tracing::info!(lobby = %lobby_id, room = index, "room deadline passed, closed");
            let notice = Message::notice(command::ROOM_CLOSED)
                .with_body(BodyWriter::new().write_u16(index as u16));
            for user in &users {
                self.send_to_user(user, &notice);
                if let Some(peer) = self.peer_of_user_mut(user) {
                    peer.room = None;
                }
            }
        }
    }

    fn expire_battles(&mut self, now: Instant) {
        let lifetime = self.config.battle_lifetime;
        let expired: Vec<BattleCode> = self
            .battles
            .values()
            .filter(|b| b.is_expired(now, lifetime))
            .map(|b| b.code.clone())
            .collect();
        for code in expired {
            self.battles.remove(&code);
            self.handoff.remove_battle(&code);
            tracing::info!(battle_code = %code, "battle expired");
        }
    }

    // -- Battle formation ---------------------------------------------------

    fn form_battles(&mut self) {
        let ids: Vec<LobbyId> = self.lobbies.keys().copied().collect();
        for id in ids {
            if let Err(e) = self.try_form_battle(id) {
                tracing::warn!(lobby = %id, error = %e, "battle formation failed");
            }
        }
    }

    /// Forms at most one battle in the lobby. Returns its code, or `None`
    /// when there is no quorum or the relay is not ready yet.
    pub(crate) fn try_form_battle(&mut self, lobby_id: LobbyId) -> Result<Option<BattleCode>, LobbyError> {
        let Some(lobby) = self.lobbies.get(&lobby_id) else {
            return Ok(None);
        };
        let is_connected = |u: &UserId| self.is_connected(u);

        let (source, seats) = if let Some(rooms) = lobby.room_quorum(is_connected) {
            let mut seats = Vec::new();
            for index in &rooms {
                let room = lobby.room(*index)?;
                seats.extend(room.users().iter().map(|u| (u.clone(), room.faction())));
            }
            (Source::Rooms(rooms), seats)
        } else if lobby.entry_quorum(is_connected) {
            (Source::Queue, lobby.select_entries(is_connected))
        } else {
            return Ok(None);
        };

        let code = battle_code_now();
        let relay = match self.allocator.allocate(&lobby.preset().region, &code) {
            Allocation::Ready(addr) => addr,
            Allocation::Pending => {
                tracing::debug!(lobby = %lobby_id, "relay pending, match kept for next tick");
                return Ok(None);
            }
        };
        let relay_ip = relay_ipv4(relay)?;
        let rule = lobby.preset().rule.clone();

        if self.battles.contains_key(&code) {
            tracing::warn!(battle_code = %code, "battle code collision");
        }

        let mut participants = Vec::with_capacity(seats.len());
        for (user_id, faction) in seats {
            let record = HandoffRecord::issue(code.clone(), user_id.clone(), faction);
            participants.push(Participant {
                user_id,
                faction,
                token: record.token.clone(),
            });
            if let Err(e) = self.handoff.put(record) {
                self.handoff.remove_battle(&code);
                return Err(e.into());
            }
        }

        for p in &participants {
            let entry = BattleEntry {
                battle_code: code.clone(),
                lobby: lobby_id,
                user_id: p.user_id.clone(),
                faction: p.faction,
            };
            if let Err(e) = self.persistence.record_battle(&entry) {
                tracing::warn!(battle_code = %code, user = %p.user_id, error = %e, "battle entry not recorded");
            }
        }

        // Participants leave the queue and their rooms.
        let users: Vec<UserId> = participants.iter().map(|p| p.user_id.clone()).collect();
        if let Some(lobby) = self.lobbies.get_mut(&lobby_id) {
            lobby.remove_entries(&users);
            if let Source::Rooms(rooms) = &source {
                for index in rooms {
                    lobby.room_mut(*index)?.reset();
                }
            }
        }
        if matches!(source, Source::Rooms(_)) {
            for user in &users {
                if let Some(peer) = self.peer_of_user_mut(user) {
                    peer.room = None;
                }
            }
        }

        for p in &participants {
            let body = BodyWriter::new()
                .write_string(code.as_str())?
                .write_raw(&relay_ip.octets())
                .write_u16(relay.port())
                .write_u8(p.faction.to_wire())
                .write_string(p.token.as_str())?;
            self.send_to_user(&p.user_id, &Message::notice(command::BATTLE_READY).with_body(body));
        }

        tracing::info!(
            battle_code = %code,
            lobby = %lobby_id,
            %relay,
            participants = participants.len(),
            from_rooms = matches!(source, Source::Rooms(_)),
            "battle formed"
        );
        self.battles
            .insert(code.clone(), Battle::new(code.clone(), lobby_id, participants, relay, rule));
        Ok(Some(code))
    }

    // -- Inspection ---------------------------------------------------------

    pub fn status(&self) -> CoordinatorStatus {
        CoordinatorStatus {
            peers: self.peers.len(),
            users: self.users.len(),
            battles: self.battles.len(),
            lobbies: self
                .lobbies
                .values()
                .map(|l| LobbyStatus {
                    id: l.id(),
                    name: l.preset().name.clone(),
                    members: l.member_counts(),
                    queued: l.queued_counts(),
                    open_rooms: l.rooms().iter().filter(|r| r.state() != RoomState::Empty).count(),
                })
                .collect(),
        }
    }

    pub fn lobby(&self, id: LobbyId) -> Option<&Lobby> {
        self.lobbies.get(&id)
    }

    pub fn battle(&self, code: &BattleCode) -> Option<&Battle> {
        self.battles.get(code)
    }

    pub fn battles(&self) -> impl Iterator<Item = &Battle> {
        self.battles.values()
    }

    /// The faction `user` chose in their current lobby.
    pub fn faction_of(&self, user: &UserId) -> Option<Faction> {
        let id = self.users.get(user)?;
        let lobby = self.peers.get(id)?.lobby?;
        self.lobbies.get(&lobby)?.faction_of(user)
    }
}

/// The battle-ready notice only has room for an IPv4 address.
fn relay_ipv4(addr: SocketAddr) -> Result<Ipv4Addr, LobbyError> {
    match addr {
        SocketAddr::V4(v4) => Ok(*v4.ip()),
        SocketAddr::V6(v6) => v6.ip().to_ipv4_mapped().ok_or_else(|| {
            LobbyError::InvalidState(format!("relay address {addr} is not IPv4"))
        }),
    }
}
