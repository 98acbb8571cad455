//! Lobby command handlers.
//!
//! Each handler reads the question body, mutates coordinator state and
//! returns the answer. The dispatcher sends the answer only when the
//! client asked a question; a handler error becomes a `STATUS_ERROR`
//! answer and never stops the coordinator.

use skirmish_protocol::{
    BattleCode, BodyWriter, Faction, LobbyId, Message, STATUS_ERROR, UserId, command,
};
use skirmish_transport::ConnectionId;
use tokio::time::Instant;

use crate::{BattleOutcome, Coordinator, LobbyError};

/// What to do after a command succeeded.
enum Reply {
    Answer(Message),
    /// Answer, then close the connection once the answer is flushed.
    Farewell(Message),
}

impl Coordinator {
    pub(crate) fn on_message(&mut self, id: ConnectionId, msg: Message) {
        let Some(peer) = self.peers.get_mut(&id) else {
            tracing::debug!(%id, "message from unknown connection");
            return;
        };
        peer.last_seen = Instant::now();

        let name = command::name(msg.command);
        tracing::debug!(%id, command = name, seq = msg.seq, "lobby message");

        let result = match msg.command {
            command::LINE_CHECK => Ok(Reply::Answer(msg.answer())),
            command::LOGIN => self.handle_login(id, &msg),
            command::LOGOUT => self.require_user(id).map(|_| Reply::Farewell(msg.answer())),
            command::LOBBY_ENTER => self.handle_lobby_enter(id, &msg),
            command::LOBBY_EXIT => self.leave_lobby(id).map(|_| Reply::Answer(msg.answer())),
            command::LOBBY_STATUS => self.handle_lobby_status(&msg),
            command::ROOM_CREATE => self.handle_room_create(id, &msg),
            command::ROOM_ENTER => self.handle_room_enter(id, &msg),
            command::ROOM_EXIT => self.leave_room(id).map(|_| Reply::Answer(msg.answer())),
            command::ROOM_READY => self.handle_room_ready(id, &msg),
            command::ENTRY => self.handle_entry(id, &msg),
            command::ENTRY_CANCEL => self.handle_entry_cancel(id, &msg),
            command::BATTLE_RESULT => self.handle_battle_result(id, &msg),
            other => {
                tracing::warn!(%id, command = other, "unknown command");
                Ok(Reply::Answer(msg.answer()))
            }
        };

        match result {
            Ok(Reply::Answer(answer)) => {
                if msg.is_question() {
                    self.send(id, &answer);
                }
            }
            Ok(Reply::Farewell(answer)) => {
                if msg.is_question() {
                    self.send(id, &answer);
                }
                if let Some(peer) = self.peers.get(&id) {
                    peer.handle.close_after_flush();
                }
            }
            Err(e) => {
                tracing::info!(%id, command = name, error = %e, "command refused");
                if msg.is_question() {
                    self.send(id, &msg.answer().with_status(STATUS_ERROR));
                }
                if matches!(e, LobbyError::LoginRefused(..)) {
                    if let Some(peer) = self.peers.get(&id) {
                        peer.handle.close_after_flush();
                    }
                }
            }
        }
    }

    fn require_user(&self, id: ConnectionId) -> Result<UserId, LobbyError> {
        self.peers
            .get(&id)
            .and_then(|p| p.user.clone())
            .ok_or(LobbyError::NotLoggedIn)
    }

    fn require_lobby(&self, id: ConnectionId) -> Result<(UserId, LobbyId), LobbyError> {
        let user = self.require_user(id)?;
        let lobby = self
            .peers
            .get(&id)
            .and_then(|p| p.lobby)
            .ok_or_else(|| LobbyError::NotInLobby(user.clone()))?;
        Ok((user, lobby))
    }

    // -- Account ------------------------------------------------------------

    fn handle_login(&mut self, id: ConnectionId, msg: &Message) -> Result<Reply, LobbyError> {
        if let Ok(user) = self.require_user(id) {
            return Err(LobbyError::AlreadyLoggedIn(user));
        }

        let mut body = msg.reader();
        let user_id = UserId::new(body.read_string()?);
        let password = body.read_obfuscated()?;

        if user_id.as_str().is_empty() {
            return Err(LobbyError::LoginRefused(user_id, "empty user id".into()));
        }
        if self.persistence.is_banned(&user_id)? {
            return Err(LobbyError::LoginRefused(user_id, "banned".into()));
        }
        let Some(account) = self.persistence.load_user(&user_id)? else {
            return Err(LobbyError::LoginRefused(user_id, "unknown user".into()));
        };
        if !account.password.is_empty() && account.password != password {
            return Err(LobbyError::LoginRefused(user_id, "wrong password".into()));
        }

        // One lobby connection per user: the newer login wins.
        if let Some(old) = self.users.get(&user_id).copied() {
            if old != id {
                tracing::info!(%user_id, old = %old, new = %id, "replacing older connection");
                if let Some(peer) = self.peers.get(&old) {
                    peer.handle.close();
                }
                self.drop_peer(old);
            }
        }

        if let Some(peer) = self.peers.get_mut(&id) {
            peer.user = Some(user_id.clone());
        }
        self.users.insert(user_id.clone(), id);
        tracing::info!(%id, %user_id, "logged in");

        let body = BodyWriter::new().write_string(&account.name)?;
        Ok(Reply::Answer(msg.answer().with_body(body)))
    }

    // -- Lobby --------------------------------------------------------------

    fn handle_lobby_enter(&mut self, id: ConnectionId, msg: &Message) -> Result<Reply, LobbyError> {
        let user = self.require_user(id)?;
        let mut body = msg.reader();
        let lobby_id = LobbyId(body.read_u16()?);
        let faction = Faction::from_wire(body.read_u8()?)
            .ok_or_else(|| LobbyError::InvalidState("no faction chosen".into()))?;

        if let Some(current) = self.peers.get(&id).and_then(|p| p.lobby) {
            return Err(LobbyError::AlreadyInLobby(user, current));
        }
        let lobby = self
            .lobbies
            .get_mut(&lobby_id)
            .ok_or(LobbyError::UnknownLobby(lobby_id))?;
        lobby.enter(user.clone(), faction)?;
        if let Some(peer) = self.peers.get_mut(&id) {
            peer.lobby = Some(lobby_id);
        }
        tracing::debug!(%user, lobby = %lobby_id, %faction, "lobby enter");
        Ok(Reply::Answer(msg.answer()))
    }

    fn handle_lobby_status(&self, msg: &Message) -> Result<Reply, LobbyError> {
        let lobby_id = LobbyId(msg.reader().read_u16()?);
        let lobby = self
            .lobbies
            .get(&lobby_id)
            .ok_or(LobbyError::UnknownLobby(lobby_id))?;
        let members = lobby.member_counts();
        let queued = lobby.queued_counts();
        let body = BodyWriter::new()
            .write_u16(members[0] as u16)
            .write_u16(members[1] as u16)
            .write_u16(queued[0] as u16)
            .write_u16(queued[1] as u16);
        Ok(Reply::Answer(msg.answer().with_body(body)))
    }

    // -- Rooms --------------------------------------------------------------

    /// Checks the user may take a seat in room `index`: in a lobby, not
    /// already seated, and the room is of their faction.
    fn check_room_seat(&self, id: ConnectionId, index: usize) -> Result<(UserId, LobbyId), LobbyError> {
        let (user, lobby_id) = self.require_lobby(id)?;
        if let Some(current) = self.peers.get(&id).and_then(|p| p.room) {
            return Err(LobbyError::AlreadyInRoom(user, current));
        }
        let lobby = self
            .lobbies
            .get(&lobby_id)
            .ok_or(LobbyError::UnknownLobby(lobby_id))?;
        let room = lobby.room(index)?;
        if lobby.faction_of(&user) != Some(room.faction()) {
            return Err(LobbyError::InvalidState(format!(
                "room {index} belongs to faction {}",
                room.faction()
            )));
        }
        Ok((user, lobby_id))
    }

    fn handle_room_create(&mut self, id: ConnectionId, msg: &Message) -> Result<Reply, LobbyError> {
        let mut body = msg.reader();
        let index = body.read_u16()? as usize;
        let title = body.read_string()?;
        let (user, lobby_id) = self.check_room_seat(id, index)?;

        let deadline = Instant::now() + self.config.room_lifetime;
        let lobby = self
            .lobbies
            .get_mut(&lobby_id)
            .ok_or(LobbyError::UnknownLobby(lobby_id))?;
        lobby.room_mut(index)?.open(user.clone(), title, deadline)?;
        lobby.cancel_entry(&user);
        if let Some(peer) = self.peers.get_mut(&id) {
            peer.room = Some(index);
        }
        tracing::debug!(%user, lobby = %lobby_id, room = index, "room created");
        Ok(Reply::Answer(msg.answer()))
    }

    fn handle_room_enter(&mut self, id: ConnectionId, msg: &Message) -> Result<Reply, LobbyError> {
        let index = msg.reader().read_u16()? as usize;
        let (user, lobby_id) = self.check_room_seat(id, index)?;

        let lobby = self
            .lobbies
            .get_mut(&lobby_id)
            .ok_or(LobbyError::UnknownLobby(lobby_id))?;
        lobby.room_mut(index)?.join(user.clone())?;
        lobby.cancel_entry(&user);
        if let Some(peer) = self.peers.get_mut(&id) {
            peer.room = Some(index);
        }
        tracing::debug!(%user, lobby = %lobby_id, room = index, "room enter");
        Ok(Reply::Answer(msg.answer()))
    }

    fn handle_room_ready(&mut self, id: ConnectionId, msg: &Message) -> Result<Reply, LobbyError> {
        let ready = msg.reader().read_u8()? != 0;
        let (user, lobby_id) = self.require_lobby(id)?;
        let index = self
            .peers
            .get(&id)
            .and_then(|p| p.room)
            .ok_or_else(|| LobbyError::NotInRoom(user.clone()))?;
        let lobby = self
            .lobbies
            .get_mut(&lobby_id)
            .ok_or(LobbyError::UnknownLobby(lobby_id))?;
        lobby.room_mut(index)?.set_ready(&user, ready)?;
        tracing::debug!(%user, room = index, ready, "room ready");
        Ok(Reply::Answer(msg.answer()))
    }

    // -- Entry queue --------------------------------------------------------

    fn handle_entry(&mut self, id: ConnectionId, msg: &Message) -> Result<Reply, LobbyError> {
        let (user, lobby_id) = self.require_lobby(id)?;
        if let Some(room) = self.peers.get(&id).and_then(|p| p.room) {
            return Err(LobbyError::AlreadyInRoom(user, room));
        }
        let lobby = self
            .lobbies
            .get_mut(&lobby_id)
            .ok_or(LobbyError::UnknownLobby(lobby_id))?;
        let queued = lobby.enqueue(user.clone())?;
        tracing::debug!(%user, lobby = %lobby_id, queued, "entry");
        Ok(Reply::Answer(msg.answer()))
    }

    fn handle_entry_cancel(&mut self, id: ConnectionId, msg: &Message) -> Result<Reply, LobbyError> {
        let (user, lobby_id) = self.require_lobby(id)?;
        if let Some(lobby) = self.lobbies.get_mut(&lobby_id) {
            lobby.cancel_entry(&user);
        }
        Ok(Reply::Answer(msg.answer()))
    }

    // -- Battles ------------------------------------------------------------

    fn handle_battle_result(&mut self, id: ConnectionId, msg: &Message) -> Result<Reply, LobbyError> {
        let user = self.require_user(id)?;
        let mut body = msg.reader();
        let code = BattleCode(body.read_string()?);
        let outcome = BattleOutcome {
            kills: body.read_u16()?,
            deaths: body.read_u16()?,
            win: body.read_u8()? != 0,
        };

        let battle = self
            .battles
            .get_mut(&code)
            .ok_or_else(|| LobbyError::UnknownBattle(code.clone()))?;
        if !battle.mark_reported(&user) {
            return Err(LobbyError::InvalidState(format!(
                "{user} cannot report for battle {code}"
            )));
        }
        let complete = battle.is_complete();
        self.persistence.update_user_stats(&user, &outcome)?;
        tracing::info!(battle_code = %code, %user, win = outcome.win, "battle result");

        if complete {
            self.battles.remove(&code);
            self.handoff.remove_battle(&code);
            tracing::info!(battle_code = %code, "battle complete");
        }
        Ok(Reply::Answer(msg.answer()))
    }
}
