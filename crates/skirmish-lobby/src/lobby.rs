//! A lobby: faction rosters, the entry queue, and a fixed set of rooms.
//!
//! All quorum checks take an `is_connected` predicate instead of looking
//! at connections themselves; the coordinator owns connection state and
//! the lobby stays a plain data structure.

use std::collections::BTreeMap;

use skirmish_protocol::{Faction, LobbyId, UserId};

use crate::{LobbyError, LobbyPreset, Room};

#[derive(Debug)]
pub struct Lobby {
    preset: LobbyPreset,
    members: BTreeMap<UserId, Faction>,
    /// Insertion-ordered, no duplicates.
    queue: Vec<UserId>,
    /// First half faction A, second half faction B.
    rooms: Vec<Room>,
}

impl Lobby {
    pub fn new(preset: LobbyPreset) -> Self {
        let per = preset.rooms_per_faction;
        let rooms = (0..per * 2)
            .map(|i| {
                let faction = if i < per { Faction::A } else { Faction::B };
                Room::new(i, faction, preset.room_capacity)
            })
            .collect();
        Self {
            preset,
            members: BTreeMap::new(),
            queue: Vec::new(),
            rooms,
        }
    }

    pub fn id(&self) -> LobbyId {
        self.preset.id
    }

    pub fn preset(&self) -> &LobbyPreset {
        &self.preset
    }

    // -- Membership -------------------------------------------------------

    pub fn enter(&mut self, user: UserId, faction: Faction) -> Result<(), LobbyError> {
        if self.members.contains_key(&user) {
            return Err(LobbyError::AlreadyInLobby(user, self.id()));
        }
        self.members.insert(user, faction);
        Ok(())
    }

    /// Removes the user from the roster and the entry queue. Room
    /// membership is the caller's business (it sends notices).
    pub fn exit(&mut self, user: &UserId) -> bool {
        self.cancel_entry(user);
        self.members.remove(user).is_some()
    }

    pub fn faction_of(&self, user: &UserId) -> Option<Faction> {
        self.members.get(user).copied()
    }

    /// Members present per faction.
    pub fn member_counts(&self) -> [usize; 2] {
        let mut counts = [0; 2];
        for faction in self.members.values() {
            counts[faction.index()] += 1;
        }
        counts
    }

    // -- Entry queue ------------------------------------------------------

    /// Queues a member for automatic matching. Returns `false` if the
    /// user was already queued.
    pub fn enqueue(&mut self, user: UserId) -> Result<bool, LobbyError> {
        if !self.members.contains_key(&user) {
            return Err(LobbyError::NotInLobby(user));
        }
        if self.queue.contains(&user) {
            return Ok(false);
        }
        self.queue.push(user);
        Ok(true)
    }

    pub fn cancel_entry(&mut self, user: &UserId) -> bool {
        let before = self.queue.len();
        self.queue.retain(|u| u != user);
        before != self.queue.len()
    }

    pub fn queue(&self) -> &[UserId] {
        &self.queue
    }

    /// Queued users per faction.
    pub fn queued_counts(&self) -> [usize; 2] {
        let mut counts = [0; 2];
        for user in &self.queue {
            if let Some(faction) = self.faction_of(user) {
                counts[faction.index()] += 1;
            }
        }
        counts
    }

    /// `true` when, for both factions, the connected queued users reach
    /// the lobby's threshold.
    pub fn entry_quorum(&self, is_connected: impl Fn(&UserId) -> bool) -> bool {
        let mut counts = [0usize; 2];
        for user in self.queue.iter().filter(|u| is_connected(u)) {
            if let Some(faction) = self.faction_of(user) {
                counts[faction.index()] += 1;
            }
        }
        Faction::ALL
            .iter()
            .all(|f| counts[f.index()] >= self.preset.threshold(*f))
    }

    /// Picks participants in queue order: up to the threshold per faction,
    /// connected users only. Does not modify the queue.
    pub fn select_entries(&self, is_connected: impl Fn(&UserId) -> bool) -> Vec<(UserId, Faction)> {
        let mut taken = [0usize; 2];
        let mut selected = Vec::new();
        for user in &self.queue {
            if !is_connected(user) {
                continue;
            }
            let Some(faction) = self.faction_of(user) else {
                continue;
            };
            if taken[faction.index()] < self.preset.threshold(faction) {
                taken[faction.index()] += 1;
                selected.push((user.clone(), faction));
            }
        }
        selected
    }

    pub fn remove_entries(&mut self, users: &[UserId]) {
        self.queue.retain(|u| !users.contains(u));
    }

    // -- Rooms ------------------------------------------------------------

    pub fn rooms(&self) -> &[Room] {
        &self.rooms
    }

    pub fn room(&self, index: usize) -> Result<&Room, LobbyError> {
        self.rooms.get(index).ok_or(LobbyError::RoomNotFound {
            lobby: self.preset.id,
            index,
        })
    }

    pub fn room_mut(&mut self, index: usize) -> Result<&mut Room, LobbyError> {
        let lobby = self.preset.id;
        self.rooms
            .get_mut(index)
            .ok_or(LobbyError::RoomNotFound { lobby, index })
    }

    /// For every faction with a non-zero threshold, the first ready room
    /// whose whole roster is connected. `None` unless every such faction
    /// has one.
    pub fn room_quorum(&self, is_connected: impl Fn(&UserId) -> bool) -> Option<Vec<usize>> {
        let mut picked = Vec::new();
        for faction in Faction::ALL {
            if self.preset.threshold(faction) == 0 {
                continue;
            }
            let room = self.rooms.iter().find(|r| {
                r.faction() == faction
                    && r.is_ready()
                    && !r.users().is_empty()
                    && r.users().iter().all(&is_connected)
            })?;
            picked.push(room.index());
        }
        (!picked.is_empty()).then_some(picked)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use tokio::time::Instant;

    use super::*;
    use crate::default_presets;

    fn uid(s: &str) -> UserId {
        UserId::new(s)
    }

    fn standard() -> Lobby {
        Lobby::new(default_presets().remove(0))
    }

    fn everyone(_: &UserId) -> bool {
        true
    }

    fn fill(lobby: &mut Lobby, users: &[(&str, Faction)]) {
        for (name, faction) in users {
            lobby.enter(uid(name), *faction).unwrap();
            lobby.enqueue(uid(name)).unwrap();
        }
    }

    // =====================================================================
    // Membership
    // =====================================================================

    #[test]
    fn test_new_lobby_splits_rooms_by_faction() {
        let lobby = standard();
        let per = lobby.preset().rooms_per_faction;
        assert_eq!(lobby.rooms().len(), per * 2);
        assert_eq!(lobby.rooms()[0].faction(), Faction::A);
        assert_eq!(lobby.rooms()[per].faction(), Faction::B);
    }

    #[test]
    fn test_enter_twice_is_error() {
        let mut lobby = standard();
        lobby.enter(uid("AAAAAA"), Faction::A).unwrap();
        assert!(matches!(
            lobby.enter(uid("AAAAAA"), Faction::B),
            Err(LobbyError::AlreadyInLobby(_, _))
        ));
    }

    #[test]
    fn test_exit_removes_from_queue() {
        let mut lobby = standard();
        fill(&mut lobby, &[("AAAAAA", Faction::A)]);
        assert!(lobby.exit(&uid("AAAAAA")));
        assert!(lobby.queue().is_empty());
        assert_eq!(lobby.member_counts(), [0, 0]);
    }

    // =====================================================================
    // Entry queue
    // =====================================================================

    #[test]
    fn test_enqueue_is_deduplicated() {
        let mut lobby = standard();
        lobby.enter(uid("AAAAAA"), Faction::A).unwrap();
        assert!(lobby.enqueue(uid("AAAAAA")).unwrap());
        assert!(!lobby.enqueue(uid("AAAAAA")).unwrap());
        assert_eq!(lobby.queue().len(), 1);
    }

    #[test]
    fn test_enqueue_non_member_is_error() {
        let mut lobby = standard();
        assert!(matches!(
            lobby.enqueue(uid("AAAAAA")),
            Err(LobbyError::NotInLobby(_))
        ));
    }

    #[test]
    fn test_entry_quorum_exactly_two_per_faction() {
        let mut lobby = standard();
        fill(
            &mut lobby,
            &[
                ("A1", Faction::A),
                ("A2", Faction::A),
                ("B1", Faction::B),
            ],
        );
        assert!(!lobby.entry_quorum(everyone));

        fill(&mut lobby, &[("B2", Faction::B)]);
        assert!(lobby.entry_quorum(everyone));

        let selected = lobby.select_entries(everyone);
        assert_eq!(selected.len(), 4);
        let users: Vec<UserId> = selected.into_iter().map(|(u, _)| u).collect();
        lobby.remove_entries(&users);
        assert!(lobby.queue().is_empty());
    }

    #[test]
    fn test_entry_quorum_ignores_disconnected_users() {
        let mut lobby = standard();
        fill(
            &mut lobby,
            &[
                ("A1", Faction::A),
                ("A2", Faction::A),
                ("B1", Faction::B),
                ("B2", Faction::B),
            ],
        );
        let gone = uid("B2");
        assert!(!lobby.entry_quorum(|u| *u != gone));
    }

    #[test]
    fn test_select_entries_takes_threshold_in_order_and_leaves_excess() {
        let mut lobby = standard();
        fill(
            &mut lobby,
            &[
                ("A1", Faction::A),
                ("B1", Faction::B),
                ("A2", Faction::A),
                ("A3", Faction::A),
                ("B2", Faction::B),
                ("B3", Faction::B),
            ],
        );

        let selected = lobby.select_entries(everyone);
        let names: Vec<&str> = selected.iter().map(|(u, _)| u.as_str()).collect();
        assert_eq!(names, vec!["A1", "B1", "A2", "B2"]);

        let users: Vec<UserId> = selected.into_iter().map(|(u, _)| u).collect();
        lobby.remove_entries(&users);
        assert_eq!(lobby.queue(), &[uid("A3"), uid("B3")]);
    }

    #[test]
    fn test_single_faction_variant_needs_no_opponents() {
        let mut lobby = Lobby::new(default_presets().remove(3));
        fill(&mut lobby, &[("A1", Faction::A)]);
        assert!(lobby.entry_quorum(everyone));
        assert_eq!(lobby.select_entries(everyone).len(), 1);
    }

    #[test]
    fn test_queued_counts_per_faction() {
        let mut lobby = standard();
        fill(&mut lobby, &[("A1", Faction::A), ("B1", Faction::B), ("B2", Faction::B)]);
        assert_eq!(lobby.queued_counts(), [1, 2]);
    }

    // =====================================================================
    // Room quorum
    // =====================================================================

    fn ready_room(lobby: &mut Lobby, index: usize, users: &[&str]) {
        let faction = lobby.room(index).unwrap().faction();
        for name in users {
            let _ = lobby.enter(uid(name), faction);
        }
        let room = lobby.room_mut(index).unwrap();
        room.open(uid(users[0]), String::new(), Instant::now()).unwrap();
        for name in &users[1..] {
            room.join(uid(name)).unwrap();
        }
        room.set_ready(&uid(users[0]), true).unwrap();
    }

    #[test]
    fn test_room_quorum_needs_ready_room_per_faction() {
        let mut lobby = standard();
        let per = lobby.preset().rooms_per_faction;
        ready_room(&mut lobby, 1, &["A1", "A2"]);
        assert_eq!(lobby.room_quorum(everyone), None);

        ready_room(&mut lobby, per, &["B1", "B2"]);
        assert_eq!(lobby.room_quorum(everyone), Some(vec![1, per]));
    }

    #[test]
    fn test_room_quorum_requires_whole_roster_connected() {
        let mut lobby = standard();
        let per = lobby.preset().rooms_per_faction;
        ready_room(&mut lobby, 0, &["A1", "A2"]);
        ready_room(&mut lobby, per, &["B1", "B2"]);

        let offline: HashSet<UserId> = [uid("A2")].into();
        assert_eq!(lobby.room_quorum(|u| !offline.contains(u)), None);
    }

    #[test]
    fn test_room_not_found() {
        let lobby = standard();
        assert!(matches!(
            lobby.room(999),
            Err(LobbyError::RoomNotFound { index: 999, .. })
        ));
    }
}
