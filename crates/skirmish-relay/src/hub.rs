//! Relay room registry: admits peers by session token and disposes rooms
//! once their last peer leaves.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use skirmish_handoff::{HandoffRecord, HandoffStore};
use skirmish_protocol::{BattleCode, SessionToken};

use crate::{RelayError, RelayPeer, RelayRoom};

/// A peer's seat in a relay room, handed back by [`RelayHub::join`].
#[derive(Debug, Clone)]
pub struct Membership {
    pub room: Arc<RelayRoom>,
    pub slot: usize,
    pub record: HandoffRecord,
}

/// Every live relay room of this process, keyed by battle code.
pub struct RelayHub {
    rooms: Mutex<HashMap<BattleCode, Arc<RelayRoom>>>,
    handoff: Arc<dyn HandoffStore>,
}

impl RelayHub {
    pub fn new(handoff: Arc<dyn HandoffStore>) -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            handoff,
        }
    }

    /// Looks `token` up and seats `peer` in its battle's room, creating the
    /// room for the first arrival.
    ///
    /// # Errors
    /// [`RelayError::Handoff`] for unknown or expired tokens. Nothing is
    /// created in that case.
    pub fn join(&self, token: &SessionToken, peer: Arc<dyn RelayPeer>) -> Result<Membership, RelayError> {
        let record = self.handoff.get(token)?;

        let mut rooms = self.rooms.lock();
        let room = rooms
            .entry(record.battle_code.clone())
            .or_insert_with(|| {
                tracing::info!(battle_code = %record.battle_code, "relay room opened");
                Arc::new(RelayRoom::new(record.battle_code.clone()))
            })
            .clone();
        let slot = room.join(record.user_id.clone(), peer);
        drop(rooms);

        tracing::info!(
            battle_code = %record.battle_code,
            user_id = %record.user_id,
            faction = %record.faction,
            slot,
            "relay peer joined"
        );
        Ok(Membership { room, slot, record })
    }

    /// Frees the membership's slot. The last peer out disposes the room
    /// and the battle's hand-off records.
    pub fn leave(&self, membership: &Membership) {
        let code = membership.room.code();
        let emptied = membership.room.leave(membership.slot);
        tracing::info!(
            battle_code = %code,
            user_id = %membership.record.user_id,
            slot = membership.slot,
            "relay peer left"
        );
        if !emptied {
            return;
        }

        let mut rooms = self.rooms.lock();
        // A late joiner may have taken a seat since the slot was freed.
        let disposable = rooms
            .get(code)
            .is_some_and(|r| Arc::ptr_eq(r, &membership.room) && r.is_empty());
        if disposable {
            rooms.remove(code);
            drop(rooms);
            let removed = self.handoff.remove_battle(code);
            tracing::info!(battle_code = %code, hand_offs = removed, "relay room disposed");
        }
    }

    pub fn room(&self, code: &BattleCode) -> Option<Arc<RelayRoom>> {
        self.rooms.lock().get(code).cloned()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.lock().len()
    }

    /// Closes every peer of every room. Rooms are disposed as the peers'
    /// connections report their exit.
    pub fn close_all(&self) {
        let rooms: Vec<Arc<RelayRoom>> = self.rooms.lock().values().cloned().collect();
        for room in rooms {
            room.close_all();
        }
    }
}
