//! The relay room: one per battle, fanning each participant's traffic out
//! to everyone else.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use bytes::Bytes;
use parking_lot::RwLock;
use skirmish_protocol::{BattleCode, UserId};

/// A payload on its way from one slot to the others.
#[derive(Debug, Clone)]
pub struct RelayMessage {
    pub sender_slot: usize,
    pub sender: UserId,
    /// Per-sender counter, starting at 1.
    pub seq: u32,
    /// Opaque gameplay bytes.
    pub payload: Bytes,
}

/// The outbound side of one participant's connection.
///
/// Called with the room's read lock held, so implementations only queue
/// the message and return.
pub trait RelayPeer: Send + Sync + 'static {
    fn deliver(&self, msg: &RelayMessage);

    /// Tears the connection down.
    fn close(&self);
}

struct Slot {
    peer: Arc<dyn RelayPeer>,
    user_id: UserId,
    next_seq: AtomicU32,
}

/// Slot array of one battle.
///
/// Slot index is join order. Leaving empties the slot but never compacts
/// the array, so every peer keeps its index for the room's lifetime.
pub struct RelayRoom {
    code: BattleCode,
    slots: RwLock<Vec<Option<Slot>>>,
}

impl RelayRoom {
    pub fn new(code: BattleCode) -> Self {
        Self {
            code,
            slots: RwLock::new(Vec::new()),
        }
    }

    pub fn code(&self) -> &BattleCode {
        &self.code
    }

    /// Appends a peer and returns its slot index.
    pub fn join(&self, user_id: UserId, peer: Arc<dyn RelayPeer>) -> usize {
        let mut slots = self.slots.write();
        slots.push(Some(Slot {
            peer,
            user_id,
            next_seq: AtomicU32::new(1),
        }));
        slots.len() - 1
    }

    /// Empties `slot`. Returns `true` if no occupied slot remains.
    pub fn leave(&self, slot: usize) -> bool {
        let mut slots = self.slots.write();
        if let Some(entry) = slots.get_mut(slot) {
            *entry = None;
        }
        slots.iter().all(Option::is_none)
    }

    /// Forwards `payload` from `from` to every other occupied slot and
    /// returns how many peers it reached.
    ///
    /// A payload from an empty or unknown slot goes nowhere.
    pub fn broadcast(&self, from: usize, payload: Bytes) -> usize {
        let slots = self.slots.read();
        let Some(Some(sender)) = slots.get(from) else {
            return 0;
        };
        let msg = RelayMessage {
            sender_slot: from,
            sender: sender.user_id.clone(),
            seq: sender.next_seq.fetch_add(1, Ordering::Relaxed),
            payload,
        };

        let mut delivered = 0;
        for (index, slot) in slots.iter().enumerate() {
            if index == from {
                continue;
            }
            if let Some(slot) = slot {
                slot.peer.deliver(&msg);
                delivered += 1;
            }
        }
        tracing::trace!(
            battle_code = %self.code,
            from,
            seq = msg.seq,
            len = msg.payload.len(),
            delivered,
            "relayed"
        );
        delivered
    }

    /// Number of occupied slots.
    pub fn occupied(&self) -> usize {
        self.slots.read().iter().filter(|s| s.is_some()).count()
    }

    /// Number of slots ever assigned, occupied or not.
    pub fn slot_count(&self) -> usize {
        self.slots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.occupied() == 0
    }

    /// User ids of the occupied slots, in slot order.
    pub fn members(&self) -> Vec<(usize, UserId)> {
        self.slots
            .read()
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|s| (i, s.user_id.clone())))
            .collect()
    }

    /// Closes every peer still in the room.
    pub fn close_all(&self) {
        let peers: Vec<Arc<dyn RelayPeer>> = self
            .slots
            .read()
            .iter()
            .flatten()
            .map(|s| Arc::clone(&s.peer))
            .collect();
        for peer in peers {
            peer.close();
        }
    }
}

impl fmt::Debug for RelayRoom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayRoom")
            .field("code", &self.code)
            .field("occupied", &self.occupied())
            .field("slot_count", &self.slot_count())
            .finish()
    }
}
