//! The reliable-in-order layer of the datagram transport.
//!
//! Each side keeps a [`ReliableChannel`] of the messages it has sent but
//! the other side has not acknowledged, and resends that window on every
//! tick until an ack moves its start. The receiving side runs every
//! message through an [`OrderFilter`], which admits a sender's messages
//! strictly one after another and drops duplicates and gaps; the resend
//! fills the gaps later.
//!
//! ```text
//!            begin            end
//!              │               │
//!   ring:  ... [5] [6] [7] [8] _ _ ...     seq % capacity
//!              └ unacked ─────┘
//! ```

use std::collections::HashMap;
use std::hash::Hash;

use crate::RelayError;

/// Capacity of a channel's unacknowledged window.
pub const WINDOW_CAPACITY: usize = 4096;

/// What one tick puts on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch<T> {
    /// Highest sequence number assigned so far (`0` before the first push).
    pub seq: u32,
    /// Highest sequence consumed from the other side.
    pub ack: u32,
    /// Oldest unacknowledged messages first, with their sequence numbers.
    pub messages: Vec<(u32, T)>,
}

/// Outgoing messages addressed by sequence number in a fixed ring.
///
/// Sequence numbers start at 1. `begin` is the oldest unacknowledged
/// sequence and `end` the next one to assign, so the window is
/// `begin..end` and is empty when they are equal.
#[derive(Debug)]
pub struct ReliableChannel<T> {
    ring: Box<[Option<T>]>,
    begin: u32,
    end: u32,
    recv_seq: u32,
}

impl<T: Clone> ReliableChannel<T> {
    pub fn new() -> Self {
        Self::with_capacity(WINDOW_CAPACITY)
    }

    /// A channel whose window holds at most `capacity` messages.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            ring: (0..capacity).map(|_| None).collect(),
            begin: 1,
            end: 1,
            recv_seq: 0,
        }
    }

    fn slot(&self, seq: u32) -> usize {
        seq as usize % self.ring.len()
    }

    /// Appends a message and returns the sequence number it was given.
    ///
    /// # Errors
    /// [`RelayError::WindowFull`] when `capacity` messages are still
    /// unacknowledged. The message is not queued.
    pub fn push(&mut self, msg: T) -> Result<u32, RelayError> {
        if self.in_flight() >= self.ring.len() {
            return Err(RelayError::WindowFull(self.in_flight()));
        }
        let seq = self.end;
        let slot = self.slot(seq);
        self.ring[slot] = Some(msg);
        self.end += 1;
        Ok(seq)
    }

    /// Up to `max` unacknowledged messages, oldest first, plus the
    /// current seq/ack pair. Does not change the window.
    pub fn send_batch(&self, max: usize) -> Batch<T> {
        let last = self.end.min(self.begin.saturating_add(max as u32));
        let messages = (self.begin..last)
            .filter_map(|seq| self.ring[self.slot(seq)].clone().map(|m| (seq, m)))
            .collect();
        Batch {
            seq: self.end - 1,
            ack: self.recv_seq,
            messages,
        }
    }

    /// Applies what the other side reported: `seq` is the highest
    /// sequence consumed from it, `ack` the highest of ours it consumed.
    ///
    /// The window start moves to `ack + 1`, clamped to `end`, and never
    /// moves back. The recorded peer sequence never decreases either.
    pub fn apply_seq_ack(&mut self, seq: u32, ack: u32) {
        let target = ack.saturating_add(1).min(self.end);
        while self.begin < target {
            let slot = self.slot(self.begin);
            self.ring[slot] = None;
            self.begin += 1;
        }
        self.recv_seq = self.recv_seq.max(seq);
    }

    /// Oldest unacknowledged sequence.
    pub fn begin(&self) -> u32 {
        self.begin
    }

    /// Next sequence to assign.
    pub fn end(&self) -> u32 {
        self.end
    }

    /// Highest sequence consumed from the other side.
    pub fn recv_seq(&self) -> u32 {
        self.recv_seq
    }

    /// Number of unacknowledged messages.
    pub fn in_flight(&self) -> usize {
        (self.end - self.begin) as usize
    }

    pub fn capacity(&self) -> usize {
        self.ring.len()
    }
}

impl<T: Clone> Default for ReliableChannel<T> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// OrderFilter
// ---------------------------------------------------------------------------

/// Admits each source's messages exactly once and in order.
///
/// A message passes when it is the first one seen from its source or its
/// sequence is exactly one past the last accepted one. Sources are
/// independent of each other.
#[derive(Debug)]
pub struct OrderFilter<K> {
    last: HashMap<K, u32>,
}

impl<K: Eq + Hash> OrderFilter<K> {
    pub fn new() -> Self {
        Self {
            last: HashMap::new(),
        }
    }

    /// Returns `true` if the message should be consumed.
    pub fn accept(&mut self, source: K, seq: u32) -> bool {
        match self.last.get_mut(&source) {
            None => {
                self.last.insert(source, seq);
                true
            }
            Some(last) if last.checked_add(1) == Some(seq) => {
                *last = seq;
                true
            }
            Some(_) => false,
        }
    }

    /// Last sequence accepted from `source`.
    pub fn last(&self, source: &K) -> Option<u32> {
        self.last.get(source).copied()
    }
}

impl<K: Eq + Hash> Default for OrderFilter<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // =====================================================================
    // ReliableChannel
    // =====================================================================

    #[test]
    fn test_new_channel_is_empty() {
        let ch: ReliableChannel<u8> = ReliableChannel::new();
        assert_eq!(ch.begin(), 1);
        assert_eq!(ch.end(), 1);
        assert_eq!(ch.recv_seq(), 0);
        assert_eq!(ch.in_flight(), 0);
        assert_eq!(ch.capacity(), WINDOW_CAPACITY);

        let batch = ch.send_batch(50);
        assert_eq!(batch.seq, 0);
        assert_eq!(batch.ack, 0);
        assert!(batch.messages.is_empty());
    }

    #[test]
    fn test_push_assigns_consecutive_sequences() {
        let mut ch = ReliableChannel::new();
        assert_eq!(ch.push("a").unwrap(), 1);
        assert_eq!(ch.push("b").unwrap(), 2);
        assert_eq!(ch.push("c").unwrap(), 3);
        assert_eq!(ch.in_flight(), 3);
    }

    #[test]
    fn test_two_channels_exchange_seq_and_ack() {
        let mut a = ReliableChannel::new();
        let mut b: ReliableChannel<&str> = ReliableChannel::new();
        for m in ["one", "two", "three"] {
            a.push(m).unwrap();
        }

        let batch = a.send_batch(50);
        assert_eq!(batch.seq, 3);
        assert_eq!(batch.ack, 0);
        assert_eq!(batch.messages, vec![(1, "one"), (2, "two"), (3, "three")]);

        b.apply_seq_ack(batch.seq, batch.ack);
        assert_eq!(b.recv_seq(), 3);
        assert_eq!(b.send_batch(50).ack, 3);

        a.apply_seq_ack(0, b.send_batch(50).ack);
        assert_eq!(a.begin(), 4);
        assert!(a.send_batch(50).messages.is_empty());
    }

    #[test]
    fn test_send_batch_is_capped() {
        let mut ch = ReliableChannel::new();
        for i in 0..120u32 {
            ch.push(i).unwrap();
        }
        let batch = ch.send_batch(50);
        assert_eq!(batch.messages.len(), 50);
        assert_eq!(batch.messages[0].0, 1);
        assert_eq!(batch.messages[49].0, 50);
        assert_eq!(batch.seq, 120);
    }

    #[test]
    fn test_send_batch_repeats_until_acked() {
        let mut ch = ReliableChannel::new();
        ch.push('x').unwrap();
        let first = ch.send_batch(50);
        let second = ch.send_batch(50);
        assert_eq!(first, second);
        assert_eq!(ch.begin(), 1);
    }

    #[test]
    fn test_apply_ack_never_moves_begin_back() {
        let mut ch = ReliableChannel::new();
        for i in 0..5 {
            ch.push(i).unwrap();
        }
        ch.apply_seq_ack(0, 4);
        assert_eq!(ch.begin(), 5);
        ch.apply_seq_ack(0, 2);
        assert_eq!(ch.begin(), 5);
    }

    #[test]
    fn test_apply_ack_beyond_end_is_clamped() {
        let mut ch = ReliableChannel::new();
        ch.push(1).unwrap();
        ch.push(2).unwrap();
        ch.apply_seq_ack(0, 1000);
        assert_eq!(ch.begin(), ch.end());
        assert_eq!(ch.begin(), 3);
    }

    #[test]
    fn test_apply_seq_never_decreases_recv_seq() {
        let mut ch: ReliableChannel<u8> = ReliableChannel::new();
        ch.apply_seq_ack(7, 0);
        ch.apply_seq_ack(3, 0);
        assert_eq!(ch.recv_seq(), 7);
    }

    #[test]
    fn test_push_into_full_window_fails() {
        let mut ch = ReliableChannel::with_capacity(4);
        for i in 0..4 {
            ch.push(i).unwrap();
        }
        assert!(matches!(ch.push(99), Err(RelayError::WindowFull(4))));
        assert_eq!(ch.end(), 5);
    }

    #[test]
    fn test_ring_wraps_after_acks() {
        let mut ch = ReliableChannel::with_capacity(4);
        for round in 0..5u32 {
            for i in 0..4 {
                ch.push(round * 4 + i).unwrap();
            }
            let batch = ch.send_batch(50);
            let values: Vec<u32> = batch.messages.iter().map(|(_, v)| *v).collect();
            assert_eq!(values, (round * 4..round * 4 + 4).collect::<Vec<_>>());
            ch.apply_seq_ack(0, batch.seq);
        }
        assert_eq!(ch.begin(), 21);
        assert_eq!(ch.in_flight(), 0);
    }

    // =====================================================================
    // OrderFilter
    // =====================================================================

    #[test]
    fn test_filter_accepts_increasing_sequence_once() {
        let mut f = OrderFilter::new();
        let accepted: Vec<u32> = (1..=5).filter(|s| f.accept("a", *s)).collect();
        assert_eq!(accepted, vec![1, 2, 3, 4, 5]);
        assert_eq!(f.last(&"a"), Some(5));
    }

    #[test]
    fn test_filter_rejects_replay() {
        let mut f = OrderFilter::new();
        assert!(f.accept("a", 1));
        assert!(f.accept("a", 2));
        assert!(!f.accept("a", 2));
        assert!(!f.accept("a", 1));
    }

    #[test]
    fn test_filter_rejects_gap_until_filled() {
        let mut f = OrderFilter::new();
        assert!(f.accept("a", 1));
        assert!(!f.accept("a", 3));
        assert!(f.accept("a", 2));
        assert!(f.accept("a", 3));
    }

    #[test]
    fn test_filter_first_message_may_start_anywhere() {
        let mut f = OrderFilter::new();
        assert!(f.accept("late", 40));
        assert!(f.accept("late", 41));
    }

    #[test]
    fn test_filter_sources_are_independent() {
        let mut f = OrderFilter::new();
        assert!(f.accept("a", 1));
        assert!(f.accept("b", 1));
        assert!(f.accept("a", 2));
        assert!(!f.accept("b", 3));
        assert_eq!(f.last(&"b"), Some(1));
        assert_eq!(f.last(&"c"), None);
    }
}
