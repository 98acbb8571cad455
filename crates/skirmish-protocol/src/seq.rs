//! Sequence numbers for server-originated messages.
//!
//! One counter for the whole process. It pairs questions with answers
//! and doubles as the cipher key of obfuscated string fields, so the only
//! requirement is that consecutive values differ; wrapping is fine. Zero is
//! skipped because the client treats it as "no sequence".

use std::sync::atomic::{AtomicU16, Ordering};

/// A monotonically increasing, wrapping 16-bit counter.
#[derive(Debug)]
pub struct SequenceGenerator {
    next: AtomicU16,
}

impl SequenceGenerator {
    /// Creates a generator whose first value is `start` (or 1 if `start` is 0).
    pub const fn starting_at(start: u16) -> Self {
        Self {
            next: AtomicU16::new(start),
        }
    }

    /// Returns the next non-zero sequence number.
    pub fn next(&self) -> u16 {
        loop {
            let seq = self.next.fetch_add(1, Ordering::Relaxed);
            if seq != 0 {
                return seq;
            }
        }
    }
}

impl Default for SequenceGenerator {
    fn default() -> Self {
        Self::starting_at(1)
    }
}

static GLOBAL: SequenceGenerator = SequenceGenerator::starting_at(1);

/// Next value of the process-wide generator.
pub fn next_seq() -> u16 {
    GLOBAL.next()
}
