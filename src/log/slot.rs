//! Group-commit reservation slot (spec §4.6/§5): a running offset counter
//! that reservers advance with atomic fetch-and-add; slot publish (the
//! actual `write_at`/`fsync`) is sequenced by whichever caller observes the
//! slot becoming full, matching §5's "log slot reservation is lock-free
//! (fetch-and-add); slot publish is sequenced".

use std::sync::atomic::{AtomicU64, Ordering};

/// One generation of the offset counter. [`LogManager`](super::LogManager)
/// holds this behind its own mutex only to serialize the "roll to a new
/// segment" decision; the counter itself never needs external locking for
/// concurrent reservers.
pub struct Slot {
    offset: AtomicU64,
}

impl Slot {
    pub fn new() -> Self {
        Self { offset: AtomicU64::new(0) }
    }

    /// Reserve `len` bytes, returning the offset the reserver may write at.
    pub fn reserve(&self, len: u64) -> u64 {
        self.offset.fetch_add(len, Ordering::SeqCst)
    }

    /// Bytes reserved so far in this slot generation.
    pub fn filled(&self) -> u64 {
        self.offset.load(Ordering::SeqCst)
    }

    /// Start a fresh generation, e.g. after rolling to a new segment file.
    pub fn reset(&mut self) {
        *self.offset.get_mut() = 0;
    }
}

impl Default for Slot {
    fn default() -> Self {
        Self::new()
    }
}
