//! Five-generation reclamation (spec §4.3). A background thread is not
//! spun up here directly — [`GenerationManager::reclaim`] is called by the
//! cache's own maintenance loop — but the bookkeeping (current generation
//! counters, per-session "entered" marks, and the stash of not-yet-freed
//! objects) lives in this module.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// The five reclamation domains named in spec §4.3. Each advances
/// independently; an object's birth generation in one domain is
/// irrelevant to the others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Generation {
    Checkpoint,
    Commit,
    Evict,
    Hazard,
    Split,
}

pub const ALL_GENERATIONS: [Generation; 5] = [
    Generation::Checkpoint,
    Generation::Commit,
    Generation::Evict,
    Generation::Hazard,
    Generation::Split,
];

fn index(g: Generation) -> usize {
    match g {
        Generation::Checkpoint => 0,
        Generation::Commit => 1,
        Generation::Evict => 2,
        Generation::Hazard => 3,
        Generation::Split => 4,
    }
}

struct Stashed<T> {
    birth: [u64; 5],
    value: T,
}

/// Tracks, per generation, the current global counter and the set of
/// generation values sessions are still "inside". An object stashed at
/// generation N is safe to drop once the current counter exceeds N and no
/// session reports being inside any generation ≤ N.
pub struct GenerationManager<T> {
    current: [AtomicU64; 5],
    active: Mutex<[Vec<u64>; 5]>,
    stash: Mutex<Vec<Stashed<T>>>,
}

impl<T> Default for GenerationManager<T> {
    fn default() -> Self {
        Self {
            current: [
                AtomicU64::new(1),
                AtomicU64::new(1),
                AtomicU64::new(1),
                AtomicU64::new(1),
                AtomicU64::new(1),
            ],
            active: Mutex::new(Default::default()),
            stash: Mutex::new(Vec::new()),
        }
    }
}

impl<T> GenerationManager<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance one generation's counter, returning the new value. Callers
    /// bump `Checkpoint` at checkpoint boundaries, `Commit` on commit,
    /// `Evict`/`Hazard` around eviction passes, and `Split` around page
    /// splits, per spec §4.3.
    pub fn advance(&self, g: Generation) -> u64 {
        self.current[index(g)].fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn current_generation(&self, g: Generation) -> u64 {
        self.current[index(g)].load(Ordering::SeqCst)
    }

    /// A session enters all five generations at their current values
    /// before touching shared state; returns the snapshot to pass to
    /// [`leave`](Self::leave).
    pub fn enter(&self) -> [u64; 5] {
        let snapshot = [
            self.current_generation(Generation::Checkpoint),
            self.current_generation(Generation::Commit),
            self.current_generation(Generation::Evict),
            self.current_generation(Generation::Hazard),
            self.current_generation(Generation::Split),
        ];
        let mut active = self.active.lock().unwrap();
        for (i, gen) in snapshot.iter().enumerate() {
            active[i].push(*gen);
        }
        snapshot
    }

    pub fn leave(&self, snapshot: [u64; 5]) {
        let mut active = self.active.lock().unwrap();
        for (i, gen) in snapshot.iter().enumerate() {
            if let Some(pos) = active[i].iter().position(|g| g == gen) {
                active[i].swap_remove(pos);
            }
        }
    }

    /// Hand an object to the stash, recording the current generation in
    /// every domain as its birth.
    pub fn stash(&self, value: T) {
        let birth = [
            self.current_generation(Generation::Checkpoint),
            self.current_generation(Generation::Commit),
            self.current_generation(Generation::Evict),
            self.current_generation(Generation::Hazard),
            self.current_generation(Generation::Split),
        ];
        self.stash.lock().unwrap().push(Stashed { birth, value });
    }

    /// Drop every stashed object whose birth generation, in every domain,
    /// is older than the oldest generation any session is still inside.
    /// Returns the number of objects freed.
    pub fn reclaim(&self) -> usize {
        let active = self.active.lock().unwrap();
        let oldest_active: [u64; 5] = std::array::from_fn(|i| {
            active[i].iter().copied().min().unwrap_or(u64::MAX)
        });
        drop(active);

        let mut stash = self.stash.lock().unwrap();
        let before = stash.len();
        stash.retain(|s| {
            let safe = s.birth.iter().zip(oldest_active.iter()).all(|(b, o)| b < o);
            !safe
        });
        before - stash.len()
    }

    pub fn stash_len(&self) -> usize {
        self.stash.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reclaims_once_no_session_is_inside() {
        let mgr: GenerationManager<u32> = GenerationManager::new();
        let snapshot = mgr.enter();
        mgr.stash(42);
        assert_eq!(mgr.reclaim(), 0, "a session is still inside, must not reclaim");
        mgr.leave(snapshot);
        mgr.advance(Generation::Evict);
        assert_eq!(mgr.reclaim(), 1);
        assert_eq!(mgr.stash_len(), 0);
    }

    #[test]
    fn does_not_reclaim_across_a_still_active_session() {
        let mgr: GenerationManager<u32> = GenerationManager::new();
        let outer = mgr.enter();
        mgr.stash(1);
        let inner = mgr.enter();
        mgr.leave(inner);
        assert_eq!(mgr.reclaim(), 0);
        mgr.leave(outer);
        assert_eq!(mgr.reclaim(), 1);
    }
}
