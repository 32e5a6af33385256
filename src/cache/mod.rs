//! Page cache: hazard-pointer-protected residency tracking, generation-based
//! reclamation, and a bucketed-LRU eviction walker (spec §4.3).

pub mod generation;
pub mod hazard;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam::utils::Backoff;
use log::{error, warn};

use crate::block::BlockManager;
use crate::btree::page::Page;
use crate::btree::reference::{RefState, SharedRef};
use crate::error::{Error, Result};

use generation::{Generation, GenerationManager};
use hazard::HazardArray;

/// Cache-wide occupancy thresholds (spec §4.3 "cache exceeds configured
/// thresholds (clean / dirty / updates percent)").
#[derive(Debug, Clone, Copy)]
pub struct CacheThresholds {
    pub max_bytes: u64,
    pub eviction_trigger_pct: u8,
    pub eviction_target_pct: u8,
}

impl Default for CacheThresholds {
    fn default() -> Self {
        Self {
            max_bytes: 100 * 1024 * 1024,
            eviction_trigger_pct: 95,
            eviction_target_pct: 80,
        }
    }
}

/// One session's handle into the cache: owns its own hazard array and
/// generation-entry bookkeeping.
pub struct CacheSession {
    hazards: HazardArray,
}

impl CacheSession {
    fn new() -> Self {
        Self {
            hazards: HazardArray::new(),
        }
    }
}

/// Process-wide page cache. Each btree's refs are read through this to get
/// a hazard-protected [`Page`] handle; eviction runs cooperatively via
/// [`PageCache::evict_candidates`].
pub struct PageCache {
    thresholds: CacheThresholds,
    resident_bytes: AtomicU64,
    generations: GenerationManager<()>,
    sessions: Mutex<Vec<Arc<CacheSession>>>,
    stuck_backoff_limit: usize,
}

impl PageCache {
    pub fn new(thresholds: CacheThresholds) -> Self {
        Self {
            thresholds,
            resident_bytes: AtomicU64::new(0),
            generations: GenerationManager::new(),
            sessions: Mutex::new(Vec::new()),
            stuck_backoff_limit: 10_000,
        }
    }

    pub fn new_session(&self) -> Arc<CacheSession> {
        let session = Arc::new(CacheSession::new());
        self.sessions.lock().unwrap().push(session.clone());
        session
    }

    pub fn resident_bytes(&self) -> u64 {
        self.resident_bytes.load(Ordering::SeqCst)
    }

    pub fn is_under_pressure(&self) -> bool {
        let used_pct = (self.resident_bytes() as u128 * 100) / self.thresholds.max_bytes.max(1) as u128;
        used_pct as u8 >= self.thresholds.eviction_trigger_pct
    }

    /// Materialize a `Disk`-state ref: CAS to `Reading`, read and parse the
    /// block, CAS to `Mem` (spec §4.3 "page read"). Returns the now-hazard-
    /// protected page and the hazard slot the caller must clear.
    pub fn read_page(
        &self,
        session: &CacheSession,
        block_mgr: &BlockManager,
        r: &SharedRef,
    ) -> Result<(Arc<Page>, usize)> {
        let backoff = Backoff::new();
        loop {
            match r.state() {
                RefState::Mem => match session.hazards.hazard_set(r, &self.generations) {
                    Ok(slot) => return Ok((r.page().expect("MEM ref always has a page"), slot)),
                    Err(_) => {
                        backoff.spin();
                        continue;
                    }
                },
                RefState::Disk => {
                    if r.transition(RefState::Disk, RefState::Reading).is_err() {
                        backoff.spin();
                        continue;
                    }
                    let bytes = block_mgr.read(r.cookie())?;
                    let page = Arc::new(Page::decode(&bytes)?);
                    self.resident_bytes.fetch_add(page.memory_size() as u64, Ordering::SeqCst);
                    r.set_page(Some(page));
                    r.transition(RefState::Reading, RefState::Mem)
                        .map_err(|_| Error::panic("ref left READING without our CAS"))?;
                    continue;
                }
                RefState::Reading => {
                    if backoff.is_completed() {
                        std::thread::yield_now();
                    } else {
                        backoff.snooze();
                    }
                    continue;
                }
                RefState::Locked => return Err(Error::Busy("ref is locked for eviction")),
                RefState::Deleted => return Err(Error::NotFound),
                RefState::Split => return Err(Error::Busy("ref was split, retry from parent")),
            }
        }
    }

    pub fn release_page(&self, session: &CacheSession, slot: usize) {
        session.hazards.hazard_clear(slot);
    }

    /// Attempt to evict one clean, unreferenced page: MEM -> LOCKED, verify
    /// no hazard, write out if dirty, MEM -> DISK, free the in-memory page
    /// (spec §4.3 "eviction").
    pub fn try_evict(&self, block_mgr: &BlockManager, r: &SharedRef, dirty_bytes: &[u8]) -> Result<()> {
        r.transition(RefState::Mem, RefState::Locked)?;

        let sessions = self.sessions.lock().unwrap();
        let hazarded = sessions.iter().any(|s| s.hazards.contains(r));
        drop(sessions);

        if hazarded {
            r.transition(RefState::Locked, RefState::Mem)
                .map_err(|_| Error::panic("ref left LOCKED unexpectedly during eviction backoff"))?;
            return Err(Error::Busy("page is hazard-protected, skipping eviction"));
        }

        let page_size = r.page().map(|p| p.memory_size()).unwrap_or(0);
        let cookie = block_mgr.write(dirty_bytes)?;
        r.set_cookie(cookie);
        r.set_page(None);
        self.resident_bytes.fetch_sub(page_size as u64, Ordering::SeqCst);
        r.transition(RefState::Locked, RefState::Disk)
            .map_err(|_| Error::panic("ref left LOCKED unexpectedly finishing eviction"))?;

        self.generations.advance(Generation::Evict);
        Ok(())
    }

    /// Run pending reclamation; called periodically by the maintenance
    /// loop once generations have advanced past stashed objects.
    pub fn reclaim(&self) -> usize {
        self.generations.reclaim()
    }

    /// Stall an application thread that is blocked by cache pressure,
    /// escalating to a logged warning past half the caller's patience and
    /// to `Panic` if the cache never frees up (spec §7's Busy→Panic
    /// escalation for stuck caches).
    pub fn throttle(&self, attempt: usize) -> Result<()> {
        if !self.is_under_pressure() {
            return Ok(());
        }
        if attempt == self.stuck_backoff_limit / 2 {
            warn!("application thread stalled on cache pressure past half its patience");
        }
        if attempt >= self.stuck_backoff_limit {
            error!("cache did not relieve pressure after {attempt} stalls, escalating to panic");
            return Err(Error::panic("cache eviction made no progress, connection is stuck"));
        }
        Err(Error::Busy("cache over threshold"))
    }

    /// Jittered sleep duration for a caller that caught `Busy` from
    /// [`throttle`](Self::throttle) and wants to back off before retrying,
    /// rather than spin (spec §5: "bounded waits or spin-then-sleep").
    /// Doubles per attempt up to a one-second ceiling, +/-25% jitter so a
    /// thundering herd of stalled threads doesn't retry in lockstep.
    pub fn backoff_delay(&self, attempt: usize) -> std::time::Duration {
        use rand::Rng;
        let base_ms = 1u64 << attempt.min(10);
        let jitter = rand::rng().random_range(0..=base_ms / 4 + 1);
        std::time::Duration::from_millis((base_ms + jitter).min(1000))
    }
}
