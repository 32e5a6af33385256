//! The in-memory page reference ("ref"): the atomic state machine that sits
//! between a B-tree slot and the page it names, either on disk or resident
//! in memory (spec §3, §4.3, §4.4).

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::block::Cookie;
use crate::error::{Error, Result};

/// A ref's lifecycle state. Transitions are compare-and-swap only; no lock
/// ever guards this field (spec §4.3's read/evict protocol depends on
/// that).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RefState {
    /// The page lives only on disk; `page` is `None`.
    Disk = 0,
    /// A thread has claimed the right to read this page in; all other
    /// threads must wait-and-retry.
    Reading = 1,
    /// Resident and readable.
    Mem = 2,
    /// Claimed by eviction (or an exclusive-mode session); no reader may
    /// publish a hazard pointer against it until it returns to `Mem`.
    Locked = 3,
    /// A fast-truncate range emptied this subtree; reads through the
    /// truncating transaction's snapshot skip it entirely.
    Deleted = 4,
    /// A split replaced this ref with ≥ 2 children; readers should retry
    /// the parent's slot lookup.
    Split = 5,
}

impl RefState {
    fn from_u8(v: u8) -> RefState {
        match v {
            0 => RefState::Disk,
            1 => RefState::Reading,
            2 => RefState::Mem,
            3 => RefState::Locked,
            4 => RefState::Deleted,
            _ => RefState::Split,
        }
    }
}

struct RefInner {
    state: AtomicU8,
    cookie: std::sync::Mutex<Cookie>,
    /// Present once the page is resident; boxed so a ref's own size stays
    /// small and split/evict can swap it atomically under the mutex.
    page: std::sync::Mutex<Option<Arc<crate::btree::page::Page>>>,
}

/// A cheaply-cloneable handle to one ref. `Arc`-backed so hazard pointers
/// can identify a specific ref by raw pointer identity across sessions.
#[derive(Clone)]
pub struct SharedRef(Arc<RefInner>);

impl SharedRef {
    pub fn new_on_disk(cookie: Cookie) -> Self {
        SharedRef(Arc::new(RefInner {
            state: AtomicU8::new(RefState::Disk as u8),
            cookie: std::sync::Mutex::new(cookie),
            page: std::sync::Mutex::new(None),
        }))
    }

    /// Construct a ref that is already resident, used by splits and by
    /// tests that don't want to drive the disk-read path.
    pub fn new_in_mem() -> Self {
        SharedRef(Arc::new(RefInner {
            state: AtomicU8::new(RefState::Mem as u8),
            cookie: std::sync::Mutex::new(Cookie::INVALID),
            page: std::sync::Mutex::new(None),
        }))
    }

    pub fn state(&self) -> RefState {
        RefState::from_u8(self.0.state.load(Ordering::SeqCst))
    }

    pub fn cookie(&self) -> Cookie {
        *self.0.cookie.lock().unwrap()
    }

    pub fn set_cookie(&self, cookie: Cookie) {
        *self.0.cookie.lock().unwrap() = cookie;
    }

    pub fn page(&self) -> Option<Arc<crate::btree::page::Page>> {
        self.0.page.lock().unwrap().clone()
    }

    pub fn set_page(&self, page: Option<Arc<crate::btree::page::Page>>) {
        *self.0.page.lock().unwrap() = page;
    }

    /// CAS from `from` to `to`; `Busy` if the current state doesn't match.
    pub fn transition(&self, from: RefState, to: RefState) -> Result<()> {
        self.0
            .state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(|_| Error::Busy("ref state changed concurrently"))
    }

    /// Pointer identity, used by hazard pointers and eviction's "did a
    /// reader publish against this exact ref" check.
    pub fn as_ptr(this: &SharedRef) -> *mut () {
        Arc::as_ptr(&this.0) as *mut ()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_on_disk_ref_starts_in_disk_state() {
        let r = SharedRef::new_on_disk(Cookie::INVALID);
        assert_eq!(r.state(), RefState::Disk);
    }

    #[test]
    fn transition_fails_on_state_mismatch() {
        let r = SharedRef::new_in_mem();
        assert!(r.transition(RefState::Disk, RefState::Reading).is_err());
        assert_eq!(r.state(), RefState::Mem);
    }

    #[test]
    fn disk_to_reading_to_mem_round_trip() {
        let r = SharedRef::new_on_disk(Cookie::INVALID);
        r.transition(RefState::Disk, RefState::Reading).unwrap();
        r.transition(RefState::Reading, RefState::Mem).unwrap();
        assert_eq!(r.state(), RefState::Mem);
    }

    #[test]
    fn clone_shares_identity() {
        let r = SharedRef::new_in_mem();
        let r2 = r.clone();
        assert_eq!(SharedRef::as_ptr(&r), SharedRef::as_ptr(&r2));
    }
}
