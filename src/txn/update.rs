//! The per-key update chain: the in-memory MVCC log of writes against one
//! page slot (spec §4.5). Reads walk the chain under a snapshot; commits
//! append; obsolete tails are trimmed under the generation manager.

use std::sync::{Arc, Mutex};

use crate::txn::modify::Fragment;
use crate::txn::snapshot::Snapshot;

pub const RESERVED_TXN: u64 = u64::MAX - 1;
pub const ABORTED_TXN: u64 = u64::MAX;

/// What one update record represents.
#[derive(Debug, Clone)]
pub enum UpdateValue {
    /// A full replacement value.
    Standard(Vec<u8>),
    /// Tombstone: the key is logically absent as of this update.
    Tombstone,
    /// A write-write conflict placeholder that carries no value (spec
    /// §4.4: "reserve inserts a placeholder update to detect write-write
    /// conflicts without writing a value").
    Reserved,
    /// A fragment vector applied atop the nearest visible STANDARD/on-page
    /// value (spec §4.5).
    Modify(Vec<Fragment>),
}

#[derive(Debug)]
pub struct UpdateRecord {
    pub txn_id: u64,
    pub commit_ts: u64,
    pub value: UpdateValue,
    pub next: Mutex<Option<Arc<UpdateRecord>>>,
}

/// The chain itself: an atomically-swappable head pointer. Cheap to clone
/// (an `Arc` to the shared head cell), matching how [`crate::btree::skiplist`]
/// hands chains around.
#[derive(Clone)]
pub struct UpdateChain {
    head: Arc<Mutex<Option<Arc<UpdateRecord>>>>,
}

impl UpdateChain {
    pub fn new() -> Self {
        Self {
            head: Arc::new(Mutex::new(None)),
        }
    }

    pub fn inner(&self) -> Arc<Mutex<Option<Arc<UpdateRecord>>>> {
        self.head.clone()
    }

    /// Push a new update onto the head of the chain. Returns an error via
    /// the caller's conflict check, not here — this method always
    /// succeeds; callers that need write-write conflict detection must
    /// inspect [`head`](Self::head) themselves before calling.
    pub fn push(&self, txn_id: u64, commit_ts: u64, value: UpdateValue) {
        let mut head = self.head.lock().unwrap();
        let new = Arc::new(UpdateRecord {
            txn_id,
            commit_ts,
            value,
            next: Mutex::new(head.clone()),
        });
        *head = Some(new);
    }

    pub fn head_record(&self) -> Option<Arc<UpdateRecord>> {
        self.head.lock().unwrap().clone()
    }

    /// Chain walk on read (spec §4.5): skip RESERVED, collect MODIFY
    /// fragment vectors newest-to-oldest until a visible STANDARD (or
    /// TOMBSTONE, or the on-page value) terminates the walk, then fold the
    /// vectors back on in oldest-to-newest order — each vector's offsets
    /// are relative to the buffer left by the one before it (spec: "remember
    /// each MODIFY encountered; when a STANDARD ... is found, pop the stack
    /// applying each MODIFY fragment vector").
    pub fn read(&self, snapshot: &Snapshot, on_page_value: Option<&[u8]>) -> Option<Vec<u8>> {
        let mut modify_stack: Vec<Vec<Fragment>> = Vec::new();
        let mut current = self.head_record();
        let mut base: Option<Vec<u8>> = None;

        while let Some(record) = current {
            let visible = !matches!(record.value, UpdateValue::Reserved)
                && snapshot.is_visible(record.txn_id, record.commit_ts);
            if visible {
                match &record.value {
                    UpdateValue::Standard(bytes) => {
                        base = Some(bytes.clone());
                        break;
                    }
                    UpdateValue::Tombstone => return None,
                    UpdateValue::Modify(fragments) => modify_stack.push(fragments.clone()),
                    UpdateValue::Reserved => unreachable!(),
                }
            }
            current = record.next.lock().unwrap().clone();
        }

        let mut value = base.or_else(|| on_page_value.map(|v| v.to_vec()))?;
        for fragments in modify_stack.into_iter().rev() {
            value = crate::txn::modify::apply_fragments(&value, &fragments);
        }
        Some(value)
    }

    /// True if the head of chain is a concurrent, uncommitted transaction
    /// other than `txn_id` itself (spec §4.4: "conflict detection rejects
    /// if the head of chain is a concurrent uncommitted txn").
    pub fn conflicts_with(&self, txn_id: u64, snapshot: &Snapshot) -> bool {
        match self.head_record() {
            None => false,
            Some(head) => head.txn_id != txn_id && !snapshot.is_visible(head.txn_id, head.commit_ts),
        }
    }

    /// Drop everything after the first record whose transaction is
    /// globally visible (spec "obsolete chain trimming"). Returns the
    /// trimmed tail so the caller can hand it to the generation stash.
    pub fn trim_obsolete(&self, oldest_active_txn: u64) -> Option<Arc<UpdateRecord>> {
        let head = self.head_record()?;
        if head.txn_id >= oldest_active_txn {
            return None;
        }
        let mut next = head.next.lock().unwrap();
        next.take()
    }
}

impl Default for UpdateChain {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::txn::snapshot::Snapshot;

    fn visible_to_all() -> Snapshot {
        Snapshot::new(100, 100, Vec::new())
    }

    #[test]
    fn reads_first_visible_standard() {
        let chain = UpdateChain::new();
        chain.push(1, 1, UpdateValue::Standard(b"first".to_vec()));
        chain.push(2, 2, UpdateValue::Standard(b"second".to_vec()));
        let value = chain.read(&visible_to_all(), None);
        assert_eq!(value, Some(b"second".to_vec()));
    }

    #[test]
    fn tombstone_hides_the_key() {
        let chain = UpdateChain::new();
        chain.push(1, 1, UpdateValue::Standard(b"value".to_vec()));
        chain.push(2, 2, UpdateValue::Tombstone);
        assert_eq!(chain.read(&visible_to_all(), None), None);
    }

    #[test]
    fn invisible_updates_fall_through_to_on_page_value() {
        let chain = UpdateChain::new();
        chain.push(50, 50, UpdateValue::Standard(b"too new".to_vec()));
        let snapshot = Snapshot::new(10, 10, Vec::new());
        assert_eq!(chain.read(&snapshot, Some(b"on page")), Some(b"on page".to_vec()));
    }

    #[test]
    fn reserved_updates_are_skipped_and_conflict() {
        let chain = UpdateChain::new();
        chain.push(1, 1, UpdateValue::Reserved);
        assert_eq!(chain.read(&visible_to_all(), Some(b"base")), Some(b"base".to_vec()));
        let snapshot = Snapshot::new(1, 1, vec![1]);
        assert!(chain.conflicts_with(2, &snapshot));
    }
}
