//! Per-table ordered index (spec §4.4). A table couples a committed,
//! page-based on-disk tree (populated by reconciliation/checkpoint load)
//! with an in-memory update-chain overlay; cursors resolve reads by
//! walking a key's chain under the caller's snapshot and falling back to
//! the on-page value (spec §3's "Update visibility" invariant).
//!
//! The resident tree itself (internal pages, binary-search descent, split,
//! reverse-split/merge) lives in [`tree`], grounded on the teacher's
//! `btree::{reader, writer}`. Row-store and column-store share the same
//! tree machinery: column-store keys are just big-endian-encoded `u64`
//! record numbers, which the byte-lexicographic comparator already orders
//! numerically.

pub mod cell;
pub mod cursor;
pub mod page;
pub mod reconcile;
pub mod reference;
pub mod skiplist;
pub mod tree;

use std::cmp::Ordering;
use std::collections::HashMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Mutex, RwLock};

use crate::error::{Error, Result};
use crate::txn::update::{UpdateChain, UpdateValue};
use crate::txn::{OpKind, Transaction};

/// A key comparator; byte-lexicographic by default (SPEC_FULL.md's
/// resolution of the comparator Open Question).
pub type Comparator = dyn Fn(&[u8], &[u8]) -> Ordering + Send + Sync;

pub fn default_comparator() -> Box<Comparator> {
    Box::new(|a: &[u8], b: &[u8]| a.cmp(b))
}

/// Decode a column-store key (big-endian bytes, right-aligned into a
/// `u64`) back into its recno.
pub(crate) fn recno_of(key: &[u8]) -> u64 {
    let mut bytes = [0u8; 8];
    let n = key.len().min(8);
    bytes[8 - n..].copy_from_slice(&key[key.len() - n..]);
    u64::from_be_bytes(bytes)
}

/// Row-store tables key on application-chosen bytes; column-store tables
/// key on an auto-assigned, densely-packed big-endian recno (spec §3 /
/// §4.4's fixed/variable-length column format).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Row,
    Column,
}

/// A fast truncate computed but not yet committed: the tree it would
/// install and the guards it already CAS'd to `Deleted` on the old tree.
/// Rollback is simply dropping this without ever installing `new_root`.
struct PendingTruncate {
    new_root: tree::Node,
}

pub struct Table {
    pub name: String,
    id: AtomicU32,
    kind: TableKind,
    comparator: Box<Comparator>,
    base: RwLock<tree::Node>,
    chains: RwLock<std::collections::BTreeMap<Vec<u8>, UpdateChain>>,
    next_recno: AtomicU64,
    pending_truncates: Mutex<HashMap<u64, PendingTruncate>>,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_kind(name, TableKind::Row)
    }

    pub fn new_column(name: impl Into<String>) -> Self {
        Self::with_kind(name, TableKind::Column)
    }

    fn with_kind(name: impl Into<String>, kind: TableKind) -> Self {
        Self {
            name: name.into(),
            id: AtomicU32::new(0),
            kind,
            comparator: default_comparator(),
            base: RwLock::new(tree::Node::empty_leaf()),
            chains: RwLock::new(std::collections::BTreeMap::new()),
            next_recno: AtomicU64::new(1),
            pending_truncates: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_comparator(name: impl Into<String>, comparator: Box<Comparator>) -> Self {
        Self {
            name: name.into(),
            id: AtomicU32::new(0),
            kind: TableKind::Row,
            comparator,
            base: RwLock::new(tree::Node::empty_leaf()),
            chains: RwLock::new(std::collections::BTreeMap::new()),
            next_recno: AtomicU64::new(1),
            pending_truncates: Mutex::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> u32 {
        self.id.load(AtomicOrdering::SeqCst)
    }

    pub fn set_id(&self, id: u32) {
        self.id.store(id, AtomicOrdering::SeqCst);
    }

    pub fn kind(&self) -> TableKind {
        self.kind
    }

    pub fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        (self.comparator)(a, b)
    }

    fn chain_for(&self, key: &[u8]) -> UpdateChain {
        if let Some(chain) = self.chains.read().unwrap().get(key) {
            return chain.clone();
        }
        let mut chains = self.chains.write().unwrap();
        chains.entry(key.to_vec()).or_insert_with(UpdateChain::new).clone()
    }

    fn on_page_value(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.base.read().unwrap().get(key)
    }

    /// Search semantics per spec §4.4: does the key exist (`compare == 0`)
    /// and, if so, what is its currently-visible value under `txn`'s
    /// snapshot.
    pub fn search(&self, txn: &Transaction, key: &[u8]) -> Option<Vec<u8>> {
        let on_page = self.on_page_value(key);
        match self.chains.read().unwrap().get(key) {
            Some(chain) => chain.read(&txn.snapshot, on_page.as_deref()),
            None => on_page,
        }
    }

    pub fn insert(&self, txn: &Transaction, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        if key.is_empty() {
            return Err(Error::InvalidArgument("empty keys are disallowed".into()));
        }
        let chain = self.chain_for(&key);
        if chain.conflicts_with(txn.id, &txn.snapshot) {
            return Err(Error::Conflict { txn_id: txn.id });
        }
        chain.push(txn.id, 0, UpdateValue::Standard(value.clone()));
        txn.record_op(self.id(), key, OpKind::Put(value));
        Ok(())
    }

    /// Column-store "last-record insert auto-assigns next recno" (spec
    /// §8). Only valid on a [`TableKind::Column`] table.
    pub fn append(&self, txn: &Transaction, value: Vec<u8>) -> Result<u64> {
        if self.kind != TableKind::Column {
            return Err(Error::InvalidArgument("append is a column-store operation".into()));
        }
        let recno = self.next_recno.fetch_add(1, AtomicOrdering::SeqCst);
        let key = recno.to_be_bytes().to_vec();
        let chain = self.chain_for(&key);
        chain.push(txn.id, 0, UpdateValue::Standard(value.clone()));
        txn.record_op(self.id(), key, OpKind::Put(value));
        Ok(recno)
    }

    pub fn remove(&self, txn: &Transaction, key: &[u8]) -> Result<()> {
        let chain = self.chain_for(key);
        if chain.conflicts_with(txn.id, &txn.snapshot) {
            return Err(Error::Conflict { txn_id: txn.id });
        }
        chain.push(txn.id, 0, UpdateValue::Tombstone);
        txn.record_op(self.id(), key.to_vec(), OpKind::Remove);
        Ok(())
    }

    pub fn reserve(&self, txn: &Transaction, key: &[u8]) -> Result<()> {
        let chain = self.chain_for(key);
        if chain.conflicts_with(txn.id, &txn.snapshot) {
            return Err(Error::Conflict { txn_id: txn.id });
        }
        chain.push(txn.id, 0, UpdateValue::Reserved);
        Ok(())
    }

    pub fn modify(&self, txn: &Transaction, key: &[u8], fragments: Vec<crate::txn::modify::Fragment>) -> Result<()> {
        let chain = self.chain_for(key);
        if chain.conflicts_with(txn.id, &txn.snapshot) {
            return Err(Error::Conflict { txn_id: txn.id });
        }
        chain.push(txn.id, 0, UpdateValue::Modify(fragments.clone()));
        txn.record_op(self.id(), key.to_vec(), OpKind::Modify(fragments));
        Ok(())
    }

    /// Fast truncate (spec §4.4, column-store): drop every recno in
    /// `[start_recno, end_recno)` from the resident tree without visiting
    /// each one, staging the result under `txn`'s id until commit/abort
    /// decide whether to install it (end-to-end scenario 5).
    pub fn truncate_recno(&self, txn: &Transaction, start_recno: u64, end_recno: u64) -> Result<()> {
        if self.kind != TableKind::Column {
            return Err(Error::InvalidArgument("truncate_recno is a column-store operation".into()));
        }
        let start = start_recno.to_be_bytes().to_vec();
        let end = end_recno.to_be_bytes().to_vec();
        {
            // Any key resolved only through the chain overlay (not yet
            // reconciled into the tree) still needs a per-key tombstone;
            // this is the small, bounded "recently written" set, not the
            // bulk of the table, so it doesn't cost the truncate its
            // fast-path character.
            let chains = self.chains.read().unwrap();
            for (key, chain) in chains.range((Bound::Included(start.clone()), Bound::Excluded(end.clone()))) {
                if chain.conflicts_with(txn.id, &txn.snapshot) {
                    return Err(Error::Conflict { txn_id: txn.id });
                }
                chain.push(txn.id, 0, UpdateValue::Tombstone);
            }
        }
        let root = self.base.read().unwrap().clone();
        let (new_root, _dropped) = root.remove_range(&start, &end);
        self.pending_truncates.lock().unwrap().insert(txn.id, PendingTruncate { new_root });
        Ok(())
    }

    /// Install a pending truncate's result, if this table has one staged
    /// for `txn_id` (called from [`crate::session::Connection::commit_transaction`]).
    pub(crate) fn commit_pending_truncate(&self, txn_id: u64) {
        if let Some(pending) = self.pending_truncates.lock().unwrap().remove(&txn_id) {
            *self.base.write().unwrap() = pending.new_root;
        }
    }

    /// Discard a pending truncate without installing it; the old tree was
    /// never mutated, so this is the entire rollback (called from
    /// [`crate::session::Connection::rollback_transaction`]).
    pub(crate) fn abort_pending_truncate(&self, txn_id: u64) {
        self.pending_truncates.lock().unwrap().remove(&txn_id);
    }

    /// An ordered walk over every key with either an on-page value or a
    /// chain, deduplicated and sorted (spec §4.4 "tree walks").
    pub fn ordered_keys(&self) -> Vec<Vec<u8>> {
        let mut base_entries = Vec::new();
        self.base.read().unwrap().iter_range(&mut base_entries);
        let mut keys: Vec<Vec<u8>> = base_entries.into_iter().map(|(k, _)| k).collect();
        for k in self.chains.read().unwrap().keys() {
            if keys.binary_search(k).is_err() {
                keys.push(k.clone());
            }
        }
        keys.sort_by(|a, b| self.compare(a, b));
        keys.dedup();
        keys
    }

    pub(crate) fn base_snapshot(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut out = Vec::new();
        self.base.read().unwrap().iter_range(&mut out);
        out
    }

    pub(crate) fn chain_snapshot(&self) -> Vec<(Vec<u8>, UpdateChain)> {
        self.chains.read().unwrap().iter().map(|(k, c)| (k.clone(), c.clone())).collect()
    }

    pub(crate) fn install_base(&self, entries: Vec<(Vec<u8>, Vec<u8>)>) {
        *self.base.write().unwrap() = tree::Node::bulk_load(entries);
    }

    /// Apply one committed write directly against the resident tree,
    /// without rebuilding it from a full snapshot (spec §4.7 recovery
    /// replay of `RowPut`/`RowRemove`/column ops).
    pub(crate) fn apply_put(&self, key: Vec<u8>, value: Vec<u8>) {
        let mut base = self.base.write().unwrap();
        *base = base.insert(key, value);
    }

    pub(crate) fn apply_remove(&self, key: &[u8]) {
        let mut base = self.base.write().unwrap();
        if let Some(next) = base.remove(key) {
            *base = next;
        }
    }

    /// Apply a recovered `ColTruncate` directly (no pending/rollback
    /// staging — the record only reaches replay once its transaction is
    /// already known-committed).
    pub(crate) fn apply_truncate_recno(&self, start_recno: u64, end_recno: u64) {
        let start = start_recno.to_be_bytes().to_vec();
        let end = end_recno.to_be_bytes().to_vec();
        let mut base = self.base.write().unwrap();
        let (new_root, _dropped) = base.remove_range(&start, &end);
        *base = new_root;
    }

    pub(crate) fn search_base_for_recovery(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.on_page_value(key)
    }

    pub(crate) fn retire_chain(&self, key: &[u8]) {
        self.chains.write().unwrap().remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::txn::{IsolationLevel, TransactionManager};

    #[test]
    fn insert_then_search_is_visible_to_self() {
        let table = Table::new("t");
        let mgr = TransactionManager::new();
        let txn = mgr.begin(IsolationLevel::Snapshot);
        table.insert(&txn, b"k".to_vec(), b"v".to_vec()).unwrap();
        assert_eq!(table.search(&txn, b"k"), Some(b"v".to_vec()));
    }

    #[test]
    fn concurrent_writer_sees_conflict() {
        let table = Table::new("t");
        let mgr = TransactionManager::new();
        let t1 = mgr.begin(IsolationLevel::Snapshot);
        table.insert(&t1, b"k".to_vec(), b"v1".to_vec()).unwrap();
        let t2 = mgr.begin(IsolationLevel::Snapshot);
        assert!(table.insert(&t2, b"k".to_vec(), b"v2".to_vec()).is_err());
    }

    #[test]
    fn empty_key_is_rejected() {
        let table = Table::new("t");
        let mgr = TransactionManager::new();
        let txn = mgr.begin(IsolationLevel::Snapshot);
        assert!(table.insert(&txn, Vec::new(), b"v".to_vec()).is_err());
    }

    #[test]
    fn append_auto_assigns_increasing_recnos() {
        let table = Table::new_column("t");
        let mgr = TransactionManager::new();
        let txn = mgr.begin(IsolationLevel::Snapshot);
        let r1 = table.append(&txn, b"a".to_vec()).unwrap();
        let r2 = table.append(&txn, b"b".to_vec()).unwrap();
        assert!(r2 > r1);
        assert_eq!(table.search(&txn, &r1.to_be_bytes()), Some(b"a".to_vec()));
        assert_eq!(table.search(&txn, &r2.to_be_bytes()), Some(b"b".to_vec()));
    }

    #[test]
    fn truncate_recno_is_invisible_until_committed_and_reversible_on_abort() {
        let table = Table::new_column("t");
        let entries: Vec<(Vec<u8>, Vec<u8>)> =
            (0u64..8).map(|r| (r.to_be_bytes().to_vec(), format!("v{r}").into_bytes())).collect();
        table.install_base(entries);

        let mgr = TransactionManager::new();
        let txn2 = mgr.begin(IsolationLevel::Snapshot);
        table.truncate_recno(&txn2, 0, 8).unwrap();
        // Not yet committed: the tree is untouched.
        assert_eq!(table.search(&txn2, &0u64.to_be_bytes()), Some(b"v0".to_vec()));
        table.abort_pending_truncate(txn2.id);
        mgr.end(&txn2);
        assert_eq!(table.search(&txn2, &0u64.to_be_bytes()), Some(b"v0".to_vec()));

        let txn3 = mgr.begin(IsolationLevel::Snapshot);
        table.truncate_recno(&txn3, 0, 8).unwrap();
        table.commit_pending_truncate(txn3.id);
        mgr.end(&txn3);
        for r in 0u64..8 {
            assert_eq!(table.search(&txn3, &r.to_be_bytes()), None);
        }
    }
}
