//! Transaction ids, snapshots, update chains, and MODIFY application
//! (spec §4.5).

pub mod modify;
pub mod snapshot;
pub mod update;

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use snapshot::Snapshot;

/// 64-bit monotonic transaction ids. Zero is reserved ("no transaction");
/// the two top values are reserved for RESERVED/ABORTED update markers
/// (spec: "zero and 'aborted' are reserved").
pub const FIRST_TXN_ID: u64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    Snapshot,
    ReadCommitted,
    ReadUncommitted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnorePrepare {
    Off,
    On,
    /// Also makes the transaction read-only (spec §4.5).
    Force,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TransactionFlags {
    pub ignore_prepare: Option<IgnorePrepare>,
    pub round_up_prepared: bool,
    pub round_up_read: bool,
    pub no_timestamp: bool,
}

/// One transaction's full state (spec §3 "Transaction").
pub struct Transaction {
    pub id: u64,
    pub isolation: IsolationLevel,
    pub snapshot: Snapshot,
    pub commit_ts: Option<u64>,
    pub durable_ts: Option<u64>,
    pub prepare_ts: Option<u64>,
    pub flags: TransactionFlags,
    /// Ops recorded for this transaction's commit record, in the order
    /// they were issued; sorted at commit time (spec §4.5 "Commit").
    pub ops: Mutex<Vec<TxnOp>>,
}

/// What a [`TxnOp`] should become in the commit record (spec §4.6's
/// enumerated log op list, minus the recno/column variants which are
/// logged separately at the point of the column operation since they
/// don't carry a sortable byte key).
#[derive(Debug, Clone)]
pub enum OpKind {
    Put(Vec<u8>),
    Remove,
    Modify(Vec<modify::Fragment>),
}

/// One logged operation belonging to a transaction, enough information to
/// sort the commit record by `(btree id, key)` as spec §4.5 requires and to
/// reconstruct the `RowPut`/`RowRemove`/`ColModify` log record commit emits.
#[derive(Debug, Clone)]
pub struct TxnOp {
    pub btree_id: u32,
    pub key: Vec<u8>,
    pub kind: OpKind,
}

impl Transaction {
    fn new(id: u64, isolation: IsolationLevel, snapshot: Snapshot) -> Self {
        Self {
            id,
            isolation,
            snapshot,
            commit_ts: None,
            durable_ts: None,
            prepare_ts: None,
            flags: TransactionFlags::default(),
            ops: Mutex::new(Vec::new()),
        }
    }

    pub fn record_op(&self, btree_id: u32, key: Vec<u8>, kind: OpKind) {
        self.ops.lock().unwrap().push(TxnOp { btree_id, key, kind });
    }

    /// Commit record ops sorted by `(btree id, key)` (spec: "Sort the
    /// per-transaction op list by (btree id, whether the op has a sortable
    /// key, key/recno) so that all ops on the same key are contiguous").
    pub fn sorted_ops(&self) -> Vec<TxnOp> {
        let mut ops = self.ops.lock().unwrap().clone();
        ops.sort_by(|a, b| a.btree_id.cmp(&b.btree_id).then_with(|| a.key.cmp(&b.key)));
        ops
    }
}

/// Process-wide transaction id allocator and active-set tracker. Builds
/// each new transaction's snapshot from the currently-active id set.
pub struct TransactionManager {
    next_id: AtomicU64,
    active: Mutex<BTreeSet<u64>>,
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(FIRST_TXN_ID),
            active: Mutex::new(BTreeSet::new()),
        }
    }
}

impl TransactionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self, isolation: IsolationLevel) -> Transaction {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut active = self.active.lock().unwrap();
        let snapshot_min = active.iter().copied().min().unwrap_or(id);
        let concurrent: Vec<u64> = active.iter().copied().collect();
        active.insert(id);
        Transaction::new(
            id,
            isolation,
            Snapshot::new(snapshot_min, id + 1, concurrent),
        )
    }

    /// Release a transaction's id from the active set on commit or abort.
    pub fn end(&self, txn: &Transaction) {
        self.active.lock().unwrap().remove(&txn.id);
    }

    /// The oldest id still active, used by [`update::UpdateChain::trim_obsolete`]
    /// to decide what is globally visible.
    pub fn oldest_active(&self) -> u64 {
        self.active
            .lock()
            .unwrap()
            .iter()
            .copied()
            .next()
            .unwrap_or_else(|| self.next_id.load(Ordering::SeqCst))
    }
}
