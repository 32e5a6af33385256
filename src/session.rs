//! Connection/session facade (spec §6): the public entry point tying the
//! file system, per-table block managers, the shared cache, the log, and
//! the checkpoint coordinator together behind one `open()` call.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::block::BlockManager;
use crate::btree::cursor::Cursor;
use crate::btree::{recno_of, Table, TableKind};
use crate::cache::{CacheSession, CacheThresholds, PageCache};
use crate::checkpoint::{recover, CheckpointCoordinator};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::fs::memfile::MemFileSystem;
use crate::fs::{FileHandle, FileSystem};
use crate::log::record::OpRecord;
use crate::log::{LogManager, SyncPolicy};
use crate::txn::{IsolationLevel, OpKind, Transaction, TransactionManager};

struct TableEntry {
    table: Arc<Table>,
    block_mgr: Arc<BlockManager>,
}

/// One open database: a file system, a log, one block manager and table
/// per named URI, a shared page cache, and the checkpoint coordinator.
/// Analogous to the teacher's top-level `Storage` handle, generalized from
/// one allocator to the full table/transaction/log surface this engine
/// needs (spec §6 "persistent state layout").
pub struct Connection {
    fs: Arc<dyn FileSystem>,
    log: LogManager,
    tables: RwLock<HashMap<String, TableEntry>>,
    cache: Arc<PageCache>,
    txn_mgr: TransactionManager,
    checkpoints: CheckpointCoordinator,
    allocation_size: u32,
    next_table_id: AtomicU32,
}

impl Connection {
    /// Open (or create) a connection backed by an in-memory file system —
    /// the engine's collaborator traits mean a POSIX-backed connection is a
    /// drop-in swap of `fs` for [`crate::fs::posix::PosixFileSystem`].
    pub fn open_in_memory(config: &str) -> Result<Self> {
        let fs: Arc<dyn FileSystem> = Arc::new(MemFileSystem::new());
        Self::open_with_fs(fs, config)
    }

    pub fn open_with_fs(fs: Arc<dyn FileSystem>, config: &str) -> Result<Self> {
        let engine_config = EngineConfig::from_str(config)?;

        let sync_policy = match engine_config.log_sync {
            crate::config::LogSync::Off => SyncPolicy::Off,
            crate::config::LogSync::Periodic => SyncPolicy::Periodic,
            crate::config::LogSync::On => SyncPolicy::On,
        };
        let log = LogManager::create(fs.clone(), engine_config.log_file_max, sync_policy)?;
        let cache = Arc::new(PageCache::new(CacheThresholds {
            max_bytes: engine_config.cache_size,
            eviction_trigger_pct: engine_config.eviction_trigger_pct,
            eviction_target_pct: engine_config.eviction_target_pct,
        }));

        Ok(Self {
            fs,
            log,
            tables: RwLock::new(HashMap::new()),
            cache,
            txn_mgr: TransactionManager::new(),
            checkpoints: CheckpointCoordinator::new(),
            allocation_size: engine_config.allocation_size,
            next_table_id: AtomicU32::new(1),
        })
    }

    /// Create a row-store table named by its URI (spec §6's `table:`
    /// prefix), opening a fresh block manager file for it.
    pub fn create_table(&self, name: &str) -> Result<()> {
        self.create_table_with_kind(name, TableKind::Row)
    }

    /// Create a column-store table (spec §3's fixed/variable column
    /// format, keyed by auto-assigned recno).
    pub fn create_column_table(&self, name: &str) -> Result<()> {
        self.create_table_with_kind(name, TableKind::Column)
    }

    fn create_table_with_kind(&self, name: &str, kind: TableKind) -> Result<()> {
        let mut tables = self.tables.write().unwrap();
        if tables.contains_key(name) {
            return Err(Error::InvalidArgument(format!("table '{name}' already exists")));
        }
        let handle: Arc<dyn FileHandle> = Arc::from(self.fs.open(name, true)?);
        let block_mgr = Arc::new(BlockManager::create(handle, self.allocation_size)?);
        let table = match kind {
            TableKind::Row => Table::new(name),
            TableKind::Column => Table::new_column(name),
        };
        table.set_id(self.next_table_id.fetch_add(1, Ordering::SeqCst));
        tables.insert(name.to_string(), TableEntry { table: Arc::new(table), block_mgr });
        Ok(())
    }

    pub fn begin_transaction(&self, isolation: IsolationLevel) -> Arc<Transaction> {
        Arc::new(self.txn_mgr.begin(isolation))
    }

    /// Fast truncate on a column-store table (spec §4.4, end-to-end
    /// scenario 5): stages the removal on the table, then logs a single
    /// `ColTruncate` record immediately. An aborted transaction's record is
    /// simply never applied at recovery (it never gets a `TxnTimestamp`).
    pub fn truncate_table(&self, table_name: &str, txn: &Transaction, start_recno: u64, end_recno: u64) -> Result<()> {
        let tables = self.tables.read().unwrap();
        let entry = tables.get(table_name).ok_or(Error::NotFound)?;
        entry.table.truncate_recno(txn, start_recno, end_recno)?;
        self.log.append(&crate::log::record::LogRecord::new(
            txn.id,
            OpRecord::ColTruncate { btree_id: entry.table.id(), start_recno, end_recno },
        ))?;
        Ok(())
    }

    /// Append the transaction's write set as `RowPut`/`RowRemove`/`ColPut`/
    /// `ColModify` records, then the `TxnTimestamp` commit marker, so
    /// recovery's replay has real row/column data to redo (spec §3 "Log
    /// durability", end-to-end scenario 4).
    pub fn commit_transaction(&self, txn: &Transaction) -> Result<()> {
        let tables = self.tables.read().unwrap();
        let by_id: HashMap<u32, &TableEntry> = tables.values().map(|e| (e.table.id(), e)).collect();

        for op in txn.sorted_ops() {
            let kind = by_id.get(&op.btree_id).map(|e| e.table.kind()).unwrap_or(TableKind::Row);
            let record = match op.kind {
                OpKind::Put(value) if kind == TableKind::Column => {
                    OpRecord::ColPut { btree_id: op.btree_id, recno: recno_of(&op.key), value }
                }
                OpKind::Put(value) => OpRecord::RowPut { btree_id: op.btree_id, key: op.key, value },
                OpKind::Remove => OpRecord::RowRemove { btree_id: op.btree_id, key: op.key },
                OpKind::Modify(fragments) => OpRecord::ColModify { btree_id: op.btree_id, key: op.key, fragments },
            };
            self.log.append(&crate::log::record::LogRecord::new(txn.id, record))?;
        }

        self.log.append(&crate::log::record::LogRecord::new(
            txn.id,
            OpRecord::TxnTimestamp {
                commit_ts: txn.commit_ts.unwrap_or(txn.id),
                durable_ts: txn.durable_ts.unwrap_or(txn.id),
            },
        ))?;

        for entry in tables.values() {
            entry.table.commit_pending_truncate(txn.id);
        }
        drop(tables);
        self.txn_mgr.end(txn);
        Ok(())
    }

    pub fn rollback_transaction(&self, txn: &Transaction) {
        let tables = self.tables.read().unwrap();
        for entry in tables.values() {
            entry.table.abort_pending_truncate(txn.id);
        }
        drop(tables);
        self.txn_mgr.end(txn);
    }

    pub fn open_cursor<'c>(&'c self, table_name: &str, txn: Arc<Transaction>) -> Result<TableCursorGuard<'c>> {
        let tables = self.tables.read().unwrap();
        if !tables.contains_key(table_name) {
            return Err(Error::NotFound);
        }
        Ok(TableCursorGuard {
            _guard: tables,
            table_name: table_name.to_string(),
            txn,
        })
    }

    pub fn new_cache_session(&self) -> Arc<CacheSession> {
        self.cache.new_session()
    }

    /// Run a checkpoint over every open table.
    pub fn checkpoint(&self) -> Result<()> {
        let tables = self.tables.read().unwrap();
        let refs: Vec<(&str, &Table, &BlockManager)> =
            tables.iter().map(|(name, entry)| (name.as_str(), entry.table.as_ref(), entry.block_mgr.as_ref())).collect();
        self.checkpoints.checkpoint(&refs, &self.txn_mgr, &self.log)?;
        for (_, entry) in tables.iter() {
            entry.block_mgr.retire_discard();
        }
        Ok(())
    }

    /// Recover from the last published checkpoint and replay the log
    /// forward (spec §4.7). Intended to run once at startup, before any
    /// table traffic.
    pub fn recover(&self) -> Result<()> {
        let checkpoint = self.checkpoints.last_checkpoint();
        let tables = self.tables.read().unwrap();
        let map: HashMap<String, (Arc<Table>, Arc<BlockManager>)> = tables
            .iter()
            .map(|(name, entry)| (name.clone(), (entry.table.clone(), entry.block_mgr.clone())))
            .collect();
        recover(&map, &self.log, checkpoint.as_ref())
    }
}

/// Borrowed handle produced by [`Connection::open_cursor`]; keeps the
/// table-registry read lock alive for as long as a cursor is actually used.
/// The struct itself does not own a [`Cursor`] because a cursor borrows the
/// `Table` it targets, and giving that lifetime a home here keeps the
/// connection's public API simple (call [`Self::cursor`] to get one).
pub struct TableCursorGuard<'c> {
    _guard: std::sync::RwLockReadGuard<'c, HashMap<String, TableEntry>>,
    table_name: String,
    txn: Arc<Transaction>,
}

impl<'c> TableCursorGuard<'c> {
    pub fn cursor(&self) -> Cursor<'_> {
        let entry = self._guard.get(&self.table_name).expect("table removed while cursor guard held");
        Cursor::new(&entry.table, self.txn.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_table_then_insert_and_read_back() {
        let conn = Connection::open_in_memory("").unwrap();
        conn.create_table("table:widgets").unwrap();

        let txn = conn.begin_transaction(IsolationLevel::Snapshot);
        {
            let guard = conn.open_cursor("table:widgets", txn.clone()).unwrap();
            let mut cursor = guard.cursor();
            cursor.set_key(b"a".to_vec());
            cursor.set_value(b"1".to_vec());
            cursor.insert().unwrap();
        }
        conn.commit_transaction(&txn).unwrap();

        let read_txn = conn.begin_transaction(IsolationLevel::Snapshot);
        let guard = conn.open_cursor("table:widgets", read_txn).unwrap();
        let mut cursor = guard.cursor();
        cursor.set_key(b"a".to_vec());
        assert!(cursor.search().unwrap());
        assert_eq!(cursor.value(), Some(&b"1"[..]));
    }

    #[test]
    fn checkpoint_then_recover_restores_table_contents() {
        let conn = Connection::open_in_memory("").unwrap();
        conn.create_table("table:widgets").unwrap();
        let txn = conn.begin_transaction(IsolationLevel::Snapshot);
        {
            let guard = conn.open_cursor("table:widgets", txn.clone()).unwrap();
            let mut cursor = guard.cursor();
            cursor.set_key(b"a".to_vec());
            cursor.set_value(b"1".to_vec());
            cursor.insert().unwrap();
        }
        conn.commit_transaction(&txn).unwrap();
        conn.checkpoint().unwrap();
        conn.recover().unwrap();

        let read_txn = conn.begin_transaction(IsolationLevel::Snapshot);
        let guard = conn.open_cursor("table:widgets", read_txn).unwrap();
        let mut cursor = guard.cursor();
        cursor.set_key(b"a".to_vec());
        assert!(cursor.search().unwrap());
    }

    #[test]
    fn creating_duplicate_table_is_an_error() {
        let conn = Connection::open_in_memory("").unwrap();
        conn.create_table("table:widgets").unwrap();
        assert!(conn.create_table("table:widgets").is_err());
    }

    /// Recovery with no checkpoint at all depends entirely on commit
    /// writing real `RowPut`/`RowRemove` records (spec §3 "Log durability").
    #[test]
    fn recovery_with_no_checkpoint_restores_rows_from_the_log_alone() {
        let conn = Connection::open_in_memory("").unwrap();
        conn.create_table("table:widgets").unwrap();
        let txn = conn.begin_transaction(IsolationLevel::Snapshot);
        {
            let guard = conn.open_cursor("table:widgets", txn.clone()).unwrap();
            let mut cursor = guard.cursor();
            for i in 0..22 {
                cursor.set_key(format!("row{i}").into_bytes());
                cursor.set_value(b"v".to_vec());
                cursor.insert().unwrap();
            }
        }
        conn.commit_transaction(&txn).unwrap();
        conn.recover().unwrap();

        let read_txn = conn.begin_transaction(IsolationLevel::Snapshot);
        let guard = conn.open_cursor("table:widgets", read_txn).unwrap();
        let mut cursor = guard.cursor();
        for i in 0..22 {
            cursor.set_key(format!("row{i}").into_bytes());
            assert!(cursor.search().unwrap(), "row{i} should have replayed from the log");
        }
    }

    #[test]
    fn removes_also_replay_through_recovery() {
        let conn = Connection::open_in_memory("").unwrap();
        conn.create_table("table:widgets").unwrap();
        let txn = conn.begin_transaction(IsolationLevel::Snapshot);
        {
            let guard = conn.open_cursor("table:widgets", txn.clone()).unwrap();
            let mut cursor = guard.cursor();
            cursor.set_key(b"a".to_vec());
            cursor.set_value(b"1".to_vec());
            cursor.insert().unwrap();
            cursor.remove().unwrap();
        }
        conn.commit_transaction(&txn).unwrap();
        conn.recover().unwrap();

        let read_txn = conn.begin_transaction(IsolationLevel::Snapshot);
        let guard = conn.open_cursor("table:widgets", read_txn).unwrap();
        let mut cursor = guard.cursor();
        cursor.set_key(b"a".to_vec());
        assert!(!cursor.search().unwrap());
    }

    #[test]
    fn fast_truncate_commits_and_survives_recovery() {
        let conn = Connection::open_in_memory("").unwrap();
        conn.create_column_table("table:events").unwrap();

        let txn = conn.begin_transaction(IsolationLevel::Snapshot);
        let mut recnos = Vec::new();
        {
            let guard = conn.open_cursor("table:events", txn.clone()).unwrap();
            let mut cursor = guard.cursor();
            for i in 0..5 {
                cursor.set_value(format!("v{i}").into_bytes());
                recnos.push(cursor.append().unwrap());
            }
        }
        conn.commit_transaction(&txn).unwrap();
        conn.checkpoint().unwrap();

        let txn2 = conn.begin_transaction(IsolationLevel::Snapshot);
        conn.truncate_table("table:events", &txn2, recnos[0], recnos[recnos.len() - 1] + 1).unwrap();
        conn.commit_transaction(&txn2).unwrap();

        conn.recover().unwrap();

        let read_txn = conn.begin_transaction(IsolationLevel::Snapshot);
        let guard = conn.open_cursor("table:events", read_txn).unwrap();
        let mut cursor = guard.cursor();
        for &recno in &recnos {
            cursor.set_key(recno.to_be_bytes().to_vec());
            assert!(!cursor.search().unwrap(), "recno {recno} should be gone after the truncate survives recovery");
        }
    }

    #[test]
    fn fast_truncate_rolls_back_on_abort() {
        let conn = Connection::open_in_memory("").unwrap();
        conn.create_column_table("table:events").unwrap();

        let txn = conn.begin_transaction(IsolationLevel::Snapshot);
        let recno;
        {
            let guard = conn.open_cursor("table:events", txn.clone()).unwrap();
            let mut cursor = guard.cursor();
            cursor.set_value(b"v0".to_vec());
            recno = cursor.append().unwrap();
        }
        conn.commit_transaction(&txn).unwrap();
        conn.checkpoint().unwrap();

        let txn2 = conn.begin_transaction(IsolationLevel::Snapshot);
        conn.truncate_table("table:events", &txn2, recno, recno + 1).unwrap();
        conn.rollback_transaction(&txn2);

        let read_txn = conn.begin_transaction(IsolationLevel::Snapshot);
        let guard = conn.open_cursor("table:events", read_txn).unwrap();
        let mut cursor = guard.cursor();
        cursor.set_key(recno.to_be_bytes().to_vec());
        assert!(cursor.search().unwrap(), "rolled-back truncate must not have removed the row");
        assert_eq!(cursor.value(), Some(&b"v0"[..]));
    }

    #[test]
    fn recovery_routes_ops_to_the_right_table_by_id() {
        let conn = Connection::open_in_memory("").unwrap();
        conn.create_table("table:a").unwrap();
        conn.create_table("table:b").unwrap();

        let txn = conn.begin_transaction(IsolationLevel::Snapshot);
        {
            let guard_a = conn.open_cursor("table:a", txn.clone()).unwrap();
            let mut cursor_a = guard_a.cursor();
            cursor_a.set_key(b"k".to_vec());
            cursor_a.set_value(b"from-a".to_vec());
            cursor_a.insert().unwrap();

            let guard_b = conn.open_cursor("table:b", txn.clone()).unwrap();
            let mut cursor_b = guard_b.cursor();
            cursor_b.set_key(b"k".to_vec());
            cursor_b.set_value(b"from-b".to_vec());
            cursor_b.insert().unwrap();
        }
        conn.commit_transaction(&txn).unwrap();
        conn.recover().unwrap();

        let read_txn = conn.begin_transaction(IsolationLevel::Snapshot);
        let guard_a = conn.open_cursor("table:a", read_txn.clone()).unwrap();
        let mut cursor_a = guard_a.cursor();
        cursor_a.set_key(b"k".to_vec());
        assert!(cursor_a.search().unwrap());
        assert_eq!(cursor_a.value(), Some(&b"from-a"[..]));

        let guard_b = conn.open_cursor("table:b", read_txn).unwrap();
        let mut cursor_b = guard_b.cursor();
        cursor_b.set_key(b"k".to_vec());
        assert!(cursor_b.search().unwrap());
        assert_eq!(cursor_b.value(), Some(&b"from-b"[..]));
    }
}
