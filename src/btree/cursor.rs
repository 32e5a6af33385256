//! The cursor API (spec §4.4's "Cursor operations"): the one handle
//! applications use to navigate and mutate a table's keyspace inside a
//! transaction.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::txn::modify::Fragment;
use crate::txn::Transaction;

use super::Table;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    Unset,
    OnKey,
    Exhausted,
}

/// A cursor walks `table`'s [`Table::ordered_keys`] under `txn`'s snapshot.
/// Not `Send`/`Sync` across threads by convention — one cursor per session,
/// matching the teacher's session-owned-cursor pattern.
pub struct Cursor<'t> {
    table: &'t Table,
    txn: Arc<Transaction>,
    key: Option<Vec<u8>>,
    value: Option<Vec<u8>>,
    position: Position,
}

impl<'t> Cursor<'t> {
    pub fn new(table: &'t Table, txn: Arc<Transaction>) -> Self {
        Self {
            table,
            txn,
            key: None,
            value: None,
            position: Position::Unset,
        }
    }

    pub fn set_key(&mut self, key: impl Into<Vec<u8>>) {
        self.key = Some(key.into());
    }

    pub fn set_value(&mut self, value: impl Into<Vec<u8>>) {
        self.value = Some(value.into());
    }

    pub fn key(&self) -> Option<&[u8]> {
        self.key.as_deref()
    }

    pub fn value(&self) -> Option<&[u8]> {
        self.value.as_deref()
    }

    /// Exact-match search: positions the cursor on `key` if it is present
    /// and visible, loading its value. Returns `Ok(true)` iff found (spec's
    /// `compare == 0` result).
    pub fn search(&mut self) -> Result<bool> {
        let key = self.key.clone().ok_or_else(|| Error::InvalidArgument("search requires set_key".into()))?;
        match self.table.search(&self.txn, &key) {
            Some(value) => {
                self.value = Some(value);
                self.position = Position::OnKey;
                Ok(true)
            }
            None => {
                self.position = Position::Exhausted;
                Ok(false)
            }
        }
    }

    /// Approximate-match search (spec: `search_near`): positions on the
    /// smallest visible key `>= set_key`, or the cursor goes exhausted if
    /// none exists.
    pub fn search_near(&mut self) -> Result<bool> {
        let key = self.key.clone().ok_or_else(|| Error::InvalidArgument("search_near requires set_key".into()))?;
        let keys = self.table.ordered_keys();
        let idx = keys.partition_point(|k| self.table.compare(k, &key) == std::cmp::Ordering::Less);
        for candidate in &keys[idx..] {
            if let Some(value) = self.table.search(&self.txn, candidate) {
                self.key = Some(candidate.clone());
                self.value = Some(value);
                self.position = Position::OnKey;
                return Ok(true);
            }
        }
        self.position = Position::Exhausted;
        Ok(false)
    }

    /// Advance to the next visible key in order.
    pub fn next(&mut self) -> Result<bool> {
        let keys = self.table.ordered_keys();
        let start_idx = match &self.key {
            Some(k) => keys.partition_point(|x| self.table.compare(x, k) != std::cmp::Ordering::Greater),
            None => 0,
        };
        for candidate in &keys[start_idx..] {
            if let Some(value) = self.table.search(&self.txn, candidate) {
                self.key = Some(candidate.clone());
                self.value = Some(value);
                self.position = Position::OnKey;
                return Ok(true);
            }
        }
        self.position = Position::Exhausted;
        self.value = None;
        Ok(false)
    }

    /// Step to the previous visible key in order.
    pub fn prev(&mut self) -> Result<bool> {
        let keys = self.table.ordered_keys();
        let end_idx = match &self.key {
            Some(k) => keys.partition_point(|x| self.table.compare(x, k) == std::cmp::Ordering::Less),
            None => keys.len(),
        };
        for candidate in keys[..end_idx].iter().rev() {
            if let Some(value) = self.table.search(&self.txn, candidate) {
                self.key = Some(candidate.clone());
                self.value = Some(value);
                self.position = Position::OnKey;
                return Ok(true);
            }
        }
        self.position = Position::Exhausted;
        self.value = None;
        Ok(false)
    }

    /// Clear the cursor's positioned state without closing it (spec:
    /// `reset`). The cursor may be reused for a fresh search.
    pub fn reset(&mut self) {
        self.key = None;
        self.value = None;
        self.position = Position::Unset;
    }

    pub fn insert(&mut self) -> Result<()> {
        let key = self.key.clone().ok_or_else(|| Error::InvalidArgument("insert requires set_key".into()))?;
        let value = self.value.clone().ok_or_else(|| Error::InvalidArgument("insert requires set_value".into()))?;
        self.table.insert(&self.txn, key, value)
    }

    pub fn update(&mut self) -> Result<()> {
        self.insert()
    }

    pub fn remove(&mut self) -> Result<()> {
        let key = self.key.clone().ok_or_else(|| Error::InvalidArgument("remove requires set_key".into()))?;
        self.table.remove(&self.txn, &key)
    }

    /// Write-write conflict placeholder without a value (spec: `reserve`).
    pub fn reserve(&mut self) -> Result<()> {
        let key = self.key.clone().ok_or_else(|| Error::InvalidArgument("reserve requires set_key".into()))?;
        self.table.reserve(&self.txn, &key)
    }

    pub fn modify(&mut self, fragments: Vec<Fragment>) -> Result<()> {
        let key = self.key.clone().ok_or_else(|| Error::InvalidArgument("modify requires set_key".into()))?;
        self.table.modify(&self.txn, &key, fragments)
    }

    /// Column-store "insert at the next recno" (spec §8): positions the
    /// cursor on the assigned recno and returns it.
    pub fn append(&mut self) -> Result<u64> {
        let value = self.value.clone().ok_or_else(|| Error::InvalidArgument("append requires set_value".into()))?;
        let recno = self.table.append(&self.txn, value)?;
        self.key = Some(recno.to_be_bytes().to_vec());
        self.position = Position::OnKey;
        Ok(recno)
    }

    /// Fast truncate over `[start_recno, end_recno)` (spec §4.4 / end-to-end
    /// scenario 5). Column-store only.
    pub fn truncate(&mut self, start_recno: u64, end_recno: u64) -> Result<()> {
        self.table.truncate_recno(&self.txn, start_recno, end_recno)
    }

    /// Close discards any positioned state; there is nothing else to
    /// release since this cursor holds no page cache resources directly.
    pub fn close(self) {}
}
