//! Reconciliation (spec §4.4 "Reconciliation"/"Fast truncate"): rebuild a
//! table's durable page image from its update chains under a stable
//! snapshot, write it through the block manager, then fold the now-durable
//! values back into the table's on-page map and retire the chains that
//! produced them.
//!
//! Row-store chunks become [`Page::RowLeaf`] images; column-store chunks
//! become [`Page::ColFixLeaf`] when every value in the chunk is a single
//! byte (bit-packed at the narrowest width that fits) or [`Page::ColVarLeaf`]
//! otherwise (spec §3's "fixed (1-8 bits) / variable" column formats).
//! One page per `PAGE_FANOUT` keys stands in for true multi-level on-disk
//! tree maintenance; the resident [`crate::btree::tree`] module is what
//! actually maintains split/merge structure in memory.

use crate::block::{BlockManager, Cookie};
use crate::btree::page::{pack_fixed, unpack_fixed, Page};
use crate::btree::{recno_of, Table, TableKind};
use crate::error::Result;
use crate::txn::snapshot::Snapshot;

/// Keys per reconciled leaf page.
pub const PAGE_FANOUT: usize = 256;

/// Result of reconciling one table: the cookies of every leaf page written,
/// in key order, plus how many keys were folded in (for logging/metrics).
pub struct ReconcileResult {
    pub leaves: Vec<Cookie>,
    pub keys_written: usize,
    pub tombstones_applied: usize,
}

/// Reconcile `table` under `snapshot` (typically the checkpoint's own
/// snapshot, so that only globally-visible writes are captured) and write
/// the result through `block_mgr`. On success, `table`'s base map is
/// replaced with the newly-durable values and every chain that contributed
/// a globally-visible update is retired.
pub fn reconcile_table(table: &Table, block_mgr: &BlockManager, snapshot: &Snapshot) -> Result<ReconcileResult> {
    let mut merged: Vec<(Vec<u8>, Option<Vec<u8>>)> = Vec::new();
    let mut resolved_keys: Vec<Vec<u8>> = Vec::new();

    let base: std::collections::BTreeMap<Vec<u8>, Vec<u8>> = table.base_snapshot().into_iter().collect();
    let chains = table.chain_snapshot();

    let mut all_keys: Vec<Vec<u8>> = base.keys().cloned().collect();
    for (k, _) in &chains {
        if !all_keys.contains(k) {
            all_keys.push(k.clone());
        }
    }
    all_keys.sort();
    all_keys.dedup();

    let chain_map: std::collections::HashMap<&[u8], &crate::txn::update::UpdateChain> =
        chains.iter().map(|(k, c)| (k.as_slice(), c)).collect();

    let mut tombstones_applied = 0usize;
    for key in &all_keys {
        let on_page = base.get(key).cloned();
        let resolved = match chain_map.get(key.as_slice()) {
            Some(chain) => chain.read(snapshot, on_page.as_deref()),
            None => on_page,
        };
        if resolved.is_none() && chain_map.contains_key(key.as_slice()) {
            tombstones_applied += 1;
        }
        merged.push((key.clone(), resolved));
        resolved_keys.push(key.clone());
    }

    let live: Vec<(Vec<u8>, Vec<u8>)> = merged
        .into_iter()
        .filter_map(|(k, v)| v.map(|v| (k, v)))
        .collect();

    let mut leaves = Vec::new();
    for chunk in live.chunks(PAGE_FANOUT) {
        let page = match table.kind() {
            TableKind::Row => Page::RowLeaf {
                keys: chunk.iter().map(|(k, _)| k.clone()).collect(),
                values: chunk.iter().map(|(_, v)| v.clone()).collect(),
            },
            TableKind::Column => column_leaf_page(chunk),
        };
        leaves.push(block_mgr.write(&page.encode())?);
    }

    table.install_base(live.clone());
    for key in &resolved_keys {
        if let Some(chain) = chain_map.get(key.as_slice()) {
            if chain.trim_obsolete(snapshot.snapshot_max).is_some() {
                // Trimmed tail is dropped here; a real implementation would
                // hand it to the generation stash for delayed reclamation.
            }
        }
        table.retire_chain(key);
    }

    Ok(ReconcileResult {
        leaves,
        keys_written: live.len(),
        tombstones_applied,
    })
}

/// Build a column-store leaf page for one reconciled chunk: bit-packed
/// fixed-width when every value is a single byte, variable-length
/// otherwise (spec §3).
fn column_leaf_page(chunk: &[(Vec<u8>, Vec<u8>)]) -> Page {
    let start_recno = recno_of(&chunk[0].0);
    if chunk.iter().all(|(_, v)| v.len() == 1) {
        let values: Vec<u8> = chunk.iter().map(|(_, v)| v[0]).collect();
        let max = values.iter().copied().max().unwrap_or(0);
        let bit_width = (8 - max.leading_zeros().min(8)).max(1) as u8;
        Page::ColFixLeaf {
            start_recno,
            bit_width,
            entry_count: values.len() as u32,
            packed: pack_fixed(&values, bit_width),
        }
    } else {
        Page::ColVarLeaf {
            start_recno,
            values: chunk.iter().map(|(_, v)| v.clone()).collect(),
        }
    }
}

/// Load a previously-reconciled table back from its leaf cookies (spec
/// §4.7 recovery step "replay the checkpoint's tree into memory").
pub fn load_table(table: &Table, block_mgr: &BlockManager, leaves: &[Cookie]) -> Result<()> {
    let mut entries = Vec::new();
    for &cookie in leaves {
        let buf = block_mgr.read(cookie)?;
        match Page::decode(&buf)? {
            Page::RowLeaf { keys, values } => entries.extend(keys.into_iter().zip(values)),
            Page::ColVarLeaf { start_recno, values } => {
                for (i, value) in values.into_iter().enumerate() {
                    entries.push(((start_recno + i as u64).to_be_bytes().to_vec(), value));
                }
            }
            Page::ColFixLeaf { start_recno, bit_width, entry_count, packed } => {
                for (i, value) in unpack_fixed(&packed, bit_width, entry_count as usize).into_iter().enumerate() {
                    entries.push(((start_recno + i as u64).to_be_bytes().to_vec(), vec![value]));
                }
            }
            _ => {}
        }
    }
    table.install_base(entries);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::memfile::MemFileSystem;
    use crate::fs::{FileHandle, FileSystem};
    use crate::txn::{IsolationLevel, TransactionManager};
    use std::sync::Arc;

    fn new_block_mgr() -> BlockManager {
        let fs = MemFileSystem::new();
        let handle: Arc<dyn FileHandle> = Arc::from(fs.open("t", true).unwrap());
        BlockManager::create(handle, 512).unwrap()
    }

    #[test]
    fn reconcile_writes_visible_values_and_trims_chains() {
        let table = Table::new("t");
        let mgr = TransactionManager::new();
        let txn = mgr.begin(IsolationLevel::Snapshot);
        table.insert(&txn, b"a".to_vec(), b"1".to_vec()).unwrap();
        table.insert(&txn, b"b".to_vec(), b"2".to_vec()).unwrap();
        mgr.end(&txn);

        let block_mgr = new_block_mgr();
        let checkpoint_snapshot = Snapshot::new(txn.id + 1, txn.id + 1, Vec::new());
        let result = reconcile_table(&table, &block_mgr, &checkpoint_snapshot).unwrap();
        assert_eq!(result.keys_written, 2);
        assert_eq!(result.leaves.len(), 1);

        let reloaded = Table::new("t");
        load_table(&reloaded, &block_mgr, &result.leaves).unwrap();
        let read_txn = mgr.begin(IsolationLevel::Snapshot);
        assert_eq!(reloaded.search(&read_txn, b"a"), Some(b"1".to_vec()));
        assert_eq!(reloaded.search(&read_txn, b"b"), Some(b"2".to_vec()));
    }

    #[test]
    fn reconcile_drops_tombstoned_keys() {
        let table = Table::new("t");
        let mgr = TransactionManager::new();
        let t1 = mgr.begin(IsolationLevel::Snapshot);
        table.insert(&t1, b"a".to_vec(), b"1".to_vec()).unwrap();
        mgr.end(&t1);

        let block_mgr = new_block_mgr();
        let snap1 = Snapshot::new(t1.id + 1, t1.id + 1, Vec::new());
        reconcile_table(&table, &block_mgr, &snap1).unwrap();

        let t2 = mgr.begin(IsolationLevel::Snapshot);
        table.remove(&t2, b"a").unwrap();
        mgr.end(&t2);
        let snap2 = Snapshot::new(t2.id + 1, t2.id + 1, Vec::new());
        let result = reconcile_table(&table, &block_mgr, &snap2).unwrap();
        assert_eq!(result.keys_written, 0);
        assert_eq!(result.tombstones_applied, 1);
    }

    #[test]
    fn column_store_reconciles_through_bit_packed_fixed_leaves() {
        let table = Table::new_column("t");
        let mgr = TransactionManager::new();
        let txn = mgr.begin(IsolationLevel::Snapshot);
        let recnos: Vec<u64> = (0..5).map(|i| table.append(&txn, vec![(i % 2) as u8]).unwrap()).collect();
        mgr.end(&txn);

        let block_mgr = new_block_mgr();
        let snapshot = Snapshot::new(txn.id + 1, txn.id + 1, Vec::new());
        let result = reconcile_table(&table, &block_mgr, &snapshot).unwrap();

        let reloaded = Table::new_column("t");
        load_table(&reloaded, &block_mgr, &result.leaves).unwrap();
        let read_txn = mgr.begin(IsolationLevel::Snapshot);
        for (i, &r) in recnos.iter().enumerate() {
            assert_eq!(reloaded.search(&read_txn, &r.to_be_bytes()), Some(vec![(i % 2) as u8]));
        }
    }

    #[test]
    fn column_store_reconciles_through_variable_length_leaves() {
        let table = Table::new_column("t");
        let mgr = TransactionManager::new();
        let txn = mgr.begin(IsolationLevel::Snapshot);
        let r1 = table.append(&txn, b"alpha".to_vec()).unwrap();
        let r2 = table.append(&txn, b"beta".to_vec()).unwrap();
        mgr.end(&txn);

        let block_mgr = new_block_mgr();
        let snapshot = Snapshot::new(txn.id + 1, txn.id + 1, Vec::new());
        let result = reconcile_table(&table, &block_mgr, &snapshot).unwrap();

        let reloaded = Table::new_column("t");
        load_table(&reloaded, &block_mgr, &result.leaves).unwrap();
        let read_txn = mgr.begin(IsolationLevel::Snapshot);
        assert_eq!(reloaded.search(&read_txn, &r1.to_be_bytes()), Some(b"alpha".to_vec()));
        assert_eq!(reloaded.search(&read_txn, &r2.to_be_bytes()), Some(b"beta".to_vec()));
    }

    #[test]
    fn many_keys_split_across_pages() {
        let table = Table::new("t");
        let mgr = TransactionManager::new();
        let txn = mgr.begin(IsolationLevel::Snapshot);
        for i in 0..(PAGE_FANOUT * 2 + 5) {
            table.insert(&txn, format!("k{i:05}").into_bytes(), b"v".to_vec()).unwrap();
        }
        mgr.end(&txn);
        let block_mgr = new_block_mgr();
        let snapshot = Snapshot::new(txn.id + 1, txn.id + 1, Vec::new());
        let result = reconcile_table(&table, &block_mgr, &snapshot).unwrap();
        assert_eq!(result.leaves.len(), 3);
    }
}
