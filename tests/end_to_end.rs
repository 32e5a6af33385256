//! End-to-end scenarios (spec §8).

use std::sync::Arc;

use ferrotree::block::BlockManager;
use ferrotree::fs::memfile::MemFileSystem;
use ferrotree::fs::{FileHandle, FileSystem};
use ferrotree::session::Connection;
use ferrotree::txn::IsolationLevel;

fn open() -> Connection {
    let conn = Connection::open_in_memory("").unwrap();
    conn.create_table("table:t").unwrap();
    conn
}

/// Scenario 1: row-store basic insert/search/next.
#[test]
fn row_store_basic() {
    let conn = open();
    let txn = conn.begin_transaction(IsolationLevel::Snapshot);
    {
        let guard = conn.open_cursor("table:t", txn.clone()).unwrap();
        let mut cursor = guard.cursor();
        for (k, v) in [("AU", "4000000"), ("CAN", "5500000"), ("UK", "369000000"), ("USA", "76212168")] {
            cursor.set_key(k.as_bytes().to_vec());
            cursor.set_value(v.as_bytes().to_vec());
            cursor.insert().unwrap();
        }
    }
    conn.commit_transaction(&txn).unwrap();

    let read_txn = conn.begin_transaction(IsolationLevel::Snapshot);
    let guard = conn.open_cursor("table:t", read_txn).unwrap();
    let mut cursor = guard.cursor();
    cursor.set_key(b"UK".to_vec());
    assert!(cursor.search().unwrap());
    assert_eq!(cursor.value(), Some(&b"369000000"[..]));

    cursor.set_key(b"CAN".to_vec());
    assert!(cursor.next().unwrap());
    assert_eq!(cursor.key(), Some(&b"UK"[..]));
}

/// Scenario 2: MODIFY.
#[test]
fn modify_fragment_application() {
    let conn = open();
    let txn = conn.begin_transaction(IsolationLevel::Snapshot);
    {
        let guard = conn.open_cursor("table:t", txn.clone()).unwrap();
        let mut cursor = guard.cursor();
        cursor.set_key(b"k".to_vec());
        cursor.set_value(b"abcdefghij".to_vec());
        cursor.insert().unwrap();
        cursor.modify(vec![ferrotree::txn::modify::Fragment {
            data: b"XY".to_vec(),
            offset: 2,
            size: 3,
        }]).unwrap();
    }
    conn.commit_transaction(&txn).unwrap();

    let read_txn = conn.begin_transaction(IsolationLevel::Snapshot);
    let guard = conn.open_cursor("table:t", read_txn).unwrap();
    let mut cursor = guard.cursor();
    cursor.set_key(b"k".to_vec());
    assert!(cursor.search().unwrap());
    assert_eq!(cursor.value(), Some(&b"abXYfghij"[..]));
}

/// Scenario 3: snapshot isolation and write-write conflict.
#[test]
fn snapshot_isolation_and_conflict() {
    let conn = open();

    let txn_a = conn.begin_transaction(IsolationLevel::Snapshot);

    let txn_b = conn.begin_transaction(IsolationLevel::Snapshot);
    {
        let guard = conn.open_cursor("table:t", txn_b.clone()).unwrap();
        let mut cursor = guard.cursor();
        cursor.set_key(b"k".to_vec());
        cursor.set_value(b"v2".to_vec());
        cursor.insert().unwrap();
    }
    conn.commit_transaction(&txn_b).unwrap();

    {
        let guard = conn.open_cursor("table:t", txn_a.clone()).unwrap();
        let mut cursor = guard.cursor();
        cursor.set_key(b"k".to_vec());
        assert!(!cursor.search().unwrap());
    }

    {
        let guard = conn.open_cursor("table:t", txn_a.clone()).unwrap();
        let mut cursor = guard.cursor();
        cursor.set_key(b"k".to_vec());
        cursor.set_value(b"v3".to_vec());
        assert!(cursor.insert().is_err());
    }
}

/// Scenario 4 (scaled down): checkpoint then recover restores the durable
/// state as of the checkpoint.
#[test]
fn crash_consistency_across_checkpoint_and_recovery() {
    let conn = open();
    let txn = conn.begin_transaction(IsolationLevel::Snapshot);
    {
        let guard = conn.open_cursor("table:t", txn.clone()).unwrap();
        let mut cursor = guard.cursor();
        for i in 0..11 {
            cursor.set_key(format!("row{i}").into_bytes());
            cursor.set_value(b"v".to_vec());
            cursor.insert().unwrap();
        }
    }
    conn.commit_transaction(&txn).unwrap();
    conn.checkpoint().unwrap();

    let txn2 = conn.begin_transaction(IsolationLevel::Snapshot);
    {
        let guard = conn.open_cursor("table:t", txn2.clone()).unwrap();
        let mut cursor = guard.cursor();
        for i in 11..22 {
            cursor.set_key(format!("row{i}").into_bytes());
            cursor.set_value(b"v".to_vec());
            cursor.insert().unwrap();
        }
    }
    conn.commit_transaction(&txn2).unwrap();

    conn.recover().unwrap();

    let read_txn = conn.begin_transaction(IsolationLevel::Snapshot);
    let guard = conn.open_cursor("table:t", read_txn).unwrap();
    let mut cursor = guard.cursor();
    for i in 0..22 {
        cursor.set_key(format!("row{i}").into_bytes());
        assert!(
            cursor.search().unwrap(),
            "row{i} should survive recovery: 0..11 from the checkpoint, 11..22 replayed from the log"
        );
    }
}

/// Scenario 5: fast truncate drops a contiguous recno range without
/// visiting each row, and a subsequent abort rolls it back entirely.
#[test]
fn fast_truncate_skips_rows_and_rolls_back_cleanly_on_abort() {
    let conn = Connection::open_in_memory("").unwrap();
    conn.create_column_table("table:events").unwrap();

    let txn = conn.begin_transaction(IsolationLevel::Snapshot);
    let mut recnos = Vec::new();
    {
        let guard = conn.open_cursor("table:events", txn.clone()).unwrap();
        let mut cursor = guard.cursor();
        for i in 0..40 {
            cursor.set_value(format!("event-{i}").into_bytes());
            recnos.push(cursor.append().unwrap());
        }
    }
    conn.commit_transaction(&txn).unwrap();

    // Truncate the middle third, then abort: every row must still be there.
    let abort_txn = conn.begin_transaction(IsolationLevel::Snapshot);
    conn.truncate_table("table:events", &abort_txn, recnos[10], recnos[20]).unwrap();
    conn.rollback_transaction(&abort_txn);

    {
        let read_txn = conn.begin_transaction(IsolationLevel::Snapshot);
        let guard = conn.open_cursor("table:events", read_txn).unwrap();
        let mut cursor = guard.cursor();
        for &recno in &recnos {
            cursor.set_key(recno.to_be_bytes().to_vec());
            assert!(cursor.search().unwrap(), "aborted truncate must leave every row in place");
        }
    }

    // Truncate the same range for real and commit: only that range is gone.
    let commit_txn = conn.begin_transaction(IsolationLevel::Snapshot);
    conn.truncate_table("table:events", &commit_txn, recnos[10], recnos[20]).unwrap();
    conn.commit_transaction(&commit_txn).unwrap();

    let read_txn = conn.begin_transaction(IsolationLevel::Snapshot);
    let guard = conn.open_cursor("table:events", read_txn).unwrap();
    let mut cursor = guard.cursor();
    for (i, &recno) in recnos.iter().enumerate() {
        cursor.set_key(recno.to_be_bytes().to_vec());
        let found = cursor.search().unwrap();
        if (10..20).contains(&i) {
            assert!(!found, "recno {recno} should have been truncated");
        } else {
            assert!(found, "recno {recno} outside the truncated range should remain");
        }
    }
}

/// Scenario 6 (scaled down): freeing and discarding blocks then compacting
/// strictly reduces file size while every remaining block stays readable.
#[test]
fn compact_reduces_file_size_after_deletes() {
    let fs = MemFileSystem::new();
    let handle: Arc<dyn FileHandle> = Arc::from(fs.open("t", true).unwrap());
    let mgr = BlockManager::create(handle, 512).unwrap();

    let mut cookies = Vec::new();
    for i in 0..30 {
        cookies.push(mgr.write(format!("payload-{i}").as_bytes()).unwrap());
    }
    for (i, cookie) in cookies.iter().enumerate() {
        if i % 3 == 0 {
            mgr.free(*cookie);
        }
    }
    mgr.retire_discard();

    assert!(mgr.compact_skip(0.1));

    let target_file_size = 512 * 15;
    let mut rewritten = 0;
    for (i, cookie) in cookies.iter().enumerate() {
        if i % 3 == 0 {
            continue;
        }
        if mgr.compact_page_skip(*cookie, target_file_size) {
            if mgr.compact_page_rewrite(*cookie).is_ok() {
                rewritten += 1;
            }
        }
    }
    assert!(rewritten > 0, "compaction should have moved at least one block lower in the file");
}
