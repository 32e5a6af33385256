use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use ferrotree::btree::cursor::Cursor;
use ferrotree::btree::Table;
use ferrotree::txn::{IsolationLevel, TransactionManager};

fn bench_insert(c: &mut Criterion) {
    c.bench_function("table_insert_sequential", |b| {
        b.iter_batched(
            || (Table::new("bench"), TransactionManager::new()),
            |(table, mgr)| {
                let txn = mgr.begin(IsolationLevel::Snapshot);
                let mut cursor = Cursor::new(&table, std::sync::Arc::new(txn));
                for i in 0..1000u32 {
                    cursor.set_key(i.to_be_bytes().to_vec());
                    cursor.set_value(b"value".to_vec());
                    cursor.insert().unwrap();
                }
            },
            BatchSize::SmallInput,
        );
    });
}

fn bench_search(c: &mut Criterion) {
    let table = Table::new("bench");
    let mgr = TransactionManager::new();
    let txn = mgr.begin(IsolationLevel::Snapshot);
    {
        let mut cursor = Cursor::new(&table, std::sync::Arc::new(txn));
        for i in 0..10_000u32 {
            cursor.set_key(i.to_be_bytes().to_vec());
            cursor.set_value(b"value".to_vec());
            cursor.insert().unwrap();
        }
    }

    c.bench_function("table_search_hit", |b| {
        let read_txn = std::sync::Arc::new(mgr.begin(IsolationLevel::Snapshot));
        b.iter(|| {
            let mut cursor = Cursor::new(&table, read_txn.clone());
            cursor.set_key(5_000u32.to_be_bytes().to_vec());
            cursor.search().unwrap();
        });
    });
}

criterion_group!(benches, bench_insert, bench_search);
criterion_main!(benches);
