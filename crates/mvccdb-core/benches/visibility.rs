use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use mvccdb_core::table::{BaseTable, Column};
use mvccdb_core::txn::{IsolationLevel, TransactionManager, TxnState};
use mvccdb_core::value::Value;

fn seed_table(rows: u64) -> (std::sync::Arc<TransactionManager>, std::sync::Arc<BaseTable>) {
    let manager = TransactionManager::new();
    let table = BaseTable::new("bench", vec![Column::new("name"), Column::new("age")]);
    let tx = manager.init_transaction(IsolationLevel::CommittedRead, 1_000);
    for i in 0..rows {
        table
            .insert(
                vec![Value::Text(format!("row-{i}")), Value::Integer(i as i64)],
                &tx,
                &manager,
            )
            .unwrap();
    }
    manager.end_transaction(&tx, TxnState::Committed).unwrap();
    (manager, table)
}

fn bench_full_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("visibility_full_scan");
    for &rows in &[100u64, 1_000, 10_000] {
        let (manager, table) = seed_table(rows);
        group.bench_with_input(BenchmarkId::from_parameter(rows), &rows, |b, _| {
            b.iter(|| {
                let reader = manager.init_transaction(IsolationLevel::CommittedRead, 1_000);
                let mut iter = table.new_iterator(&reader, &manager, false, false).unwrap();
                let mut count = 0u64;
                while iter.next_matching(|_| Ok(true)).unwrap().is_some() {
                    count += 1;
                }
                assert_eq!(count, rows);
            });
        });
    }
    group.finish();
}

fn bench_scan_with_deep_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("visibility_deep_chain");
    for &updates in &[1u64, 10, 100] {
        let (manager, table) = seed_table(1);
        for _ in 0..updates {
            let tx = manager.init_transaction(IsolationLevel::CommittedRead, 1_000);
            table
                .update(1, vec![Value::Text("row-0".to_string()), Value::Integer(0)], &tx, &manager)
                .unwrap();
            manager.end_transaction(&tx, TxnState::Committed).unwrap();
        }
        group.bench_with_input(BenchmarkId::from_parameter(updates), &updates, |b, _| {
            b.iter(|| {
                let reader = manager.init_transaction(IsolationLevel::CommittedRead, 1_000);
                let mut iter = table.new_iterator(&reader, &manager, false, false).unwrap();
                while iter.next_matching(|_| Ok(true)).unwrap().is_some() {}
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_full_scan, bench_scan_with_deep_chain);
criterion_main!(benches);
