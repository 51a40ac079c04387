//! Ranking benchmarks
//!
//! Measures the cost of the writer's hot path: deduplicated ranked inserts and
//! deriving the whale view for a threshold.

use alloy::primitives::{Address, TxHash, B256};
use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};

use whalewatch_monitor::filter::Threshold;
use whalewatch_monitor::record::TransactionRecord;
use whalewatch_monitor::store::TransactionBook;

fn records(count: u64) -> Vec<TransactionRecord> {
    (0..count)
        .map(|i| {
            let hash = TxHash::from(B256::left_padding_from(&i.to_be_bytes()));
            let value = ((i * 7919) % 10_000) as f64 / 10.0;
            TransactionRecord::new(hash, Address::ZERO, None, value, i, None)
        })
        .collect()
}

/// Benchmark admitting records into a populated book
fn bench_admit(c: &mut Criterion) {
    let batch = records(5_000);

    c.bench_function("admit_5000_records", |b| {
        b.iter_batched(
            || batch.clone(),
            |batch| {
                let mut book = TransactionBook::new(None);
                for record in batch {
                    black_box(book.admit(record));
                }
                book
            },
            BatchSize::SmallInput,
        )
    });
}

/// Benchmark deriving the whale view
fn bench_derive_view(c: &mut Criterion) {
    let mut book = TransactionBook::new(None);
    for record in records(10_000) {
        book.admit(record);
    }
    let threshold = Threshold::new(500.0).unwrap_or_default();

    c.bench_function("derive_view_10000_records", |b| {
        b.iter(|| black_box(book.whales(black_box(threshold))))
    });
}

/// Benchmark bounded inserts that evict the lowest record
fn bench_admit_bounded(c: &mut Criterion) {
    let batch = records(5_000);

    c.bench_function("admit_5000_records_bounded_1000", |b| {
        b.iter_batched(
            || batch.clone(),
            |batch| {
                let mut book = TransactionBook::new(Some(1_000));
                for record in batch {
                    black_box(book.admit(record));
                }
                book
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench_admit, bench_derive_view, bench_admit_bounded);
criterion_main!(benches);
