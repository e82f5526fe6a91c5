//! Transaction log benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use kernstore_core::log::{log_entries, start_checksum, LogEntry, LogFiles, StartEntry};
use kernstore_core::store::PropertyRecord;
use kernstore_core::{Command, Config, Database, LogPosition, TransactionId};
use kernstore_storage::EphemeralFileSystem;
use rand::Rng;
use std::path::Path;
use std::sync::Arc;

fn start_entry() -> StartEntry {
    let mut rng = rand::thread_rng();
    StartEntry {
        master_id: 1,
        local_id: 1,
        global_id: rng.gen(),
        time_written: 0,
        last_committed_tx_when_started: TransactionId::BASE,
        additional_header: Vec::new(),
        start_position: LogPosition::new(0, 38),
    }
}

/// Benchmark framing single entries.
fn bench_encode_frame(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_frame");

    let start = LogEntry::Start(start_entry());
    group.bench_function("start", |b| {
        b.iter(|| black_box(start.encode_frame().unwrap()));
    });

    let command = LogEntry::Command(Command::Property(PropertyRecord {
        id: 17,
        in_use: true,
        key: 3,
        value: -42,
        next_prop: Some(18),
    }));
    group.bench_function("property_command", |b| {
        b.iter(|| black_box(command.encode_frame().unwrap()));
    });
    group.finish();
}

/// Benchmark the start entry checksum.
fn bench_start_checksum(c: &mut Criterion) {
    let start = start_entry();
    c.bench_function("start_checksum", |b| {
        b.iter(|| {
            black_box(start_checksum(
                black_box(start.master_id),
                black_box(start.local_id),
                black_box(&start.global_id),
            ))
        });
    });
}

/// Writes `transactions` committed transactions to a fresh log.
fn populated(transactions: u64) -> (EphemeralFileSystem, Database) {
    let fs = EphemeralFileSystem::new();
    let db = Database::open_with_fs(
        Arc::new(fs.clone()),
        Path::new("/bench"),
        Config::default().sync_on_commit(false),
    )
    .unwrap();
    for round in 0..transactions {
        db.transaction(|tx| {
            let node = tx.create_node()?;
            tx.set_node_property(node, 1, round as i64)
        })
        .unwrap();
    }
    (fs, db)
}

/// Benchmark reading back whole log files.
fn bench_read_log(c: &mut Criterion) {
    let mut group = c.benchmark_group("read_log");
    group.sample_size(30);

    for transactions in [100u64, 1000].iter() {
        group.throughput(Throughput::Elements(*transactions));
        group.bench_with_input(
            BenchmarkId::new("entries", transactions),
            transactions,
            |b, &transactions| {
                let (fs, db) = populated(transactions);
                db.close().unwrap();
                let log = LogFiles::new(Arc::new(fs.clone()), "/bench").version_file(0);

                b.iter(|| black_box(log_entries(Arc::new(fs.clone()), &log).unwrap()));
            },
        );
        group.bench_with_input(
            BenchmarkId::new("committed_transactions", transactions),
            transactions,
            |b, &transactions| {
                let (_fs, db) = populated(transactions);

                b.iter(|| {
                    black_box(
                        db.committed_transactions_since(TransactionId::BASE)
                            .unwrap(),
                    )
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_encode_frame, bench_start_checksum, bench_read_log);
criterion_main!(benches);
