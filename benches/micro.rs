//! Micro-benchmarks for QuarryDB core operations.
//!
//! Uses Criterion for statistically rigorous measurement with regression
//! detection and HTML reports.
//!
//! # Running
//!
//! ```bash
//! cargo bench --bench micro              # run all micro-benchmarks
//! cargo bench --bench micro -- put       # filter by name
//! ```
//!
//! Reports are generated in `target/criterion/report/index.html`.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;

use quarrydb::db::{Db, FlushOptions, Options, ReadOptions, WriteOptions};
use tempfile::TempDir;

// ------------------------------------------------------------------------------------------------
// Helpers
// ------------------------------------------------------------------------------------------------

/// Default value payload for benchmarks (128 bytes).
const VALUE_128B: &[u8; 128] = &[0xab; 128];

/// Larger value payload (1 KiB).
const VALUE_1K: &[u8; 1024] = &[0xcd; 1024];

/// Format a zero-padded key.
fn make_key(i: u64) -> Vec<u8> {
    format!("key-{i:012}").into_bytes()
}

/// Open a database with a large write buffer so all data stays in the
/// memtable (no background flushes).
fn open_memtable_only(dir: &std::path::Path) -> Db {
    Db::open(
        dir,
        Options {
            create_if_missing: true,
            write_buffer_size: 64 * 1024 * 1024,
            ..Options::default()
        },
    )
    .expect("open")
}

/// Pre-populate a database with `count` sequential keys, flush, and
/// close it, so tables exist on disk.
fn prepopulate(dir: &std::path::Path, count: u64, value: &[u8]) {
    let db = open_memtable_only(dir);
    let wo = WriteOptions::default();
    for i in 0..count {
        db.put(&wo, &make_key(i), value).unwrap();
    }
    db.flush(&FlushOptions::default()).unwrap();
    db.close().unwrap();
}

// ------------------------------------------------------------------------------------------------
// Write benchmarks
// ------------------------------------------------------------------------------------------------

/// The raw cost of the WAL append plus the memtable insert, for two
/// payload sizes.  The write buffer is large enough that no flush runs
/// during measurement.
fn bench_put(c: &mut Criterion) {
    let mut group = c.benchmark_group("put");

    for &(label, value) in &[("128B", VALUE_128B.as_slice()), ("1K", VALUE_1K.as_slice())] {
        group.throughput(Throughput::Bytes(value.len() as u64));
        group.bench_function(BenchmarkId::new("memtable_only", label), |b| {
            let dir = TempDir::new().unwrap();
            let db = open_memtable_only(dir.path());
            let wo = WriteOptions::default();
            let mut seq = 0u64;

            b.iter(|| {
                let key = make_key(seq);
                db.put(&wo, black_box(&key), black_box(value)).unwrap();
                seq += 1;
            });

            db.close().unwrap();
        });
    }

    group.finish();
}

// ------------------------------------------------------------------------------------------------
// Read benchmarks
// ------------------------------------------------------------------------------------------------

/// Point lookups against the memtable and against flushed tables.
fn bench_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("get");
    const KEYS: u64 = 10_000;

    group.bench_function("memtable_hit", |b| {
        let dir = TempDir::new().unwrap();
        let db = open_memtable_only(dir.path());
        let wo = WriteOptions::default();
        for i in 0..KEYS {
            db.put(&wo, &make_key(i), VALUE_128B).unwrap();
        }
        let ro = ReadOptions::default();
        let mut seq = 0u64;

        b.iter(|| {
            let key = make_key(seq % KEYS);
            black_box(db.get(&ro, &key).unwrap());
            seq += 1;
        });

        db.close().unwrap();
    });

    group.bench_function("table_hit", |b| {
        let dir = TempDir::new().unwrap();
        prepopulate(dir.path(), KEYS, VALUE_128B);
        let db = open_memtable_only(dir.path());
        let ro = ReadOptions::default();
        let mut seq = 0u64;

        b.iter(|| {
            let key = make_key(seq % KEYS);
            black_box(db.get(&ro, &key).unwrap());
            seq += 1;
        });

        db.close().unwrap();
    });

    group.bench_function("table_miss", |b| {
        let dir = TempDir::new().unwrap();
        prepopulate(dir.path(), KEYS, VALUE_128B);
        let db = open_memtable_only(dir.path());
        let ro = ReadOptions::default();
        let mut seq = 0u64;

        // Absent keys: the bloom filter rejects most block reads.
        b.iter(|| {
            let key = format!("absent-{seq:012}").into_bytes();
            black_box(db.get(&ro, &key).unwrap());
            seq += 1;
        });

        db.close().unwrap();
    });

    group.finish();
}

// ------------------------------------------------------------------------------------------------
// Scan benchmarks
// ------------------------------------------------------------------------------------------------

/// Full iteration over a flushed database.
fn bench_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("scan");
    const KEYS: u64 = 10_000;
    group.throughput(Throughput::Elements(KEYS));

    group.bench_function("full_table_scan", |b| {
        let dir = TempDir::new().unwrap();
        prepopulate(dir.path(), KEYS, VALUE_128B);
        let db = open_memtable_only(dir.path());
        let ro = ReadOptions::default();

        b.iter(|| {
            let mut iter = db.new_iterator(&ro).unwrap();
            iter.seek_to_first();
            let mut n = 0u64;
            while iter.valid() {
                black_box(iter.key());
                iter.next();
                n += 1;
            }
            assert_eq!(n, KEYS);
        });

        db.close().unwrap();
    });

    group.finish();
}

criterion_group!(benches, bench_put, bench_get, bench_scan);
criterion_main!(benches);
