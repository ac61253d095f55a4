#![cfg(test)]

use std::path::Path;

use tracing::Level;
use tracing_subscriber::fmt::Subscriber;

use crate::keys::{ValueType, make_internal_key};
use crate::sstable::{Table, TableBuilder, TableOptions, reader::TableReadOptions};

pub fn init_tracing() {
    let _ = Subscriber::builder()
        .with_max_level(Level::TRACE)
        .try_init();
}

/// `(internal_key, value)` for a put at the given sequence.
pub fn put(user_key: &[u8], seq: u64, value: &[u8]) -> (Vec<u8>, Vec<u8>) {
    (
        make_internal_key(user_key, seq, ValueType::Value as u8),
        value.to_vec(),
    )
}

/// `(internal_key, empty)` for a point tombstone.
pub fn del(user_key: &[u8], seq: u64) -> (Vec<u8>, Vec<u8>) {
    (
        make_internal_key(user_key, seq, ValueType::Deletion as u8),
        Vec::new(),
    )
}

/// Builds a table at `path` from pre-sorted entries.
pub fn build_table(path: &Path, options: TableOptions, entries: &[(Vec<u8>, Vec<u8>)]) -> u64 {
    let mut builder = TableBuilder::create(path, options).unwrap();
    for (k, v) in entries {
        builder.add(k, v).unwrap();
    }
    builder.finish().unwrap()
}

/// Opens a table with checksum verification on.
pub fn open_table(path: &Path) -> Table {
    Table::open(
        path,
        TableReadOptions {
            verify_checksums: true,
        },
    )
    .unwrap()
}

/// Collects all entries by forward iteration.
pub fn collect_entries(table: &Table) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut iter = table.iter();
    iter.seek_to_first();
    let mut out = Vec::new();
    while iter.valid() {
        out.push((iter.key().to_vec(), iter.value().to_vec()));
        iter.next();
    }
    iter.take_status().unwrap();
    out
}
