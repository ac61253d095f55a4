#![cfg(test)]

use std::path::Path;

use tracing::Level;
use tracing_subscriber::fmt::Subscriber;

use crate::db::{Db, Options, ReadOptions, WriteOptions};

pub fn init_tracing() {
    let _ = Subscriber::builder()
        .with_max_level(Level::DEBUG)
        .try_init();
}

/// Options for a small, fast test database.
pub fn test_options() -> Options {
    Options {
        create_if_missing: true,
        // Small buffers so tests exercise freeze/flush paths cheaply.
        write_buffer_size: 64 * 1024,
        block_size: 1024,
        ..Options::default()
    }
}

pub fn open_db(path: &Path) -> Db {
    Db::open(path, test_options()).unwrap()
}

pub fn put(db: &Db, key: &[u8], value: &[u8]) {
    db.put(&WriteOptions::default(), key, value).unwrap();
}

pub fn get(db: &Db, key: &[u8]) -> Option<Vec<u8>> {
    db.get(&ReadOptions::default(), key).unwrap()
}
