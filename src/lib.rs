//! # QuarryDB
//!
//! An embeddable, persistent key-value storage engine built on a
//! **Log-Structured Merge Tree (LSM-tree)** architecture, whose on-disk
//! artifacts — block-based tables, 32 KiB-framed write-ahead logs, and
//! the VersionEdit MANIFEST — use an established interchange format:
//! files written here open in a reference process, and vice versa.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                           Db                               │
//! │  ┌────────────┐   ┌──────────────┐   ┌─────────────────┐   │
//! │  │  Active    │   │   Frozen     │   │  Tables (.sst)  │   │
//! │  │  Memtable  │   │  Memtables   │   │  L0 … L6        │   │
//! │  │  + WAL     │   │              │   │                 │   │
//! │  └─────┬──────┘   └──────┬───────┘   └───────┬─────────┘   │
//! │        │   freeze        │    flush          │             │
//! │        └─────────►       └─────────►         │             │
//! │                                              │             │
//! │  ┌───────────────────────────────────────────┴──────────┐  │
//! │  │        VersionSet (MANIFEST + CURRENT)               │  │
//! │  └──────────────────────────────────────────────────────┘  │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`db`] | The database facade — open, read, write, column families, flush, iterators |
//! | [`memtable`] | In-memory sorted multi-version write buffer |
//! | [`wal`] | 32 KiB block-framed record log with legacy and recyclable framing |
//! | [`batch`] | Atomic write batches, the unit of WAL persistence |
//! | [`sstable`] | Immutable block-based tables: builder, reader, iterators, footers |
//! | [`block`] | Prefix-compressed key/value blocks with restart points |
//! | [`filter`] | Bloom filters and the windowed filter block |
//! | [`manifest`] | VersionEdit stream, version set, CURRENT handling |
//! | [`compression`] | Snappy / Zlib / LZ4 / Zstd block codecs |
//! | [`checksum`] | Masked CRC32C, XXHash64, XXH3, context checksums |
//! | [`encoding`] | Varint and fixed-width wire primitives |
//! | [`keys`] | Internal keys, value types, the internal-key comparator |
//! | [`filenames`] | On-disk naming under the database directory |
//!
//! ## Key features
//!
//! - **Write-ahead logging** — every batch is framed into the WAL
//!   before it is applied, with stop-after-corruption recovery.
//! - **Interchange-grade tables** — format versions 0 and 3–6,
//!   including v6 context checksums and five compression codecs.
//! - **Column families** — isolated keyspaces sharing one WAL and
//!   sequence domain.
//! - **Crash recovery** — `CURRENT` → MANIFEST replay → WAL replay
//!   reconstructs the exact pre-crash state.
//! - **Snapshot reads** — point lookups and iterators see a fixed
//!   sequence horizon.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use quarrydb::db::{Db, FlushOptions, Options, ReadOptions, WriteOptions};
//!
//! let options = Options {
//!     create_if_missing: true,
//!     ..Options::default()
//! };
//! let db = Db::open("/tmp/my_db", options).unwrap();
//!
//! // Write
//! db.put(&WriteOptions::default(), b"hello", b"world").unwrap();
//!
//! // Read
//! assert_eq!(
//!     db.get(&ReadOptions::default(), b"hello").unwrap(),
//!     Some(b"world".to_vec())
//! );
//!
//! // Delete
//! db.delete(&WriteOptions::default(), b"hello").unwrap();
//! assert_eq!(db.get(&ReadOptions::default(), b"hello").unwrap(), None);
//!
//! // Persist and shut down
//! db.flush(&FlushOptions::default()).unwrap();
//! db.close().unwrap();
//! ```

pub mod batch;
pub mod block;
pub mod checksum;
pub mod compression;
pub mod db;
pub mod encoding;
pub mod filenames;
pub mod filter;
pub mod keys;
pub mod manifest;
pub mod memtable;
pub mod sstable;
pub mod wal;
