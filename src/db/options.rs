//! Database configuration.
//!
//! [`Options`] is passed to [`Db::open`](crate::db::Db::open);
//! [`WriteOptions`], [`ReadOptions`], and [`FlushOptions`] parameterize
//! individual operations.

use crate::checksum::ChecksumKind;
use crate::compression::CompressionKind;
use crate::keys::COMPARATOR_NAME;

/// Database-wide configuration.
#[derive(Debug, Clone)]
pub struct Options {
    /// Create the database when the directory holds none; opening a
    /// missing database without this fails.
    pub create_if_missing: bool,

    /// Fail when the directory already holds a database.
    pub error_if_exists: bool,

    /// Memtable size that triggers a flush.
    pub write_buffer_size: usize,

    /// Capacity of the open-table cache.
    pub max_open_files: usize,

    /// Target uncompressed data-block size for new tables.
    pub block_size: usize,

    /// Entries between restart points in data blocks.
    pub restart_interval: usize,

    /// Table format version to write: 0 or 3–6.
    pub format_version: u32,

    /// Compression codec for new tables.
    pub compression: CompressionKind,

    /// Checksum function for new tables.
    pub checksum: ChecksumKind,

    /// Bloom bits per key for new tables; 0 disables filters.
    pub filter_bits_per_key: usize,

    /// User-key comparator name.  Only the bytewise comparator is
    /// supported; the name is validated for on-disk interop.
    pub comparator: String,

    /// Verify block checksums on every read.
    pub verify_checksums: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            create_if_missing: false,
            error_if_exists: false,
            write_buffer_size: 64 * 1024 * 1024,
            max_open_files: 64,
            block_size: 4096,
            restart_interval: 16,
            format_version: 5,
            compression: CompressionKind::None,
            checksum: ChecksumKind::Crc32c,
            filter_bits_per_key: 10,
            comparator: COMPARATOR_NAME.to_string(),
            verify_checksums: false,
        }
    }
}

/// Per-write durability knob.
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// Fsync the WAL before acknowledging the write.
    pub sync: bool,
}

/// Per-read options.
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    /// Read as of this sequence number instead of the latest state.
    pub snapshot: Option<u64>,
}

/// Flush behavior.
#[derive(Debug, Clone)]
pub struct FlushOptions {
    /// Block until the flush has been durably installed.
    pub wait: bool,
}

impl Default for FlushOptions {
    fn default() -> Self {
        Self { wait: true }
    }
}
