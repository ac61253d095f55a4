//! Sorted String Table (SSTable) module.
//!
//! This module implements the **immutable**, **block-based** on-disk
//! table: the interchange format shared with the reference
//! implementation.  A table written here opens bit-for-bit in a
//! reference process and vice versa.
//!
//! # On-disk layout
//!
//! ```text
//!     +--------------+-----+--------------+--------------+------------------+-----------------+-------------+--------+
//!     | data block 1 | ... | data block n | filter block | properties block | metaindex block | index block | footer |
//!     +--------------+-----+--------------+--------------+------------------+-----------------+-------------+--------+
//!
//!     Every block is followed by a 5-byte trailer:
//!     compression type (1 byte) ‖ checksum (4 bytes, little-endian).
//! ```
//!
//! For format version 6 the metaindex block moves to the position
//! immediately before the footer and the index block is addressed through
//! the metaindex key `rocksdb.index` instead of the footer:
//!
//! ```text
//!     | data blocks… | filter | properties | index | metaindex | footer |
//! ```
//!
//! # Footer shapes
//!
//! ```text
//!  v0 (48 B):   metaindex_handle ‖ index_handle ‖ zero pad ‖ legacy magic (8 B)
//!  v1–5 (53 B): checksum_type:u8 ‖ metaindex_handle ‖ index_handle ‖ zero pad
//!               ‖ format_version:u32_le ‖ magic (8 B)
//!  v6 (53 B):   checksum_type:u8 ‖ 3E 00 7A 00 ‖ footer_checksum:u32_le
//!               ‖ base_context_checksum:u32_le ‖ metaindex_size:u32_le
//!               ‖ zero pad ‖ format_version:u32_le ‖ magic (8 B)
//! ```
//!
//! The v6 footer checksum is computed over the whole 53 bytes with its
//! own field zeroed, using the checksum module's last-byte rule, then
//! offset-mixed through the context modifier so a footer copied to the
//! wrong position fails verification.
//!
//! # Sub-modules
//!
//! - [`builder`] — [`TableBuilder`]: compose blocks → filter →
//!   properties → metaindex → index → footer.
//! - [`reader`] — [`Table`]: footer sniffing, metaindex walk, lazy
//!   checksummed block reads, point lookups.
//! - [`iterator`] — [`TableIter`]: two-level iteration across blocks.
//! - [`properties`] — the well-known-key properties block.
//!
//! # Concurrency
//!
//! Tables are immutable once written; readers share one memory map and
//! never lock.

pub mod builder;
pub mod iterator;
pub mod properties;
pub mod reader;

#[cfg(test)]
mod tests;

pub use builder::{TableBuilder, TableOptions};
pub use iterator::TableIter;
pub use properties::TableProperties;
pub use reader::{Table, TableLookup};

use thiserror::Error;

use crate::block::BlockError;
use crate::checksum::ChecksumMismatch;
use crate::compression::CompressionError;
use crate::encoding::{self, EncodingError};

// ------------------------------------------------------------------------------------------------
// Wire constants
// ------------------------------------------------------------------------------------------------

/// Magic of block-based tables, format versions ≥ 1.
pub const TABLE_MAGIC: u64 = 0x88e2_41b7_85f4_cff7;

/// Magic of legacy (format version 0) block-based tables.
pub const LEGACY_TABLE_MAGIC: u64 = 0xdb47_7524_8b80_fb57;

/// Magic of plain tables (recognized, not supported).
pub const PLAIN_TABLE_MAGIC: u64 = 0x8242_2296_63bf_9564;

/// Magic of legacy plain tables (recognized, not supported).
pub const LEGACY_PLAIN_TABLE_MAGIC: u64 = 0x4f34_18eb_7a8f_13b8;

/// Magic of cuckoo tables (recognized, not supported).
pub const CUCKOO_TABLE_MAGIC: u64 = 0x9267_89d0_c5f1_7873;

/// Bytes 1..5 of a version-6 footer.
pub const EXTENDED_MAGIC: [u8; 4] = [0x3e, 0x00, 0x7a, 0x00];

/// Compression byte + 4-byte checksum after every block.
pub const BLOCK_TRAILER_SIZE: usize = 5;

/// Encoded size of a legacy footer.
pub const LEGACY_FOOTER_SIZE: usize = 48;

/// Encoded size of a versioned (v1–v6) footer.
pub const FOOTER_SIZE: usize = 53;

/// Maximum encoded size of a [`BlockHandle`] (two 10-byte varints).
pub const MAX_BLOCK_HANDLE_SIZE: usize = 20;

/// Metaindex key of the filter block.
pub const METAINDEX_FILTER_KEY: &str = "filter.rocksdb.BuiltinBloomFilter";

/// Metaindex key of the properties block.
pub const METAINDEX_PROPERTIES_KEY: &str = "rocksdb.properties";

/// Metaindex key of the index block (format version 6).
pub const METAINDEX_INDEX_KEY: &str = "rocksdb.index";

/// Default target size of a data block.
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors returned by table build and read operations.
#[derive(Debug, Error)]
pub enum TableError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Primitive decode failure inside a table structure.
    #[error("corrupt table: {0}")]
    Encoding(#[from] EncodingError),

    /// Malformed block contents.
    #[error(transparent)]
    Block(#[from] BlockError),

    /// Compression codec failure.
    #[error(transparent)]
    Compression(#[from] CompressionError),

    /// A block or footer checksum did not verify.
    #[error(transparent)]
    Checksum(#[from] ChecksumMismatch),

    /// Structural corruption not covered by the variants above.
    #[error("corrupt table: {0}")]
    Corruption(String),

    /// A valid table of a kind this crate does not read.
    #[error("unsupported table kind: {0}")]
    Unsupported(&'static str),
}

// ------------------------------------------------------------------------------------------------
// Block handles
// ------------------------------------------------------------------------------------------------

/// Pointer to the extent of a block within the table file.
///
/// `size` excludes the 5-byte trailer that follows the block on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockHandle {
    /// File offset of the block's first byte.
    pub offset: u64,
    /// Length of the (possibly compressed) block payload.
    pub size: u64,
}

impl BlockHandle {
    /// Creates a handle.
    pub fn new(offset: u64, size: u64) -> Self {
        Self { offset, size }
    }

    /// Appends the varint64 pair `(offset, size)`.
    pub fn encode_to(&self, buf: &mut Vec<u8>) {
        encoding::put_varint64(buf, self.offset);
        encoding::put_varint64(buf, self.size);
    }

    /// Encoded handle bytes.
    pub fn encoded(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(MAX_BLOCK_HANDLE_SIZE);
        self.encode_to(&mut buf);
        buf
    }

    /// Decodes a handle from the start of `src`.
    ///
    /// Returns `(handle, bytes_consumed)`.
    pub fn decode_from(src: &[u8]) -> Result<(Self, usize), TableError> {
        let (offset, n) = encoding::get_varint64(src)
            .map_err(|_| TableError::Corruption("bad block handle".into()))?;
        let (size, m) = encoding::get_varint64(&src[n..])
            .map_err(|_| TableError::Corruption("bad block handle".into()))?;
        Ok((Self { offset, size }, n + m))
    }
}

// ------------------------------------------------------------------------------------------------
// Footer
// ------------------------------------------------------------------------------------------------

use crate::checksum::{ChecksumKind, block_checksum, context_modifier};
use crate::encoding::{decode_fixed32, decode_fixed64, put_fixed32, put_fixed64};

/// The fixed-size structure at the tail of every table file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Footer {
    /// Table format version (0 or 3–6).
    pub format_version: u32,

    /// Checksum function used for every block trailer (and, for v6, the
    /// footer itself).  Always [`ChecksumKind::Crc32c`] for version 0.
    pub checksum_kind: ChecksumKind,

    /// Location of the metaindex block.
    pub metaindex_handle: BlockHandle,

    /// Location of the index block.  Zero for version 6, where the index
    /// is found through the metaindex key `rocksdb.index`.
    pub index_handle: BlockHandle,

    /// Per-file checksum context base; zero disables context mixing.
    /// Only meaningful for version 6.
    pub base_context_checksum: u32,
}

impl Footer {
    /// Encodes the footer as it appears at `footer_offset` in the file.
    ///
    /// The offset matters only for version 6, whose checksum mixes it in.
    pub fn encode(&self, footer_offset: u64) -> Vec<u8> {
        match self.format_version {
            0 => {
                let mut buf = Vec::with_capacity(LEGACY_FOOTER_SIZE);
                self.metaindex_handle.encode_to(&mut buf);
                self.index_handle.encode_to(&mut buf);
                buf.resize(2 * MAX_BLOCK_HANDLE_SIZE, 0);
                put_fixed64(&mut buf, LEGACY_TABLE_MAGIC);
                debug_assert_eq!(buf.len(), LEGACY_FOOTER_SIZE);
                buf
            }
            6 => {
                let mut buf = Vec::with_capacity(FOOTER_SIZE);
                buf.push(self.checksum_kind as u8);
                buf.extend_from_slice(&EXTENDED_MAGIC);
                put_fixed32(&mut buf, 0); // footer checksum, patched below
                put_fixed32(&mut buf, self.base_context_checksum);
                put_fixed32(&mut buf, self.metaindex_handle.size as u32);
                buf.resize(FOOTER_SIZE - 12, 0);
                put_fixed32(&mut buf, self.format_version);
                put_fixed64(&mut buf, TABLE_MAGIC);
                debug_assert_eq!(buf.len(), FOOTER_SIZE);

                let checksum = block_checksum(
                    self.checksum_kind,
                    &buf[..FOOTER_SIZE - 1],
                    buf[FOOTER_SIZE - 1],
                )
                .wrapping_add(context_modifier(self.base_context_checksum, footer_offset));
                buf[5..9].copy_from_slice(&checksum.to_le_bytes());
                buf
            }
            _ => {
                let mut buf = Vec::with_capacity(FOOTER_SIZE);
                buf.push(self.checksum_kind as u8);
                self.metaindex_handle.encode_to(&mut buf);
                self.index_handle.encode_to(&mut buf);
                buf.resize(1 + 2 * MAX_BLOCK_HANDLE_SIZE, 0);
                put_fixed32(&mut buf, self.format_version);
                put_fixed64(&mut buf, TABLE_MAGIC);
                debug_assert_eq!(buf.len(), FOOTER_SIZE);
                buf
            }
        }
    }

    /// Decodes a footer from `tail`, the final bytes of a table file.
    ///
    /// `tail` must hold at least the footer itself ([`FOOTER_SIZE`]
    /// bytes, or [`LEGACY_FOOTER_SIZE`] for version-0 files);
    /// `footer_offset` is the file offset where the footer begins and is
    /// used to verify version-6 context checksums.
    pub fn decode(tail: &[u8], footer_offset: u64) -> Result<Self, TableError> {
        if tail.len() < 8 {
            return Err(TableError::Corruption("file too small for a footer".into()));
        }
        let magic = decode_fixed64(&tail[tail.len() - 8..])?;

        match magic {
            LEGACY_TABLE_MAGIC => Self::decode_legacy(tail),
            TABLE_MAGIC => Self::decode_versioned(tail, footer_offset),
            PLAIN_TABLE_MAGIC | LEGACY_PLAIN_TABLE_MAGIC => {
                Err(TableError::Unsupported("plain table"))
            }
            CUCKOO_TABLE_MAGIC => Err(TableError::Unsupported("cuckoo table")),
            _ => Err(TableError::Corruption("not a table file (bad magic)".into())),
        }
    }

    fn decode_legacy(tail: &[u8]) -> Result<Self, TableError> {
        if tail.len() < LEGACY_FOOTER_SIZE {
            return Err(TableError::Corruption("truncated legacy footer".into()));
        }
        let footer = &tail[tail.len() - LEGACY_FOOTER_SIZE..];
        let (metaindex_handle, n) = BlockHandle::decode_from(footer)?;
        let (index_handle, _) = BlockHandle::decode_from(&footer[n..])?;
        Ok(Self {
            format_version: 0,
            checksum_kind: ChecksumKind::Crc32c,
            metaindex_handle,
            index_handle,
            base_context_checksum: 0,
        })
    }

    fn decode_versioned(tail: &[u8], footer_offset: u64) -> Result<Self, TableError> {
        if tail.len() < FOOTER_SIZE {
            return Err(TableError::Corruption("truncated footer".into()));
        }
        let footer = &tail[tail.len() - FOOTER_SIZE..];

        let checksum_kind = ChecksumKind::from_wire(footer[0]).ok_or_else(|| {
            TableError::Corruption(format!("unknown checksum type {}", footer[0]))
        })?;
        let format_version = decode_fixed32(&footer[FOOTER_SIZE - 12..])?;

        match format_version {
            1..=5 => {
                let (metaindex_handle, n) = BlockHandle::decode_from(&footer[1..])?;
                let (index_handle, _) = BlockHandle::decode_from(&footer[1 + n..])?;
                Ok(Self {
                    format_version,
                    checksum_kind,
                    metaindex_handle,
                    index_handle,
                    base_context_checksum: 0,
                })
            }
            6 => {
                if footer[1..5] != EXTENDED_MAGIC {
                    return Err(TableError::Corruption(
                        "bad extended magic in v6 footer".into(),
                    ));
                }
                let stored_checksum = decode_fixed32(&footer[5..9])?;
                let base_context_checksum = decode_fixed32(&footer[9..13])?;
                let metaindex_size = decode_fixed32(&footer[13..17])?;

                // Recompute with the checksum field zero-filled.
                let mut copy = footer.to_vec();
                copy[5..9].fill(0);
                let computed = block_checksum(
                    checksum_kind,
                    &copy[..FOOTER_SIZE - 1],
                    copy[FOOTER_SIZE - 1],
                )
                .wrapping_add(context_modifier(base_context_checksum, footer_offset));
                if computed != stored_checksum {
                    return Err(TableError::Checksum(ChecksumMismatch {
                        stored: stored_checksum,
                        computed,
                    }));
                }

                let metaindex_start = footer_offset
                    .checked_sub(BLOCK_TRAILER_SIZE as u64 + u64::from(metaindex_size))
                    .ok_or_else(|| {
                        TableError::Corruption("v6 metaindex size exceeds file".into())
                    })?;
                Ok(Self {
                    format_version,
                    checksum_kind,
                    metaindex_handle: BlockHandle::new(
                        metaindex_start,
                        u64::from(metaindex_size),
                    ),
                    index_handle: BlockHandle::default(),
                    base_context_checksum,
                })
            }
            other => Err(TableError::Corruption(format!(
                "unsupported format version {other}"
            ))),
        }
    }
}
