//! Prefix-compressed key/value blocks.
//!
//! Blocks are the unit of storage inside a table file: data blocks, the
//! index block, the metaindex block, and the properties block all share
//! this one encoding.
//!
//! # On-disk layout
//!
//! ```text
//!       + restart point                + restart point (every restart_interval entries)
//!      /                              /
//!     +---------+---------+----------+---------+-------------------+-----------------+
//!     | entry 1 | entry 2 |   ...    | entry n | restarts[u32_le…] | packed [4 B]    |
//!     +---------+---------+----------+---------+-------------------+-----------------+
//!
//!     entry  = shared(varint32) ‖ unshared(varint32) ‖ value_len(varint32)
//!              ‖ key_delta[unshared] ‖ value[value_len]
//!     packed = (index_type:1 bit << 31) | num_restarts:31 bits, little-endian
//! ```
//!
//! Each entry shares a key prefix with its predecessor; entries at
//! restart points store the full key (`shared = 0`), anchoring the binary
//! search that [`BlockIter::seek`] performs across restart points.  The
//! first restart point is always offset 0.
//!
//! # Invariants
//!
//! - Keys are added in ascending order (per the caller's comparator; data
//!   and index blocks use the internal-key order, meta blocks bytewise).
//! - `shared ≤ len(previous key)` for every entry.
//! - A well-formed block holds at least one restart point; an empty block
//!   (no entries) is well-formed and yields an immediately-invalid
//!   iterator.
//!
//! Any decode failure — bad varint, impossible shared length, truncated
//! key or value, restart array past the block end — is captured as a
//! [`BlockError::Corruption`] on the iterator; once tripped, the iterator
//! stays invalid.

pub mod builder;
pub mod iterator;

#[cfg(test)]
mod tests;

pub use builder::BlockBuilder;
pub use iterator::BlockIter;

use thiserror::Error;

use crate::encoding::decode_fixed32;

/// Size of the `(index_type | num_restarts)` packed word.
const PACKED_FOOTER_SIZE: usize = 4;

/// Mask selecting the 31-bit restart count from the packed word.
const NUM_RESTARTS_MASK: u32 = 0x7fff_ffff;

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors produced while decoding a block.
#[derive(Debug, Error, Clone)]
pub enum BlockError {
    /// The block bytes violate the format.
    #[error("corrupt block: {0}")]
    Corruption(String),
}

// ------------------------------------------------------------------------------------------------
// Block
// ------------------------------------------------------------------------------------------------

/// An immutable, decoded-enough view of one block's bytes.
///
/// Construction validates only the restart array bounds; entries are
/// decoded lazily by [`BlockIter`].
#[derive(Debug)]
pub struct Block {
    /// Full block contents (entries ‖ restarts ‖ packed word).
    data: Vec<u8>,

    /// Byte offset where the restart array begins (== end of entry data).
    restart_offset: usize,

    /// Number of restart points.
    num_restarts: u32,
}

impl Block {
    /// Parses the restart trailer of `data` and wraps it.
    pub fn new(data: Vec<u8>) -> Result<Self, BlockError> {
        if data.len() < PACKED_FOOTER_SIZE {
            return Err(BlockError::Corruption(format!(
                "block too small ({} bytes)",
                data.len()
            )));
        }

        let packed = decode_fixed32(&data[data.len() - PACKED_FOOTER_SIZE..])
            .map_err(|e| BlockError::Corruption(e.to_string()))?;
        let index_type = packed >> 31;
        let num_restarts = packed & NUM_RESTARTS_MASK;

        if index_type != 0 {
            return Err(BlockError::Corruption(
                "unsupported block index type".into(),
            ));
        }
        if num_restarts == 0 {
            return Err(BlockError::Corruption("block has no restart points".into()));
        }

        let restarts_size = num_restarts as usize * 4;
        let trailer = restarts_size + PACKED_FOOTER_SIZE;
        if trailer > data.len() {
            return Err(BlockError::Corruption(format!(
                "restart array ({num_restarts} points) exceeds block of {} bytes",
                data.len()
            )));
        }
        let restart_offset = data.len() - trailer;

        Ok(Self {
            data,
            restart_offset,
            num_restarts,
        })
    }

    /// Number of restart points in this block.
    #[inline]
    pub fn num_restarts(&self) -> u32 {
        self.num_restarts
    }

    /// Byte offset of the `index`-th restart entry.
    ///
    /// # Panics
    ///
    /// Debug-asserts `index < num_restarts`; callers iterate within
    /// bounds by construction.
    #[inline]
    pub(crate) fn restart_point(&self, index: u32) -> u32 {
        debug_assert!(index < self.num_restarts);
        let at = self.restart_offset + index as usize * 4;
        u32::from_le_bytes(self.data[at..at + 4].try_into().expect("4-byte slice"))
    }

    /// End of the entry region (start of the restart array).
    #[inline]
    pub(crate) fn entries_end(&self) -> usize {
        self.restart_offset
    }

    /// Raw block bytes.
    #[inline]
    pub(crate) fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// True if the block holds no entries at all.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.restart_offset == 0
    }
}
