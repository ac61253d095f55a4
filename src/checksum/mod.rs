//! Block and footer checksums.
//!
//! Every persisted block carries a 5-byte trailer: a compression-type
//! byte followed by a 4-byte checksum computed over the block contents
//! *and* that type byte.  Four checksum functions are supported, selected
//! by the table's checksum-type byte and identified on the wire by the
//! values of [`ChecksumKind`].
//!
//! # Masked CRC32C
//!
//! The default function is CRC-32 with the Castagnoli polynomial, stored
//! in *masked* form so that checksumming a buffer that itself contains
//! an embedded CRC stays well-behaved:
//!
//! ```text
//! mask(crc)   = ((crc >> 15) | (crc << 17)) + 0xA282EAD8
//! unmask(m)   = rot = m - 0xA282EAD8; (rot >> 17) | (rot << 15)
//! ```
//!
//! # XXH3 and the last-byte fold
//!
//! XXH3 checksums hash the block contents *without* the trailing type
//! byte and then fold that byte in separately:
//!
//! ```text
//! v = low32(XXH3_64(data)); v ^= last_byte * 0x6B9083D9
//! ```
//!
//! # Context checksums (format version 6)
//!
//! Version-6 tables additionally mix the block's file offset into every
//! stored checksum through a per-file base value, so a block (or footer)
//! copied to the wrong offset fails verification:
//!
//! ```text
//! modifier(base, offset) = 0                          if base == 0
//!                        = base ^ (lo32(offset) + hi32(offset))
//! stored = computed + modifier          (wrapping arithmetic)
//! ```

#[cfg(test)]
mod tests;

use thiserror::Error;

/// Mask delta applied to CRC32C values before they are stored.
const MASK_DELTA: u32 = 0xa282_ead8;

/// Multiplier used to fold a block's final byte into an XXH3 checksum.
const LAST_BYTE_PRIME: u32 = 0x6b90_83d9;

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Checksum verification failure.
#[derive(Debug, Error)]
#[error("checksum mismatch (stored {stored:#010x}, computed {computed:#010x})")]
pub struct ChecksumMismatch {
    /// Checksum read from disk.
    pub stored: u32,
    /// Checksum recomputed from the data.
    pub computed: u32,
}

// ------------------------------------------------------------------------------------------------
// Checksum kinds
// ------------------------------------------------------------------------------------------------

/// On-wire checksum function identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChecksumKind {
    /// No checksum; stored value is always zero.
    None = 0,
    /// Masked CRC-32 (Castagnoli polynomial). The default.
    Crc32c = 1,
    /// 32-bit XXHash, seed 0.
    XxHash = 2,
    /// 64-bit XXHash, seed 0, truncated to the low 32 bits.
    XxHash64 = 3,
    /// XXH3 (64-bit), truncated, with the last-byte fold.
    Xxh3 = 4,
}

impl ChecksumKind {
    /// Decodes a checksum-type byte from a footer or options snapshot.
    pub fn from_wire(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::None),
            1 => Some(Self::Crc32c),
            2 => Some(Self::XxHash),
            3 => Some(Self::XxHash64),
            4 => Some(Self::Xxh3),
            _ => None,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Masked CRC32C
// ------------------------------------------------------------------------------------------------

/// Raw CRC32C over `data`.
#[inline]
pub fn crc32c_value(data: &[u8]) -> u32 {
    crc32c::crc32c(data)
}

/// Masks a raw CRC so it can safely be stored inside checksummed data.
#[inline]
pub fn mask_crc(crc: u32) -> u32 {
    ((crc >> 15) | (crc << 17)).wrapping_add(MASK_DELTA)
}

/// Inverse of [`mask_crc`].
#[inline]
pub fn unmask_crc(masked: u32) -> u32 {
    let rot = masked.wrapping_sub(MASK_DELTA);
    (rot >> 17) | (rot << 15)
}

/// Masked CRC32C over the concatenation of `parts`.
pub fn masked_crc32c(parts: &[&[u8]]) -> u32 {
    let mut crc = 0u32;
    for part in parts {
        crc = crc32c::crc32c_append(crc, part);
    }
    mask_crc(crc)
}

// ------------------------------------------------------------------------------------------------
// Block checksums
// ------------------------------------------------------------------------------------------------

/// Computes the trailer checksum for a block.
///
/// `data` is the (possibly compressed) block payload and `last_byte` the
/// compression-type byte that follows it on disk.  CRC32C and the XXHash
/// family hash `data ‖ last_byte`; XXH3 hashes `data` alone and folds the
/// final byte in arithmetically (see the module docs).
pub fn block_checksum(kind: ChecksumKind, data: &[u8], last_byte: u8) -> u32 {
    match kind {
        ChecksumKind::None => 0,
        ChecksumKind::Crc32c => {
            let crc = crc32c::crc32c_append(crc32c::crc32c(data), &[last_byte]);
            mask_crc(crc)
        }
        ChecksumKind::XxHash => {
            let mut buf = Vec::with_capacity(data.len() + 1);
            buf.extend_from_slice(data);
            buf.push(last_byte);
            xxhash_rust::xxh32::xxh32(&buf, 0)
        }
        ChecksumKind::XxHash64 => {
            let mut buf = Vec::with_capacity(data.len() + 1);
            buf.extend_from_slice(data);
            buf.push(last_byte);
            xxhash_rust::xxh64::xxh64(&buf, 0) as u32
        }
        ChecksumKind::Xxh3 => {
            let v = xxhash_rust::xxh3::xxh3_64(data) as u32;
            modify_for_last_byte(v, last_byte)
        }
    }
}

/// Folds a final byte into an already-computed XXH3 checksum.
#[inline]
pub fn modify_for_last_byte(checksum: u32, last_byte: u8) -> u32 {
    checksum ^ u32::from(last_byte).wrapping_mul(LAST_BYTE_PRIME)
}

// ------------------------------------------------------------------------------------------------
// Context checksums (format version 6)
// ------------------------------------------------------------------------------------------------

/// Offset-dependent modifier added to version-6 checksums.
///
/// A zero `base` disables context checksums entirely, which keeps files
/// written without a base verifiable by the same code path.
#[inline]
pub fn context_modifier(base: u32, offset: u64) -> u32 {
    if base == 0 {
        0
    } else {
        base ^ ((offset as u32).wrapping_add((offset >> 32) as u32))
    }
}

/// Verifies a stored checksum, optionally context-adjusted.
pub fn verify_block_checksum(
    kind: ChecksumKind,
    data: &[u8],
    last_byte: u8,
    stored: u32,
    context_base: u32,
    offset: u64,
) -> Result<(), ChecksumMismatch> {
    if kind == ChecksumKind::None {
        return Ok(());
    }
    let computed =
        block_checksum(kind, data, last_byte).wrapping_add(context_modifier(context_base, offset));
    if computed != stored {
        return Err(ChecksumMismatch { stored, computed });
    }
    Ok(())
}
