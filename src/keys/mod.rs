//! Internal keys: user keys tagged with sequence number and value type.
//!
//! Every entry stored in a memtable or table file is keyed by an
//! **internal key**:
//!
//! ```text
//! user_key ‖ trailer
//! trailer = 8 little-endian bytes packing (sequence:56 || type:8)
//! ```
//!
//! The trailer lets a single user key carry many versions.  Internal keys
//! order by user key ascending (bytewise), then by trailer **descending**,
//! so the newest version of a key sorts first and a seek positioned at
//! `(user_key, snapshot_sequence)` lands on the newest version visible to
//! that snapshot.


use std::cmp::Ordering;

use thiserror::Error;

/// Width of the packed `(sequence, type)` trailer.
pub const TRAILER_SIZE: usize = 8;

/// Largest representable sequence number (56 bits).
pub const MAX_SEQUENCE: u64 = (1 << 56) - 1;

/// Sequence numbers are 56-bit monotonically increasing integers.
pub type SequenceNumber = u64;

// ------------------------------------------------------------------------------------------------
// Value types
// ------------------------------------------------------------------------------------------------

/// Record kinds that can appear in an internal-key trailer.
///
/// The numeric values are part of the interchange format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ValueType {
    /// Point tombstone.
    Deletion = 0,
    /// Plain value.
    Value = 1,
    /// Merge operand.
    Merge = 2,
    /// Single-delete tombstone (consumes exactly one older version).
    SingleDeletion = 7,
    /// Range tombstone.
    RangeDeletion = 15,
    /// Indirect value stored in a blob file.
    BlobIndex = 17,
}

impl ValueType {
    /// Decodes a trailer type byte.
    pub fn from_wire(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Deletion),
            1 => Some(Self::Value),
            2 => Some(Self::Merge),
            7 => Some(Self::SingleDeletion),
            15 => Some(Self::RangeDeletion),
            17 => Some(Self::BlobIndex),
            _ => None,
        }
    }
}

/// Type byte used when building lookup keys.
///
/// Because trailers sort descending, the largest valid type positions a
/// seek at the newest entry for `(user_key, sequence)`.
pub const TYPE_FOR_SEEK: u8 = ValueType::BlobIndex as u8;

// ------------------------------------------------------------------------------------------------
// Trailer packing
// ------------------------------------------------------------------------------------------------

/// Packs a sequence number and type byte into a trailer word.
///
/// # Panics
///
/// Debug-asserts that `sequence` fits in 56 bits.
#[inline]
pub fn pack_sequence_and_type(sequence: SequenceNumber, value_type: u8) -> u64 {
    debug_assert!(sequence <= MAX_SEQUENCE, "sequence exceeds 56 bits");
    (sequence << 8) | u64::from(value_type)
}

/// Splits a trailer word into `(sequence, type_byte)`.
#[inline]
pub fn unpack_sequence_and_type(trailer: u64) -> (SequenceNumber, u8) {
    (trailer >> 8, trailer as u8)
}

// ------------------------------------------------------------------------------------------------
// Internal key construction & parsing
// ------------------------------------------------------------------------------------------------

/// Appends `user_key ‖ trailer` to `buf`.
pub fn append_internal_key(
    buf: &mut Vec<u8>,
    user_key: &[u8],
    sequence: SequenceNumber,
    value_type: u8,
) {
    buf.extend_from_slice(user_key);
    buf.extend_from_slice(&pack_sequence_and_type(sequence, value_type).to_le_bytes());
}

/// Builds an owned internal key.
pub fn make_internal_key(user_key: &[u8], sequence: SequenceNumber, value_type: u8) -> Vec<u8> {
    let mut buf = Vec::with_capacity(user_key.len() + TRAILER_SIZE);
    append_internal_key(&mut buf, user_key, sequence, value_type);
    buf
}

/// Builds the lookup key for `Get(user_key)` at a snapshot.
pub fn make_lookup_key(user_key: &[u8], snapshot: SequenceNumber) -> Vec<u8> {
    make_internal_key(user_key, snapshot, TYPE_FOR_SEEK)
}

/// An internal key too short to contain a trailer.
#[derive(Debug, Error)]
#[error("internal key too short ({0} bytes, need at least {TRAILER_SIZE})")]
pub struct TruncatedInternalKey(pub usize);

/// A borrowed, decoded view of an internal key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedInternalKey<'a> {
    /// The user portion of the key.
    pub user_key: &'a [u8],
    /// Sequence number from the trailer.
    pub sequence: SequenceNumber,
    /// Raw type byte from the trailer (may be a type this build does not
    /// know; callers decide whether that is fatal).
    pub type_byte: u8,
}

impl<'a> ParsedInternalKey<'a> {
    /// Splits `internal_key` into its user key and trailer fields.
    pub fn parse(internal_key: &'a [u8]) -> Result<Self, TruncatedInternalKey> {
        if internal_key.len() < TRAILER_SIZE {
            return Err(TruncatedInternalKey(internal_key.len()));
        }
        let split = internal_key.len() - TRAILER_SIZE;
        let trailer = u64::from_le_bytes(internal_key[split..].try_into().expect("8-byte slice"));
        let (sequence, type_byte) = unpack_sequence_and_type(trailer);
        Ok(Self {
            user_key: &internal_key[..split],
            sequence,
            type_byte,
        })
    }

    /// The decoded [`ValueType`], if the type byte is a known one.
    pub fn value_type(&self) -> Option<ValueType> {
        ValueType::from_wire(self.type_byte)
    }
}

/// Returns the user-key portion of an internal key.
///
/// # Panics
///
/// Panics if `internal_key` is shorter than the trailer; callers must
/// have validated the key (this is an invariant, not an input error).
#[inline]
pub fn extract_user_key(internal_key: &[u8]) -> &[u8] {
    assert!(internal_key.len() >= TRAILER_SIZE, "internal key lacks trailer");
    &internal_key[..internal_key.len() - TRAILER_SIZE]
}

// ------------------------------------------------------------------------------------------------
// Comparator
// ------------------------------------------------------------------------------------------------

/// Name of the only user-key comparator this crate supports.
pub const COMPARATOR_NAME: &str = "leveldb.BytewiseComparator";

/// Total order over internal keys: user key ascending, trailer
/// descending (newer sequence numbers sort first).
///
/// Keys shorter than the trailer compare by raw bytes; such keys never
/// appear in well-formed files, but the comparator must still be total
/// for corrupted input to fail gracefully elsewhere.
pub fn compare_internal(a: &[u8], b: &[u8]) -> Ordering {
    if a.len() < TRAILER_SIZE || b.len() < TRAILER_SIZE {
        return a.cmp(b);
    }
    let (a_user, a_trailer) = a.split_at(a.len() - TRAILER_SIZE);
    let (b_user, b_trailer) = b.split_at(b.len() - TRAILER_SIZE);
    match a_user.cmp(b_user) {
        Ordering::Equal => {
            let at = u64::from_le_bytes(a_trailer.try_into().expect("8-byte slice"));
            let bt = u64::from_le_bytes(b_trailer.try_into().expect("8-byte slice"));
            bt.cmp(&at)
        }
        other => other,
    }
}
