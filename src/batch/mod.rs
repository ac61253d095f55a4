//! Write batches: the unit of WAL persistence and atomic application.
//!
//! Every mutation enters the database as part of a [`WriteBatch`]; the
//! batch's serialized form is exactly what one WAL record carries, so a
//! reference process can replay logs written here.
//!
//! # Binary layout
//!
//! ```text
//! [sequence:u64_le][count:u32_le][records…]
//!
//! record = type_tag:u8
//!          ‖ (varint32 cf_id        — column-family tags only)
//!          ‖ varint32 key_len ‖ key
//!          ‖ (varint32 value_len ‖ value — value-carrying tags only)
//! ```
//!
//! Default-column-family tags: Deletion(0), Value(1), Merge(2),
//! SingleDeletion(7).  Non-default column families use the CF variants
//! ColumnFamilyDeletion(4), ColumnFamilyValue(5), ColumnFamilyMerge(6),
//! ColumnFamilySingleDeletion(8), which carry a varint32 `cf_id` before
//! the key.
//!
//! # Invariant
//!
//! The header `count` always equals the number of records in the body;
//! [`WriteBatch::iter`] re-validates this when decoding foreign bytes.

#[cfg(test)]
mod tests;

use thiserror::Error;

use crate::encoding::{
    EncodingError, decode_fixed32, decode_fixed64, get_length_prefixed_slice, get_varint32,
    put_fixed32, put_fixed64, put_length_prefixed_slice, put_varint32,
};
use crate::keys::SequenceNumber;

/// Sequence (8) + count (4).
pub const BATCH_HEADER_SIZE: usize = 12;

/// Id of the implicit default column family.
pub const DEFAULT_COLUMN_FAMILY_ID: u32 = 0;

const TAG_DELETION: u8 = 0;
const TAG_VALUE: u8 = 1;
const TAG_MERGE: u8 = 2;
const TAG_CF_DELETION: u8 = 4;
const TAG_CF_VALUE: u8 = 5;
const TAG_CF_MERGE: u8 = 6;
const TAG_SINGLE_DELETION: u8 = 7;
const TAG_CF_SINGLE_DELETION: u8 = 8;

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors produced while decoding a batch.
#[derive(Debug, Error)]
pub enum BatchError {
    /// The batch is shorter than its fixed header.
    #[error("corrupt batch: {0} bytes is smaller than the 12-byte header")]
    TooSmall(usize),

    /// A record failed to decode.
    #[error("corrupt batch record: {0}")]
    Record(#[from] EncodingError),

    /// A record carries an unknown type tag.
    #[error("corrupt batch: unknown record tag {0}")]
    UnknownTag(u8),

    /// The header count disagrees with the records present.
    #[error("corrupt batch: header says {header} records, found {actual}")]
    CountMismatch {
        /// Count from the 12-byte header.
        header: u32,
        /// Records actually parsed.
        actual: u32,
    },
}

// ------------------------------------------------------------------------------------------------
// Records
// ------------------------------------------------------------------------------------------------

/// One decoded batch record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchRecord<'a> {
    /// Insert or overwrite `key`.
    Put {
        cf_id: u32,
        key: &'a [u8],
        value: &'a [u8],
    },
    /// Point-delete `key`.
    Delete { cf_id: u32, key: &'a [u8] },
    /// Single-delete `key` (consumes exactly one older version).
    SingleDelete { cf_id: u32, key: &'a [u8] },
    /// Merge `value` into `key`.
    Merge {
        cf_id: u32,
        key: &'a [u8],
        value: &'a [u8],
    },
}

impl BatchRecord<'_> {
    /// The column family this record targets.
    pub fn cf_id(&self) -> u32 {
        match self {
            Self::Put { cf_id, .. }
            | Self::Delete { cf_id, .. }
            | Self::SingleDelete { cf_id, .. }
            | Self::Merge { cf_id, .. } => *cf_id,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// WriteBatch
// ------------------------------------------------------------------------------------------------

/// An ordered set of mutations applied (and logged) atomically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteBatch {
    /// The serialized representation, maintained incrementally.
    rep: Vec<u8>,
}

impl Default for WriteBatch {
    fn default() -> Self {
        Self::new()
    }
}

impl WriteBatch {
    /// Creates an empty batch (sequence 0, count 0).
    pub fn new() -> Self {
        Self {
            rep: vec![0; BATCH_HEADER_SIZE],
        }
    }

    /// Adopts foreign bytes (a WAL record) as a batch, validating the
    /// header and every record.
    pub fn from_bytes(rep: Vec<u8>) -> Result<Self, BatchError> {
        if rep.len() < BATCH_HEADER_SIZE {
            return Err(BatchError::TooSmall(rep.len()));
        }
        let batch = Self { rep };
        batch.verify()?;
        Ok(batch)
    }

    /// The serialized batch (exactly what the WAL stores).
    pub fn as_bytes(&self) -> &[u8] {
        &self.rep
    }

    /// Starting sequence number from the header.
    pub fn sequence(&self) -> SequenceNumber {
        decode_fixed64(&self.rep).expect("header always present")
    }

    /// Stamps the starting sequence number.
    pub fn set_sequence(&mut self, sequence: SequenceNumber) {
        self.rep[..8].copy_from_slice(&sequence.to_le_bytes());
    }

    /// Number of records in the batch.
    pub fn count(&self) -> u32 {
        decode_fixed32(&self.rep[8..]).expect("header always present")
    }

    /// True when no records have been added.
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Serialized size in bytes.
    pub fn byte_size(&self) -> usize {
        self.rep.len()
    }

    /// Drops all records, keeping the header sequence.
    pub fn clear(&mut self) {
        let sequence = self.sequence();
        self.rep.clear();
        self.rep.resize(BATCH_HEADER_SIZE, 0);
        self.set_sequence(sequence);
    }

    fn bump_count(&mut self) {
        let next = self.count() + 1;
        self.rep[8..12].copy_from_slice(&next.to_le_bytes());
    }

    fn push_cf(&mut self, cf_id: u32) {
        put_varint32(&mut self.rep, cf_id);
    }

    // --------------------------------------------------------------------
    // Builders
    // --------------------------------------------------------------------

    /// Adds a put to the default column family.
    pub fn put(&mut self, key: &[u8], value: &[u8]) {
        self.put_cf(DEFAULT_COLUMN_FAMILY_ID, key, value);
    }

    /// Adds a put to the given column family.
    pub fn put_cf(&mut self, cf_id: u32, key: &[u8], value: &[u8]) {
        if cf_id == DEFAULT_COLUMN_FAMILY_ID {
            self.rep.push(TAG_VALUE);
        } else {
            self.rep.push(TAG_CF_VALUE);
            self.push_cf(cf_id);
        }
        put_length_prefixed_slice(&mut self.rep, key);
        put_length_prefixed_slice(&mut self.rep, value);
        self.bump_count();
    }

    /// Adds a point delete to the default column family.
    pub fn delete(&mut self, key: &[u8]) {
        self.delete_cf(DEFAULT_COLUMN_FAMILY_ID, key);
    }

    /// Adds a point delete to the given column family.
    pub fn delete_cf(&mut self, cf_id: u32, key: &[u8]) {
        if cf_id == DEFAULT_COLUMN_FAMILY_ID {
            self.rep.push(TAG_DELETION);
        } else {
            self.rep.push(TAG_CF_DELETION);
            self.push_cf(cf_id);
        }
        put_length_prefixed_slice(&mut self.rep, key);
        self.bump_count();
    }

    /// Adds a single-delete to the default column family.
    pub fn single_delete(&mut self, key: &[u8]) {
        self.single_delete_cf(DEFAULT_COLUMN_FAMILY_ID, key);
    }

    /// Adds a single-delete to the given column family.
    pub fn single_delete_cf(&mut self, cf_id: u32, key: &[u8]) {
        if cf_id == DEFAULT_COLUMN_FAMILY_ID {
            self.rep.push(TAG_SINGLE_DELETION);
        } else {
            self.rep.push(TAG_CF_SINGLE_DELETION);
            self.push_cf(cf_id);
        }
        put_length_prefixed_slice(&mut self.rep, key);
        self.bump_count();
    }

    /// Adds a merge to the default column family.
    pub fn merge(&mut self, key: &[u8], value: &[u8]) {
        self.merge_cf(DEFAULT_COLUMN_FAMILY_ID, key, value);
    }

    /// Adds a merge to the given column family.
    pub fn merge_cf(&mut self, cf_id: u32, key: &[u8], value: &[u8]) {
        if cf_id == DEFAULT_COLUMN_FAMILY_ID {
            self.rep.push(TAG_MERGE);
        } else {
            self.rep.push(TAG_CF_MERGE);
            self.push_cf(cf_id);
        }
        put_length_prefixed_slice(&mut self.rep, key);
        put_length_prefixed_slice(&mut self.rep, value);
        self.bump_count();
    }

    // --------------------------------------------------------------------
    // Decoding
    // --------------------------------------------------------------------

    /// Iterates the batch's records.
    pub fn iter(&self) -> BatchIter<'_> {
        BatchIter {
            rest: &self.rep[BATCH_HEADER_SIZE..],
        }
    }

    /// Validates that every record decodes and the count matches.
    pub fn verify(&self) -> Result<(), BatchError> {
        let mut actual = 0u32;
        for record in self.iter() {
            record?;
            actual += 1;
        }
        let header = self.count();
        if header != actual {
            return Err(BatchError::CountMismatch { header, actual });
        }
        Ok(())
    }
}

/// Record iterator over a batch's serialized body.
pub struct BatchIter<'a> {
    rest: &'a [u8],
}

impl<'a> Iterator for BatchIter<'a> {
    type Item = Result<BatchRecord<'a>, BatchError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }

        let result = decode_record(self.rest);
        match result {
            Ok((record, consumed)) => {
                self.rest = &self.rest[consumed..];
                Some(Ok(record))
            }
            Err(e) => {
                // Poison further iteration.
                self.rest = &[];
                Some(Err(e))
            }
        }
    }
}

fn decode_record(buf: &[u8]) -> Result<(BatchRecord<'_>, usize), BatchError> {
    let tag = buf[0];
    let mut at = 1usize;

    let cf_id = match tag {
        TAG_CF_DELETION | TAG_CF_VALUE | TAG_CF_MERGE | TAG_CF_SINGLE_DELETION => {
            let (id, n) = get_varint32(&buf[at..])?;
            at += n;
            id
        }
        TAG_DELETION | TAG_VALUE | TAG_MERGE | TAG_SINGLE_DELETION => DEFAULT_COLUMN_FAMILY_ID,
        other => return Err(BatchError::UnknownTag(other)),
    };

    let (key, n) = get_length_prefixed_slice(&buf[at..])?;
    at += n;

    let record = match tag {
        TAG_VALUE | TAG_CF_VALUE => {
            let (value, m) = get_length_prefixed_slice(&buf[at..])?;
            at += m;
            BatchRecord::Put { cf_id, key, value }
        }
        TAG_MERGE | TAG_CF_MERGE => {
            let (value, m) = get_length_prefixed_slice(&buf[at..])?;
            at += m;
            BatchRecord::Merge { cf_id, key, value }
        }
        TAG_DELETION | TAG_CF_DELETION => BatchRecord::Delete { cf_id, key },
        TAG_SINGLE_DELETION | TAG_CF_SINGLE_DELETION => BatchRecord::SingleDelete { cf_id, key },
        other => return Err(BatchError::UnknownTag(other)),
    };
    Ok((record, at))
}

// Header helpers for the write path: the sequence is restamped under the
// write lock, and replay needs the end sequence of each batch.
impl WriteBatch {
    /// Sequence number of the record *after* this batch.
    pub fn end_sequence(&self) -> SequenceNumber {
        self.sequence() + u64::from(self.count())
    }

    /// Encodes a header-only probe for tests and tooling.
    pub fn encode_header(sequence: SequenceNumber, count: u32) -> [u8; BATCH_HEADER_SIZE] {
        let mut buf = [0u8; BATCH_HEADER_SIZE];
        let mut v = Vec::with_capacity(BATCH_HEADER_SIZE);
        put_fixed64(&mut v, sequence);
        put_fixed32(&mut v, count);
        buf.copy_from_slice(&v);
        buf
    }
}
