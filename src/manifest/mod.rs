//! MANIFEST: the durable description of LSM state transitions.
//!
//! The MANIFEST file is a WAL-framed stream of [`VersionEdit`] records.
//! Each edit is a tagged field bundle describing one state transition:
//! files added or deleted, counters advanced, column families created or
//! dropped.  Replaying the stream from the file named by `CURRENT`
//! reconstructs the complete LSM state ([`version::VersionSet`]).
//!
//! # Tagged field encoding
//!
//! An edit is a concatenation of `varint32 tag ‖ field bytes` items.
//! Known tags:
//!
//! | Tag | Field | Payload |
//! |-----|-------|---------|
//! | 1   | Comparator          | length-prefixed name |
//! | 2   | LogNumber           | varint64 |
//! | 3   | NextFileNumber      | varint64 |
//! | 4   | LastSequence        | varint64 |
//! | 5   | CompactPointer      | varint32 level ‖ lps internal key |
//! | 6   | DeletedFile         | varint32 level ‖ varint64 file |
//! | 7   | NewFile             | level, file, size, smallest, largest |
//! | 9   | PrevLogNumber       | varint64 |
//! | 100 | NewFile2            | NewFile + smallest/largest seqno |
//! | 103 | NewFile4            | NewFile2 + custom-field loop |
//! | 200 | ColumnFamily        | varint32 id (edit target) |
//! | 201 | ColumnFamilyAdd     | length-prefixed name |
//! | 202 | ColumnFamilyDrop    | — |
//! | 203 | MaxColumnFamily     | varint32 |
//! | 300 | InAtomicGroup       | varint32 remaining edits |
//!
//! # Forward compatibility
//!
//! Unknown tags with bit 13 set ([`TAG_SAFE_IGNORE_MASK`]) carry a
//! length-prefixed payload; the decoder preserves them byte-for-byte and
//! the encoder re-emits them after the known fields, so a round trip
//! through this crate loses nothing a future writer recorded.  Unknown
//! tags *without* the bit are fatal corruption.
//!
//! # Atomic groups
//!
//! A run of edits tagged `InAtomicGroup(remaining)` — `remaining`
//! counting down to 0 — commits all-or-nothing: the recovery path
//! buffers the group and applies it only once the final edit has parsed
//! cleanly.

pub mod version;

#[cfg(test)]
mod tests;

use thiserror::Error;

use crate::encoding::{
    EncodingError, get_length_prefixed_slice, get_varint32, get_varint64,
    put_length_prefixed_slice, put_varint32, put_varint64,
};
use crate::wal::WalError;

/// Unknown tags with this bit set are skippable (and preserved).
pub const TAG_SAFE_IGNORE_MASK: u32 = 1 << 13;

const TAG_COMPARATOR: u32 = 1;
const TAG_LOG_NUMBER: u32 = 2;
const TAG_NEXT_FILE_NUMBER: u32 = 3;
const TAG_LAST_SEQUENCE: u32 = 4;
const TAG_COMPACT_POINTER: u32 = 5;
const TAG_DELETED_FILE: u32 = 6;
const TAG_NEW_FILE: u32 = 7;
const TAG_PREV_LOG_NUMBER: u32 = 9;
const TAG_NEW_FILE2: u32 = 100;
const TAG_NEW_FILE3: u32 = 102;
const TAG_NEW_FILE4: u32 = 103;
const TAG_COLUMN_FAMILY: u32 = 200;
const TAG_COLUMN_FAMILY_ADD: u32 = 201;
const TAG_COLUMN_FAMILY_DROP: u32 = 202;
const TAG_MAX_COLUMN_FAMILY: u32 = 203;
const TAG_IN_ATOMIC_GROUP: u32 = 300;

/// NewFile4 custom-field terminator.
const CUSTOM_TAG_TERMINATE: u32 = 1;
/// NewFile4 custom tags with this bit must not be ignored.
const CUSTOM_TAG_NON_SAFE_IGNORE_MASK: u32 = 1 << 6;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by manifest operations.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Log framing failure in the manifest stream.
    #[error("manifest log error: {0}")]
    Wal(#[from] WalError),

    /// Primitive decode failure inside an edit.
    #[error("corrupt version edit: {0}")]
    Encoding(#[from] EncodingError),

    /// Structural corruption: bad tags, broken atomic groups, missing
    /// CURRENT, inconsistent state.
    #[error("corrupt manifest: {0}")]
    Corruption(String),
}

// ------------------------------------------------------------------------------------------------
// File metadata
// ------------------------------------------------------------------------------------------------

/// Metadata for one table file, as recorded in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileMetaData {
    /// Globally unique file number (`<N>.sst`).
    pub file_number: u64,

    /// File size in bytes.
    pub file_size: u64,

    /// Smallest internal key in the file.
    pub smallest: Vec<u8>,

    /// Largest internal key in the file.
    pub largest: Vec<u8>,

    /// Smallest sequence number present.
    pub smallest_seqno: u64,

    /// Largest sequence number present.
    pub largest_seqno: u64,
}

// ------------------------------------------------------------------------------------------------
// VersionEdit
// ------------------------------------------------------------------------------------------------

/// One tagged state transition in the manifest stream.
///
/// Fields are optional; an edit carries only what it sets.  `column_family`
/// (tag 200) selects which column family the file and log fields apply
/// to; absent means the default family (id 0).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VersionEdit {
    /// User-key comparator name, for interop validation.
    pub comparator: Option<String>,

    /// WAL number whose records are all reflected in this version.
    pub log_number: Option<u64>,

    /// Legacy two-log recovery field; zero in modern streams.
    pub prev_log_number: Option<u64>,

    /// Next file number to allocate.
    pub next_file_number: Option<u64>,

    /// Highest sequence number persisted.
    pub last_sequence: Option<u64>,

    /// Highest column-family id ever allocated.
    pub max_column_family: Option<u32>,

    /// Per-level compaction cursors `(level, internal_key)`.
    pub compact_pointers: Vec<(u32, Vec<u8>)>,

    /// Files removed from a level `(level, file_number)`.
    pub deleted_files: Vec<(u32, u64)>,

    /// Files added to a level `(level, metadata)`.
    pub new_files: Vec<(u32, FileMetaData)>,

    /// Target column family of this edit (tag 200).
    pub column_family: Option<u32>,

    /// Creates a column family with this name (id from tag 200).
    pub column_family_add: Option<String>,

    /// Drops the target column family.
    pub column_family_drop: bool,

    /// Edits remaining in the enclosing atomic group (0 = last).
    pub atomic_group_remaining: Option<u32>,

    /// Safe-to-ignore unknown tags `(tag, payload)`, preserved verbatim.
    pub unknown_tags: Vec<(u32, Vec<u8>)>,
}

impl VersionEdit {
    /// Serializes the edit: known fields in tag order, then preserved
    /// unknown tags.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();

        if let Some(comparator) = &self.comparator {
            put_varint32(&mut buf, TAG_COMPARATOR);
            put_length_prefixed_slice(&mut buf, comparator.as_bytes());
        }
        if let Some(log_number) = self.log_number {
            put_varint32(&mut buf, TAG_LOG_NUMBER);
            put_varint64(&mut buf, log_number);
        }
        if let Some(prev_log_number) = self.prev_log_number {
            put_varint32(&mut buf, TAG_PREV_LOG_NUMBER);
            put_varint64(&mut buf, prev_log_number);
        }
        if let Some(next_file_number) = self.next_file_number {
            put_varint32(&mut buf, TAG_NEXT_FILE_NUMBER);
            put_varint64(&mut buf, next_file_number);
        }
        if let Some(last_sequence) = self.last_sequence {
            put_varint32(&mut buf, TAG_LAST_SEQUENCE);
            put_varint64(&mut buf, last_sequence);
        }
        if let Some(max_column_family) = self.max_column_family {
            put_varint32(&mut buf, TAG_MAX_COLUMN_FAMILY);
            put_varint32(&mut buf, max_column_family);
        }
        for (level, key) in &self.compact_pointers {
            put_varint32(&mut buf, TAG_COMPACT_POINTER);
            put_varint32(&mut buf, *level);
            put_length_prefixed_slice(&mut buf, key);
        }
        for (level, file_number) in &self.deleted_files {
            put_varint32(&mut buf, TAG_DELETED_FILE);
            put_varint32(&mut buf, *level);
            put_varint64(&mut buf, *file_number);
        }
        for (level, meta) in &self.new_files {
            put_varint32(&mut buf, TAG_NEW_FILE4);
            put_varint32(&mut buf, *level);
            put_varint64(&mut buf, meta.file_number);
            put_varint64(&mut buf, meta.file_size);
            put_length_prefixed_slice(&mut buf, &meta.smallest);
            put_length_prefixed_slice(&mut buf, &meta.largest);
            put_varint64(&mut buf, meta.smallest_seqno);
            put_varint64(&mut buf, meta.largest_seqno);
            // No custom fields: terminate immediately.
            put_varint32(&mut buf, CUSTOM_TAG_TERMINATE);
        }
        if let Some(cf) = self.column_family {
            put_varint32(&mut buf, TAG_COLUMN_FAMILY);
            put_varint32(&mut buf, cf);
        }
        if let Some(name) = &self.column_family_add {
            put_varint32(&mut buf, TAG_COLUMN_FAMILY_ADD);
            put_length_prefixed_slice(&mut buf, name.as_bytes());
        }
        if self.column_family_drop {
            put_varint32(&mut buf, TAG_COLUMN_FAMILY_DROP);
        }
        if let Some(remaining) = self.atomic_group_remaining {
            put_varint32(&mut buf, TAG_IN_ATOMIC_GROUP);
            put_varint32(&mut buf, remaining);
        }
        for (tag, payload) in &self.unknown_tags {
            put_varint32(&mut buf, *tag);
            put_length_prefixed_slice(&mut buf, payload);
        }
        buf
    }

    /// Decodes one edit from a manifest record.
    pub fn decode(mut buf: &[u8]) -> Result<Self, ManifestError> {
        let mut edit = Self::default();

        while !buf.is_empty() {
            let (tag, n) = get_varint32(buf)?;
            buf = &buf[n..];

            match tag {
                TAG_COMPARATOR => {
                    let (name, n) = get_length_prefixed_slice(buf)?;
                    edit.comparator = Some(
                        String::from_utf8(name.to_vec()).map_err(|_| {
                            ManifestError::Corruption("comparator name is not UTF-8".into())
                        })?,
                    );
                    buf = &buf[n..];
                }
                TAG_LOG_NUMBER => {
                    let (v, n) = get_varint64(buf)?;
                    edit.log_number = Some(v);
                    buf = &buf[n..];
                }
                TAG_PREV_LOG_NUMBER => {
                    let (v, n) = get_varint64(buf)?;
                    edit.prev_log_number = Some(v);
                    buf = &buf[n..];
                }
                TAG_NEXT_FILE_NUMBER => {
                    let (v, n) = get_varint64(buf)?;
                    edit.next_file_number = Some(v);
                    buf = &buf[n..];
                }
                TAG_LAST_SEQUENCE => {
                    let (v, n) = get_varint64(buf)?;
                    edit.last_sequence = Some(v);
                    buf = &buf[n..];
                }
                TAG_MAX_COLUMN_FAMILY => {
                    let (v, n) = get_varint32(buf)?;
                    edit.max_column_family = Some(v);
                    buf = &buf[n..];
                }
                TAG_COMPACT_POINTER => {
                    let (level, n) = get_varint32(buf)?;
                    buf = &buf[n..];
                    let (key, n) = get_length_prefixed_slice(buf)?;
                    edit.compact_pointers.push((level, key.to_vec()));
                    buf = &buf[n..];
                }
                TAG_DELETED_FILE => {
                    let (level, n) = get_varint32(buf)?;
                    buf = &buf[n..];
                    let (file_number, n) = get_varint64(buf)?;
                    edit.deleted_files.push((level, file_number));
                    buf = &buf[n..];
                }
                TAG_NEW_FILE => {
                    let (level, meta, rest) = decode_new_file(buf, false)?;
                    edit.new_files.push((level, meta));
                    buf = rest;
                }
                TAG_NEW_FILE2 => {
                    let (level, meta, rest) = decode_new_file(buf, true)?;
                    edit.new_files.push((level, meta));
                    buf = rest;
                }
                TAG_NEW_FILE3 => {
                    return Err(ManifestError::Corruption(
                        "obsolete new-file tag 102 (path id) not supported".into(),
                    ));
                }
                TAG_NEW_FILE4 => {
                    let (level, meta, rest) = decode_new_file4(buf)?;
                    edit.new_files.push((level, meta));
                    buf = rest;
                }
                TAG_COLUMN_FAMILY => {
                    let (v, n) = get_varint32(buf)?;
                    edit.column_family = Some(v);
                    buf = &buf[n..];
                }
                TAG_COLUMN_FAMILY_ADD => {
                    let (name, n) = get_length_prefixed_slice(buf)?;
                    edit.column_family_add = Some(
                        String::from_utf8(name.to_vec()).map_err(|_| {
                            ManifestError::Corruption("column family name is not UTF-8".into())
                        })?,
                    );
                    buf = &buf[n..];
                }
                TAG_COLUMN_FAMILY_DROP => {
                    edit.column_family_drop = true;
                }
                TAG_IN_ATOMIC_GROUP => {
                    let (v, n) = get_varint32(buf)?;
                    edit.atomic_group_remaining = Some(v);
                    buf = &buf[n..];
                }
                unknown if unknown & TAG_SAFE_IGNORE_MASK != 0 => {
                    let (payload, n) = get_length_prefixed_slice(buf)?;
                    edit.unknown_tags.push((unknown, payload.to_vec()));
                    buf = &buf[n..];
                }
                unknown => {
                    return Err(ManifestError::Corruption(format!(
                        "unknown version edit tag {unknown}"
                    )));
                }
            }
        }
        Ok(edit)
    }
}

/// Decodes the shared NewFile/NewFile2 body.
fn decode_new_file(
    buf: &[u8],
    with_seqnos: bool,
) -> Result<(u32, FileMetaData, &[u8]), ManifestError> {
    let mut at = buf;
    let (level, n) = get_varint32(at)?;
    at = &at[n..];
    let (file_number, n) = get_varint64(at)?;
    at = &at[n..];
    let (file_size, n) = get_varint64(at)?;
    at = &at[n..];
    let (smallest, n) = get_length_prefixed_slice(at)?;
    at = &at[n..];
    let (largest, n) = get_length_prefixed_slice(at)?;
    at = &at[n..];

    let mut meta = FileMetaData {
        file_number,
        file_size,
        smallest: smallest.to_vec(),
        largest: largest.to_vec(),
        smallest_seqno: 0,
        largest_seqno: 0,
    };
    if with_seqnos {
        let (smallest_seqno, n) = get_varint64(at)?;
        at = &at[n..];
        let (largest_seqno, n) = get_varint64(at)?;
        at = &at[n..];
        meta.smallest_seqno = smallest_seqno;
        meta.largest_seqno = largest_seqno;
    }
    Ok((level, meta, at))
}

/// Decodes a NewFile4 body: the NewFile2 fields plus the custom-field
/// loop.  Unknown custom fields are skipped unless their
/// must-not-ignore bit is set.
fn decode_new_file4(buf: &[u8]) -> Result<(u32, FileMetaData, &[u8]), ManifestError> {
    let (level, meta, mut at) = decode_new_file(buf, true)?;

    loop {
        let (custom_tag, n) = get_varint32(at)?;
        at = &at[n..];
        if custom_tag == CUSTOM_TAG_TERMINATE {
            break;
        }
        let (_field, n) = get_length_prefixed_slice(at)?;
        at = &at[n..];
        if custom_tag & CUSTOM_TAG_NON_SAFE_IGNORE_MASK != 0 {
            return Err(ManifestError::Corruption(format!(
                "new-file custom field {custom_tag} cannot be ignored"
            )));
        }
    }
    Ok((level, meta, at))
}
