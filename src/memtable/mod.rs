//! Memtable: the in-memory sorted write buffer.
//!
//! ## Design invariants
//!
//! - Entries are keyed by internal key and ordered by the internal-key
//!   comparator, so the memtable may hold many versions of one user key
//!   with the newest (highest sequence) first.
//! - Deletes are tombstone entries, never physical removal.
//! - The memtable itself is unsynchronized; the database serializes
//!   writers and shares frozen memtables behind `Arc` for readers and
//!   the flush worker.
//!
//! ## Flush semantics
//!
//! [`Memtable::iter`] yields entries in ascending internal-key order —
//! exactly the order the table builder requires — without mutating the
//! memtable.  A frozen memtable stays readable until the table that
//! replaces it is durably installed.

#[cfg(test)]
mod tests;

use std::collections::BTreeMap;
use std::cmp::Ordering;

use crate::keys::{
    ParsedInternalKey, SequenceNumber, ValueType, compare_internal, make_internal_key,
    make_lookup_key,
};

/// Rough per-entry bookkeeping overhead counted into
/// [`Memtable::approximate_size`].
const ENTRY_OVERHEAD: usize = 16;

/// Internal key wrapper ordering a `BTreeMap` by [`compare_internal`].
#[derive(Debug, Clone, PartialEq, Eq)]
struct OrderedKey(Vec<u8>);

impl PartialOrd for OrderedKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedKey {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_internal(&self.0, &other.0)
    }
}

/// What the memtable knows about a user key at some snapshot.
#[derive(Debug, PartialEq, Eq)]
pub enum MemtableGet {
    /// Newest visible entry is a value.
    Value(Vec<u8>),
    /// Newest visible entry is a tombstone.
    Deleted,
    /// No visible entry for the key.
    NotFound,
}

/// In-memory sorted multi-version write buffer.
#[derive(Debug, Default)]
pub struct Memtable {
    /// Entries in internal-key order (user key asc, sequence desc).
    entries: BTreeMap<OrderedKey, Vec<u8>>,

    /// Approximate heap footprint, compared against the write buffer
    /// budget by the database.
    approximate_size: usize,
}

impl Memtable {
    /// Creates an empty memtable.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts one entry.
    ///
    /// The `(sequence, value_type)` pair makes every internal key unique,
    /// so an insert never overwrites an older version.
    pub fn add(
        &mut self,
        sequence: SequenceNumber,
        value_type: ValueType,
        user_key: &[u8],
        value: &[u8],
    ) {
        let internal_key = make_internal_key(user_key, sequence, value_type as u8);
        self.approximate_size += internal_key.len() + value.len() + ENTRY_OVERHEAD;
        self.entries.insert(OrderedKey(internal_key), value.to_vec());
    }

    /// Looks up the newest version of `user_key` visible at `snapshot`.
    pub fn get(&self, user_key: &[u8], snapshot: SequenceNumber) -> MemtableGet {
        let lookup = OrderedKey(make_lookup_key(user_key, snapshot));
        for (key, value) in self.entries.range(lookup..) {
            let parsed = match ParsedInternalKey::parse(&key.0) {
                Ok(p) => p,
                Err(_) => break, // unreachable for keys built by add()
            };
            if parsed.user_key != user_key {
                break;
            }
            match parsed.value_type() {
                Some(ValueType::Value) => return MemtableGet::Value(value.clone()),
                Some(ValueType::Deletion) | Some(ValueType::SingleDeletion) => {
                    return MemtableGet::Deleted;
                }
                // Without a merge operator the newest non-merge base wins.
                Some(ValueType::Merge) => continue,
                _ => continue,
            }
        }
        MemtableGet::NotFound
    }

    /// All entries in ascending internal-key order.
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.entries
            .iter()
            .map(|(k, v)| (k.0.as_slice(), v.as_slice()))
    }

    /// Approximate memory footprint in bytes.
    pub fn approximate_size(&self) -> usize {
        self.approximate_size
    }

    /// Number of entries (versions, not distinct user keys).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no entries have been inserted.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Smallest and largest internal keys plus the sequence range,
    /// for the file metadata of a flush.  `None` when empty.
    pub fn key_bounds(&self) -> Option<(Vec<u8>, Vec<u8>, SequenceNumber, SequenceNumber)> {
        let first = self.entries.keys().next()?;
        let last = self.entries.keys().next_back()?;
        let mut min_seq = u64::MAX;
        let mut max_seq = 0;
        for key in self.entries.keys() {
            if let Ok(parsed) = ParsedInternalKey::parse(&key.0) {
                min_seq = min_seq.min(parsed.sequence);
                max_seq = max_seq.max(parsed.sequence);
            }
        }
        Some((first.0.clone(), last.0.clone(), min_seq, max_seq))
    }
}
