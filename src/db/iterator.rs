//! Read-path iterators: k-way merging, sequence visibility, and the
//! public database cursor.
//!
//! A read merges several sorted sources — the active memtable, frozen
//! memtables, and table files — newest source first.  The pipeline is:
//!
//! 1. [`MergingIterator`] — a min-heap k-way merge by the internal-key
//!    comparator, with a stable tiebreaker (the newest source wins).
//! 2. [`VisibilityFilter`] — applies snapshot visibility per user key:
//!    the first entry with `sequence ≤ snapshot` decides; a value is
//!    yielded, a tombstone suppresses the key, merge operands fall
//!    through to their base (no merge operator is configured).
//! 3. [`DbIterator`] — the bidirectional cursor handed to callers,
//!    materialized from the filtered stream at creation time so that
//!    `prev` needs no backward merge.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::keys::{ParsedInternalKey, SequenceNumber, ValueType, compare_internal};

/// One sorted input to the merge: internal-key/value pairs ascending.
pub type MergeSource = Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)>>;

// ------------------------------------------------------------------------------------------------
// Merging iterator
// ------------------------------------------------------------------------------------------------

struct HeapEntry {
    key: Vec<u8>,
    value: Vec<u8>,
    source: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    // `BinaryHeap` pops the maximum, so "greater" means "emitted
    // sooner": smaller internal key first, and on equal keys the
    // newer source (lower index).
    fn cmp(&self, other: &Self) -> Ordering {
        match compare_internal(&self.key, &other.key) {
            Ordering::Equal => other.source.cmp(&self.source),
            ord => ord.reverse(),
        }
    }
}

/// K-way merge over sorted sources, ordered by the internal-key
/// comparator.  Sources must be supplied newest first.
pub struct MergingIterator {
    sources: Vec<MergeSource>,
    heap: BinaryHeap<HeapEntry>,
}

impl MergingIterator {
    /// Primes the heap with each source's first entry.
    pub fn new(mut sources: Vec<MergeSource>) -> Self {
        let mut heap = BinaryHeap::with_capacity(sources.len());
        for (source, iter) in sources.iter_mut().enumerate() {
            if let Some((key, value)) = iter.next() {
                heap.push(HeapEntry { key, value, source });
            }
        }
        Self { sources, heap }
    }
}

impl Iterator for MergingIterator {
    type Item = (Vec<u8>, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.heap.pop()?;
        if let Some((key, value)) = self.sources[entry.source].next() {
            self.heap.push(HeapEntry {
                key,
                value,
                source: entry.source,
            });
        }
        Some((entry.key, entry.value))
    }
}

// ------------------------------------------------------------------------------------------------
// Visibility filter
// ------------------------------------------------------------------------------------------------

/// Reduces a merged internal-key stream to the live user-visible pairs
/// at one snapshot.
pub struct VisibilityFilter<I>
where
    I: Iterator<Item = (Vec<u8>, Vec<u8>)>,
{
    input: I,
    snapshot: SequenceNumber,
    /// The user key most recently decided (emitted or suppressed).
    current_user_key: Option<Vec<u8>>,
}

impl<I> VisibilityFilter<I>
where
    I: Iterator<Item = (Vec<u8>, Vec<u8>)>,
{
    /// Wraps a merged stream; `snapshot` bounds visible sequences.
    pub fn new(input: I, snapshot: SequenceNumber) -> Self {
        Self {
            input,
            snapshot,
            current_user_key: None,
        }
    }
}

impl<I> Iterator for VisibilityFilter<I>
where
    I: Iterator<Item = (Vec<u8>, Vec<u8>)>,
{
    type Item = (Vec<u8>, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        for (internal_key, value) in self.input.by_ref() {
            let Ok(parsed) = ParsedInternalKey::parse(&internal_key) else {
                continue;
            };
            if parsed.sequence > self.snapshot {
                continue;
            }
            if self.current_user_key.as_deref() == Some(parsed.user_key) {
                continue; // an older version of a decided key
            }

            match parsed.value_type() {
                Some(ValueType::Value) => {
                    let user_key = parsed.user_key.to_vec();
                    self.current_user_key = Some(user_key.clone());
                    return Some((user_key, value));
                }
                Some(ValueType::Deletion) | Some(ValueType::SingleDeletion) => {
                    self.current_user_key = Some(parsed.user_key.to_vec());
                }
                // Merge operands fall through to the newest non-merge
                // base for the key.
                Some(ValueType::Merge) => {}
                _ => {}
            }
        }
        None
    }
}

// ------------------------------------------------------------------------------------------------
// DbIterator
// ------------------------------------------------------------------------------------------------

/// Snapshot cursor over the database's live `(key, value)` pairs.
///
/// The view is fixed at creation: later writes are invisible, and the
/// iterator stays usable after the database advances or flushes.
pub struct DbIterator {
    /// Visible pairs in ascending user-key order.
    entries: Vec<(Vec<u8>, Vec<u8>)>,
    /// Cursor position; meaningful only while `valid`.
    pos: usize,
    valid: bool,
}

impl DbIterator {
    pub(crate) fn new(entries: Vec<(Vec<u8>, Vec<u8>)>) -> Self {
        Self {
            entries,
            pos: 0,
            valid: false,
        }
    }

    /// True while positioned on an entry.
    pub fn valid(&self) -> bool {
        self.valid
    }

    /// Iterator health.  The snapshot is fully materialized at creation,
    /// so any block or checksum failure surfaces from
    /// [`Db::new_iterator`](crate::db::Db::new_iterator) instead; a
    /// constructed iterator is always healthy.
    pub fn status(&self) -> Result<(), crate::db::DbError> {
        Ok(())
    }

    /// Positions at the first entry.
    pub fn seek_to_first(&mut self) {
        self.pos = 0;
        self.valid = !self.entries.is_empty();
    }

    /// Positions at the last entry.
    pub fn seek_to_last(&mut self) {
        self.valid = !self.entries.is_empty();
        if self.valid {
            self.pos = self.entries.len() - 1;
        }
    }

    /// Positions at the first entry with key `>= target`.
    pub fn seek(&mut self, target: &[u8]) {
        self.pos = self.entries.partition_point(|(k, _)| k.as_slice() < target);
        self.valid = self.pos < self.entries.len();
    }

    /// Advances to the next entry.
    pub fn next(&mut self) {
        debug_assert!(self.valid, "next() on invalid iterator");
        self.pos += 1;
        self.valid = self.pos < self.entries.len();
    }

    /// Steps back to the previous entry.
    pub fn prev(&mut self) {
        debug_assert!(self.valid, "prev() on invalid iterator");
        if self.pos == 0 {
            self.valid = false;
        } else {
            self.pos -= 1;
        }
    }

    /// Current key.
    ///
    /// # Panics
    ///
    /// Must only be called while `valid()`.
    pub fn key(&self) -> &[u8] {
        assert!(self.valid, "key() on invalid iterator");
        &self.entries[self.pos].0
    }

    /// Current value.
    ///
    /// # Panics
    ///
    /// Must only be called while `valid()`.
    pub fn value(&self) -> &[u8] {
        assert!(self.valid, "value() on invalid iterator");
        &self.entries[self.pos].1
    }

    /// Number of visible entries in the snapshot.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the snapshot holds no visible entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
