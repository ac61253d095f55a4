//! Block iteration: forward, backward, and seek.
//!
//! [`BlockIter`] walks the entries of one [`Block`], reconstructing each
//! key from its shared-prefix delta.  `seek` binary-searches the restart
//! array (restart entries store their full key) and then scans forward
//! linearly; `prev` re-scans from the nearest restart point before the
//! current entry, which keeps backward iteration allocation-free.
//!
//! The iterator is comparator-parameterized: data and index blocks order
//! by the internal-key comparator, meta blocks by plain bytewise order.
//!
//! Any malformed entry trips the iterator into a permanent error state:
//! `valid()` turns false and [`status`](BlockIter::status) reports the
//! captured [`BlockError`].

use std::cmp::Ordering;
use std::sync::Arc;

use super::{Block, BlockError};
use crate::encoding::get_varint32;

/// Comparator used to order keys within a block.
pub type KeyComparator = fn(&[u8], &[u8]) -> Ordering;

/// Decoded header of one block entry.
struct EntryHeader {
    shared: usize,
    unshared: usize,
    value_len: usize,
    header_len: usize,
}

/// Cursor over the entries of a block.
pub struct BlockIter {
    /// The block being iterated.
    block: Arc<Block>,

    /// Key ordering for `seek`.
    cmp: KeyComparator,

    /// Offset of the current entry; meaningful only while `valid`.
    current: usize,

    /// Offset of the first byte past the current entry.
    next_offset: usize,

    /// Reconstructed key of the current entry.
    key: Vec<u8>,

    /// `(offset, len)` of the current value within the block bytes.
    value_range: (usize, usize),

    /// Restart region containing the current entry.
    restart_index: u32,

    /// False when exhausted, unpositioned, or errored.
    valid: bool,

    /// First decode error encountered, if any.
    status: Option<BlockError>,
}

impl BlockIter {
    /// Creates an unpositioned iterator over `block`.
    pub fn new(block: Arc<Block>, cmp: KeyComparator) -> Self {
        Self {
            block,
            cmp,
            current: 0,
            next_offset: 0,
            key: Vec::new(),
            value_range: (0, 0),
            restart_index: 0,
            valid: false,
            status: None,
        }
    }

    /// True when the iterator is positioned on an entry.
    #[inline]
    pub fn valid(&self) -> bool {
        self.valid
    }

    /// The decode error that invalidated this iterator, if any.
    pub fn status(&self) -> Result<(), BlockError> {
        match &self.status {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    /// Key of the current entry.
    ///
    /// # Panics
    ///
    /// Must only be called while `valid()`.
    #[inline]
    pub fn key(&self) -> &[u8] {
        assert!(self.valid, "key() on invalid iterator");
        &self.key
    }

    /// Value of the current entry.
    ///
    /// # Panics
    ///
    /// Must only be called while `valid()`.
    #[inline]
    pub fn value(&self) -> &[u8] {
        assert!(self.valid, "value() on invalid iterator");
        let (off, len) = self.value_range;
        &self.block.bytes()[off..off + len]
    }

    // --------------------------------------------------------------------
    // Positioning
    // --------------------------------------------------------------------

    /// Positions at the first entry (offset 0).
    pub fn seek_to_first(&mut self) {
        if self.status.is_some() {
            return;
        }
        self.seek_to_restart(0);
    }

    /// Positions at the last entry by scanning forward from the last
    /// restart point.
    pub fn seek_to_last(&mut self) {
        if self.status.is_some() {
            return;
        }
        self.seek_to_restart(self.block.num_restarts() - 1);
        while self.valid && self.next_offset < self.block.entries_end() {
            self.parse_next_entry();
        }
    }

    /// Positions at the first entry whose key is `>= target`.
    pub fn seek(&mut self, target: &[u8]) {
        if self.status.is_some() {
            return;
        }

        // Binary search: largest restart whose (full) key is < target.
        let mut left = 0u32;
        let mut right = self.block.num_restarts() - 1;
        while left < right {
            let mid = (left + right + 1) / 2;
            let mid_key = match self.restart_key(mid) {
                Ok(k) => k,
                Err(e) => {
                    self.corrupt(e);
                    return;
                }
            };
            if (self.cmp)(&mid_key, target) == Ordering::Less {
                left = mid;
            } else {
                right = mid - 1;
            }
        }

        self.seek_to_restart(left);
        while self.valid && (self.cmp)(&self.key, target) == Ordering::Less {
            self.parse_next_entry();
        }
    }

    /// Advances to the next entry; invalid at the end of the block.
    pub fn next(&mut self) {
        assert!(self.valid, "next() on invalid iterator");
        self.parse_next_entry();
    }

    /// Steps back to the previous entry; invalid before the first.
    pub fn prev(&mut self) {
        assert!(self.valid, "prev() on invalid iterator");
        let original = self.current;
        if original == 0 {
            self.valid = false;
            self.key.clear();
            return;
        }

        // Back up to the last restart point strictly before the current
        // entry (the previous restart when we sit exactly on one).
        while self.block.restart_point(self.restart_index) >= original as u32 {
            debug_assert!(self.restart_index > 0, "restart 0 is offset 0 < original");
            self.restart_index -= 1;
        }
        let restart = self.restart_index;

        self.seek_to_restart(restart);
        while self.valid && self.next_offset < original {
            self.parse_next_entry();
        }
    }

    // --------------------------------------------------------------------
    // Entry decoding
    // --------------------------------------------------------------------

    /// Repositions at restart point `index` and decodes its first entry.
    fn seek_to_restart(&mut self, index: u32) {
        self.key.clear();
        self.restart_index = index;
        self.next_offset = self.block.restart_point(index) as usize;
        self.valid = true; // provisional; parse decides
        self.parse_next_entry();
    }

    /// Decodes the entry at `next_offset` into the cursor state.
    fn parse_next_entry(&mut self) {
        let end = self.block.entries_end();
        if self.next_offset >= end {
            // Clean end of block.
            self.valid = false;
            self.key.clear();
            return;
        }

        let offset = self.next_offset;
        let header = match self.entry_header(offset) {
            Ok(h) => h,
            Err(e) => {
                self.corrupt(e);
                return;
            }
        };

        if header.shared > self.key.len() {
            self.corrupt(BlockError::Corruption(format!(
                "entry at {offset} shares {} bytes but previous key has {}",
                header.shared,
                self.key.len()
            )));
            return;
        }

        let delta_start = offset + header.header_len;
        let value_start = delta_start + header.unshared;
        let entry_end = value_start + header.value_len;
        if entry_end > end {
            self.corrupt(BlockError::Corruption(format!(
                "entry at {offset} runs past block data ({entry_end} > {end})"
            )));
            return;
        }

        self.key.truncate(header.shared);
        self.key
            .extend_from_slice(&self.block.bytes()[delta_start..value_start]);
        self.value_range = (value_start, header.value_len);
        self.current = offset;
        self.next_offset = entry_end;
        self.valid = true;

        // Keep the restart index in step with the cursor.
        while self.restart_index + 1 < self.block.num_restarts()
            && (self.block.restart_point(self.restart_index + 1) as usize) <= self.current
        {
            self.restart_index += 1;
        }
    }

    /// Parses the three varint header fields of the entry at `offset`.
    fn entry_header(&self, offset: usize) -> Result<EntryHeader, BlockError> {
        let end = self.block.entries_end();
        let data = &self.block.bytes()[offset..end];

        let (shared, a) =
            get_varint32(data).map_err(|e| BlockError::Corruption(e.to_string()))?;
        let (unshared, b) =
            get_varint32(&data[a..]).map_err(|e| BlockError::Corruption(e.to_string()))?;
        let (value_len, c) =
            get_varint32(&data[a + b..]).map_err(|e| BlockError::Corruption(e.to_string()))?;

        Ok(EntryHeader {
            shared: shared as usize,
            unshared: unshared as usize,
            value_len: value_len as usize,
            header_len: a + b + c,
        })
    }

    /// Decodes the full key stored at restart point `index`.
    ///
    /// Restart entries must have `shared = 0`.
    fn restart_key(&self, index: u32) -> Result<Vec<u8>, BlockError> {
        let offset = self.block.restart_point(index) as usize;
        let header = self.entry_header(offset)?;
        if header.shared != 0 {
            return Err(BlockError::Corruption(format!(
                "restart entry at {offset} has shared prefix {}",
                header.shared
            )));
        }
        let start = offset + header.header_len;
        let end = start + header.unshared;
        if end > self.block.entries_end() {
            return Err(BlockError::Corruption(format!(
                "restart key at {offset} runs past block data"
            )));
        }
        Ok(self.block.bytes()[start..end].to_vec())
    }

    /// Records a decode failure and parks the iterator.
    fn corrupt(&mut self, error: BlockError) {
        self.valid = false;
        self.key.clear();
        if self.status.is_none() {
            self.status = Some(error);
        }
    }
}
