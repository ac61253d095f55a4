//! Two-level table iteration.
//!
//! [`TableIter`] drives a cursor over the index block; each index entry
//! names the last key of one data block and carries its handle.  The
//! data block under the cursor is read (and decompressed) lazily, and
//! iteration hops blocks in either direction.
//!
//! Errors — block corruption, checksum mismatch, decompression failure —
//! park the iterator: `valid()` turns false and the error waits in
//! [`take_status`](TableIter::take_status).

use std::sync::Arc;

use crate::block::{Block, BlockIter};
use crate::keys::compare_internal;

use super::{BlockHandle, Table, TableError};

/// Iterator over every entry of a table, in internal-key order.
pub struct TableIter<'a> {
    table: &'a Table,

    /// Cursor over the index block.
    index_iter: BlockIter,

    /// Cursor over the data block the index cursor points at.
    data_iter: Option<BlockIter>,

    /// First error encountered; parks the iterator permanently.
    status: Option<TableError>,
}

impl<'a> TableIter<'a> {
    pub(crate) fn new(table: &'a Table, index: Arc<Block>) -> Self {
        Self {
            table,
            index_iter: BlockIter::new(index, compare_internal),
            data_iter: None,
            status: None,
        }
    }

    /// True when positioned on an entry.
    pub fn valid(&self) -> bool {
        self.status.is_none() && self.data_iter.as_ref().is_some_and(|d| d.valid())
    }

    /// Takes the captured error, if any.
    pub fn take_status(&mut self) -> Result<(), TableError> {
        match self.status.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Current internal key.
    ///
    /// # Panics
    ///
    /// Must only be called while `valid()`.
    pub fn key(&self) -> &[u8] {
        self.data_iter.as_ref().expect("valid iterator").key()
    }

    /// Current value.
    ///
    /// # Panics
    ///
    /// Must only be called while `valid()`.
    pub fn value(&self) -> &[u8] {
        self.data_iter.as_ref().expect("valid iterator").value()
    }

    // --------------------------------------------------------------------
    // Positioning
    // --------------------------------------------------------------------

    /// Positions at the table's first entry.
    pub fn seek_to_first(&mut self) {
        if self.status.is_some() {
            return;
        }
        self.index_iter.seek_to_first();
        self.load_data_block();
        if let Some(d) = &mut self.data_iter {
            d.seek_to_first();
        }
        self.skip_empty_blocks_forward();
    }

    /// Positions at the table's last entry.
    pub fn seek_to_last(&mut self) {
        if self.status.is_some() {
            return;
        }
        self.index_iter.seek_to_last();
        self.load_data_block();
        if let Some(d) = &mut self.data_iter {
            d.seek_to_last();
        }
        self.skip_empty_blocks_backward();
    }

    /// Positions at the first entry whose internal key is `>= target`.
    pub fn seek(&mut self, target: &[u8]) {
        if self.status.is_some() {
            return;
        }
        self.index_iter.seek(target);
        self.load_data_block();
        if let Some(d) = &mut self.data_iter {
            d.seek(target);
        }
        self.skip_empty_blocks_forward();
    }

    /// Advances one entry, hopping to the next block as needed.
    pub fn next(&mut self) {
        debug_assert!(self.valid(), "next() on invalid iterator");
        if let Some(d) = &mut self.data_iter {
            d.next();
        }
        self.skip_empty_blocks_forward();
    }

    /// Steps back one entry, hopping to the previous block as needed.
    pub fn prev(&mut self) {
        debug_assert!(self.valid(), "prev() on invalid iterator");
        if let Some(d) = &mut self.data_iter {
            d.prev();
        }
        self.skip_empty_blocks_backward();
    }

    // --------------------------------------------------------------------
    // Block hopping
    // --------------------------------------------------------------------

    /// Reads the data block under the index cursor into `data_iter`.
    fn load_data_block(&mut self) {
        self.capture_block_status();
        if self.status.is_some() || !self.index_iter.valid() {
            self.data_iter = None;
            return;
        }

        let handle = match BlockHandle::decode_from(self.index_iter.value()) {
            Ok((h, _)) => h,
            Err(e) => {
                self.status = Some(e);
                self.data_iter = None;
                return;
            }
        };
        match self
            .table
            .read_block(handle)
            .and_then(|data| Block::new(data).map_err(TableError::from))
        {
            Ok(block) => {
                self.data_iter = Some(BlockIter::new(Arc::new(block), compare_internal));
            }
            Err(e) => {
                self.status = Some(e);
                self.data_iter = None;
            }
        }
    }

    /// While the data cursor is exhausted, move to the next block.
    fn skip_empty_blocks_forward(&mut self) {
        loop {
            self.capture_block_status();
            if self.status.is_some() || self.valid() || self.data_iter.is_none() {
                return;
            }
            if !self.index_iter.valid() {
                self.data_iter = None;
                return;
            }
            self.index_iter.next();
            if !self.index_iter.valid() {
                self.capture_block_status();
                self.data_iter = None;
                return;
            }
            self.load_data_block();
            if let Some(d) = &mut self.data_iter {
                d.seek_to_first();
            }
        }
    }

    /// While the data cursor is exhausted, move to the previous block.
    fn skip_empty_blocks_backward(&mut self) {
        loop {
            self.capture_block_status();
            if self.status.is_some() || self.valid() || self.data_iter.is_none() {
                return;
            }
            if !self.index_iter.valid() {
                self.data_iter = None;
                return;
            }
            self.index_iter.prev();
            if !self.index_iter.valid() {
                self.capture_block_status();
                self.data_iter = None;
                return;
            }
            self.load_data_block();
            if let Some(d) = &mut self.data_iter {
                d.seek_to_last();
            }
        }
    }

    /// Promotes block-iterator corruption into the table-level status.
    fn capture_block_status(&mut self) {
        if self.status.is_some() {
            return;
        }
        if let Err(e) = self.index_iter.status() {
            self.status = Some(e.into());
            return;
        }
        if let Some(d) = &self.data_iter {
            if let Err(e) = d.status() {
                self.status = Some(e.into());
            }
        }
    }
}
