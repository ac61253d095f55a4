//! Table reading.
//!
//! [`Table::open`] memory-maps a table file, sniffs and validates the
//! footer, walks the metaindex to locate the filter, properties, and
//! index blocks, and caches the decoded index.  Data blocks are read
//! lazily per lookup or iteration step, with the trailer checksum
//! verified when [`TableReadOptions::verify_checksums`] is set.
//!
//! A missing filter or properties block downgrades gracefully: the
//! reader proceeds without them and logs a warning.  A bad footer,
//! magic, or index block is fatal for the open.
//!
//! # Safety
//!
//! The file is mapped read-only and never mutated after creation, so the
//! `unsafe` mmap is sound; all block boundaries are bounds-checked
//! before slicing.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use memmap2::Mmap;
use tracing::{debug, warn};

use crate::block::{Block, BlockIter};
use crate::checksum::verify_block_checksum;
use crate::compression::{CompressionKind, decompress};
use crate::filter::{BloomFilterPolicy, FilterBlockReader};
use crate::keys::{ParsedInternalKey, SequenceNumber, ValueType, compare_internal, make_lookup_key};

use super::{
    BLOCK_TRAILER_SIZE, BlockHandle, FOOTER_SIZE, Footer, LEGACY_FOOTER_SIZE,
    METAINDEX_FILTER_KEY, METAINDEX_INDEX_KEY, METAINDEX_PROPERTIES_KEY, TableError, TableIter,
    TableProperties,
};

// ------------------------------------------------------------------------------------------------
// Options & lookup result
// ------------------------------------------------------------------------------------------------

/// Per-open read options.
#[derive(Debug, Clone, Default)]
pub struct TableReadOptions {
    /// Recompute and verify every block's trailer checksum on read.
    pub verify_checksums: bool,
}

/// What one table knows about a user key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableLookup {
    /// The newest visible entry is a value.
    Value(Vec<u8>),
    /// The newest visible entry is a point or single-delete tombstone.
    Deletion,
    /// This table has no information about the key.
    None,
}

// ------------------------------------------------------------------------------------------------
// Table
// ------------------------------------------------------------------------------------------------

/// An immutable, memory-mapped table file.
pub struct Table {
    mmap: Mmap,
    footer: Footer,

    /// Decoded index block, cached for the table's lifetime.
    index: Arc<Block>,

    /// Bloom filter reader, when the file carries a filter block.
    filter: Option<FilterBlockReader>,

    /// Decoded properties; defaulted (with a warning) when absent.
    pub properties: TableProperties,

    options: TableReadOptions,
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table").field("properties", &self.properties).finish()
    }
}

impl Table {
    /// Opens and validates a table file.
    pub fn open(path: impl AsRef<Path>, options: TableReadOptions) -> Result<Self, TableError> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        let file_len = mmap.len();

        if file_len < LEGACY_FOOTER_SIZE {
            return Err(TableError::Corruption(format!(
                "file too small to be a table ({file_len} bytes)"
            )));
        }

        let tail_len = FOOTER_SIZE.min(file_len);
        let tail = &mmap[file_len - tail_len..];
        // The footer starts where its shape says it does; sniff the magic
        // first, then fix the offset for the checksum context.
        let footer = Footer::decode(tail, probe_footer_offset(tail, file_len)?)?;

        let mut table = Self {
            mmap,
            footer,
            index: Arc::new(Block::new(vec![0, 0, 0, 0, 1, 0, 0, 0]).expect("empty block")),
            filter: None,
            properties: TableProperties::default(),
            options,
        };

        // Metaindex → filter / properties / (v6) index handles.
        let metaindex_data = table.read_block(table.footer.metaindex_handle)?;
        let metaindex = Arc::new(Block::new(metaindex_data)?);

        let mut filter_handle = None;
        let mut properties_handle = None;
        let mut index_handle = if table.footer.format_version >= 6 {
            None
        } else {
            Some(table.footer.index_handle)
        };

        let mut iter = BlockIter::new(Arc::clone(&metaindex), |a, b| a.cmp(b));
        iter.seek_to_first();
        while iter.valid() {
            let name = iter.key().to_vec();
            let (handle, _) = BlockHandle::decode_from(iter.value())?;
            match name.as_slice() {
                n if n == METAINDEX_FILTER_KEY.as_bytes() => filter_handle = Some(handle),
                n if n == METAINDEX_PROPERTIES_KEY.as_bytes() => {
                    properties_handle = Some(handle)
                }
                n if n == METAINDEX_INDEX_KEY.as_bytes() => index_handle = Some(handle),
                _ => {} // unknown meta blocks are fine
            }
            iter.next();
        }
        iter.status()?;

        let index_handle = index_handle.ok_or_else(|| {
            TableError::Corruption("metaindex is missing the index handle".into())
        })?;
        table.index = Arc::new(Block::new(table.read_block(index_handle)?)?);

        if let Some(handle) = filter_handle {
            let data = table.read_block(handle)?;
            table.filter = Some(FilterBlockReader::new(BloomFilterPolicy::new(10), data));
        }

        match properties_handle {
            Some(handle) => {
                table.properties = TableProperties::decode(table.read_block(handle)?)?;
                if !table.properties.comparator_matches() {
                    return Err(TableError::Corruption(format!(
                        "table written with comparator {:?}",
                        table.properties.comparator_name
                    )));
                }
            }
            None => {
                warn!(path = %path.display(), "table has no properties block");
            }
        }

        debug!(
            path = %path.display(),
            format_version = table.footer.format_version,
            entries = table.properties.num_entries,
            "table opened"
        );
        Ok(table)
    }

    /// The table's format version.
    pub fn format_version(&self) -> u32 {
        self.footer.format_version
    }

    /// On-disk file size.
    pub fn file_size(&self) -> u64 {
        self.mmap.len() as u64
    }

    /// Returns an unpositioned two-level iterator over the table.
    pub fn iter(&self) -> TableIter<'_> {
        TableIter::new(self, Arc::clone(&self.index))
    }

    /// Looks up the newest version of `user_key` visible at `snapshot`.
    pub fn get(
        &self,
        user_key: &[u8],
        snapshot: SequenceNumber,
    ) -> Result<TableLookup, TableError> {
        let lookup = make_lookup_key(user_key, snapshot);

        // Pick the candidate data block first: the filter is windowed by
        // block offset, so the probe needs the handle.
        let mut index_iter = BlockIter::new(Arc::clone(&self.index), compare_internal);
        index_iter.seek(&lookup);
        if !index_iter.valid() {
            index_iter.status()?;
            return Ok(TableLookup::None);
        }
        if let Some(filter) = &self.filter {
            let (handle, _) = BlockHandle::decode_from(index_iter.value())?;
            if !filter.key_may_match(handle.offset, user_key) {
                return Ok(TableLookup::None);
            }
        }

        let mut iter = self.iter();
        iter.seek(&lookup);
        while iter.valid() {
            let parsed = ParsedInternalKey::parse(iter.key())
                .map_err(|e| TableError::Corruption(e.to_string()))?;
            if parsed.user_key != user_key {
                break;
            }
            match parsed.value_type() {
                Some(ValueType::Value) => return Ok(TableLookup::Value(iter.value().to_vec())),
                Some(ValueType::Deletion) | Some(ValueType::SingleDeletion) => {
                    return Ok(TableLookup::Deletion);
                }
                // No merge operator is configured: fall through to the
                // newest non-merge base for this key.
                Some(ValueType::Merge) => iter.next(),
                Some(ValueType::BlobIndex) => {
                    return Err(TableError::Unsupported("blob index value"));
                }
                _ => iter.next(),
            }
        }
        iter.take_status()?;
        Ok(TableLookup::None)
    }

    /// Reads, verifies, and decompresses the block at `handle`.
    pub(crate) fn read_block(&self, handle: BlockHandle) -> Result<Vec<u8>, TableError> {
        let offset = usize::try_from(handle.offset)
            .map_err(|_| TableError::Corruption("block offset out of range".into()))?;
        let size = usize::try_from(handle.size)
            .map_err(|_| TableError::Corruption("block size out of range".into()))?;
        let end = offset
            .checked_add(size)
            .and_then(|e| e.checked_add(BLOCK_TRAILER_SIZE))
            .ok_or_else(|| TableError::Corruption("block extent overflows".into()))?;
        if end > self.mmap.len() {
            return Err(TableError::Corruption(format!(
                "block [{offset}, {end}) exceeds file of {} bytes",
                self.mmap.len()
            )));
        }

        let payload = &self.mmap[offset..offset + size];
        let trailer = &self.mmap[offset + size..end];
        let compression_byte = trailer[0];
        let stored =
            u32::from_le_bytes(trailer[1..5].try_into().expect("4-byte checksum slice"));

        if self.options.verify_checksums {
            let context_base = if self.footer.format_version >= 6 {
                self.footer.base_context_checksum
            } else {
                0
            };
            verify_block_checksum(
                self.footer.checksum_kind,
                payload,
                compression_byte,
                stored,
                context_base,
                handle.offset,
            )?;
        }

        let kind = CompressionKind::from_wire(compression_byte)?;
        Ok(decompress(kind, payload, self.footer.format_version)?)
    }
}

/// Computes where the footer actually starts given the sniffed tail.
fn probe_footer_offset(tail: &[u8], file_len: usize) -> Result<u64, TableError> {
    use crate::encoding::decode_fixed64;
    if tail.len() < 8 {
        return Err(TableError::Corruption("file too small for a footer".into()));
    }
    let magic = decode_fixed64(&tail[tail.len() - 8..])?;
    let footer_size = if magic == super::LEGACY_TABLE_MAGIC {
        LEGACY_FOOTER_SIZE
    } else {
        FOOTER_SIZE
    };
    file_len
        .checked_sub(footer_size)
        .map(|o| o as u64)
        .ok_or_else(|| TableError::Corruption("file smaller than its footer".into()))
}
