//! Table construction.
//!
//! [`TableBuilder`] consumes internal keys in ascending order and writes
//! a complete table file: data blocks as they fill, then the filter
//! block, properties block, metaindex, index, and footer, laid out per
//! the chosen format version.
//!
//! # Atomicity
//!
//! The builder writes to `<path>.tmp` and renames to the final path only
//! after everything (footer included) is flushed and fsynced, so a crash
//! cannot leave a partially-written table behind under the real name.

use std::fs::{File, OpenOptions, rename};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, trace};

use crate::block::BlockBuilder;
use crate::block::builder::DEFAULT_RESTART_INTERVAL;
use crate::checksum::{ChecksumKind, block_checksum, context_modifier};
use crate::compression::{CompressionKind, maybe_compress};
use crate::filter::{BloomFilterPolicy, FILTER_POLICY_NAME, FilterBlockBuilder};
use crate::keys::{COMPARATOR_NAME, compare_internal, extract_user_key};

use super::{
    BLOCK_TRAILER_SIZE, BlockHandle, DEFAULT_BLOCK_SIZE, Footer, METAINDEX_FILTER_KEY,
    METAINDEX_INDEX_KEY, METAINDEX_PROPERTIES_KEY, TableError, TableProperties,
};

/// Index blocks pin restart interval 1 so every entry stores its full
/// separator key and handle.
const INDEX_RESTART_INTERVAL: usize = 1;

// ------------------------------------------------------------------------------------------------
// Options
// ------------------------------------------------------------------------------------------------

/// Knobs for building one table file.
#[derive(Debug, Clone)]
pub struct TableOptions {
    /// Target uncompressed size of a data block.
    pub block_size: usize,

    /// Entries between restart points in data blocks.
    pub restart_interval: usize,

    /// Table format version to write: 0 or 3–6.
    pub format_version: u32,

    /// Codec for data blocks (meta blocks are always stored raw).
    pub compression: CompressionKind,

    /// Checksum function for all block trailers.
    pub checksum: ChecksumKind,

    /// Bloom bits per key; zero disables the filter block.
    pub filter_bits_per_key: usize,

    /// Column family the table belongs to (recorded in properties).
    pub column_family_id: u32,

    /// Context-checksum base for format version 6; ignored otherwise.
    /// Zero disables context mixing.
    pub base_context_checksum: u32,
}

impl Default for TableOptions {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            restart_interval: DEFAULT_RESTART_INTERVAL,
            format_version: 5,
            compression: CompressionKind::None,
            checksum: ChecksumKind::Crc32c,
            filter_bits_per_key: 10,
            column_family_id: 0,
            base_context_checksum: 0,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TableBuilder
// ------------------------------------------------------------------------------------------------

/// Streams ascending internal-key entries into a table file.
pub struct TableBuilder {
    options: TableOptions,

    /// Destination path; bytes go to `tmp_path` until `finish`.
    path: PathBuf,
    tmp_path: PathBuf,
    writer: BufWriter<File>,

    /// Bytes written so far (= offset of the next block).
    offset: u64,

    data_block: BlockBuilder,
    index_block: BlockBuilder,
    filter: Option<FilterBlockBuilder>,

    /// Most recently added internal key.
    last_key: Vec<u8>,

    num_entries: u64,
    num_data_blocks: u64,
    data_size: u64,
    raw_key_size: u64,
    raw_value_size: u64,

    finished: bool,
}

impl TableBuilder {
    /// Opens `<path>.tmp` for writing and prepares the builder.
    ///
    /// Fails with [`TableError::Corruption`]-class errors only on I/O;
    /// an invalid `format_version` is rejected up front.
    pub fn create(path: impl AsRef<Path>, options: TableOptions) -> Result<Self, TableError> {
        if !matches!(options.format_version, 0 | 3..=6) {
            return Err(TableError::Corruption(format!(
                "cannot write format version {}",
                options.format_version
            )));
        }
        if options.format_version == 0 && options.checksum != ChecksumKind::Crc32c {
            return Err(TableError::Corruption(
                "format version 0 supports only CRC32C checksums".into(),
            ));
        }

        let path = path.as_ref().to_path_buf();
        let tmp_path = path.with_extension("sst.tmp");
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;

        let filter = (options.filter_bits_per_key > 0).then(|| {
            let mut f = FilterBlockBuilder::new(BloomFilterPolicy::new(
                options.filter_bits_per_key,
            ));
            f.start_block(0);
            f
        });

        let data_restart = options.restart_interval;
        Ok(Self {
            options,
            path,
            tmp_path,
            writer: BufWriter::new(file),
            offset: 0,
            data_block: BlockBuilder::new(data_restart),
            index_block: BlockBuilder::new(INDEX_RESTART_INTERVAL),
            filter,
            last_key: Vec::new(),
            num_entries: 0,
            num_data_blocks: 0,
            data_size: 0,
            raw_key_size: 0,
            raw_value_size: 0,
            finished: false,
        })
    }

    /// Appends one entry.  Internal keys must arrive in ascending order.
    ///
    /// # Panics
    ///
    /// Panics if called after [`finish`](Self::finish); debug-asserts the
    /// ordering contract.
    pub fn add(&mut self, internal_key: &[u8], value: &[u8]) -> Result<(), TableError> {
        assert!(!self.finished, "add() after finish()");
        debug_assert!(
            self.last_key.is_empty()
                || compare_internal(&self.last_key, internal_key).is_lt(),
            "keys must be added in ascending internal-key order"
        );

        if !self.data_block.is_empty()
            && self.data_block.estimate_size_after_kv(internal_key, value)
                > self.options.block_size
        {
            self.flush_data_block()?;
        }

        if let Some(filter) = &mut self.filter {
            let user_key = extract_user_key(internal_key);
            let is_new_user_key = self.last_key.is_empty()
                || extract_user_key(&self.last_key) != user_key;
            if is_new_user_key {
                filter.add_key(user_key);
            }
        }

        self.data_block.add(internal_key, value);
        self.num_entries += 1;
        self.raw_key_size += internal_key.len() as u64;
        self.raw_value_size += value.len() as u64;
        self.last_key.clear();
        self.last_key.extend_from_slice(internal_key);
        Ok(())
    }

    /// Number of entries added so far.
    pub fn num_entries(&self) -> u64 {
        self.num_entries
    }

    /// Current file size estimate (written blocks only).
    pub fn file_size(&self) -> u64 {
        self.offset
    }

    /// Writes all remaining blocks and the footer, fsyncs, and renames
    /// the temp file into place.  Returns the final file size.
    pub fn finish(mut self) -> Result<u64, TableError> {
        self.flush_data_block()?;

        // Filter block (never compressed).
        let mut filter_handle = None;
        let mut filter_size = 0u64;
        if let Some(filter) = self.filter.take() {
            let contents = filter.finish();
            filter_size = contents.len() as u64;
            filter_handle = Some(self.write_raw_block(&contents)?);
        }

        // Index contents are needed before properties (index_size).
        let index_contents = self.index_block.finish().to_vec();

        let properties = TableProperties {
            column_family_id: self.options.column_family_id,
            comparator_name: COMPARATOR_NAME.to_string(),
            compression_name: self.options.compression.name().to_string(),
            creation_time: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            data_size: self.data_size,
            filter_policy_name: if filter_size > 0 {
                FILTER_POLICY_NAME.to_string()
            } else {
                String::new()
            },
            filter_size,
            format_version: u64::from(self.options.format_version),
            index_size: index_contents.len() as u64,
            num_data_blocks: self.num_data_blocks,
            num_entries: self.num_entries,
            raw_key_size: self.raw_key_size,
            raw_value_size: self.raw_value_size,
        };
        let properties_contents = properties.encode();

        let base_context_checksum = if self.options.format_version >= 6 {
            self.options.base_context_checksum
        } else {
            0
        };

        let (metaindex_handle, index_handle) = if self.options.format_version >= 6 {
            // v6: index precedes the metaindex, which must sit directly
            // before the footer; the footer finds it by size alone.
            let properties_handle = self.write_raw_block(&properties_contents)?;
            let index_handle = self.write_raw_block(&index_contents)?;
            let metaindex_contents =
                build_metaindex(filter_handle, Some(index_handle), properties_handle);
            let metaindex_handle = self.write_raw_block(&metaindex_contents)?;
            (metaindex_handle, BlockHandle::default())
        } else {
            let properties_handle = self.write_raw_block(&properties_contents)?;
            let metaindex_contents = build_metaindex(filter_handle, None, properties_handle);
            let metaindex_handle = self.write_raw_block(&metaindex_contents)?;
            let index_handle = self.write_raw_block(&index_contents)?;
            (metaindex_handle, index_handle)
        };

        let footer = Footer {
            format_version: self.options.format_version,
            checksum_kind: self.options.checksum,
            metaindex_handle,
            index_handle,
            base_context_checksum,
        };
        let footer_bytes = footer.encode(self.offset);
        self.writer.write_all(&footer_bytes)?;
        self.offset += footer_bytes.len() as u64;

        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        rename(&self.tmp_path, &self.path)?;
        self.finished = true;

        debug!(
            path = %self.path.display(),
            entries = self.num_entries,
            data_blocks = self.num_data_blocks,
            size = self.offset,
            format_version = self.options.format_version,
            "table finished"
        );
        Ok(self.offset)
    }

    // --------------------------------------------------------------------
    // Block emission
    // --------------------------------------------------------------------

    /// Finishes the current data block, writes it, and indexes it under
    /// its last key.
    fn flush_data_block(&mut self) -> Result<(), TableError> {
        if self.data_block.is_empty() {
            return Ok(());
        }
        let contents = self.data_block.finish().to_vec();
        let handle = self.write_block(&contents, self.options.compression)?;

        self.index_block.add(&self.last_key, &handle.encoded());
        self.num_data_blocks += 1;
        self.data_size += handle.size;
        self.data_block.reset();

        if let Some(filter) = &mut self.filter {
            filter.start_block(self.offset);
        }
        trace!(offset = handle.offset, size = handle.size, "data block written");
        Ok(())
    }

    /// Writes `contents` with compression and a checksummed trailer.
    fn write_block(
        &mut self,
        contents: &[u8],
        compression: CompressionKind,
    ) -> Result<BlockHandle, TableError> {
        let (payload, kind) =
            maybe_compress(compression, contents, self.options.format_version)?;

        let context = if self.options.format_version >= 6 {
            context_modifier(self.options.base_context_checksum, self.offset)
        } else {
            0
        };
        let checksum =
            block_checksum(self.options.checksum, &payload, kind as u8).wrapping_add(context);

        let handle = BlockHandle::new(self.offset, payload.len() as u64);
        self.writer.write_all(&payload)?;
        self.writer.write_all(&[kind as u8])?;
        self.writer.write_all(&checksum.to_le_bytes())?;
        self.offset += payload.len() as u64 + BLOCK_TRAILER_SIZE as u64;
        Ok(handle)
    }

    /// Writes a meta block: never compressed, still checksummed.
    fn write_raw_block(&mut self, contents: &[u8]) -> Result<BlockHandle, TableError> {
        self.write_block(contents, CompressionKind::None)
    }
}

impl Drop for TableBuilder {
    fn drop(&mut self) {
        if !self.finished {
            // Abandoned build: remove the temp file, ignore failures.
            let _ = std::fs::remove_file(&self.tmp_path);
        }
    }
}

/// Builds the metaindex block: name → handle, keys in ascending order.
fn build_metaindex(
    filter_handle: Option<BlockHandle>,
    index_handle: Option<BlockHandle>,
    properties_handle: BlockHandle,
) -> Vec<u8> {
    let mut entries: Vec<(&str, BlockHandle)> = Vec::new();
    if let Some(h) = filter_handle {
        entries.push((METAINDEX_FILTER_KEY, h));
    }
    if let Some(h) = index_handle {
        entries.push((METAINDEX_INDEX_KEY, h));
    }
    entries.push((METAINDEX_PROPERTIES_KEY, properties_handle));
    entries.sort_by(|a, b| a.0.cmp(b.0));

    let mut builder = BlockBuilder::new(1);
    for (name, handle) in entries {
        builder.add(name.as_bytes(), &handle.encoded());
    }
    builder.finish().to_vec()
}
