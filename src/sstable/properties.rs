//! The table properties block.
//!
//! Properties are stored as a plain block whose keys are well-known
//! strings and whose values are varint64- or string-encoded depending on
//! the key.  Keys are emitted in ascending alphabetic order; the format
//! does not require it, but some reference tools assume it.
//!
//! Unknown keys are preserved by readers that rewrite tables and ignored
//! otherwise, so properties written by newer implementations do not break
//! older readers.

use std::sync::Arc;

use crate::block::{Block, BlockBuilder, BlockIter};
use crate::encoding::{get_varint64, put_varint64};
use crate::keys::COMPARATOR_NAME;

use super::TableError;

/// Well-known property keys.
mod keys {
    pub const COLUMN_FAMILY_ID: &str = "rocksdb.column.family.id";
    pub const COMPARATOR: &str = "rocksdb.comparator";
    pub const COMPRESSION: &str = "rocksdb.compression";
    pub const CREATION_TIME: &str = "rocksdb.creation.time";
    pub const DATA_SIZE: &str = "rocksdb.data.size";
    pub const FILTER_POLICY: &str = "rocksdb.filter.policy";
    pub const FILTER_SIZE: &str = "rocksdb.filter.size";
    pub const FORMAT_VERSION: &str = "rocksdb.format.version";
    pub const INDEX_SIZE: &str = "rocksdb.index.size";
    pub const NUM_DATA_BLOCKS: &str = "rocksdb.num.data.blocks";
    pub const NUM_ENTRIES: &str = "rocksdb.num.entries";
    pub const RAW_KEY_SIZE: &str = "rocksdb.raw.key.size";
    pub const RAW_VALUE_SIZE: &str = "rocksdb.raw.value.size";
}

/// Statistics and identity of one table file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableProperties {
    /// Id of the column family this table belongs to.
    pub column_family_id: u32,

    /// Name of the user-key comparator the table was sorted with.
    pub comparator_name: String,

    /// Display name of the compression codec configured at build time.
    pub compression_name: String,

    /// Unix time (seconds) the table was created, zero when unknown.
    pub creation_time: u64,

    /// Total size of all (compressed) data blocks, trailers excluded.
    pub data_size: u64,

    /// Filter policy name; empty when the table has no filter.
    pub filter_policy_name: String,

    /// Size of the filter block, zero when absent.
    pub filter_size: u64,

    /// Table format version.
    pub format_version: u64,

    /// Size of the index block.
    pub index_size: u64,

    /// Number of data blocks.
    pub num_data_blocks: u64,

    /// Number of entries across all data blocks.
    pub num_entries: u64,

    /// Sum of uncompressed internal-key lengths.
    pub raw_key_size: u64,

    /// Sum of uncompressed value lengths.
    pub raw_value_size: u64,
}

impl TableProperties {
    /// Encodes the properties as a block (restart interval 1, keys in
    /// ascending order).
    pub fn encode(&self) -> Vec<u8> {
        let mut varint_buf = |v: u64| {
            let mut b = Vec::with_capacity(10);
            put_varint64(&mut b, v);
            b
        };

        // (key, value) pairs, pre-sorted alphabetically by key.
        let mut pairs: Vec<(&str, Vec<u8>)> = vec![
            (keys::COLUMN_FAMILY_ID, varint_buf(u64::from(self.column_family_id))),
            (keys::COMPARATOR, self.comparator_name.as_bytes().to_vec()),
            (keys::COMPRESSION, self.compression_name.as_bytes().to_vec()),
            (keys::CREATION_TIME, varint_buf(self.creation_time)),
            (keys::DATA_SIZE, varint_buf(self.data_size)),
            (keys::FILTER_SIZE, varint_buf(self.filter_size)),
            (keys::FORMAT_VERSION, varint_buf(self.format_version)),
            (keys::INDEX_SIZE, varint_buf(self.index_size)),
            (keys::NUM_DATA_BLOCKS, varint_buf(self.num_data_blocks)),
            (keys::NUM_ENTRIES, varint_buf(self.num_entries)),
            (keys::RAW_KEY_SIZE, varint_buf(self.raw_key_size)),
            (keys::RAW_VALUE_SIZE, varint_buf(self.raw_value_size)),
        ];
        if !self.filter_policy_name.is_empty() {
            pairs.push((
                keys::FILTER_POLICY,
                self.filter_policy_name.as_bytes().to_vec(),
            ));
        }
        pairs.sort_by(|a, b| a.0.cmp(b.0));

        let mut builder = BlockBuilder::new(1).without_delta_encoding();
        for (key, value) in &pairs {
            builder.add(key.as_bytes(), value);
        }
        builder.finish().to_vec()
    }

    /// Decodes a properties block.  Unknown keys are ignored.
    pub fn decode(data: Vec<u8>) -> Result<Self, TableError> {
        let block = Arc::new(Block::new(data)?);
        let mut iter = BlockIter::new(block, |a, b| a.cmp(b));

        let mut props = Self::default();
        iter.seek_to_first();
        while iter.valid() {
            let key = std::str::from_utf8(iter.key()).unwrap_or("").to_string();
            let value = iter.value();
            match key.as_str() {
                keys::COLUMN_FAMILY_ID => {
                    props.column_family_id = parse_varint(value, &key)? as u32;
                }
                keys::COMPARATOR => {
                    props.comparator_name = String::from_utf8_lossy(value).into_owned();
                }
                keys::COMPRESSION => {
                    props.compression_name = String::from_utf8_lossy(value).into_owned();
                }
                keys::CREATION_TIME => props.creation_time = parse_varint(value, &key)?,
                keys::DATA_SIZE => props.data_size = parse_varint(value, &key)?,
                keys::FILTER_POLICY => {
                    props.filter_policy_name = String::from_utf8_lossy(value).into_owned();
                }
                keys::FILTER_SIZE => props.filter_size = parse_varint(value, &key)?,
                keys::FORMAT_VERSION => props.format_version = parse_varint(value, &key)?,
                keys::INDEX_SIZE => props.index_size = parse_varint(value, &key)?,
                keys::NUM_DATA_BLOCKS => props.num_data_blocks = parse_varint(value, &key)?,
                keys::NUM_ENTRIES => props.num_entries = parse_varint(value, &key)?,
                keys::RAW_KEY_SIZE => props.raw_key_size = parse_varint(value, &key)?,
                keys::RAW_VALUE_SIZE => props.raw_value_size = parse_varint(value, &key)?,
                _ => {} // forward compatibility
            }
            iter.next();
        }
        iter.status()?;
        Ok(props)
    }

    /// Default comparator sanity check for interop.
    pub fn comparator_matches(&self) -> bool {
        self.comparator_name.is_empty() || self.comparator_name == COMPARATOR_NAME
    }
}

fn parse_varint(value: &[u8], key: &str) -> Result<u64, TableError> {
    let (v, _) = get_varint64(value)
        .map_err(|_| TableError::Corruption(format!("property {key} is not a varint")))?;
    Ok(v)
}
