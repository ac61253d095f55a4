//! Bloom filters for point-lookup short-circuiting.
//!
//! Each table file may carry one filter block.  On reads, the filter is
//! probed before any data block is fetched or decompressed; a negative
//! answer proves the key absent from the file.  Absence of the filter
//! block is legal — probes then answer "maybe" unconditionally.
//!
//! The bit layout is part of the interchange format, so the filter is
//! built here rather than taken from a general-purpose crate: a filter
//! written by this module must probe identically in a reference process.
//!
//! # Filter block layout
//!
//! One filter is generated per 2 KiB ([`FILTER_BASE_LG`]) window of data
//! block *offsets* (not sizes), so a data block starting at offset `o` is
//! covered by filter number `o >> FILTER_BASE_LG`:
//!
//! ```text
//!     +--------------+-----+--------------+----------------------+--------------------+---------+
//!     | filter 1     | ... | filter n     | offsets[u32_le each] | array_off (u32_le) | base_lg |
//!     +--------------+-----+--------------+----------------------+--------------------+---------+
//! ```
//!
//! # Per-filter layout
//!
//! `bits_per_key × n` bits (minimum 64), rounded up to whole bytes, with
//! the probe count `k` appended as one trailing byte.  Probing uses
//! double hashing: `h` is advanced by `delta = rot15(h)` for each of the
//! `k` probes.

#[cfg(test)]
mod tests;

use crate::encoding::{decode_fixed32, put_fixed32};

/// Policy name advertised in the metaindex (`filter.<name>`).
pub const FILTER_POLICY_NAME: &str = "rocksdb.BuiltinBloomFilter";

/// log2 of the data-offset range covered by one filter (2 KiB).
pub const FILTER_BASE_LG: u8 = 11;

/// Seed for the bloom hash function.
const BLOOM_HASH_SEED: u32 = 0xbc9f_1d34;

// ------------------------------------------------------------------------------------------------
// Bloom policy
// ------------------------------------------------------------------------------------------------

/// Bloom filter policy with a configurable bits-per-key budget.
#[derive(Debug, Clone, Copy)]
pub struct BloomFilterPolicy {
    bits_per_key: usize,
    /// Probes per key, derived as `bits_per_key * ln 2`, clamped to 1..=30.
    k: u8,
}

impl BloomFilterPolicy {
    /// Creates a policy; 10 bits per key gives a ~1% false-positive rate.
    pub fn new(bits_per_key: usize) -> Self {
        let k = ((bits_per_key as f64) * 0.69) as usize; // 0.69 =~ ln 2
        Self {
            bits_per_key,
            k: k.clamp(1, 30) as u8,
        }
    }

    /// Appends a filter covering `keys` to `dst`.
    pub fn create_filter(&self, keys: &[Vec<u8>], dst: &mut Vec<u8>) {
        // Round down short filters to a 64-bit floor to keep the
        // false-positive rate sane for tiny key counts.
        let mut bits = keys.len() * self.bits_per_key;
        if bits < 64 {
            bits = 64;
        }
        let bytes = bits.div_ceil(8);
        let bits = bytes * 8;

        let start = dst.len();
        dst.resize(start + bytes, 0);
        dst.push(self.k);

        let array = &mut dst[start..start + bytes];
        for key in keys {
            let mut h = bloom_hash(key);
            let delta = h.rotate_right(17);
            for _ in 0..self.k {
                let bitpos = (h % bits as u32) as usize;
                array[bitpos / 8] |= 1 << (bitpos % 8);
                h = h.wrapping_add(delta);
            }
        }
    }

    /// Probes a filter produced by [`create_filter`].
    ///
    /// Returns `false` only when the key is provably absent.
    pub fn key_may_match(&self, key: &[u8], filter: &[u8]) -> bool {
        if filter.len() < 2 {
            return false;
        }
        let bits = (filter.len() - 1) * 8;
        let k = filter[filter.len() - 1];
        if k > 30 {
            // Reserved for future encodings: treat as a match rather
            // than misinterpret the bit array.
            return true;
        }

        let array = &filter[..filter.len() - 1];
        let mut h = bloom_hash(key);
        let delta = h.rotate_right(17);
        for _ in 0..k {
            let bitpos = (h % bits as u32) as usize;
            if array[bitpos / 8] & (1 << (bitpos % 8)) == 0 {
                return false;
            }
            h = h.wrapping_add(delta);
        }
        true
    }
}

/// The bloom hash: a murmur-lineage hash fixed by the filter format.
pub fn bloom_hash(data: &[u8]) -> u32 {
    const M: u32 = 0xc6a4_a793;
    const R: u32 = 24;

    let mut h = BLOOM_HASH_SEED ^ (data.len() as u32).wrapping_mul(M);

    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let w = u32::from_le_bytes(chunk.try_into().expect("4-byte chunk"));
        h = h.wrapping_add(w);
        h = h.wrapping_mul(M);
        h ^= h >> 16;
    }

    let rest = chunks.remainder();
    if !rest.is_empty() {
        if rest.len() >= 3 {
            h = h.wrapping_add(u32::from(rest[2]) << 16);
        }
        if rest.len() >= 2 {
            h = h.wrapping_add(u32::from(rest[1]) << 8);
        }
        h = h.wrapping_add(u32::from(rest[0]));
        h = h.wrapping_mul(M);
        h ^= h >> R;
    }
    h
}

// ------------------------------------------------------------------------------------------------
// Filter block builder
// ------------------------------------------------------------------------------------------------

/// Accumulates per-data-block filters while a table is being written.
#[derive(Debug)]
pub struct FilterBlockBuilder {
    policy: BloomFilterPolicy,
    /// Keys accumulated for the filter currently being built.
    keys: Vec<Vec<u8>>,
    /// Filter bytes emitted so far.
    result: Vec<u8>,
    /// Start offset of each emitted filter within `result`.
    filter_offsets: Vec<u32>,
}

impl FilterBlockBuilder {
    /// Creates a builder for the given policy.
    pub fn new(policy: BloomFilterPolicy) -> Self {
        Self {
            policy,
            keys: Vec::new(),
            result: Vec::new(),
            filter_offsets: Vec::new(),
        }
    }

    /// Announces that a data block begins at `block_offset`.
    ///
    /// Emits filters for every 2 KiB window that ended before it.
    pub fn start_block(&mut self, block_offset: u64) {
        let filter_index = block_offset >> FILTER_BASE_LG;
        debug_assert!(filter_index >= self.filter_offsets.len() as u64);
        while (self.filter_offsets.len() as u64) < filter_index {
            self.generate_filter();
        }
    }

    /// Registers a user key for the current filter window.
    pub fn add_key(&mut self, key: &[u8]) {
        self.keys.push(key.to_vec());
    }

    /// Emits the trailing filter, the offset array, and the base-lg byte.
    pub fn finish(mut self) -> Vec<u8> {
        if !self.keys.is_empty() {
            self.generate_filter();
        }

        let array_offset = self.result.len() as u32;
        let offsets = std::mem::take(&mut self.filter_offsets);
        for offset in offsets {
            put_fixed32(&mut self.result, offset);
        }
        put_fixed32(&mut self.result, array_offset);
        self.result.push(FILTER_BASE_LG);
        self.result
    }

    fn generate_filter(&mut self) {
        self.filter_offsets.push(self.result.len() as u32);
        if self.keys.is_empty() {
            // Window with no keys: empty filter, offset repeats.
            return;
        }
        self.policy.create_filter(&self.keys, &mut self.result);
        self.keys.clear();
    }
}

// ------------------------------------------------------------------------------------------------
// Filter block reader
// ------------------------------------------------------------------------------------------------

/// Probes a finished filter block.
#[derive(Debug)]
pub struct FilterBlockReader {
    policy: BloomFilterPolicy,
    data: Vec<u8>,
    /// Offset of the offset array within `data`.
    array_offset: usize,
    /// Number of filters.
    num_filters: usize,
    base_lg: u8,
}

impl FilterBlockReader {
    /// Wraps filter-block bytes; malformed trailers yield a reader that
    /// answers "maybe" for everything (the filter is an optimization,
    /// never an authority).
    pub fn new(policy: BloomFilterPolicy, data: Vec<u8>) -> Self {
        let mut reader = Self {
            policy,
            data,
            array_offset: 0,
            num_filters: 0,
            base_lg: FILTER_BASE_LG,
        };

        let n = reader.data.len();
        if n < 5 {
            return reader;
        }
        reader.base_lg = reader.data[n - 1];
        let Ok(array_offset) = decode_fixed32(&reader.data[n - 5..n - 1]) else {
            return reader;
        };
        let array_offset = array_offset as usize;
        if array_offset > n - 5 {
            return reader;
        }
        reader.array_offset = array_offset;
        reader.num_filters = (n - 5 - array_offset) / 4;
        reader
    }

    /// Probes the filter covering the data block at `block_offset`.
    pub fn key_may_match(&self, block_offset: u64, key: &[u8]) -> bool {
        let index = (block_offset >> self.base_lg) as usize;
        if index >= self.num_filters {
            // Out of range: treat as a potential match.
            return true;
        }

        let at = self.array_offset + index * 4;
        let (Ok(start), Ok(limit)) = (
            decode_fixed32(&self.data[at..]),
            decode_fixed32(&self.data[at + 4..]),
        ) else {
            return true;
        };
        let (start, limit) = (start as usize, limit as usize);

        if start == limit {
            // Empty filter window: no keys were present.
            return false;
        }
        if start > limit || limit > self.array_offset {
            return true;
        }
        self.policy.key_may_match(key, &self.data[start..limit])
    }
}
