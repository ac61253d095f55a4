//! Block construction.
//!
//! [`BlockBuilder`] accumulates ascending key/value entries, sharing each
//! key's prefix with its predecessor and opening a fresh restart point
//! every `restart_interval` entries.  `finish` appends the restart array
//! and the packed `(index_type | num_restarts)` word and hands back the
//! completed block bytes.

use crate::encoding::{put_fixed32, put_varint32};

/// Default number of entries between restart points for data blocks.
pub const DEFAULT_RESTART_INTERVAL: usize = 16;

/// Builds one prefix-compressed block.
///
/// Keys must be supplied in ascending order under the comparator the
/// block will later be read with; the builder itself is
/// comparator-agnostic and only computes byte-prefix sharing.
#[derive(Debug)]
pub struct BlockBuilder {
    /// Entry bytes accumulated so far.
    buffer: Vec<u8>,

    /// Offsets of restart entries. `restarts[0]` is always 0.
    restarts: Vec<u32>,

    /// Entries emitted since the last restart point.
    counter: usize,

    /// Entries between restart points.
    restart_interval: usize,

    /// When false every entry is written with `shared = 0`.
    use_delta_encoding: bool,

    /// Copy of the most recently added key.
    last_key: Vec<u8>,

    /// Set by `finish`; `add` afterwards is a programmer error.
    finished: bool,
}

impl BlockBuilder {
    /// Creates a builder with the given restart interval.
    ///
    /// # Panics
    ///
    /// Panics if `restart_interval` is zero.
    pub fn new(restart_interval: usize) -> Self {
        assert!(restart_interval >= 1, "restart interval must be positive");
        Self {
            buffer: Vec::new(),
            restarts: vec![0],
            counter: 0,
            restart_interval,
            use_delta_encoding: true,
            last_key: Vec::new(),
            finished: false,
        }
    }

    /// Disables prefix compression; every entry stores its full key.
    pub fn without_delta_encoding(mut self) -> Self {
        self.use_delta_encoding = false;
        self
    }

    /// Appends an entry.  `key` must sort after every key added so far.
    ///
    /// # Panics
    ///
    /// Panics if called after [`finish`](Self::finish).
    pub fn add(&mut self, key: &[u8], value: &[u8]) {
        assert!(!self.finished, "add() after finish()");

        let shared = if self.counter < self.restart_interval {
            if self.use_delta_encoding {
                common_prefix_len(&self.last_key, key)
            } else {
                0
            }
        } else {
            // Start a new restart point: full key, reset the run.
            self.restarts.push(self.buffer.len() as u32);
            self.counter = 0;
            0
        };
        let unshared = key.len() - shared;

        put_varint32(&mut self.buffer, shared as u32);
        put_varint32(&mut self.buffer, unshared as u32);
        put_varint32(&mut self.buffer, value.len() as u32);
        self.buffer.extend_from_slice(&key[shared..]);
        self.buffer.extend_from_slice(value);

        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.counter += 1;
    }

    /// Appends the restart array and packed trailer word, returning the
    /// finished block bytes.  The builder must be [`reset`](Self::reset)
    /// before reuse.
    pub fn finish(&mut self) -> &[u8] {
        assert!(!self.finished, "finish() called twice");
        for &restart in &self.restarts {
            put_fixed32(&mut self.buffer, restart);
        }
        // index_type bit (high bit) is zero: binary-search restarts only.
        put_fixed32(&mut self.buffer, self.restarts.len() as u32);
        self.finished = true;
        &self.buffer
    }

    /// Clears all state for building another block.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.restarts.clear();
        self.restarts.push(0);
        self.counter = 0;
        self.last_key.clear();
        self.finished = false;
    }

    /// True if no entries have been added since construction/reset.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Size of the block `finish` would currently produce.
    pub fn current_size_estimate(&self) -> usize {
        self.buffer.len() + self.restarts.len() * 4 + 4
    }

    /// Size estimate after adding one more `(key, value)` entry.
    ///
    /// Used by the table writer's block-size policy: the estimate is an
    /// upper bound (it assumes no prefix sharing and worst-case varint
    /// headers plus a possible new restart slot).
    pub fn estimate_size_after_kv(&self, key: &[u8], value: &[u8]) -> usize {
        self.current_size_estimate() + key.len() + value.len() + 3 * 5 + 4
    }
}

/// Length of the longest common prefix of `a` and `b`.
fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}
