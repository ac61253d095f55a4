#![cfg(test)]

use std::cmp::Ordering;
use std::sync::Arc;

use crate::block::{Block, BlockBuilder, BlockIter};

/// Plain bytewise ordering, used by meta-style blocks in tests.
pub fn bytewise(a: &[u8], b: &[u8]) -> Ordering {
    a.cmp(b)
}

/// Builds a block from sorted `(key, value)` pairs.
pub fn build_block(restart_interval: usize, entries: &[(&[u8], &[u8])]) -> Arc<Block> {
    let mut builder = BlockBuilder::new(restart_interval);
    for (k, v) in entries {
        builder.add(k, v);
    }
    Arc::new(Block::new(builder.finish().to_vec()).unwrap())
}

/// Collects every `(key, value)` by forward iteration.
pub fn collect_forward(block: &Arc<Block>) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut iter = BlockIter::new(Arc::clone(block), bytewise);
    let mut out = Vec::new();
    iter.seek_to_first();
    while iter.valid() {
        out.push((iter.key().to_vec(), iter.value().to_vec()));
        iter.next();
    }
    iter.status().unwrap();
    out
}
