//! The filter block (§4.4): one Bloom filter per `2^base_lg` bytes of data
//! block, so a reader can reject a block without reading it just from the
//! offset it would have lived at.
//!
//! FILTER_BLOCK := filter_data* fixed32(offset)* fixed32(start_of_offsets) u8(base_lg)
//!
//! Grounded on `original_source/src/table/filter_block.c` for the exact
//! region/footer layout, generalized from its single-digit-bytes-per-region
//! constant to the `base_lg` carried in [`crate::options::Options`].

use std::sync::Arc;

use crate::filter::FilterPolicy;

const FOOTER_LEN: usize = 5;

/// Accumulates per-block key sets and turns each one into a filter once the
/// block's region boundary is crossed.
///
/// Callers must call [`FilterBlockBuilder::start_block`] before the first key
/// of each data block (in increasing `block_offset` order), then
/// [`FilterBlockBuilder::add_key`] for every key in that block.
pub struct FilterBlockBuilder {
    policy: Arc<dyn FilterPolicy>,
    base_lg: u8,
    keys: Vec<Vec<u8>>,
    filters: Vec<u8>,
    filter_offsets: Vec<u32>,
}

impl FilterBlockBuilder {
    pub fn new(policy: Arc<dyn FilterPolicy>, base_lg: u8) -> FilterBlockBuilder {
        FilterBlockBuilder {
            policy,
            base_lg,
            keys: Vec::new(),
            filters: Vec::new(),
            filter_offsets: Vec::new(),
        }
    }

    /// Must be called with the offset (within the table file) of the data
    /// block about to be written, before its keys are added.
    pub fn start_block(&mut self, block_offset: u64) {
        let filter_index = block_offset >> self.base_lg;
        while filter_index as usize > self.filter_offsets.len() {
            self.generate_filter();
        }
    }

    pub fn add_key(&mut self, key: &[u8]) {
        self.keys.push(key.to_vec());
    }

    /// Serializes the filter block, consuming the builder.
    pub fn finish(mut self) -> Vec<u8> {
        if !self.keys.is_empty() {
            self.generate_filter();
        }

        let start_of_offsets = self.filters.len() as u32;
        for off in &self.filter_offsets {
            self.filters.extend_from_slice(&off.to_le_bytes());
        }
        self.filters.extend_from_slice(&start_of_offsets.to_le_bytes());
        self.filters.push(self.base_lg);
        self.filters
    }

    fn generate_filter(&mut self) {
        self.filter_offsets.push(self.filters.len() as u32);
        if self.keys.is_empty() {
            return;
        }
        let refs: Vec<&[u8]> = self.keys.iter().map(|k| k.as_slice()).collect();
        let filter = self.policy.create_filter(&refs);
        self.filters.extend_from_slice(&filter);
        self.keys.clear();
    }
}

/// Reads a finished filter block and answers `key_may_match` for a given
/// data block offset.
pub struct FilterBlockReader {
    policy: Arc<dyn FilterPolicy>,
    data: Vec<u8>,
    start_of_offsets: usize,
    base_lg: u8,
    num_filters: usize,
}

impl FilterBlockReader {
    /// Builds a reader over `data`. A block shorter than the fixed footer, or
    /// one whose offset-array geometry doesn't add up, degrades to an
    /// "always match" reader rather than failing the whole table open --
    /// mirroring LevelDB, which treats a malformed filter block as simply
    /// absent.
    pub fn new(policy: Arc<dyn FilterPolicy>, data: Vec<u8>) -> FilterBlockReader {
        if data.len() < FOOTER_LEN {
            return FilterBlockReader {
                policy,
                data: Vec::new(),
                start_of_offsets: 0,
                base_lg: 11,
                num_filters: 0,
            };
        }

        let base_lg = data[data.len() - 1];
        let start_of_offsets =
            u32::from_le_bytes(data[data.len() - 5..data.len() - 1].try_into().unwrap()) as usize;

        if start_of_offsets > data.len() - FOOTER_LEN {
            return FilterBlockReader {
                policy,
                data: Vec::new(),
                start_of_offsets: 0,
                base_lg: 11,
                num_filters: 0,
            };
        }

        let offset_array_len = data.len() - FOOTER_LEN - start_of_offsets;
        let num_filters = offset_array_len / 4;

        FilterBlockReader {
            policy,
            data,
            start_of_offsets,
            base_lg,
            num_filters,
        }
    }

    fn offset_at(&self, ix: usize) -> u32 {
        let off = self.start_of_offsets + 4 * ix;
        u32::from_le_bytes(self.data[off..off + 4].try_into().unwrap())
    }

    /// Returns whether `key` may be present in the data block that starts at
    /// `block_offset`.
    pub fn key_may_match(&self, block_offset: u64, key: &[u8]) -> bool {
        if self.num_filters == 0 {
            // No geometry to consult: degrade to "always match" rather than
            // silently dropping entries.
            return true;
        }

        let filter_index = (block_offset >> self.base_lg) as usize;
        if filter_index >= self.num_filters {
            return true;
        }

        let start = self.offset_at(filter_index) as usize;
        let limit = self.offset_at(filter_index + 1) as usize;
        if start > limit || limit > self.start_of_offsets {
            // Malformed offset-array geometry: degrade to pessimistic match
            // rather than slicing out of bounds.
            return true;
        }
        if start == limit {
            // An empty filter region means the builder saw no keys here.
            return false;
        }

        let filter = &self.data[start..limit];
        self.policy.key_may_match(key, filter)
    }
}
