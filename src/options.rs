//! Table-layer configuration (§10 ambient stack: Configuration).
//!
//! `Options` bundles every knob a table builder or reader consults: the
//! comparator and filter capabilities, block geometry, compression, and the
//! (optional) block cache. Unlike the teacher's `Options<C: Comparator>`,
//! this crate has no `ReadOptions`/`WriteOptions`: those belong to a
//! database-layer façade this crate does not implement.

use std::sync::Arc;

use crate::cache::BlockCache;
use crate::cmp::{Cmp, DefaultCmp};
use crate::filter::{FilterPolicy, NoFilterPolicy};

/// Compression codec stored in a block's trailer (§6).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CompressionType {
    None = 0,
    Snappy = 1,
}

impl CompressionType {
    pub fn from_byte(b: u8) -> Option<CompressionType> {
        match b {
            0 => Some(CompressionType::None),
            1 => Some(CompressionType::Snappy),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct Options {
    pub cmp: Arc<dyn Cmp>,
    pub filter_policy: Arc<dyn FilterPolicy>,
    /// Target uncompressed size of a data block before it is flushed.
    pub block_size: usize,
    /// Number of entries between prefix-compression restart points.
    pub block_restart_interval: usize,
    /// `log2` of the filter block's region size in bytes of file offset.
    pub filter_base_lg: u8,
    pub compression: CompressionType,
    /// Shared block cache; `None` disables caching entirely.
    pub block_cache: Option<Arc<BlockCache>>,
}

impl Default for Options {
    fn default() -> Options {
        Options {
            cmp: Arc::new(DefaultCmp),
            filter_policy: Arc::new(NoFilterPolicy),
            block_size: 4 << 10,
            block_restart_interval: 16,
            filter_base_lg: 11,
            compression: CompressionType::None,
            block_cache: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let o = Options::default();
        assert_eq!(o.block_size, 4096);
        assert_eq!(o.block_restart_interval, 16);
        assert_eq!(o.filter_base_lg, 11);
        assert_eq!(o.compression, CompressionType::None);
    }
}
