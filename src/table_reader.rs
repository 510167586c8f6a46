//! The table reader (§4.7, §5): opens a table file, verifies block
//! checksums on every read, and answers point lookups and range scans.

use std::sync::Arc;

use crate::block::{Block, BlockIter};
use crate::blockhandle::BlockHandle;
use crate::cache::BlockCache;
use crate::crc;
use crate::error::{err, Result, StatusCode};
use crate::file::RandomAccessSource;
use crate::filter_block::FilterBlockReader;
use crate::iterator::LdbIterator;
use crate::options::{CompressionType, Options};
use crate::table_builder::{Footer, FULL_FOOTER_LENGTH};

fn read_exact_at<R: RandomAccessSource + ?Sized>(f: &R, off: u64, buf: &mut [u8]) -> Result<()> {
    let n = f.read_at(off, buf)?;
    if n != buf.len() {
        return err(StatusCode::IoError, "short read");
    }
    Ok(())
}

fn read_handle<R: RandomAccessSource + ?Sized>(f: &R, h: &BlockHandle) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; h.size()];
    read_exact_at(f, h.offset() as u64, &mut buf)?;
    Ok(buf)
}

/// Reads, checksums, and decompresses the block at `handle`, returning its
/// decoded contents (trailer stripped).
fn read_block<R: RandomAccessSource + ?Sized>(file: &R, handle: &BlockHandle) -> Result<Vec<u8>> {
    let payload = read_handle(file, handle)?;
    let mut trailer = [0u8; 5];
    read_exact_at(file, (handle.offset() + handle.size()) as u64, &mut trailer)?;

    let ctype = trailer[0];
    let stored_crc = u32::from_le_bytes(trailer[1..5].try_into().unwrap());
    let actual_crc = crc::mask(crc::checksum_two(&payload, &trailer[..1]));
    if actual_crc != stored_crc {
        return err(StatusCode::Corruption, "block checksum mismatch");
    }

    match CompressionType::from_byte(ctype) {
        Some(CompressionType::None) => Ok(payload),
        Some(CompressionType::Snappy) => {
            let mut dec = snap::raw::Decoder::new();
            dec.decompress_vec(&payload)
                .map_err(|e| crate::error::Status::new(StatusCode::Corruption, e.to_string()))
        }
        // A CRC-valid trailer with a byte outside {0, 1} is a reserved
        // codec this build doesn't implement, not a corrupt block.
        None => err(StatusCode::NotSupported, "unrecognized compression type in block trailer"),
    }
}

/// An opened SSTable. Cheap to keep around: only the footer, index block,
/// and (if present) filter block are parsed at open time; data blocks are
/// read -- and optionally cached -- on demand.
pub struct Table<R: RandomAccessSource> {
    file: R,
    file_id: u64,
    opt: Options,
    footer: Footer,
    index_block: Block,
    filters: Option<FilterBlockReader>,
}

impl<R: RandomAccessSource> Table<R> {
    /// Opens a table of `file_size` bytes, using `file_id` to namespace this
    /// table's entries in the shared block cache.
    pub fn new(opt: Options, file: R, file_size: u64, file_id: u64) -> Result<Table<R>> {
        if file_size < FULL_FOOTER_LENGTH as u64 {
            return err(StatusCode::Corruption, "file too short to contain a footer");
        }

        let mut footer_buf = [0u8; FULL_FOOTER_LENGTH];
        read_exact_at(&file, file_size - FULL_FOOTER_LENGTH as u64, &mut footer_buf)?;
        let footer = Footer::decode(&footer_buf)?;

        let index_data = read_block(&file, &footer.index)?;
        let index_block = Block::new(index_data)?;

        let meta_data = read_block(&file, &footer.meta_index)?;
        let meta_block = Block::new(meta_data)?;

        let filter_key = format!("filter.{}", opt.filter_policy.name());
        let mut meta_iter = meta_block.iter(opt.cmp.clone());
        meta_iter.seek(filter_key.as_bytes())?;

        let filters = if meta_iter.valid() && meta_iter.current().0 == filter_key.as_bytes() {
            let (handle, _) = BlockHandle::decode(&meta_iter.current().1)?;
            if handle.size() > 0 {
                match read_block(&file, &handle) {
                    Ok(data) => Some(FilterBlockReader::new(opt.filter_policy.clone(), data)),
                    Err(e) => {
                        // Non-fatal per the filter block's own degrade-to-match
                        // philosophy: a corrupt or unreadable filter block just
                        // means lookups fall back to reading the data block.
                        tracing::warn!(error = %e, "failed to load filter block, proceeding without one");
                        None
                    }
                }
            } else {
                None
            }
        } else {
            None
        };

        Ok(Table {
            file,
            file_id,
            opt,
            footer,
            index_block,
            filters,
        })
    }

    /// Returns the file offset of the data block that would contain `key`,
    /// or the offset just past the last data block if `key` is past the end.
    pub fn approximate_offset_of(&self, key: &[u8]) -> Result<usize> {
        let mut iter = self.index_block.iter(self.opt.cmp.clone());
        iter.seek(key)?;
        if iter.valid() {
            let (handle, _) = BlockHandle::decode(&iter.current().1)?;
            Ok(handle.offset())
        } else {
            Ok(self.footer.meta_index.offset())
        }
    }

    fn load_data_block(&self, handle: &BlockHandle) -> Result<Block> {
        if let Some(cache) = &self.opt.block_cache {
            if let Some(hit) = cache.lookup(self.file_id, handle.offset() as u64) {
                return Block::new(hit.value());
            }
        }

        let data = read_block(&self.file, handle)?;
        if let Some(cache) = &self.opt.block_cache {
            let charge = data.len();
            drop(cache.insert_with_charge(
                self.file_id,
                handle.offset() as u64,
                data.clone(),
                charge,
            ));
        }
        Block::new(data)
    }

    /// Looks up `key`, consulting the filter block first to avoid a data
    /// block read on a likely miss.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut index_iter = self.index_block.iter(self.opt.cmp.clone());
        index_iter.seek(key)?;
        if !index_iter.valid() {
            return Ok(None);
        }
        let (handle, _) = BlockHandle::decode(&index_iter.current().1)?;

        if let Some(filters) = &self.filters {
            if !filters.key_may_match(handle.offset() as u64, key) {
                return Ok(None);
            }
        }

        let block = self.load_data_block(&handle)?;
        let mut iter = block.iter(self.opt.cmp.clone());
        iter.seek(key)?;
        if iter.valid() {
            let (k, v) = iter.current();
            if self.opt.cmp.cmp(&k, key) == std::cmp::Ordering::Equal {
                return Ok(Some(v));
            }
        }
        Ok(None)
    }

    /// A two-level iterator over every entry in the table, in key order.
    pub fn iter(&self) -> TableIter<'_, R> {
        TableIter {
            table: self,
            index_iter: self.index_block.iter(self.opt.cmp.clone()),
            data_iter: None,
        }
    }
}

/// A "two-level iterator" (§5): an index-block cursor selecting which data
/// block is current, and a data-block cursor within it.
pub struct TableIter<'a, R: RandomAccessSource> {
    table: &'a Table<R>,
    index_iter: BlockIter,
    data_iter: Option<BlockIter>,
}

impl<'a, R: RandomAccessSource> TableIter<'a, R> {
    fn load_current_index_block(&mut self) -> Result<bool> {
        if !self.index_iter.valid() {
            self.data_iter = None;
            return Ok(false);
        }
        let (handle, _) = BlockHandle::decode(&self.index_iter.current().1)?;
        let block = self.table.load_data_block(&handle)?;
        self.data_iter = Some(block.iter(self.table.opt.cmp.clone()));
        Ok(true)
    }
}

impl<'a, R: RandomAccessSource> LdbIterator for TableIter<'a, R> {
    fn next(&mut self) -> Option<(Vec<u8>, Vec<u8>)> {
        loop {
            if let Some(data_iter) = &mut self.data_iter {
                if let Some(entry) = data_iter.next() {
                    return Some(entry);
                }
            }
            // Current data block is exhausted (or there wasn't one yet):
            // advance the index and load the next data block.
            if self.index_iter.next().is_none() {
                self.data_iter = None;
                return None;
            }
            match self.load_current_index_block() {
                Ok(true) => {
                    if let Some(it) = &mut self.data_iter {
                        it.seek_to_first().ok()?;
                        if it.valid() {
                            return Some(it.current());
                        }
                    }
                }
                _ => return None,
            }
        }
    }

    fn prev(&mut self) -> Option<(Vec<u8>, Vec<u8>)> {
        if let Some(data_iter) = &mut self.data_iter {
            if let Some(entry) = data_iter.prev() {
                return Some(entry);
            }
        }
        if self.index_iter.prev().is_none() {
            return None;
        }
        match self.load_current_index_block() {
            Ok(true) => {
                let it = self.data_iter.as_mut()?;
                it.seek_to_last().ok()?;
                if it.valid() {
                    Some(it.current())
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    fn seek(&mut self, target: &[u8]) -> Result<()> {
        self.index_iter.seek(target)?;
        if self.load_current_index_block()? {
            if let Some(it) = &mut self.data_iter {
                it.seek(target)?;
            }
        }
        Ok(())
    }

    fn seek_to_first(&mut self) -> Result<()> {
        self.index_iter.seek_to_first()?;
        if self.load_current_index_block()? {
            if let Some(it) = &mut self.data_iter {
                it.seek_to_first()?;
            }
        }
        Ok(())
    }

    fn valid(&self) -> bool {
        self.data_iter.as_ref().map(|it| it.valid()).unwrap_or(false)
    }

    fn current(&self) -> (Vec<u8>, Vec<u8>) {
        self.data_iter
            .as_ref()
            .expect("current() called on an invalid iterator")
            .current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::MemoryFile;
    use crate::filter::BloomPolicy;
    use crate::table_builder::TableBuilder;

    fn sample_data() -> Vec<(&'static str, &'static str)> {
        vec![
            ("abc", "def"),
            ("abd", "dee"),
            ("bcd", "asa"),
            ("bsr", "a00"),
            ("xyz", "xxx"),
            ("xzz", "yyy"),
            ("zzz", "111"),
        ]
    }

    fn build_table(opt: Options) -> (MemoryFile, u64) {
        let mut b = TableBuilder::new(opt, Vec::<u8>::new());
        for (k, v) in sample_data() {
            b.add(k.as_bytes(), v.as_bytes()).unwrap();
        }
        let dst = b.finish().unwrap();
        let size = dst.len() as u64;
        (dst, size)
    }

    fn small_block_opt() -> Options {
        Options {
            block_restart_interval: 2,
            block_size: 32,
            filter_policy: Arc::new(BloomPolicy::new(10)),
            ..Default::default()
        }
    }

    #[test]
    fn test_table_get_hits_and_misses() {
        let (data, size) = build_table(small_block_opt());
        let table = Table::new(small_block_opt(), data, size, 1).unwrap();

        for (k, v) in sample_data() {
            assert_eq!(table.get(k.as_bytes()).unwrap(), Some(v.as_bytes().to_vec()));
        }
        assert_eq!(table.get(b"aaa").unwrap(), None);
        assert_eq!(table.get(b"zzy").unwrap(), None);
        assert_eq!(table.get(b"bsrx").unwrap(), None);
    }

    #[test]
    fn test_table_forward_iteration_matches_insertion_order() {
        let (data, size) = build_table(small_block_opt());
        let table = Table::new(small_block_opt(), data, size, 1).unwrap();

        let mut it = table.iter();
        it.seek_to_first().unwrap();
        let expected = sample_data();
        let mut i = 0;
        loop {
            let (k, v) = it.current();
            assert_eq!(k, expected[i].0.as_bytes());
            assert_eq!(v, expected[i].1.as_bytes());
            i += 1;
            if it.next().is_none() {
                break;
            }
        }
        assert_eq!(i, expected.len());
    }

    #[test]
    fn test_table_reverse_iteration() {
        let (data, size) = build_table(small_block_opt());
        let table = Table::new(small_block_opt(), data, size, 1).unwrap();

        let mut it = table.iter();
        it.seek(b"zzz").unwrap();
        let mut count = 0;
        loop {
            count += 1;
            if it.prev().is_none() {
                break;
            }
        }
        assert_eq!(count, sample_data().len());
    }

    #[test]
    fn test_table_seek_lands_on_next_key() {
        let (data, size) = build_table(small_block_opt());
        let table = Table::new(small_block_opt(), data, size, 1).unwrap();

        let mut it = table.iter();
        it.seek(b"bd").unwrap();
        assert!(it.valid());
        assert_eq!(it.current().0, b"bsr".to_vec());
    }

    #[test]
    fn test_table_corrupted_block_detected() {
        let (mut data, size) = build_table(small_block_opt());
        // Flip a byte inside the first data block.
        data[2] ^= 0xff;
        let table = Table::new(small_block_opt(), data, size, 1).unwrap();
        assert!(table.get(b"abc").is_err());
    }

    #[test]
    fn test_reserved_compression_type_is_not_supported() {
        let (mut data, size) = build_table(small_block_opt());
        let table = Table::new(small_block_opt(), data.clone(), size, 1).unwrap();

        let mut idx_iter = table.index_block.iter(table.opt.cmp.clone());
        idx_iter.seek_to_first().unwrap();
        let (handle, _) = BlockHandle::decode(&idx_iter.current().1).unwrap();

        // Rewrite the first data block's trailer with a reserved compression
        // code, recomputing the CRC so only the codec is "wrong" -- this is
        // a valid-but-unimplemented format value, not bit corruption.
        let payload = data[handle.offset()..handle.offset() + handle.size()].to_vec();
        let ctype = 2u8;
        let crc = crc::mask(crc::checksum_two(&payload, &[ctype]));
        let trailer_off = handle.offset() + handle.size();
        data[trailer_off] = ctype;
        data[trailer_off + 1..trailer_off + 5].copy_from_slice(&crc.to_le_bytes());

        let table = Table::new(small_block_opt(), data, size, 1).unwrap();
        let err = table.get(b"abc").unwrap_err();
        assert_eq!(err.code, StatusCode::NotSupported);
    }

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .try_init();
    }

    #[test]
    fn test_corrupted_filter_block_degrades_to_no_filter() {
        init_tracing();
        let (data, size) = build_table(small_block_opt());

        let good = Table::new(small_block_opt(), data.clone(), size, 1).unwrap();
        let filter_handle = {
            // Re-derive the filter handle the same way `Table::new` does, by
            // re-reading the meta-index block directly.
            let meta_data = read_block(&good.file, &good.footer.meta_index).unwrap();
            let meta_block = Block::new(meta_data).unwrap();
            let key = format!("filter.{}", good.opt.filter_policy.name());
            let mut it = meta_block.iter(good.opt.cmp.clone());
            it.seek(key.as_bytes()).unwrap();
            assert!(it.valid());
            let (handle, _) = BlockHandle::decode(&it.current().1).unwrap();
            handle
        };
        assert!(good.filters.is_some());

        let mut corrupted = data;
        corrupted[filter_handle.offset()] ^= 0xff;

        let table = Table::new(small_block_opt(), corrupted, size, 2).unwrap();
        assert!(table.filters.is_none());
        // Lookups still work -- just without the filter short-circuit.
        for (k, v) in sample_data() {
            assert_eq!(table.get(k.as_bytes()).unwrap(), Some(v.as_bytes().to_vec()));
        }
    }

    #[test]
    fn test_table_with_block_cache_returns_consistent_data() {
        let opt = Options {
            block_cache: Some(Arc::new(BlockCache::new(1 << 20))),
            ..small_block_opt()
        };
        let (data, size) = build_table(small_block_opt());
        let table = Table::new(opt, data, size, 7).unwrap();

        for (k, v) in sample_data() {
            assert_eq!(table.get(k.as_bytes()).unwrap(), Some(v.as_bytes().to_vec()));
        }
        // Second pass should hit the cache for the same blocks.
        for (k, v) in sample_data() {
            assert_eq!(table.get(k.as_bytes()).unwrap(), Some(v.as_bytes().to_vec()));
        }
    }

    #[test]
    fn test_empty_table_has_no_entries() {
        let opt = Options::default();
        let mut b = TableBuilder::new(opt.clone(), Vec::<u8>::new());
        let dst = {
            // no entries added
            b.finish().unwrap()
        };
        let size = dst.len() as u64;
        let table = Table::new(opt, dst, size, 1).unwrap();
        let mut it = table.iter();
        it.seek_to_first().unwrap();
        assert!(!it.valid());
    }

    #[test]
    fn test_approximate_offset_of_is_monotonic_with_key_order() {
        let (data, size) = build_table(small_block_opt());
        let table = Table::new(small_block_opt(), data, size, 1).unwrap();
        let off_first = table.approximate_offset_of(b"abc").unwrap();
        let off_last = table.approximate_offset_of(b"zzz").unwrap();
        assert!(off_last >= off_first);
    }
}
