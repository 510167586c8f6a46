//! Data and index blocks (§4.3): a prefix-compressed run of sorted entries,
//! punctuated by periodic uncompressed "restart points" so a seek can binary
//! search the restart array before linear-scanning from the nearest one.
//!
//! ENTRY := varint(shared) varint(non_shared) varint(value_len) key_suffix value
//! BLOCK := ENTRY* fixed32(restart)* fixed32(num_restarts)

use std::sync::Arc;

use integer_encoding::FixedInt;

use crate::cmp::Cmp;
use crate::coding::{decode_fixed32, decode_varint, put_varint};
use crate::error::{err, Result, StatusCode};
use crate::iterator::LdbIterator;

/// The raw, already-decompressed bytes of a block (trailer stripped).
pub type BlockContents = Vec<u8>;

/// Accumulates entries into a single block, inserting a restart point every
/// `restart_interval` entries. Keys must be added in strictly increasing
/// order; [`BlockBuilder::add`] returns `Err(StatusCode::InvalidArgument)`
/// otherwise, matching the spec's "monotonic key order" invariant.
pub struct BlockBuilder {
    cmp: Arc<dyn Cmp>,
    restart_interval: usize,
    buf: Vec<u8>,
    restarts: Vec<u32>,
    counter: usize,
    num_entries: usize,
    last_key: Vec<u8>,
    finished: bool,
}

impl BlockBuilder {
    pub fn new(restart_interval: usize, cmp: Arc<dyn Cmp>) -> BlockBuilder {
        BlockBuilder {
            cmp,
            restart_interval,
            buf: Vec::new(),
            restarts: vec![0],
            counter: 0,
            num_entries: 0,
            last_key: Vec::new(),
            finished: false,
        }
    }

    /// The number of entries added so far.
    pub fn entries(&self) -> usize {
        self.num_entries
    }

    pub fn last_key(&self) -> &[u8] {
        &self.last_key
    }

    /// A cheap upper bound on the encoded size so far, used by the table
    /// builder to decide when to cut a new block.
    pub fn estimated_size(&self) -> usize {
        self.buf.len() + self.restarts.len() * 4 + 4
    }

    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if self.finished {
            return err(StatusCode::InvalidArgument, "add() called after finish()");
        }
        if self.num_entries != 0 && self.cmp.cmp(&self.last_key, key) != std::cmp::Ordering::Less {
            return err(
                StatusCode::InvalidArgument,
                "keys added to a block must be strictly increasing",
            );
        }

        let shared = if self.counter >= self.restart_interval {
            self.restarts.push(self.buf.len() as u32);
            self.counter = 0;
            0
        } else {
            shared_prefix_len(&self.last_key, key)
        };
        let non_shared = key.len() - shared;

        put_varint(&mut self.buf, shared as u64);
        put_varint(&mut self.buf, non_shared as u64);
        put_varint(&mut self.buf, value.len() as u64);
        self.buf.extend_from_slice(&key[shared..]);
        self.buf.extend_from_slice(value);

        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.counter += 1;
        self.num_entries += 1;
        Ok(())
    }

    /// Serializes the block, consuming the builder.
    pub fn finish(mut self) -> Vec<u8> {
        self.finished = true;
        for r in &self.restarts {
            self.buf.extend_from_slice(&r.to_le_bytes());
        }
        self.buf
            .extend_from_slice(&(self.restarts.len() as u32).to_le_bytes());
        self.buf
    }

    /// Resets the builder to build a fresh block, reusing its allocation.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.restarts.clear();
        self.restarts.push(0);
        self.counter = 0;
        self.num_entries = 0;
        self.last_key.clear();
        self.finished = false;
    }
}

fn shared_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

/// A decoded block ready for iteration. Cheap to construct: only the restart
/// count at the tail is parsed up front.
#[derive(Clone)]
pub struct Block {
    data: BlockContents,
    restarts_off: usize,
}

impl Block {
    pub fn new(contents: BlockContents) -> Result<Block> {
        if contents.len() < 4 {
            return err(
                StatusCode::Corruption,
                "block too short to contain a restart count",
            );
        }
        let num_restarts = decode_fixed32(&contents[contents.len() - 4..])? as usize;
        if contents.len() < 4 * (num_restarts + 1) {
            return err(StatusCode::Corruption, "block restart array overruns block");
        }
        let restarts_off = contents.len() - 4 * (num_restarts + 1);
        Ok(Block {
            data: contents,
            restarts_off,
        })
    }

    fn num_restarts(&self) -> usize {
        (self.data.len() - self.restarts_off) / 4 - 1
    }

    fn restart_point(&self, ix: usize) -> usize {
        let off = self.restarts_off + 4 * ix;
        u32::decode_fixed(&self.data[off..off + 4]).unwrap() as usize
    }

    pub fn iter(&self, cmp: Arc<dyn Cmp>) -> BlockIter {
        BlockIter {
            block: self.clone(),
            cmp,
            offset: 0,
            restart_ix: 0,
            key: Vec::new(),
            value_off: 0,
            value_len: 0,
            valid: false,
        }
    }
}

/// A decoded entry: the key (with the shared prefix already applied), the
/// value slice, and the byte offset just past the entry.
struct Entry<'a> {
    shared: usize,
    key_suffix: &'a [u8],
    value: &'a [u8],
    value_off: usize,
    end: usize,
}

/// Decodes the SHARED/NON_SHARED/VALSIZE header and key/value slices of the
/// entry at `offset`.
fn decode_entry(data: &[u8], offset: usize) -> Result<Entry<'_>> {
    let (shared, n1) = decode_varint(&data[offset..])?;
    let (non_shared, n2) = decode_varint(&data[offset + n1..])?;
    let (value_len, n3) = decode_varint(&data[offset + n1 + n2..])?;

    let key_start = offset + n1 + n2 + n3;
    let key_end = key_start + non_shared as usize;
    let value_end = key_end + value_len as usize;
    if value_end > data.len() {
        return err(StatusCode::Corruption, "block entry runs past end of block");
    }

    Ok(Entry {
        shared: shared as usize,
        key_suffix: &data[key_start..key_end],
        value: &data[key_end..value_end],
        value_off: key_end,
        end: value_end,
    })
}

/// An iterator over a [`Block`]'s entries, supporting forward/backward
/// iteration and binary-search seek via the restart point array.
pub struct BlockIter {
    block: Block,
    cmp: Arc<dyn Cmp>,
    /// Byte offset of the entry `current()` refers to (valid only if `valid`).
    offset: usize,
    /// Index of the highest restart point at or before `offset`.
    restart_ix: usize,
    key: Vec<u8>,
    value_off: usize,
    value_len: usize,
    valid: bool,
}

impl BlockIter {
    fn apply_entry(&mut self, offset: usize, base_key: &[u8]) -> Result<()> {
        let e = decode_entry(&self.block.data, offset)?;
        let mut key = Vec::with_capacity(e.shared + e.key_suffix.len());
        key.extend_from_slice(&base_key[..e.shared]);
        key.extend_from_slice(e.key_suffix);
        self.key = key;
        self.value_off = e.value_off;
        self.value_len = e.value.len();
        self.offset = offset;
        self.valid = true;
        Ok(())
    }

    fn seek_to_restart(&mut self, ix: usize) -> Result<()> {
        let offset = self.block.restart_point(ix);
        self.restart_ix = ix;
        self.apply_entry(offset, &[])
    }

    /// Advances to the entry starting at `offset`, returning `false` (and
    /// marking the iterator invalid) if `offset` is the restart array.
    fn advance_to(&mut self, offset: usize) -> Result<bool> {
        if offset >= self.block.restarts_off {
            self.valid = false;
            return Ok(false);
        }
        let base_key = std::mem::take(&mut self.key);
        self.apply_entry(offset, &base_key)?;
        while self.restart_ix + 1 < self.block.num_restarts()
            && self.block.restart_point(self.restart_ix + 1) <= offset
        {
            self.restart_ix += 1;
        }
        Ok(true)
    }
}

impl LdbIterator for BlockIter {
    fn next(&mut self) -> Option<(Vec<u8>, Vec<u8>)> {
        if !self.valid {
            return None;
        }
        let end = decode_entry(&self.block.data, self.offset).ok()?.end;
        match self.advance_to(end) {
            Ok(true) => Some(self.current()),
            _ => None,
        }
    }

    fn prev(&mut self) -> Option<(Vec<u8>, Vec<u8>)> {
        if !self.valid {
            return None;
        }
        // The block format has no backward links: walk back to the restart
        // point at or before the current entry, then scan forward to the
        // entry just before the one we started at.
        let original_offset = self.offset;
        let mut ix = self.restart_ix;
        if self.block.restart_point(ix) == original_offset {
            if ix == 0 {
                self.valid = false;
                return None;
            }
            ix -= 1;
        }

        if self.seek_to_restart(ix).is_err() {
            self.valid = false;
            return None;
        }
        loop {
            if self.offset >= original_offset {
                break;
            }
            let end = decode_entry(&self.block.data, self.offset).ok()?.end;
            if end > original_offset {
                break;
            }
            if self.advance_to(end).is_err() {
                self.valid = false;
                return None;
            }
        }
        Some(self.current())
    }

    fn seek(&mut self, target: &[u8]) -> Result<()> {
        let num_restarts = self.block.num_restarts();
        if num_restarts == 0 {
            self.valid = false;
            return Ok(());
        }

        let mut left = 0usize;
        let mut right = num_restarts - 1;
        while left < right {
            let mid = left + (right - left + 1) / 2;
            self.seek_to_restart(mid)?;
            if self.cmp.cmp(&self.key, target) == std::cmp::Ordering::Less {
                left = mid;
            } else {
                right = mid - 1;
            }
        }

        self.seek_to_restart(left)?;
        loop {
            if self.cmp.cmp(&self.key, target) != std::cmp::Ordering::Less {
                return Ok(());
            }
            let end = decode_entry(&self.block.data, self.offset)?.end;
            if !self.advance_to(end)? {
                return Ok(());
            }
        }
    }

    fn seek_to_first(&mut self) -> Result<()> {
        if self.block.num_restarts() == 0 {
            self.valid = false;
            return Ok(());
        }
        self.seek_to_restart(0)
    }

    fn valid(&self) -> bool {
        self.valid
    }

    fn current(&self) -> (Vec<u8>, Vec<u8>) {
        assert!(self.valid, "current() called on an invalid iterator");
        (
            self.key.clone(),
            self.block.data[self.value_off..self.value_off + self.value_len].to_vec(),
        )
    }
}

impl BlockIter {
    /// Seeks to the last entry in the block.
    pub fn seek_to_last(&mut self) -> Result<()> {
        let num_restarts = self.block.num_restarts();
        if num_restarts == 0 {
            self.valid = false;
            return Ok(());
        }
        self.seek_to_restart(num_restarts - 1)?;
        loop {
            let end = decode_entry(&self.block.data, self.offset)?.end;
            if end >= self.block.restarts_off {
                return Ok(());
            }
            self.advance_to(end)?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmp::DefaultCmp;

    fn cmp() -> Arc<dyn Cmp> {
        Arc::new(DefaultCmp)
    }

    fn build_sample(restart_interval: usize) -> Vec<u8> {
        let mut b = BlockBuilder::new(restart_interval, cmp());
        for i in 0..20u32 {
            let k = format!("key{:04}", i);
            let v = format!("val{}", i);
            b.add(k.as_bytes(), v.as_bytes()).unwrap();
        }
        b.finish()
    }

    #[test]
    fn test_block_roundtrip_forward() {
        let data = build_sample(4);
        let block = Block::new(data).unwrap();
        let mut it = block.iter(cmp());
        it.seek_to_first().unwrap();
        let mut count = 0;
        loop {
            let (k, v) = it.current();
            assert_eq!(k, format!("key{:04}", count).into_bytes());
            assert_eq!(v, format!("val{}", count).into_bytes());
            count += 1;
            if it.next().is_none() {
                break;
            }
        }
        assert_eq!(count, 20);
    }

    #[test]
    fn test_block_seek_exact_and_between() {
        let data = build_sample(4);
        let block = Block::new(data).unwrap();
        let mut it = block.iter(cmp());

        it.seek(b"key0010").unwrap();
        assert!(it.valid());
        assert_eq!(it.current().0, b"key0010".to_vec());

        // A key between two entries should land on the next-highest entry.
        it.seek(b"key0010a").unwrap();
        assert!(it.valid());
        assert_eq!(it.current().0, b"key0011".to_vec());
    }

    #[test]
    fn test_block_seek_past_end_is_invalid() {
        let data = build_sample(4);
        let block = Block::new(data).unwrap();
        let mut it = block.iter(cmp());
        it.seek(b"zzzz").unwrap();
        assert!(!it.valid());
    }

    #[test]
    fn test_block_reverse_iteration() {
        let data = build_sample(3);
        let block = Block::new(data).unwrap();
        let mut it = block.iter(cmp());
        it.seek_to_last().unwrap();
        let mut count = 0;
        loop {
            count += 1;
            if it.prev().is_none() {
                break;
            }
        }
        assert_eq!(count, 20);
    }

    #[test]
    fn test_block_restart_interval_one() {
        // Every entry is its own restart point: no prefix compression at all.
        let data = build_sample(1);
        let block = Block::new(data).unwrap();
        let mut it = block.iter(cmp());
        it.seek(b"key0007").unwrap();
        assert_eq!(it.current().0, b"key0007".to_vec());
    }

    #[test]
    fn test_block_builder_rejects_non_monotonic_keys() {
        let mut b = BlockBuilder::new(4, cmp());
        b.add(b"b", b"1").unwrap();
        let err = b.add(b"a", b"2").unwrap_err();
        assert_eq!(err.code, StatusCode::InvalidArgument);
    }

    #[test]
    fn test_truncated_block_is_corruption() {
        let mut data = build_sample(4);
        data.truncate(2);
        assert!(Block::new(data).is_err());
    }
}
