//! The table builder (§4.5): assembles data blocks, an index block, an
//! optional filter block, a meta-index block, and the footer into one
//! SSTable file.

use integer_encoding::FixedInt;

use crate::block::BlockBuilder;
use crate::blockhandle::BlockHandle;
use crate::crc;
use crate::error::Result;
use crate::file::TableWriter;
use crate::filter_block::FilterBlockBuilder;
use crate::options::{CompressionType, Options};

pub const FOOTER_LENGTH: usize = 40;
pub const FULL_FOOTER_LENGTH: usize = FOOTER_LENGTH + 8;
pub const MAGIC_FOOTER_NUMBER: u64 = 0xdb4775248b80fb57;

/// A table footer: pointers to the meta-index and index blocks, padded out
/// to a fixed 40 bytes, followed by the 8-byte magic number.
#[derive(Debug, Clone)]
pub struct Footer {
    pub meta_index: BlockHandle,
    pub index: BlockHandle,
}

impl Footer {
    pub fn new(meta_index: BlockHandle, index: BlockHandle) -> Footer {
        Footer { meta_index, index }
    }

    pub fn decode(from: &[u8]) -> Result<Footer> {
        use crate::error::{err, StatusCode};

        if from.len() < FULL_FOOTER_LENGTH {
            return err(StatusCode::Corruption, "footer shorter than 48 bytes");
        }
        let magic = u64::decode_fixed(&from[FOOTER_LENGTH..FULL_FOOTER_LENGTH]);
        if magic != MAGIC_FOOTER_NUMBER {
            return err(StatusCode::Corruption, "bad magic number in footer");
        }

        let (meta_index, meta_len) = BlockHandle::decode(from)?;
        let (index, _) = BlockHandle::decode(&from[meta_len..])?;

        Ok(Footer { meta_index, index })
    }

    pub fn encode(&self, to: &mut [u8; FULL_FOOTER_LENGTH]) {
        let mut buf = Vec::with_capacity(FULL_FOOTER_LENGTH);
        self.meta_index.encode_to(&mut buf);
        self.index.encode_to(&mut buf);
        buf.resize(FOOTER_LENGTH, 0);
        buf.extend_from_slice(&MAGIC_FOOTER_NUMBER.to_le_bytes());
        to.copy_from_slice(&buf);
    }
}

/// Assembles one SSTable, writing directly to `dst` as blocks fill up.
/// Entries must be added in strictly increasing key order.
pub struct TableBuilder<W: TableWriter> {
    opt: Options,
    dst: W,

    offset: usize,
    num_entries: usize,

    data_block: BlockBuilder,
    index_block: BlockBuilder,
    filter_block: Option<FilterBlockBuilder>,
    last_block_handle: BlockHandle,
    pending_index_entry: bool,
    pending_sep_base: Vec<u8>,
}

impl<W: TableWriter> TableBuilder<W> {
    pub fn new(opt: Options, dst: W) -> TableBuilder<W> {
        let mut filter_block =
            FilterBlockBuilder::new(opt.filter_policy.clone(), opt.filter_base_lg);
        filter_block.start_block(0);

        TableBuilder {
            data_block: BlockBuilder::new(opt.block_restart_interval, opt.cmp.clone()),
            index_block: BlockBuilder::new(opt.block_restart_interval, opt.cmp.clone()),
            filter_block: Some(filter_block),
            opt,
            dst,
            offset: 0,
            num_entries: 0,
            last_block_handle: BlockHandle::new(0, 0),
            pending_index_entry: false,
            pending_sep_base: Vec::new(),
        }
    }

    pub fn entries(&self) -> usize {
        self.num_entries
    }

    /// Adds one entry. `key` must compare strictly greater than the
    /// previously added key under the table's comparator.
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if self.pending_index_entry {
            debug_assert!(self.data_block.entries() == 0);
            let sep = self.opt.cmp.find_shortest_sep(&self.pending_sep_base, key);
            let mut handle_enc = Vec::new();
            self.last_block_handle.encode_to(&mut handle_enc);
            self.index_block.add(&sep, &handle_enc)?;
            self.pending_index_entry = false;
        }

        // Strict monotonicity is enforced by `data_block.add` itself; run it
        // before feeding the key to the filter builder so a rejected key
        // never ends up in a pending filter batch (§4.5 step 2 before 3).
        self.data_block.add(key, value)?;

        if let Some(fb) = &mut self.filter_block {
            fb.add_key(key);
        }

        self.num_entries += 1;

        if self.data_block.estimated_size() >= self.opt.block_size {
            self.flush()?;
        }
        Ok(())
    }

    /// Flushes the current data block to `dst`, if non-empty.
    fn flush(&mut self) -> Result<()> {
        if self.data_block.entries() == 0 {
            return Ok(());
        }
        assert!(
            !self.pending_index_entry,
            "flush() called with an index entry already pending"
        );

        self.pending_sep_base = self.data_block.last_key().to_vec();
        let block = std::mem::replace(
            &mut self.data_block,
            BlockBuilder::new(self.opt.block_restart_interval, self.opt.cmp.clone()),
        );
        let handle = self.write_block(block.finish(), self.opt.compression)?;
        self.last_block_handle = handle;
        self.pending_index_entry = true;

        if let Some(fb) = &mut self.filter_block {
            fb.start_block(self.offset as u64);
        }
        Ok(())
    }

    fn write_block(&mut self, raw: Vec<u8>, compression: CompressionType) -> Result<BlockHandle> {
        let (payload, ctype) = match compression {
            CompressionType::None => (raw, CompressionType::None),
            CompressionType::Snappy => {
                let mut enc = snap::raw::Encoder::new();
                match enc.compress_vec(&raw) {
                    Ok(compressed) if compressed.len() < raw.len() => {
                        (compressed, CompressionType::Snappy)
                    }
                    // Compression didn't help or failed: fall back to
                    // storing the block as-is, per the spec's revert rule.
                    _ => (raw, CompressionType::None),
                }
            }
        };

        let crc = crc::mask(crc::checksum_two(&payload, &[ctype as u8]));

        self.dst.write_all(&payload)?;
        self.dst.write_all(&[ctype as u8])?;
        self.dst.write_all(&crc.to_le_bytes())?;

        let handle = BlockHandle::new(self.offset, payload.len());
        self.offset += payload.len() + 1 + 4;
        Ok(handle)
    }

    /// Finalizes the table: flushes any pending data block, writes the
    /// filter block, meta-index block, index block, and footer, and returns
    /// the underlying writer.
    pub fn finish(mut self) -> Result<W> {
        self.flush()?;

        if self.pending_index_entry {
            let succ = self.opt.cmp.find_short_succ(&self.pending_sep_base);
            let mut handle_enc = Vec::new();
            self.last_block_handle.encode_to(&mut handle_enc);
            self.index_block.add(&succ, &handle_enc)?;
            self.pending_index_entry = false;
        }

        let mut meta_index_block =
            BlockBuilder::new(self.opt.block_restart_interval, self.opt.cmp.clone());

        if let Some(fb) = self.filter_block.take() {
            let filter_key = format!("filter.{}", self.opt.filter_policy.name());
            let data = fb.finish();
            let handle = self.write_block(data, CompressionType::None)?;
            let mut handle_enc = Vec::new();
            handle.encode_to(&mut handle_enc);
            meta_index_block.add(filter_key.as_bytes(), &handle_enc)?;
        }

        let meta_index_handle =
            self.write_block(meta_index_block.finish(), self.opt.compression)?;
        let index_handle = self.write_block(self.index_block.finish(), self.opt.compression)?;

        let footer = Footer::new(meta_index_handle, index_handle);
        let mut buf = [0u8; FULL_FOOTER_LENGTH];
        footer.encode(&mut buf);
        self.dst.write_all(&buf)?;
        self.dst.sync()?;
        Ok(self.dst)
    }

    /// Discards the builder without writing a footer. The bytes already
    /// written to `dst` form a partial, unsealed file; deleting it is the
    /// caller's responsibility, not this crate's (§1: file lifecycle is an
    /// external collaborator's concern).
    pub fn abandon(self) {
        drop(self);
    }
}
