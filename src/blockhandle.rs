//! Block handles (§3): an `(offset, size)` pair pointing at a block, as found
//! in the index block, the meta-index block, and the footer.

use integer_encoding::VarInt;

use crate::coding::decode_varint;
use crate::error::Result;

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct BlockHandle {
    offset: usize,
    size: usize,
}

impl BlockHandle {
    pub fn new(offset: usize, size: usize) -> BlockHandle {
        BlockHandle { offset, size }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Decodes a block handle from the start of `from`, returning the handle
    /// together with how many bytes were consumed.
    pub fn decode(from: &[u8]) -> Result<(BlockHandle, usize)> {
        let (off, off_len) = decode_varint(from)?;
        let (sz, sz_len) = decode_varint(&from[off_len..])?;
        Ok((
            BlockHandle {
                offset: off as usize,
                size: sz as usize,
            },
            off_len + sz_len,
        ))
    }

    /// Appends the varint encoding of this handle to `dst`, returning how
    /// many bytes were written.
    pub fn encode_to(&self, dst: &mut Vec<u8>) -> usize {
        let start = dst.len();
        dst.resize(start + self.offset.required_space() + self.size.required_space(), 0);
        let off = self.offset.encode_var(&mut dst[start..]);
        off + self.size.encode_var(&mut dst[start + off..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blockhandle_roundtrip() {
        let hb = BlockHandle::new(890, 777);
        let mut dst = Vec::new();
        let enc_sz = hb.encode_to(&mut dst);

        let (hb2, dec_sz) = BlockHandle::decode(&dst).unwrap();

        assert_eq!(enc_sz, dec_sz);
        assert_eq!(hb.size(), hb2.size());
        assert_eq!(hb.offset(), hb2.offset());
    }

    #[test]
    fn test_blockhandle_zero() {
        let hb = BlockHandle::new(0, 0);
        let mut dst = Vec::new();
        hb.encode_to(&mut dst);
        let (hb2, _) = BlockHandle::decode(&dst).unwrap();
        assert_eq!(hb2, hb);
    }
}
