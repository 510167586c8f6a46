//! Low-level integer and slice encoding shared by every block-structured
//! format in this crate (data blocks, filter blocks, block handles, the
//! footer).
//!
//! This crate does not hand-roll varint/fixed-width encoding; `integer-encoding`
//! already provides `FixedInt` and `VarInt` on the primitive integer types,
//! and its varint implementation already writes the canonical (shortest)
//! form. This module exists to name the conventions the rest of the crate
//! relies on and to centralize the one behavior `integer-encoding` does not
//! give us for free: rejecting a declared field that runs past the end of
//! the buffer with a `Corruption` status rather than panicking.

use integer_encoding::{FixedInt, VarInt};

use crate::error::{err, Result, StatusCode};

/// Decodes a little-endian fixed32 at the start of `buf`.
pub fn decode_fixed32(buf: &[u8]) -> Result<u32> {
    if buf.len() < 4 {
        return err(StatusCode::Corruption, "truncated fixed32");
    }
    Ok(u32::decode_fixed(&buf[..4]).unwrap())
}

/// Decodes a little-endian fixed64 at the start of `buf`.
pub fn decode_fixed64(buf: &[u8]) -> Result<u64> {
    if buf.len() < 8 {
        return err(StatusCode::Corruption, "truncated fixed64");
    }
    Ok(u64::decode_fixed(&buf[..8]).unwrap())
}

/// Decodes a varint-encoded `usize` at the start of `buf`, returning the
/// value and the number of bytes consumed. Varints longer than 10 bytes
/// (the maximum needed for a 64-bit value) are corruption, matching the
/// spec's varint canonicality test.
pub fn decode_varint(buf: &[u8]) -> Result<(u64, usize)> {
    let limit = buf.len().min(10);
    match u64::decode_var(&buf[..limit]) {
        Some((v, n)) => Ok((v, n)),
        None => err(StatusCode::Corruption, "truncated or malformed varint"),
    }
}

/// Appends `v` to `dst` as a varint, returning the number of bytes written.
pub fn put_varint(dst: &mut Vec<u8>, v: u64) -> usize {
    let start = dst.len();
    dst.resize(start + v.required_space(), 0);
    v.encode_var(&mut dst[start..])
}

/// Decodes a length-prefixed byte slice: a varint length followed by that
/// many bytes.
pub fn decode_length_prefixed(buf: &[u8]) -> Result<(&[u8], usize)> {
    let (len, off) = decode_varint(buf)?;
    let len = len as usize;
    if buf.len() < off + len {
        return err(StatusCode::Corruption, "truncated length-prefixed slice");
    }
    Ok((&buf[off..off + len], off + len))
}

/// Appends a varint length followed by `data` to `dst`.
pub fn put_length_prefixed(dst: &mut Vec<u8>, data: &[u8]) {
    put_varint(dst, data.len() as u64);
    dst.extend_from_slice(data);
}
