//! Varint coding over byte slices.
//!
//! Fixed-width integers are read and written with `byteorder` at the call
//! sites; the varints used by block handles and block records live here so
//! every decoder reports truncation the same way.

use integer_encoding::VarInt;

use crate::error::{Error, Result};

/// Decodes a varint-encoded u64 from the front of `data`, returning the
/// value and the number of bytes consumed.
pub fn decode_varint64(data: &[u8]) -> Result<(u64, usize)> {
    u64::decode_var(data).ok_or_else(|| Error::corruption("truncated varint"))
}

/// Decodes a varint-encoded u32 from the front of `data`.
pub fn decode_varint32(data: &[u8]) -> Result<(u32, usize)> {
    let (v, n) = decode_varint64(data)?;
    if v > u32::MAX as u64 {
        return Err(Error::corruption("varint32 out of range"));
    }
    Ok((v as u32, n))
}

/// Appends a varint-encoded u64 to `dst`.
pub fn encode_varint64(dst: &mut Vec<u8>, v: u64) {
    let mut buf = [0u8; 10];
    let n = v.encode_var(&mut buf);
    dst.extend_from_slice(&buf[..n]);
}

/// Appends a varint-encoded u32 to `dst`.
pub fn encode_varint32(dst: &mut Vec<u8>, v: u32) {
    encode_varint64(dst, v as u64);
}
