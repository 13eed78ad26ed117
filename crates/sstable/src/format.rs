//! On-disk framing: block handles, the footer, and block trailers.
//!
//! ## File layout
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │ data block 0 │ data block 1 │ ...                      │
//! ├────────────────────────────────────────────────────────┤
//! │ filter meta block (optional)                           │
//! │ properties meta block                                  │
//! ├────────────────────────────────────────────────────────┤
//! │ metaindex block   (meta-block name -> BlockHandle)     │
//! │ index block       (separator key   -> BlockHandle)     │
//! ├────────────────────────────────────────────────────────┤
//! │ footer (53 bytes, fixed, at EOF)                       │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! Every block, data or meta, is followed on disk by a 5-byte trailer:
//! `[compression type: u8][crc32c: u32 LE]`. The checksum is CRC-32C
//! (Castagnoli) over the *uncompressed* block bytes followed by the
//! compression-type byte, so verification happens after decompression.
//!
//! The footer is two 20-byte-padded block handles (metaindex, index),
//! four bytes of padding, the checksum type byte, and the 8-byte magic.

use base::{decode_varint64, encode_varint64, Error, Result};

/// Identifies the table format; ASCII "STRATBL1".
pub const MAGIC: [u8; 8] = *b"STRATBL1";

/// Fixed footer size at the end of every table file.
pub const FOOTER_LEN: usize = 53;

/// Size of the padded slot one encoded handle occupies in the footer.
pub const HANDLE_SLOT_LEN: usize = 20;

/// Trailer appended to every block: compression type + checksum.
pub const BLOCK_TRAILER_LEN: usize = 5;

/// The only checksum type this format defines.
pub const CHECKSUM_CRC32C: u8 = 1;

pub const COMPRESSION_NONE: u8 = 0;
pub const COMPRESSION_SNAPPY: u8 = 1;

/// Meta-block name of the properties block.
pub const PROPERTIES_BLOCK_NAME: &str = "properties";

/// Addresses one block within the file. `length` excludes the 5-byte
/// trailer that follows the block on disk.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlockHandle {
    pub offset: u64,
    pub length: u64,
}

impl BlockHandle {
    pub fn new(offset: u64, length: u64) -> Self {
        BlockHandle { offset, length }
    }

    /// Appends the two-varint encoding to `dst`.
    pub fn encode_to(&self, dst: &mut Vec<u8>) {
        encode_varint64(dst, self.offset);
        encode_varint64(dst, self.length);
    }

    /// Decodes a handle from the front of `src`, returning it and the
    /// number of bytes consumed.
    pub fn decode(src: &[u8]) -> Result<(BlockHandle, usize)> {
        let (offset, n1) = decode_varint64(src)?;
        let (length, n2) = decode_varint64(&src[n1..])?;
        Ok((BlockHandle { offset, length }, n1 + n2))
    }
}

/// The fixed-size footer at the end of every table file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Footer {
    pub metaindex: BlockHandle,
    pub index: BlockHandle,
}

impl Footer {
    pub fn encode(&self) -> [u8; FOOTER_LEN] {
        let mut out = [0u8; FOOTER_LEN];
        let mut slot = Vec::with_capacity(HANDLE_SLOT_LEN);
        self.metaindex.encode_to(&mut slot);
        out[..slot.len()].copy_from_slice(&slot);
        slot.clear();
        self.index.encode_to(&mut slot);
        out[HANDLE_SLOT_LEN..HANDLE_SLOT_LEN + slot.len()].copy_from_slice(&slot);
        // [40..44) stays zero padding.
        out[44] = CHECKSUM_CRC32C;
        out[45..].copy_from_slice(&MAGIC);
        out
    }

    pub fn decode(src: &[u8]) -> Result<Footer> {
        if src.len() != FOOTER_LEN {
            return Err(Error::corruption("footer has wrong length"));
        }
        if src[45..] != MAGIC {
            return Err(Error::corruption("bad magic number"));
        }
        if src[44] != CHECKSUM_CRC32C {
            return Err(Error::corruption(format!(
                "unknown checksum type {}",
                src[44]
            )));
        }
        let (metaindex, _) = BlockHandle::decode(&src[..HANDLE_SLOT_LEN])?;
        let (index, _) = BlockHandle::decode(&src[HANDLE_SLOT_LEN..2 * HANDLE_SLOT_LEN])?;
        Ok(Footer { metaindex, index })
    }
}

/// Checksum as stored in block trailers: CRC-32C over the uncompressed
/// block bytes followed by the compression-type byte.
pub fn block_checksum(uncompressed: &[u8], compression_type: u8) -> u32 {
    crc32c::crc32c_append(crc32c::crc32c(uncompressed), &[compression_type])
}

/// Undoes a block's physical encoding: decompresses if needed and
/// verifies the trailer checksum, returning the logical block bytes.
///
/// `payload` is the on-disk block body (`handle.length` bytes); `trailer`
/// is the 5 bytes that follow it.
pub fn decode_block_payload(payload: &[u8], trailer: &[u8]) -> Result<Vec<u8>> {
    if trailer.len() != BLOCK_TRAILER_LEN {
        return Err(Error::corruption("block trailer has wrong length"));
    }
    let compression_type = trailer[0];
    let stored_crc = u32::from_le_bytes([trailer[1], trailer[2], trailer[3], trailer[4]]);

    let data = match compression_type {
        COMPRESSION_NONE => payload.to_vec(),
        COMPRESSION_SNAPPY => snap::raw::Decoder::new()
            .decompress_vec(payload)
            .map_err(|e| Error::corruption(format!("snappy: {e}")))?,
        other => {
            return Err(Error::corruption(format!(
                "unknown block compression type {other}"
            )))
        }
    };

    if block_checksum(&data, compression_type) != stored_crc {
        return Err(Error::corruption("block checksum mismatch"));
    }
    Ok(data)
}
