//! Internal keys.
//!
//! Every key stored in a table is a user key followed by an 8-byte
//! trailer packing a 56-bit sequence number and an 8-bit record kind:
//!
//! ```text
//! [user key bytes...][big-endian u64: (sequence << 8) | kind]
//! ```
//!
//! Ordering is user key ascending (per the configured [`Comparer`]), then
//! trailer *descending* — so for one user key the newest sequence number
//! sorts first. The read path never interprets the kind; it is carried
//! opaquely for the engine above.

use std::cmp::Ordering;

use byteorder::{BigEndian, ByteOrder};

use crate::cmp::Comparer;
use crate::error::{Error, Result};

/// Length of the sequence/kind trailer at the end of every encoded key.
pub const TRAILER_LEN: usize = 8;

/// Largest representable sequence number (56 bits).
pub const MAX_SEQUENCE: u64 = (1 << 56) - 1;

/// Record kinds as assigned by the engine. The reader only round-trips
/// these; [`Kind::Set`] is what fixtures and point-lookup search keys use.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Kind {
    Delete = 0,
    Set = 1,
    Merge = 2,
    RangeDelete = 3,
}

/// A borrowed view of an internal key: the user key bytes plus the
/// decoded trailer. Views yielded by iterators are invalidated by the
/// next positioning call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InternalKey<'a> {
    pub user_key: &'a [u8],
    pub trailer: u64,
}

impl<'a> InternalKey<'a> {
    pub fn new(user_key: &'a [u8], sequence: u64, kind: Kind) -> Self {
        InternalKey {
            user_key,
            trailer: (sequence << 8) | kind as u64,
        }
    }

    /// The search key for a point lookup: sorts at or before every entry
    /// for `user_key`, whatever its sequence or kind.
    pub fn search(user_key: &'a [u8]) -> Self {
        InternalKey {
            user_key,
            trailer: u64::MAX,
        }
    }

    /// Splits an encoded key into user key and trailer.
    ///
    /// A raw key shorter than the trailer is malformed and reported as
    /// corruption.
    pub fn decode(raw: &'a [u8]) -> Result<Self> {
        if raw.len() < TRAILER_LEN {
            return Err(Error::corruption("internal key shorter than trailer"));
        }
        let (user_key, trailer) = raw.split_at(raw.len() - TRAILER_LEN);
        Ok(InternalKey {
            user_key,
            trailer: BigEndian::read_u64(trailer),
        })
    }

    #[must_use]
    pub fn seqnum(&self) -> u64 {
        self.trailer >> 8
    }

    #[must_use]
    pub fn kind_byte(&self) -> u8 {
        (self.trailer & 0xff) as u8
    }

    /// A copy of this key with the sequence number replaced and the kind
    /// preserved. Used for the per-table global sequence override.
    #[must_use]
    pub fn with_seqnum(&self, sequence: u64) -> Self {
        InternalKey {
            user_key: self.user_key,
            trailer: (sequence << 8) | u64::from(self.kind_byte()),
        }
    }

    pub fn encoded_len(&self) -> usize {
        self.user_key.len() + TRAILER_LEN
    }

    /// Appends the encoded form to `dst`.
    pub fn encode_to(&self, dst: &mut Vec<u8>) {
        dst.extend_from_slice(self.user_key);
        let mut trailer = [0u8; TRAILER_LEN];
        BigEndian::write_u64(&mut trailer, self.trailer);
        dst.extend_from_slice(&trailer);
    }

    /// The encoded form as a fresh vector.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut dst = Vec::with_capacity(self.encoded_len());
        self.encode_to(&mut dst);
        dst
    }

    /// Total order over internal keys: user key ascending, trailer
    /// descending.
    pub fn compare(&self, cmp: &dyn Comparer, other: InternalKey<'_>) -> Ordering {
        cmp.compare(self.user_key, other.user_key)
            .then_with(|| other.trailer.cmp(&self.trailer))
    }
}
