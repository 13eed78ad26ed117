//! # Base — shared substrate for the StrataKV table stack
//!
//! Everything the table reader, writer, and merging iterator have in
//! common but that belongs to none of them: the error type, the internal
//! key encoding, the comparator and filter-policy abstractions, varint
//! coding, and random-access file traits.
//!
//! Nothing in this crate touches the table format itself — that lives in
//! the `sstable` crate.

mod cmp;
mod coding;
mod error;
mod filter;
mod ikey;
mod vfs;

pub use cmp::{BytewiseComparer, Comparer};
pub use coding::{decode_varint32, decode_varint64, encode_varint32, encode_varint64};
pub use error::{Error, Result};
pub use filter::FilterPolicy;
pub use ikey::{InternalKey, Kind, MAX_SEQUENCE, TRAILER_LEN};
pub use vfs::{MemFile, RandomAccess};
