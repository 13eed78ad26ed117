//! # SSTable — immutable sorted-key tables
//!
//! The random-access/scan substrate of the StrataKV storage engine.
//! Writes accumulate elsewhere and are frozen into tables; this crate
//! reads them back — point lookups, bidirectional range scans, and the
//! k-way merge that makes many tables answer as one key-sorted sequence.
//!
//! ## File layout
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ DATA BLOCKS (prefix-compressed records, restart points)       │
//! │                                                              │
//! │ record: shared | non_shared | value_len | key suffix | value  │
//! │ ... restart offsets (u32 LE each) | num_restarts (u32 LE)     │
//! ├──────────────────────────────────────────────────────────────┤
//! │ META BLOCKS: filter (optional), properties                    │
//! ├──────────────────────────────────────────────────────────────┤
//! │ METAINDEX BLOCK: meta-block name -> BlockHandle               │
//! │ INDEX BLOCK: separator key -> BlockHandle of a data block     │
//! ├──────────────────────────────────────────────────────────────┤
//! │ FOOTER: metaindex + index handles, checksum type, magic       │
//! │ (53 bytes, fixed, at EOF)                                     │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every block is followed by a 5-byte trailer carrying its compression
//! type and a CRC-32C. Keys are internal keys: user key plus an 8-byte
//! sequence/kind trailer, ordered user-key ascending then sequence
//! descending.
//!
//! ## Reading
//!
//! [`Table::open`] loads the footer, metaindex, properties, filter, and
//! index once; the table is then shareable across threads. [`Table::get`]
//! is the bloom-gated point lookup; [`Table::iter`] returns the
//! bidirectional [`TableIter`]; [`MergingIter`] fuses any set of
//! iterators sharing a comparator. [`Table::compaction_iter`] walks
//! forward while metering on-disk bytes for compaction pacing.
//!
//! ## Writing
//!
//! [`TableWriter`] streams strictly-increasing internal keys into any
//! `Write` sink, single pass, deterministically: the same entries and
//! options always produce a byte-identical file.

mod block;
mod compact;
mod format;
mod iter;
mod merge;
mod options;
mod reader;
mod writer;

pub use compact::CompactionIter;
pub use format::{BlockHandle, Footer, BLOCK_TRAILER_LEN, FOOTER_LEN, MAGIC};
pub use iter::{InternalIterator, TableIter};
pub use merge::MergingIter;
pub use options::{Compression, FilterType, IterOptions, Options, WriterOptions};
pub use reader::{Properties, Table};
pub use writer::TableWriter;

#[cfg(test)]
mod tests;
