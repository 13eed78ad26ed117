//! Reader, writer, and iterator options.
//!
//! Everything is a plain value passed through these structs — there are
//! no policy or comparator registries. A reader opened with options that
//! do not match the file (wrong filter policy name, wrong filter shape)
//! simply runs without a filter; only a comparator mismatch is an error,
//! because iteration order would silently differ.

use std::sync::Arc;

use base::{BytewiseComparer, Comparer, FilterPolicy};
use blockcache::BlockCache;

/// Which filter shape the writer produces and the reader looks for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FilterType {
    /// One bitmap covering every key in the table.
    #[default]
    Table,
    /// One bitmap per data-block range, consulted per candidate block
    /// during prefix seeks.
    Block,
}

/// Block compression applied by the writer. The reader handles either.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Compression {
    #[default]
    None,
    Snappy,
}

/// Options for opening a table.
#[derive(Clone)]
pub struct Options {
    pub comparer: Arc<dyn Comparer>,
    /// Filter policy to consult. `None` disables filters even when the
    /// file carries one.
    pub filter_policy: Option<Arc<dyn FilterPolicy>>,
    pub filter_type: FilterType,
    /// Shared block cache. `None` means every block fetch reads the file.
    pub cache: Option<Arc<BlockCache>>,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            comparer: Arc::new(BytewiseComparer),
            filter_policy: None,
            filter_type: FilterType::default(),
            cache: None,
        }
    }
}

/// Options for building a table.
#[derive(Clone)]
pub struct WriterOptions {
    pub comparer: Arc<dyn Comparer>,
    pub filter_policy: Option<Arc<dyn FilterPolicy>>,
    pub filter_type: FilterType,
    /// Target uncompressed size of a data block before it is flushed.
    pub block_size: usize,
    /// A full key is stored (prefix compression resets) every this many
    /// records.
    pub restart_interval: usize,
    pub compression: Compression,
    /// When nonzero, recorded in the properties block; readers substitute
    /// it for the sequence number of every key they yield. Assigned by
    /// the ingestion path for tables built outside the engine.
    pub global_seqnum: u64,
}

impl Default for WriterOptions {
    fn default() -> Self {
        WriterOptions {
            comparer: Arc::new(BytewiseComparer),
            filter_policy: None,
            filter_type: FilterType::default(),
            block_size: 4096,
            restart_interval: 16,
            compression: Compression::default(),
            global_seqnum: 0,
        }
    }
}

/// Per-iterator key bounds. A position whose user key falls outside
/// `[lower, upper)` is invalid, silently.
#[derive(Clone, Debug, Default)]
pub struct IterOptions {
    pub lower: Option<Vec<u8>>,
    pub upper: Option<Vec<u8>>,
}
