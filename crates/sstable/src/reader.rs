//! Table reading: footer, metaindex, properties, filters, and point
//! lookups.
//!
//! A [`Table`] is opened once and then shared freely across threads — the
//! index, filter, and properties are loaded eagerly and never change.
//! Iterators borrow the table and are single-owner.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use base::{decode_varint64, Error, FilterPolicy, InternalKey, RandomAccess, Result};
use byteorder::{ByteOrder, LittleEndian};
use log::{debug, warn};

use crate::block::{Block, RawBlockIter};
use crate::compact::CompactionIter;
use crate::format::{
    decode_block_payload, BlockHandle, Footer, BLOCK_TRAILER_LEN, FOOTER_LEN,
    PROPERTIES_BLOCK_NAME,
};
use crate::iter::TableIter;
use crate::options::{IterOptions, Options};

/// The key-value map read from the properties meta block. Every field
/// has a default, so a table without the block still opens.
#[derive(Clone, Debug, Default)]
pub struct Properties {
    /// When nonzero, substituted for the sequence number of every key
    /// the table yields. Set by the ingestion path.
    pub global_seqnum: u64,
    pub comparator_name: Option<String>,
    pub filter_policy_name: Option<String>,
    /// Sum of on-disk data block lengths, trailers excluded.
    pub data_size: u64,
    pub num_entries: u64,
    /// Properties this reader does not interpret.
    pub user_properties: BTreeMap<String, Vec<u8>>,
}

fn parse_properties(block: Block) -> Result<Properties> {
    let mut props = Properties::default();
    let mut it = RawBlockIter::new(block);
    it.first();
    while it.valid() {
        if let (Some(name), Some(value)) = (it.key(), it.value()) {
            if name == b"global-seqnum" {
                props.global_seqnum = decode_varint64(value)?.0;
            } else if name == b"data-size" {
                props.data_size = decode_varint64(value)?.0;
            } else if name == b"num-entries" {
                props.num_entries = decode_varint64(value)?.0;
            } else if name == b"comparator-name" {
                props.comparator_name = Some(String::from_utf8_lossy(value).into_owned());
            } else if name == b"filter-policy-name" {
                props.filter_policy_name = Some(String::from_utf8_lossy(value).into_owned());
            } else {
                props
                    .user_properties
                    .insert(String::from_utf8_lossy(name).into_owned(), value.to_vec());
            }
        }
        it.next();
    }
    if let Some(e) = it.take_error() {
        return Err(e);
    }
    Ok(props)
}

/// Reader side of the two-level (block) filter meta block.
pub(crate) struct FilterBlockReader {
    data: Vec<u8>,
    base_lg: u8,
    /// Where the per-window offset array starts.
    array_offset: usize,
    num_filters: usize,
}

impl FilterBlockReader {
    fn new(data: Vec<u8>) -> Option<FilterBlockReader> {
        if data.len() < 5 {
            return None;
        }
        let base_lg = data[data.len() - 1];
        let array_offset = LittleEndian::read_u32(&data[data.len() - 5..]) as usize;
        let last = data.len() - 5;
        if array_offset > last {
            return None;
        }
        Some(FilterBlockReader {
            base_lg,
            array_offset,
            num_filters: (last - array_offset) / 4,
            data,
        })
    }

    /// Tests `key` against the bitmap covering the data block at
    /// `block_offset`. Out-of-range or damaged entries degrade to
    /// "maybe"; an empty bitmap means no keys landed in that window.
    pub(crate) fn may_contain(
        &self,
        policy: &dyn FilterPolicy,
        block_offset: u64,
        key: &[u8],
    ) -> bool {
        let idx = (block_offset >> self.base_lg) as usize;
        if idx >= self.num_filters {
            return true;
        }
        let at = self.array_offset + 4 * idx;
        let start = LittleEndian::read_u32(&self.data[at..]) as usize;
        let end = if idx + 1 < self.num_filters {
            LittleEndian::read_u32(&self.data[at + 4..]) as usize
        } else {
            self.array_offset
        };
        if start == end {
            return false;
        }
        if start < end && end <= self.array_offset {
            policy.may_contain(&self.data[start..end], key)
        } else {
            true
        }
    }
}

/// The filter shape resolved at open time.
pub(crate) enum TableFilter {
    /// One bitmap over the whole table.
    Whole { bitmap: Vec<u8> },
    /// One bitmap per data-block window, consulted during prefix seeks.
    PerBlock(FilterBlockReader),
}

/// An open, immutable sorted-key table.
pub struct Table {
    pub(crate) file: Arc<dyn RandomAccess>,
    pub(crate) id: u64,
    pub(crate) opts: Options,
    pub(crate) index: Block,
    pub(crate) filter: Option<TableFilter>,
    pub(crate) properties: Properties,
}

impl Table {
    /// Opens a table: reads the footer, metaindex, properties, filter,
    /// and index. Fails eagerly on a short file, bad magic, unknown
    /// checksum type, or a comparator mismatch; a missing properties or
    /// filter block is tolerated.
    pub fn open(file: Arc<dyn RandomAccess>, id: u64, opts: Options) -> Result<Table> {
        let file_len = file.len()?;
        if file_len < FOOTER_LEN as u64 {
            return Err(Error::corruption("file too small to hold footer"));
        }
        let mut footer_buf = [0u8; FOOTER_LEN];
        file.read_at(file_len - FOOTER_LEN as u64, &mut footer_buf)?;
        let footer = Footer::decode(&footer_buf)?;

        let metaindex = Block::new(Arc::new(read_block_raw(file.as_ref(), footer.metaindex)?))?;

        let properties = match find_meta_block(&metaindex, PROPERTIES_BLOCK_NAME)? {
            Some(handle) => parse_properties(Block::new(Arc::new(read_block_raw(
                file.as_ref(),
                handle,
            )?))?)?,
            None => Properties::default(),
        };

        if let Some(name) = &properties.comparator_name {
            if name != opts.comparer.name() {
                return Err(Error::invalid_argument(format!(
                    "comparator mismatch: file uses {name:?}, options use {:?}",
                    opts.comparer.name()
                )));
            }
        }

        let filter = resolve_filter(file.as_ref(), &opts, &metaindex)?;
        let index = read_block_cached(file.as_ref(), id, &opts, footer.index)?;

        debug!(
            "opened table {id}: {} entries, {} data bytes, filter={}",
            properties.num_entries,
            properties.data_size,
            match &filter {
                Some(TableFilter::Whole { .. }) => "table",
                Some(TableFilter::PerBlock(_)) => "block",
                None => "none",
            }
        );

        Ok(Table {
            file,
            id,
            opts,
            index,
            filter,
            properties,
        })
    }

    /// Point lookup. Returns the raw value bytes for the newest entry of
    /// `user_key`, or [`Error::NotFound`]. Kind interpretation — a
    /// tombstone is still "found" — is the caller's job.
    pub fn get(&self, user_key: &[u8]) -> Result<Vec<u8>> {
        if let (Some(TableFilter::Whole { bitmap }), Some(policy)) =
            (&self.filter, &self.opts.filter_policy)
        {
            if !policy.may_contain(bitmap, user_key) {
                return Err(Error::NotFound);
            }
        }

        let mut it = self.iter(IterOptions::default());
        it.seek_ge(InternalKey::search(user_key));
        if let Some(e) = it.take_error() {
            return Err(e);
        }
        if let (Some(key), Some(value)) = (it.key(), it.value()) {
            if self.opts.comparer.compare(key.user_key, user_key) == Ordering::Equal {
                return Ok(value.to_vec());
            }
        }
        Err(Error::NotFound)
    }

    /// A fresh iterator over the table. The iterator borrows the table
    /// and is not thread-safe.
    pub fn iter(&self, opts: IterOptions) -> TableIter<'_> {
        TableIter::new(self, opts)
    }

    /// A forward-only iterator that meters decompressed bytes traversed,
    /// for compaction pacing.
    pub fn compaction_iter(&self) -> CompactionIter<'_> {
        CompactionIter::new(self.iter(IterOptions::default()))
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn comparer(&self) -> &Arc<dyn base::Comparer> {
        &self.opts.comparer
    }

    /// Fetches a data block through the cache (when configured).
    pub(crate) fn read_data_block(&self, handle: BlockHandle) -> Result<Block> {
        read_block_cached(self.file.as_ref(), self.id, &self.opts, handle)
    }
}

/// Reads and decodes one block straight from the file.
fn read_block_raw(file: &dyn RandomAccess, handle: BlockHandle) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; handle.length as usize + BLOCK_TRAILER_LEN];
    file.read_at(handle.offset, &mut buf)?;
    let (payload, trailer) = buf.split_at(handle.length as usize);
    decode_block_payload(payload, trailer).inspect_err(|_| {
        warn!(
            "corrupt block at offset {} (length {})",
            handle.offset, handle.length
        );
    })
}

/// Reads a block through the shared cache, or straight from the file
/// when no cache is configured.
fn read_block_cached(
    file: &dyn RandomAccess,
    id: u64,
    opts: &Options,
    handle: BlockHandle,
) -> Result<Block> {
    match &opts.cache {
        Some(cache) => {
            if let Some(bytes) = cache.get(id, handle.offset) {
                return Block::new(bytes);
            }
            let bytes = Arc::new(read_block_raw(file, handle)?);
            cache.insert(id, handle.offset, bytes.clone());
            Block::new(bytes)
        }
        None => Block::new(Arc::new(read_block_raw(file, handle)?)),
    }
}

/// Looks a meta-block name up in the metaindex block.
fn find_meta_block(metaindex: &Block, name: &str) -> Result<Option<BlockHandle>> {
    let mut it = RawBlockIter::new(metaindex.clone());
    it.seek_ge(name.as_bytes());
    let found = match (it.key(), it.value()) {
        (Some(key), Some(value)) if key == name.as_bytes() => Some(BlockHandle::decode(value)?.0),
        _ => None,
    };
    if let Some(e) = it.take_error() {
        return Err(e);
    }
    Ok(found)
}

/// Matches exactly one filter meta block against the options. A missing
/// or shape-mismatched filter disables filtering; it is never an error.
fn resolve_filter(
    file: &dyn RandomAccess,
    opts: &Options,
    metaindex: &Block,
) -> Result<Option<TableFilter>> {
    let Some(policy) = &opts.filter_policy else {
        return Ok(None);
    };
    match opts.filter_type {
        crate::options::FilterType::Table => {
            let name = format!("fullfilter.{}", policy.name());
            if let Some(handle) = find_meta_block(metaindex, &name)? {
                let bitmap = read_block_raw(file, handle)?;
                return Ok(Some(TableFilter::Whole { bitmap }));
            }
        }
        crate::options::FilterType::Block => {
            let names = [
                format!("{}.filter.{}", opts.comparer.name(), policy.name()),
                format!("filter.{}", policy.name()),
            ];
            for name in names {
                if let Some(handle) = find_meta_block(metaindex, &name)? {
                    let data = read_block_raw(file, handle)?;
                    match FilterBlockReader::new(data) {
                        Some(reader) => return Ok(Some(TableFilter::PerBlock(reader))),
                        None => {
                            warn!("unparseable filter block {name:?}; filtering disabled");
                            return Ok(None);
                        }
                    }
                }
            }
        }
    }
    Ok(None)
}
