//! Table construction.
//!
//! The writer exists for two callers: compaction, which streams a merged
//! iterator into a fresh table, and table ingestion/fixtures. It buffers
//! one data block at a time and never seeks — the whole file is written
//! front to back in a single pass, so any `Write` sink works.
//!
//! Given identical entries and options the output is byte-identical,
//! which is what makes canonical fixtures possible.

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::sync::Arc;

use base::{
    encode_varint32, encode_varint64, Error, FilterPolicy, InternalKey, Result,
};
use byteorder::{LittleEndian, WriteBytesExt};

use crate::format::{
    block_checksum, BlockHandle, Footer, BLOCK_TRAILER_LEN, COMPRESSION_NONE, COMPRESSION_SNAPPY,
    PROPERTIES_BLOCK_NAME,
};
use crate::options::{Compression, FilterType, WriterOptions};

/// Builds one block: prefix-compressed records plus the restart trailer.
pub(crate) struct BlockBuilder {
    restart_interval: usize,
    buf: Vec<u8>,
    restarts: Vec<u32>,
    /// Records since the last restart point.
    counter: usize,
    last_key: Vec<u8>,
}

impl BlockBuilder {
    pub(crate) fn new(restart_interval: usize) -> BlockBuilder {
        BlockBuilder {
            restart_interval: restart_interval.max(1),
            buf: Vec::new(),
            restarts: Vec::new(),
            counter: 0,
            last_key: Vec::new(),
        }
    }

    /// Appends a record. Keys must arrive in block order; the caller
    /// enforces that.
    pub(crate) fn add(&mut self, key: &[u8], value: &[u8]) {
        let shared = if self.restarts.is_empty() || self.counter == self.restart_interval {
            self.restarts.push(self.buf.len() as u32);
            self.counter = 0;
            0
        } else {
            shared_prefix_len(&self.last_key, key)
        };

        encode_varint32(&mut self.buf, shared as u32);
        encode_varint32(&mut self.buf, (key.len() - shared) as u32);
        encode_varint32(&mut self.buf, value.len() as u32);
        self.buf.extend_from_slice(&key[shared..]);
        self.buf.extend_from_slice(value);

        self.counter += 1;
        self.last_key.clear();
        self.last_key.extend_from_slice(key);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Uncompressed size of the block if finished now.
    pub(crate) fn estimated_len(&self) -> usize {
        self.buf.len() + 4 * self.restarts.len() + 4
    }

    /// Appends the restart trailer and returns the block, leaving the
    /// builder reset for the next block.
    pub(crate) fn finish(&mut self) -> Vec<u8> {
        let mut out = std::mem::take(&mut self.buf);
        for restart in &self.restarts {
            out.extend_from_slice(&restart.to_le_bytes());
        }
        out.extend_from_slice(&(self.restarts.len() as u32).to_le_bytes());
        self.restarts.clear();
        self.counter = 0;
        self.last_key.clear();
        out
    }
}

fn shared_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

/// Data blocks whose file offsets fall into the same `1 << FILTER_BASE_LG`
/// byte window share one bitmap in a block filter.
pub(crate) const FILTER_BASE_LG: u8 = 11;

/// Builds the two-level (block) filter meta block:
///
/// ```text
/// [bitmap 0][bitmap 1]...[offset: u32 LE per bitmap]
/// [array offset: u32 LE][base_lg: u8]
/// ```
struct FilterBlockBuilder {
    policy: Arc<dyn FilterPolicy>,
    keys: Vec<Vec<u8>>,
    filters: Vec<u8>,
    offsets: Vec<u32>,
}

impl FilterBlockBuilder {
    fn new(policy: Arc<dyn FilterPolicy>) -> FilterBlockBuilder {
        FilterBlockBuilder {
            policy,
            keys: Vec::new(),
            filters: Vec::new(),
            offsets: Vec::new(),
        }
    }

    fn add_key(&mut self, key: &[u8]) {
        self.keys.push(key.to_vec());
    }

    /// Announces that the next data block starts at `block_offset`,
    /// sealing bitmaps for every filter window before it.
    fn start_block(&mut self, block_offset: u64) {
        let filter_index = (block_offset >> FILTER_BASE_LG) as usize;
        while self.offsets.len() < filter_index {
            self.generate();
        }
    }

    fn generate(&mut self) {
        self.offsets.push(self.filters.len() as u32);
        if !self.keys.is_empty() {
            let bitmap = self.policy.create_filter(&self.keys);
            self.filters.extend_from_slice(&bitmap);
            self.keys.clear();
        }
    }

    fn finish(&mut self) -> Vec<u8> {
        if !self.keys.is_empty() {
            self.generate();
        }
        let array_offset = self.filters.len() as u32;
        let mut out = std::mem::take(&mut self.filters);
        for offset in &self.offsets {
            out.extend_from_slice(&offset.to_le_bytes());
        }
        out.extend_from_slice(&array_offset.to_le_bytes());
        out.push(FILTER_BASE_LG);
        out
    }
}

enum FilterBuilder {
    /// One bitmap over every key in the table.
    Table { keys: Vec<Vec<u8>> },
    /// One bitmap per data-block window.
    Block(FilterBlockBuilder),
}

/// Streams internal keys and values into a table file.
///
/// Keys must be added in strictly increasing internal-key order. `finish`
/// writes the meta blocks, index, and footer, and hands the sink back.
pub struct TableWriter<W: Write> {
    sink: W,
    opts: WriterOptions,
    data_block: BlockBuilder,
    filter: Option<FilterBuilder>,
    /// `(last key of block, handle)` per flushed data block.
    index_entries: Vec<(Vec<u8>, BlockHandle)>,
    user_properties: BTreeMap<String, Vec<u8>>,
    /// Encoded form of the most recently added key.
    last_key: Vec<u8>,
    /// File offset where the next block will land.
    offset: u64,
    num_entries: u64,
    /// Sum of on-disk data block lengths, trailers excluded.
    data_size: u64,
    /// True once any added key produced a prefix via the comparer.
    saw_prefix: bool,
}

impl<W: Write> TableWriter<W> {
    pub fn new(sink: W, opts: WriterOptions) -> TableWriter<W> {
        let restart_interval = opts.restart_interval;
        let filter = opts.filter_policy.clone().map(|policy| match opts.filter_type {
            FilterType::Table => FilterBuilder::Table { keys: Vec::new() },
            FilterType::Block => {
                let mut b = FilterBlockBuilder::new(policy);
                b.start_block(0);
                FilterBuilder::Block(b)
            }
        });
        TableWriter {
            sink,
            opts,
            data_block: BlockBuilder::new(restart_interval),
            filter,
            index_entries: Vec::new(),
            user_properties: BTreeMap::new(),
            last_key: Vec::new(),
            offset: 0,
            num_entries: 0,
            data_size: 0,
            saw_prefix: false,
        }
    }

    /// Appends one record. `key` must sort strictly after every key added
    /// before it.
    pub fn add(&mut self, key: InternalKey<'_>, value: &[u8]) -> Result<()> {
        if !self.last_key.is_empty() {
            let last = InternalKey::decode(&self.last_key)?;
            if key.compare(self.opts.comparer.as_ref(), last) != std::cmp::Ordering::Greater {
                return Err(Error::invalid_argument(
                    "keys must be added in strictly increasing order",
                ));
            }
        }

        let prefix_len = self.opts.comparer.split(key.user_key);
        if prefix_len.is_some() {
            self.saw_prefix = true;
        }
        match &mut self.filter {
            Some(FilterBuilder::Table { keys }) => {
                keys.push(key.user_key.to_vec());
                if let Some(n) = prefix_len {
                    keys.push(key.user_key[..n].to_vec());
                }
            }
            Some(FilterBuilder::Block(b)) => {
                b.add_key(key.user_key);
                if let Some(n) = prefix_len {
                    b.add_key(&key.user_key[..n]);
                }
            }
            None => {}
        }

        let encoded = key.encode();
        self.data_block.add(&encoded, value);
        self.last_key = encoded;
        self.num_entries += 1;

        if self.data_block.estimated_len() >= self.opts.block_size {
            self.flush_data_block()?;
        }
        Ok(())
    }

    /// Records an arbitrary property, surfaced by the reader under
    /// `user_properties`.
    pub fn add_property(&mut self, name: &str, value: &[u8]) {
        self.user_properties.insert(name.to_string(), value.to_vec());
    }

    /// Writes meta blocks, metaindex, index, and footer, then returns the
    /// sink.
    pub fn finish(mut self) -> Result<W> {
        self.flush_data_block()?;

        let mut metaindex: BTreeMap<String, BlockHandle> = BTreeMap::new();

        // A filter builder only exists when a policy was configured.
        if let (Some(filter), Some(policy)) = (self.filter.take(), self.opts.filter_policy.clone())
        {
            let (name, contents) = match filter {
                FilterBuilder::Table { keys } => (
                    format!("fullfilter.{}", policy.name()),
                    policy.create_filter(&keys),
                ),
                FilterBuilder::Block(mut b) => {
                    let name = if self.saw_prefix {
                        format!("{}.filter.{}", self.opts.comparer.name(), policy.name())
                    } else {
                        format!("filter.{}", policy.name())
                    };
                    (name, b.finish())
                }
            };
            let handle = self.write_block(&contents, Compression::None)?;
            metaindex.insert(name, handle);
        }

        let properties = self.build_properties();
        let mut props_block = BlockBuilder::new(1);
        for (name, value) in &properties {
            props_block.add(name, value);
        }
        let contents = props_block.finish();
        let handle = self.write_block(&contents, Compression::None)?;
        metaindex.insert(PROPERTIES_BLOCK_NAME.to_string(), handle);

        let mut metaindex_block = BlockBuilder::new(1);
        for (name, handle) in &metaindex {
            let mut encoded = Vec::new();
            handle.encode_to(&mut encoded);
            metaindex_block.add(name.as_bytes(), &encoded);
        }
        let contents = metaindex_block.finish();
        let metaindex_handle = self.write_block(&contents, Compression::None)?;

        let mut index_block = BlockBuilder::new(1);
        for (key, handle) in &self.index_entries {
            let mut encoded = Vec::new();
            handle.encode_to(&mut encoded);
            index_block.add(key, &encoded);
        }
        let contents = index_block.finish();
        let index_handle = self.write_block(&contents, Compression::None)?;

        let footer = Footer {
            metaindex: metaindex_handle,
            index: index_handle,
        };
        self.sink.write_all(&footer.encode())?;
        self.sink.flush()?;
        Ok(self.sink)
    }

    fn build_properties(&self) -> BTreeMap<Vec<u8>, Vec<u8>> {
        let mut out: BTreeMap<Vec<u8>, Vec<u8>> = self
            .user_properties
            .iter()
            .map(|(k, v)| (k.as_bytes().to_vec(), v.clone()))
            .collect();

        let varint = |v: u64| {
            let mut buf = Vec::new();
            encode_varint64(&mut buf, v);
            buf
        };
        out.insert(
            b"comparator-name".to_vec(),
            self.opts.comparer.name().as_bytes().to_vec(),
        );
        out.insert(b"data-size".to_vec(), varint(self.data_size));
        if let Some(policy) = &self.opts.filter_policy {
            out.insert(
                b"filter-policy-name".to_vec(),
                policy.name().as_bytes().to_vec(),
            );
        }
        out.insert(b"global-seqnum".to_vec(), varint(self.opts.global_seqnum));
        out.insert(b"num-entries".to_vec(), varint(self.num_entries));
        out
    }

    fn flush_data_block(&mut self) -> Result<()> {
        if self.data_block.is_empty() {
            return Ok(());
        }
        let contents = self.data_block.finish();
        let handle = self.write_block(&contents, self.opts.compression)?;
        self.data_size += handle.length;
        self.index_entries.push((self.last_key.clone(), handle));
        if let Some(FilterBuilder::Block(b)) = &mut self.filter {
            b.start_block(self.offset);
        }
        Ok(())
    }

    /// Writes one block plus its trailer, returning the handle.
    fn write_block(&mut self, contents: &[u8], compression: Compression) -> Result<BlockHandle> {
        let (payload, compression_type) = match compression {
            Compression::None => (std::borrow::Cow::Borrowed(contents), COMPRESSION_NONE),
            Compression::Snappy => {
                let compressed = snap::raw::Encoder::new()
                    .compress_vec(contents)
                    .map_err(|e| Error::Io(io::Error::other(e)))?;
                (std::borrow::Cow::Owned(compressed), COMPRESSION_SNAPPY)
            }
        };
        let crc = block_checksum(contents, compression_type);
        self.sink.write_all(&payload)?;
        self.sink.write_u8(compression_type)?;
        self.sink.write_u32::<LittleEndian>(crc)?;

        let handle = BlockHandle::new(self.offset, payload.len() as u64);
        self.offset += payload.len() as u64 + BLOCK_TRAILER_LEN as u64;
        Ok(handle)
    }
}
