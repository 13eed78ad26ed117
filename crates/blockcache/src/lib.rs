//! # Blockcache — shared cache of decoded table blocks
//!
//! One cache is shared by every open table. Entries are keyed by
//! `(table id, block file offset)` and hold the decoded (decompressed,
//! checksum-verified) block bytes behind an [`Arc`], so an iterator can
//! keep a block pinned after the cache has evicted it.
//!
//! The cache is bounded by entry count, not bytes — blocks are all
//! roughly `block_size` large, so the count is a faithful proxy.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use lru::LruCache;

type CacheKey = (u64, u64);

/// A decoded block as stored in the cache: plain bytes, reference
/// counted. The `sstable` crate layers its cursor structure on top.
pub type CachedBlock = std::sync::Arc<Vec<u8>>;

/// Shared, thread-safe LRU mapping from `(table id, offset)` to decoded
/// block bytes.
pub struct BlockCache {
    blocks: Mutex<LruCache<CacheKey, CachedBlock>>,
    hits: AtomicU64,
    misses: AtomicU64,
    inserts: AtomicU64,
}

impl BlockCache {
    /// Creates a cache holding at most `capacity` blocks. A zero
    /// capacity is rounded up to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity is at least one");
        BlockCache {
            blocks: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            inserts: AtomicU64::new(0),
        }
    }

    /// Looks up a block, promoting it to most-recently-used on a hit.
    pub fn get(&self, table_id: u64, offset: u64) -> Option<CachedBlock> {
        let mut blocks = self.lock();
        match blocks.get(&(table_id, offset)) {
            Some(block) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(block.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Inserts a freshly decoded block, possibly evicting the least
    /// recently used entry. Iterators already holding the evicted block's
    /// `Arc` are unaffected.
    pub fn insert(&self, table_id: u64, offset: u64, block: CachedBlock) {
        self.inserts.fetch_add(1, Ordering::Relaxed);
        self.lock().put((table_id, offset), block);
    }

    /// Number of cached blocks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lookup hits since creation.
    #[must_use]
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Lookup misses since creation.
    #[must_use]
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Blocks inserted since creation. Every insert corresponds to one
    /// fetch that went to the file, so this is the cache's fetch counter.
    #[must_use]
    pub fn inserts(&self) -> u64 {
        self.inserts.load(Ordering::Relaxed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<CacheKey, CachedBlock>> {
        // A poisoned lock only means another thread panicked mid-insert;
        // the map itself is still structurally sound.
        self.blocks.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for BlockCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockCache")
            .field("len", &self.len())
            .field("hits", &self.hits())
            .field("misses", &self.misses())
            .finish()
    }
}
