//! The single-table iterator and the iterator capability trait.
//!
//! A [`TableIter`] composes a cursor over the index block with a
//! transient cursor over the currently resident data block. Index moves
//! turn into data-block loads through the cache; the data cursor's pinned
//! block keeps the bytes alive even after cache eviction.

use std::cmp::Ordering;

use base::{Error, InternalKey};

use crate::block::BlockIter;
use crate::format::BlockHandle;
use crate::options::IterOptions;
use crate::reader::{Table, TableFilter};

/// The capability set every child of a merging iterator provides.
///
/// All positioning methods leave the iterator either valid — `key` and
/// `value` return borrowed views invalidated by the next positioning
/// call — or invalid with `key` and `value` both `None`. The first error
/// latches: the iterator stays invalid and further positioning calls are
/// no-ops. Dropping the iterator releases its pinned block.
pub trait InternalIterator {
    /// Positions at the first entry whose key is >= `key`.
    fn seek_ge(&mut self, key: InternalKey<'_>);

    /// Like `seek_ge`, but may use a filter on `prefix` to skip blocks
    /// (or the whole table) that cannot contain the prefix.
    fn seek_prefix_ge(&mut self, prefix: &[u8], key: InternalKey<'_>) {
        let _ = prefix;
        self.seek_ge(key);
    }

    /// Positions at the last entry whose key is < `key`.
    fn seek_lt(&mut self, key: InternalKey<'_>);

    fn first(&mut self);
    fn last(&mut self);
    fn next(&mut self);
    fn prev(&mut self);

    fn valid(&self) -> bool;
    fn key(&self) -> Option<InternalKey<'_>>;
    fn value(&self) -> Option<&[u8]>;
    fn error(&self) -> Option<&Error>;
}

/// Iterator over one table: an index cursor plus a transient data
/// cursor, with optional user-key bounds.
pub struct TableIter<'t> {
    table: &'t Table,
    index: BlockIter,
    data: Option<BlockIter>,
    /// Handle of the block `data` currently wraps.
    data_handle: BlockHandle,
    bounds: IterOptions,
    /// Set when the current position fell outside `bounds`; the cursor
    /// itself stays put so that stepping back in is cheap.
    out_of_bounds: bool,
    err: Option<Error>,
    /// Counts data-block loads; lets the compaction wrapper notice block
    /// boundaries.
    blocks_loaded: u64,
}

impl<'t> TableIter<'t> {
    pub(crate) fn new(table: &'t Table, bounds: IterOptions) -> TableIter<'t> {
        TableIter {
            table,
            index: BlockIter::new(table.index.clone(), table.opts.comparer.clone()),
            data: None,
            data_handle: BlockHandle::default(),
            bounds,
            out_of_bounds: false,
            err: None,
            blocks_loaded: 0,
        }
    }

    pub fn seek_ge(&mut self, key: InternalKey<'_>) {
        self.seek_ge_impl(None, key);
    }

    /// `seek_ge` with a filter fast path: candidate data blocks whose
    /// filter rejects `prefix` are skipped without being fetched, and a
    /// table filter rejecting `prefix` skips the whole table.
    pub fn seek_prefix_ge(&mut self, prefix: &[u8], key: InternalKey<'_>) {
        self.seek_ge_impl(Some(prefix), key);
    }

    pub fn seek_lt(&mut self, key: InternalKey<'_>) {
        if self.err.is_some() {
            return;
        }
        self.out_of_bounds = false;

        // Clamp the target into the bounds. The upper clamp keeps entries
        // at or past the bound from being visited (the search key for
        // `upper` sorts before all of them); the lower clamp parks the
        // cursor just below the bound so a later `next` re-enters it
        // instead of resuming somewhere far outside.
        let mut target_user = key.user_key;
        let mut trailer = key.trailer;
        let upper = self.bounds.upper.clone();
        let lower = self.bounds.lower.clone();
        if let Some(up) = &upper {
            if self.cmp(target_user, up) != Ordering::Less {
                target_user = up;
                trailer = u64::MAX;
            }
        }
        if let Some(lo) = &lower {
            if self.cmp(target_user, lo) == Ordering::Less {
                target_user = lo;
                trailer = u64::MAX;
            }
        }
        let target = InternalKey {
            user_key: target_user,
            trailer,
        };

        self.index.seek_ge(target);
        if self.latch_index_error() {
            return;
        }
        if !self.index.valid() {
            // Every separator is < target: the last block may still hold
            // entries below the target.
            self.index.last();
            if self.latch_index_error() {
                return;
            }
        }
        let mut first_block = true;
        loop {
            if !self.index.valid() {
                self.data = None;
                return;
            }
            let Some(handle) = self.current_index_handle() else {
                return;
            };
            if !self.load_block(handle) {
                return;
            }
            if let Some(d) = &mut self.data {
                if first_block {
                    d.seek_lt(target);
                } else {
                    d.last();
                }
                if let Some(e) = d.take_error() {
                    self.fail(e);
                    return;
                }
                if d.valid() {
                    break;
                }
            }
            self.index.prev();
            if self.latch_index_error() {
                return;
            }
            first_block = false;
        }
        self.check_lower_bound();
    }

    pub fn first(&mut self) {
        if self.err.is_some() {
            return;
        }
        if let Some(lo) = self.bounds.lower.clone() {
            self.seek_ge(InternalKey::search(&lo));
            return;
        }
        self.out_of_bounds = false;
        self.index.first();
        if self.latch_index_error() {
            return;
        }
        self.descend_forward();
        self.check_upper_bound();
    }

    pub fn last(&mut self) {
        if self.err.is_some() {
            return;
        }
        if let Some(up) = self.bounds.upper.clone() {
            self.seek_lt(InternalKey::search(&up));
            return;
        }
        self.out_of_bounds = false;
        self.index.last();
        if self.latch_index_error() {
            return;
        }
        self.descend_backward();
        self.check_lower_bound();
    }

    pub fn next(&mut self) {
        if self.err.is_some() {
            return;
        }
        self.out_of_bounds = false;
        if let Some(d) = &mut self.data {
            d.next();
            if let Some(e) = d.take_error() {
                self.fail(e);
                return;
            }
            if d.valid() {
                self.check_upper_bound();
                return;
            }
        }
        self.index.next();
        if self.latch_index_error() {
            return;
        }
        self.descend_forward();
        self.check_upper_bound();
    }

    pub fn prev(&mut self) {
        if self.err.is_some() {
            return;
        }
        self.out_of_bounds = false;
        if let Some(d) = &mut self.data {
            d.prev();
            if let Some(e) = d.take_error() {
                self.fail(e);
                return;
            }
            if d.valid() {
                self.check_lower_bound();
                return;
            }
        }
        self.index.prev();
        if self.latch_index_error() {
            return;
        }
        self.descend_backward();
        self.check_lower_bound();
    }

    pub fn valid(&self) -> bool {
        self.err.is_none()
            && !self.out_of_bounds
            && self.data.as_ref().is_some_and(|d| d.valid())
    }

    /// The current internal key, with the table's global sequence number
    /// substituted when one is set.
    pub fn key(&self) -> Option<InternalKey<'_>> {
        if !self.valid() {
            return None;
        }
        let key = self.data.as_ref()?.key()?;
        match self.table.properties.global_seqnum {
            0 => Some(key),
            seq => Some(key.with_seqnum(seq)),
        }
    }

    pub fn value(&self) -> Option<&[u8]> {
        if !self.valid() {
            return None;
        }
        self.data.as_ref()?.value()
    }

    pub fn error(&self) -> Option<&Error> {
        self.err.as_ref()
    }

    pub(crate) fn take_error(&mut self) -> Option<Error> {
        self.err.take()
    }

    // ---- compaction metering hooks ----

    pub(crate) fn blocks_loaded(&self) -> u64 {
        self.blocks_loaded
    }

    /// Byte span of the current record within its block.
    pub(crate) fn data_record_span(&self) -> Option<(usize, usize)> {
        self.data.as_ref()?.record_span()
    }

    /// `(on-disk length, logical length, restart-area start)` of the
    /// resident data block.
    pub(crate) fn data_block_metrics(&self) -> Option<(u64, usize, usize)> {
        let d = self.data.as_ref()?;
        Some((
            self.data_handle.length,
            d.block().len(),
            d.block().restarts_offset(),
        ))
    }

    // ---- internals ----

    fn cmp(&self, a: &[u8], b: &[u8]) -> Ordering {
        self.table.opts.comparer.compare(a, b)
    }

    fn fail(&mut self, e: Error) {
        self.err = Some(e);
        self.data = None;
    }

    fn latch_index_error(&mut self) -> bool {
        if let Some(e) = self.index.take_error() {
            self.fail(e);
            return true;
        }
        false
    }

    /// Decodes the block handle under the index cursor. `None` latches a
    /// corruption error (the index cursor must be valid when called).
    fn current_index_handle(&mut self) -> Option<BlockHandle> {
        let decoded = self.index.value().map(BlockHandle::decode);
        match decoded {
            Some(Ok((handle, _))) => Some(handle),
            Some(Err(e)) => {
                self.fail(e);
                None
            }
            None => {
                self.fail(Error::corruption("index cursor has no value"));
                None
            }
        }
    }

    fn load_block(&mut self, handle: BlockHandle) -> bool {
        match self.table.read_data_block(handle) {
            Ok(block) => {
                self.data = Some(BlockIter::new(block, self.table.opts.comparer.clone()));
                self.data_handle = handle;
                self.blocks_loaded += 1;
                true
            }
            Err(e) => {
                self.fail(e);
                false
            }
        }
    }

    /// With the index positioned, loads blocks forward until one yields a
    /// first record (or the index runs out).
    fn descend_forward(&mut self) {
        loop {
            if !self.index.valid() {
                self.data = None;
                return;
            }
            let Some(handle) = self.current_index_handle() else {
                return;
            };
            if !self.load_block(handle) {
                return;
            }
            if let Some(d) = &mut self.data {
                d.first();
                if let Some(e) = d.take_error() {
                    self.fail(e);
                    return;
                }
                if d.valid() {
                    return;
                }
            }
            self.index.next();
            if self.latch_index_error() {
                return;
            }
        }
    }

    /// Mirror of [`Self::descend_forward`], walking blocks backward and
    /// taking each block's last record.
    fn descend_backward(&mut self) {
        loop {
            if !self.index.valid() {
                self.data = None;
                return;
            }
            let Some(handle) = self.current_index_handle() else {
                return;
            };
            if !self.load_block(handle) {
                return;
            }
            if let Some(d) = &mut self.data {
                d.last();
                if let Some(e) = d.take_error() {
                    self.fail(e);
                    return;
                }
                if d.valid() {
                    return;
                }
            }
            self.index.prev();
            if self.latch_index_error() {
                return;
            }
        }
    }

    fn seek_ge_impl(&mut self, prefix: Option<&[u8]>, key: InternalKey<'_>) {
        if self.err.is_some() {
            return;
        }
        self.out_of_bounds = false;

        // Clamp the target into the bounds: up to the lower bound, and
        // down to the upper so the cursor parks at the boundary rather
        // than far past it (a later `prev` steps straight back in).
        let mut target_user = key.user_key;
        let mut trailer = key.trailer;
        let lower = self.bounds.lower.clone();
        let upper = self.bounds.upper.clone();
        if let Some(lo) = &lower {
            if self.cmp(target_user, lo) == Ordering::Less {
                target_user = lo;
                trailer = u64::MAX;
            }
        }
        if let Some(up) = &upper {
            if self.cmp(target_user, up) != Ordering::Less {
                target_user = up;
                trailer = u64::MAX;
            }
        }
        let target = InternalKey {
            user_key: target_user,
            trailer,
        };

        // A table filter rejecting the prefix rules out the whole table.
        if let (Some(prefix), Some(TableFilter::Whole { bitmap }), Some(policy)) =
            (prefix, &self.table.filter, &self.table.opts.filter_policy)
        {
            if !policy.may_contain(bitmap, prefix) {
                self.data = None;
                return;
            }
        }

        self.index.seek_ge(target);
        if self.latch_index_error() {
            return;
        }
        let mut first_block = true;
        loop {
            if !self.index.valid() {
                self.data = None;
                return;
            }
            let Some(handle) = self.current_index_handle() else {
                return;
            };
            if let Some(prefix) = prefix {
                if self.block_filter_rejects(handle.offset, prefix) {
                    self.index.next();
                    if self.latch_index_error() {
                        return;
                    }
                    first_block = false;
                    continue;
                }
            }
            if !self.load_block(handle) {
                return;
            }
            if let Some(d) = &mut self.data {
                if first_block {
                    d.seek_ge(target);
                } else {
                    d.first();
                }
                if let Some(e) = d.take_error() {
                    self.fail(e);
                    return;
                }
                if d.valid() {
                    break;
                }
            }
            self.index.next();
            if self.latch_index_error() {
                return;
            }
            first_block = false;
        }
        self.check_upper_bound();
    }

    fn block_filter_rejects(&self, block_offset: u64, prefix: &[u8]) -> bool {
        if let (Some(TableFilter::PerBlock(reader)), Some(policy)) =
            (&self.table.filter, &self.table.opts.filter_policy)
        {
            !reader.may_contain(policy.as_ref(), block_offset, prefix)
        } else {
            false
        }
    }

    fn check_upper_bound(&mut self) {
        if let (Some(up), Some(d)) = (&self.bounds.upper, &self.data) {
            if let Some(k) = d.key() {
                if self.table.opts.comparer.compare(k.user_key, up) != Ordering::Less {
                    self.out_of_bounds = true;
                }
            }
        }
    }

    fn check_lower_bound(&mut self) {
        if let (Some(lo), Some(d)) = (&self.bounds.lower, &self.data) {
            if let Some(k) = d.key() {
                if self.table.opts.comparer.compare(k.user_key, lo) == Ordering::Less {
                    self.out_of_bounds = true;
                }
            }
        }
    }
}

impl InternalIterator for TableIter<'_> {
    fn seek_ge(&mut self, key: InternalKey<'_>) {
        TableIter::seek_ge(self, key);
    }

    fn seek_prefix_ge(&mut self, prefix: &[u8], key: InternalKey<'_>) {
        TableIter::seek_prefix_ge(self, prefix, key);
    }

    fn seek_lt(&mut self, key: InternalKey<'_>) {
        TableIter::seek_lt(self, key);
    }

    fn first(&mut self) {
        TableIter::first(self);
    }

    fn last(&mut self) {
        TableIter::last(self);
    }

    fn next(&mut self) {
        TableIter::next(self);
    }

    fn prev(&mut self) {
        TableIter::prev(self);
    }

    fn valid(&self) -> bool {
        TableIter::valid(self)
    }

    fn key(&self) -> Option<InternalKey<'_>> {
        TableIter::key(self)
    }

    fn value(&self) -> Option<&[u8]> {
        TableIter::value(self)
    }

    fn error(&self) -> Option<&Error> {
        TableIter::error(self)
    }
}
