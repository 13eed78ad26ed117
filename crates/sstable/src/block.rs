//! Block decoding: restart points, prefix-compressed records, and the
//! bidirectional cursor over them.
//!
//! A block is a run of records followed by a restart-point trailer:
//!
//! ```text
//! record  := shared: varint32, non_shared: varint32, value_len: varint32,
//!            key_suffix[non_shared], value[value_len]
//! trailer := restart_offset: u32 LE * num_restarts, num_restarts: u32 LE
//! ```
//!
//! A record's full key is the previous key truncated to `shared` bytes
//! plus the suffix. At every restart point `shared` is zero, which is
//! what makes binary search and backward iteration possible: `prev` is a
//! replay from the governing restart point.

use std::cmp::Ordering;
use std::sync::Arc;

use base::{decode_varint32, Comparer, Error, InternalKey, Result, TRAILER_LEN};
use byteorder::{BigEndian, ByteOrder, LittleEndian};

/// A decoded block: verified, decompressed bytes plus the parsed restart
/// trailer. Cloning is cheap — the bytes are shared.
#[derive(Clone)]
pub(crate) struct Block {
    data: Arc<Vec<u8>>,
    restarts_offset: usize,
    num_restarts: u32,
}

impl Block {
    /// Parses the restart trailer and validates its offsets.
    pub(crate) fn new(data: Arc<Vec<u8>>) -> Result<Block> {
        let len = data.len();
        if len < 4 {
            return Err(Error::corruption("block too short for restart count"));
        }
        let num_restarts = LittleEndian::read_u32(&data[len - 4..]);
        let trailer_len = 4 + (num_restarts as usize) * 4;
        if trailer_len > len {
            return Err(Error::corruption("restart count overflows block"));
        }
        let restarts_offset = len - trailer_len;

        let block = Block {
            data,
            restarts_offset,
            num_restarts,
        };
        let mut prev = None;
        for i in 0..num_restarts {
            let off = block.restart_offset(i);
            if off >= restarts_offset {
                return Err(Error::corruption("restart offset past block end"));
            }
            if let Some(p) = prev {
                if off <= p {
                    return Err(Error::corruption("restart offsets not increasing"));
                }
            }
            prev = Some(off);
        }
        Ok(block)
    }

    pub(crate) fn data(&self) -> &[u8] {
        &self.data
    }

    /// Logical block length (records plus restart trailer).
    pub(crate) fn len(&self) -> usize {
        self.data.len()
    }

    /// Offset where records end and the restart array begins.
    pub(crate) fn restarts_offset(&self) -> usize {
        self.restarts_offset
    }

    pub(crate) fn num_restarts(&self) -> u32 {
        self.num_restarts
    }

    fn restart_offset(&self, i: u32) -> usize {
        let at = self.restarts_offset + 4 * i as usize;
        LittleEndian::read_u32(&self.data[at..]) as usize
    }
}

/// One decoded record header: where the value sits and where the next
/// record starts.
struct Record {
    next_offset: usize,
    val_start: usize,
    val_end: usize,
}

/// Decodes the record at `offset`, splicing its key into `key_buf`
/// (which must hold the previous record's key, or be empty at a restart).
fn decode_record(
    data: &[u8],
    limit: usize,
    offset: usize,
    key_buf: &mut Vec<u8>,
) -> Result<Record> {
    let (shared, n) = decode_varint32(&data[offset..limit])?;
    let mut p = offset + n;
    let (non_shared, n) = decode_varint32(&data[p..limit])?;
    p += n;
    let (value_len, n) = decode_varint32(&data[p..limit])?;
    p += n;

    let shared = shared as usize;
    if shared > key_buf.len() {
        return Err(Error::corruption(
            "record shares more bytes than previous key has",
        ));
    }
    let suffix_end = p + non_shared as usize;
    let val_end = suffix_end + value_len as usize;
    if suffix_end > limit || val_end > limit {
        return Err(Error::corruption("record overflows block"));
    }

    key_buf.truncate(shared);
    key_buf.extend_from_slice(&data[p..suffix_end]);
    Ok(Record {
        next_offset: val_end,
        val_start: suffix_end,
        val_end,
    })
}

/// Bidirectional cursor over an internal-key block (data or index).
///
/// Invalid states keep a sentinel offset so that stepping off one end and
/// coming back works: past-the-end sits at `restarts_offset`, before-the-
/// beginning at zero. The first error latches; every positioning call
/// after it is a no-op.
pub(crate) struct BlockIter {
    block: Block,
    cmp: Arc<dyn Comparer>,
    /// Start of the current record (or a sentinel when invalid).
    offset: usize,
    /// End of the current record.
    next_offset: usize,
    /// Restart section the current record belongs to.
    restart_idx: u32,
    /// Materialized encoded key of the current record.
    key: Vec<u8>,
    trailer: u64,
    val_start: usize,
    val_end: usize,
    valid: bool,
    err: Option<Error>,
}

impl BlockIter {
    pub(crate) fn new(block: Block, cmp: Arc<dyn Comparer>) -> BlockIter {
        BlockIter {
            block,
            cmp,
            offset: 0,
            next_offset: 0,
            restart_idx: 0,
            key: Vec::new(),
            trailer: 0,
            val_start: 0,
            val_end: 0,
            valid: false,
            err: None,
        }
    }

    pub(crate) fn valid(&self) -> bool {
        self.valid
    }

    pub(crate) fn error(&self) -> Option<&Error> {
        self.err.as_ref()
    }

    pub(crate) fn take_error(&mut self) -> Option<Error> {
        if self.err.is_some() {
            self.valid = false;
        }
        self.err.take()
    }

    pub(crate) fn key(&self) -> Option<InternalKey<'_>> {
        if self.valid {
            Some(self.ikey())
        } else {
            None
        }
    }

    pub(crate) fn value(&self) -> Option<&[u8]> {
        if self.valid {
            Some(&self.block.data()[self.val_start..self.val_end])
        } else {
            None
        }
    }

    /// Byte span `[start, end)` of the current record within the block.
    pub(crate) fn record_span(&self) -> Option<(usize, usize)> {
        if self.valid {
            Some((self.offset, self.next_offset))
        } else {
            None
        }
    }

    pub(crate) fn block(&self) -> &Block {
        &self.block
    }

    pub(crate) fn first(&mut self) {
        if self.err.is_some() {
            return;
        }
        if self.block.num_restarts() == 0 {
            self.invalidate_backward();
            return;
        }
        if let Err(e) = self.decode_restart(0) {
            self.fail(e);
        }
    }

    pub(crate) fn last(&mut self) {
        if self.err.is_some() {
            return;
        }
        let n = self.block.num_restarts();
        if n == 0 {
            self.invalidate_backward();
            return;
        }
        if let Err(e) = self.last_inner(n - 1) {
            self.fail(e);
        }
    }

    pub(crate) fn next(&mut self) {
        if self.err.is_some() {
            return;
        }
        if !self.valid {
            // Stepping forward off the before-the-beginning sentinel
            // lands on the first record; past-the-end stays put.
            if self.offset == 0 && self.next_offset == 0 {
                self.first();
            }
            return;
        }
        if let Err(e) = self.step() {
            self.fail(e);
        }
    }

    pub(crate) fn prev(&mut self) {
        if self.err.is_some() {
            return;
        }
        let target = if self.valid {
            self.offset
        } else if self.offset >= self.block.restarts_offset()
            && self.block.restarts_offset() > 0
            && self.block.num_restarts() > 0
        {
            // Past-the-end: replay to the last record.
            self.block.restarts_offset()
        } else {
            self.invalidate_backward();
            return;
        };
        if target == 0 {
            self.invalidate_backward();
            return;
        }
        if let Err(e) = self.prev_inner(target) {
            self.fail(e);
        }
    }

    /// Positions at the first record whose key is >= `target`.
    pub(crate) fn seek_ge(&mut self, target: InternalKey<'_>) {
        if self.err.is_some() {
            return;
        }
        if self.block.num_restarts() == 0 {
            self.invalidate_forward();
            return;
        }
        if let Err(e) = self.seek_ge_inner(target) {
            self.fail(e);
        }
    }

    /// Positions at the last record whose key is < `target`.
    pub(crate) fn seek_lt(&mut self, target: InternalKey<'_>) {
        self.seek_ge(target);
        if self.err.is_some() {
            return;
        }
        if self.valid {
            self.prev();
        } else {
            // Every key is < target (or the block is empty).
            self.last();
        }
    }

    fn ikey(&self) -> InternalKey<'_> {
        InternalKey {
            user_key: &self.key[..self.key.len() - TRAILER_LEN],
            trailer: self.trailer,
        }
    }

    fn fail(&mut self, e: Error) {
        self.err = Some(e);
        self.valid = false;
    }

    fn invalidate_forward(&mut self) {
        self.offset = self.block.restarts_offset();
        self.next_offset = self.offset;
        self.valid = false;
    }

    fn invalidate_backward(&mut self) {
        self.offset = 0;
        self.next_offset = 0;
        self.valid = false;
    }

    /// Decodes the record at `offset` and makes it current. The caller
    /// maintains the key-buffer continuity contract of [`decode_record`].
    fn decode_at(&mut self, offset: usize) -> Result<()> {
        let rec = decode_record(
            self.block.data(),
            self.block.restarts_offset(),
            offset,
            &mut self.key,
        )?;
        if self.key.len() < TRAILER_LEN {
            return Err(Error::corruption("internal key shorter than trailer"));
        }
        self.trailer = BigEndian::read_u64(&self.key[self.key.len() - TRAILER_LEN..]);
        self.offset = offset;
        self.next_offset = rec.next_offset;
        self.val_start = rec.val_start;
        self.val_end = rec.val_end;
        self.valid = true;
        Ok(())
    }

    /// Jumps to the first record of restart section `idx`.
    fn decode_restart(&mut self, idx: u32) -> Result<()> {
        let offset = self.block.restart_offset(idx);
        self.key.clear();
        self.restart_idx = idx;
        self.decode_at(offset)
        // A restart record with shared > 0 fails inside decode_record,
        // because the key buffer was just cleared.
    }

    /// Advances to the next record; invalidates forward at the end.
    fn step(&mut self) -> Result<()> {
        let offset = self.next_offset;
        if offset >= self.block.restarts_offset() {
            self.invalidate_forward();
            return Ok(());
        }
        let next_restart = self.restart_idx + 1;
        if next_restart < self.block.num_restarts()
            && self.block.restart_offset(next_restart) == offset
        {
            return self.decode_restart(next_restart);
        }
        self.decode_at(offset)
    }

    fn last_inner(&mut self, restart: u32) -> Result<()> {
        self.decode_restart(restart)?;
        while self.valid && self.next_offset < self.block.restarts_offset() {
            self.step()?;
        }
        Ok(())
    }

    /// Replays records up to, but not including, the record starting at
    /// `target`. `target` is a valid record start greater than zero.
    fn prev_inner(&mut self, target: usize) -> Result<()> {
        let mut restart = if self.valid {
            self.restart_idx
        } else {
            self.block.num_restarts() - 1
        };
        while self.block.restart_offset(restart) >= target {
            if restart == 0 {
                self.invalidate_backward();
                return Ok(());
            }
            restart -= 1;
        }
        self.decode_restart(restart)?;
        while self.next_offset < target {
            self.step()?;
            if !self.valid {
                return Err(Error::corruption("record boundaries misaligned"));
            }
        }
        Ok(())
    }

    fn seek_ge_inner(&mut self, target: InternalKey<'_>) -> Result<()> {
        // Binary search the restart array for the last restart whose key
        // is <= target, then scan forward from there.
        let mut left = 0u32;
        let mut right = self.block.num_restarts() - 1;
        while left < right {
            let mid = left + (right - left + 1) / 2;
            let key = self.restart_key(mid)?;
            let ord = InternalKey::decode(key)?.compare(self.cmp.as_ref(), target);
            if ord == Ordering::Greater {
                right = mid - 1;
            } else {
                left = mid;
            }
        }
        self.decode_restart(left)?;
        while self.valid && self.ikey().compare(self.cmp.as_ref(), target) == Ordering::Less {
            self.step()?;
        }
        Ok(())
    }

    /// The full key of the record at restart `idx`, borrowed straight
    /// from the block (restart records have no shared prefix).
    fn restart_key(&self, idx: u32) -> Result<&[u8]> {
        let data = self.block.data();
        let limit = self.block.restarts_offset();
        let offset = self.block.restart_offset(idx);
        let (shared, n) = decode_varint32(&data[offset..limit])?;
        let mut p = offset + n;
        let (non_shared, n) = decode_varint32(&data[p..limit])?;
        p += n;
        let (_, n) = decode_varint32(&data[p..limit])?;
        p += n;
        if shared != 0 {
            return Err(Error::corruption("restart record has shared prefix"));
        }
        let end = p + non_shared as usize;
        if end > limit {
            return Err(Error::corruption("record overflows block"));
        }
        Ok(&data[p..end])
    }
}

/// Forward-only cursor over a raw-key block (metaindex, properties).
///
/// Same record layout as [`BlockIter`], but keys are plain bytes with no
/// trailer and ordering is bytewise. Meta blocks are tiny, so seeks scan
/// from the front instead of binary searching restarts.
pub(crate) struct RawBlockIter {
    block: Block,
    next_offset: usize,
    key: Vec<u8>,
    val_start: usize,
    val_end: usize,
    valid: bool,
    err: Option<Error>,
}

impl RawBlockIter {
    pub(crate) fn new(block: Block) -> RawBlockIter {
        RawBlockIter {
            block,
            next_offset: 0,
            key: Vec::new(),
            val_start: 0,
            val_end: 0,
            valid: false,
            err: None,
        }
    }

    pub(crate) fn valid(&self) -> bool {
        self.valid
    }

    pub(crate) fn take_error(&mut self) -> Option<Error> {
        self.err.take()
    }

    pub(crate) fn key(&self) -> Option<&[u8]> {
        if self.valid {
            Some(&self.key)
        } else {
            None
        }
    }

    pub(crate) fn value(&self) -> Option<&[u8]> {
        if self.valid {
            Some(&self.block.data()[self.val_start..self.val_end])
        } else {
            None
        }
    }

    pub(crate) fn first(&mut self) {
        if self.err.is_some() {
            return;
        }
        self.next_offset = 0;
        self.key.clear();
        if self.block.restarts_offset() == 0 {
            self.valid = false;
            return;
        }
        self.advance();
    }

    pub(crate) fn next(&mut self) {
        if self.err.is_some() || !self.valid {
            return;
        }
        if self.next_offset >= self.block.restarts_offset() {
            self.valid = false;
            return;
        }
        self.advance();
    }

    /// Positions at the first record whose key is >= `name`, bytewise.
    pub(crate) fn seek_ge(&mut self, name: &[u8]) {
        self.first();
        while self.valid && self.key.as_slice() < name {
            self.next();
        }
    }

    fn advance(&mut self) {
        match decode_record(
            self.block.data(),
            self.block.restarts_offset(),
            self.next_offset,
            &mut self.key,
        ) {
            Ok(rec) => {
                self.val_start = rec.val_start;
                self.val_end = rec.val_end;
                self.next_offset = rec.next_offset;
                self.valid = true;
            }
            Err(e) => {
                self.err = Some(e);
                self.valid = false;
            }
        }
    }
}
