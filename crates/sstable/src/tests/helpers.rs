//! Shared fixtures: tables built in memory, a fake child iterator for
//! merge tests, and a comparer that defines one-byte prefixes.

use std::cmp::Ordering;
use std::sync::Arc;

use base::{Comparer, Error, InternalKey, Kind, MemFile};

use crate::iter::InternalIterator;
use crate::{Options, Table, TableWriter, WriterOptions};

/// Builds a table in memory from `(user key, seq, value)` entries, which
/// must already be in internal-key order.
pub fn build_table(entries: &[(&str, u64, &str)], opts: WriterOptions) -> Vec<u8> {
    let mut w = TableWriter::new(Vec::new(), opts);
    for (user, seq, value) in entries {
        w.add(InternalKey::new(user.as_bytes(), *seq, Kind::Set), value.as_bytes())
            .expect("fixture keys are ordered");
    }
    w.finish().expect("writing to a Vec cannot fail")
}

pub fn open_table(bytes: Vec<u8>, id: u64, opts: Options) -> anyhow::Result<Table> {
    Ok(Table::open(Arc::new(MemFile::new(bytes)), id, opts)?)
}

/// `(user key, seq)` pairs yielded by walking `it` forward from its
/// current position.
pub fn drain_forward(it: &mut dyn InternalIterator) -> Vec<(String, u64)> {
    let mut out = Vec::new();
    while it.valid() {
        if let Some(k) = it.key() {
            out.push((String::from_utf8_lossy(k.user_key).into_owned(), k.seqnum()));
        }
        it.next();
    }
    out
}

pub fn drain_backward(it: &mut dyn InternalIterator) -> Vec<(String, u64)> {
    let mut out = Vec::new();
    while it.valid() {
        if let Some(k) = it.key() {
            out.push((String::from_utf8_lossy(k.user_key).into_owned(), k.seqnum()));
        }
        it.prev();
    }
    out
}

/// Renders the current position as `"user:seq"`, or `"."` when invalid —
/// the notation the merge tests speak.
pub fn render(it: &dyn InternalIterator) -> String {
    match it.key() {
        Some(k) => format!(
            "{}:{}",
            String::from_utf8_lossy(k.user_key),
            k.seqnum()
        ),
        None => ".".to_string(),
    }
}

/// A comparer whose prefixes are the first byte of a key.
#[derive(Clone, Copy, Debug, Default)]
pub struct OneBytePrefixComparer;

impl Comparer for OneBytePrefixComparer {
    fn name(&self) -> &'static str {
        "test.one-byte-prefix"
    }

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }

    fn split(&self, key: &[u8]) -> Option<usize> {
        if key.is_empty() {
            None
        } else {
            Some(1)
        }
    }
}

/// An in-memory child iterator for merge tests, built from `"user:seq"`
/// strings in increasing internal-key order.
pub struct FakeIter {
    /// `(encoded internal key, value)` pairs.
    entries: Vec<(Vec<u8>, Vec<u8>)>,
    /// Current index; -1 is before-the-beginning, `entries.len()` past
    /// the end.
    pos: isize,
    err: Option<Error>,
    fail_on_positioning: bool,
}

impl FakeIter {
    pub fn new(keys: &[&str]) -> FakeIter {
        let entries = keys
            .iter()
            .map(|s| {
                let (user, seq) = s.split_once(':').expect("fixture keys are user:seq");
                let key = InternalKey::new(user.as_bytes(), seq.parse().unwrap(), Kind::Set);
                (key.encode(), format!("v-{s}").into_bytes())
            })
            .collect();
        FakeIter {
            entries,
            pos: -1,
            err: None,
            fail_on_positioning: false,
        }
    }

    /// A child whose first positioning call latches a corruption error.
    pub fn failing() -> FakeIter {
        FakeIter {
            entries: Vec::new(),
            pos: -1,
            err: None,
            fail_on_positioning: true,
        }
    }

    fn check_fail(&mut self) -> bool {
        if self.fail_on_positioning && self.err.is_none() {
            self.err = Some(Error::corruption("injected failure"));
        }
        self.err.is_some()
    }

    fn decoded(&self, pos: isize) -> Option<InternalKey<'_>> {
        let (key, _) = self.entries.get(usize::try_from(pos).ok()?)?;
        InternalKey::decode(key).ok()
    }
}

impl InternalIterator for FakeIter {
    fn seek_ge(&mut self, key: InternalKey<'_>) {
        if self.check_fail() {
            return;
        }
        let cmp = base::BytewiseComparer;
        self.pos = self.entries.len() as isize;
        for i in 0..self.entries.len() {
            let here = self.decoded(i as isize).expect("fixture keys decode");
            if here.compare(&cmp, key) != Ordering::Less {
                self.pos = i as isize;
                break;
            }
        }
    }

    fn seek_lt(&mut self, key: InternalKey<'_>) {
        if self.check_fail() {
            return;
        }
        let cmp = base::BytewiseComparer;
        self.pos = -1;
        for i in (0..self.entries.len()).rev() {
            let here = self.decoded(i as isize).expect("fixture keys decode");
            if here.compare(&cmp, key) == Ordering::Less {
                self.pos = i as isize;
                break;
            }
        }
    }

    fn first(&mut self) {
        if self.check_fail() {
            return;
        }
        self.pos = if self.entries.is_empty() { -1 } else { 0 };
    }

    fn last(&mut self) {
        if self.check_fail() {
            return;
        }
        self.pos = self.entries.len() as isize - 1;
    }

    fn next(&mut self) {
        if self.check_fail() {
            return;
        }
        if self.pos < self.entries.len() as isize {
            self.pos += 1;
        }
    }

    fn prev(&mut self) {
        if self.check_fail() {
            return;
        }
        if self.pos >= 0 {
            self.pos -= 1;
        }
    }

    fn valid(&self) -> bool {
        self.err.is_none() && self.pos >= 0 && (self.pos as usize) < self.entries.len()
    }

    fn key(&self) -> Option<InternalKey<'_>> {
        if self.valid() {
            self.decoded(self.pos)
        } else {
            None
        }
    }

    fn value(&self) -> Option<&[u8]> {
        if self.valid() {
            self.entries
                .get(self.pos as usize)
                .map(|(_, v)| v.as_slice())
        } else {
            None
        }
    }

    fn error(&self) -> Option<&Error> {
        self.err.as_ref()
    }
}
