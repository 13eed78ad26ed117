//! The merging iterator: a k-way ordered merge over child iterators.
//!
//! Children are any [`InternalIterator`]s sharing a comparator — one per
//! table, typically. A heap of child indices keeps the smallest (forward)
//! or largest (reverse) current key on top; ties between children
//! reporting the same internal key break by child index, so merges are
//! fully deterministic.
//!
//! Direction reversal is the one non-trivial move. Stepping backward out
//! of a forward merge (or vice versa) first repositions every non-top
//! child across the current key — reviving exhausted children from the
//! appropriate end — then rebuilds the opposite heap and performs the
//! step. Reversing out of an exhausted iterator degenerates to
//! `last`/`first`.

use std::cmp::Ordering;
use std::sync::Arc;

use base::{Comparer, Error, InternalKey};

use crate::iter::InternalIterator;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Direction {
    Forward,
    Reverse,
}

/// Merges N child iterators into one ordered view.
pub struct MergingIter<'a> {
    cmp: Arc<dyn Comparer>,
    children: Vec<Box<dyn InternalIterator + 'a>>,
    /// Indices of valid children, heap-ordered: `heap[0]` is the current
    /// position.
    heap: Vec<usize>,
    dir: Direction,
}

impl<'a> MergingIter<'a> {
    pub fn new(cmp: Arc<dyn Comparer>, children: Vec<Box<dyn InternalIterator + 'a>>) -> Self {
        MergingIter {
            cmp,
            children,
            heap: Vec::new(),
            dir: Direction::Forward,
        }
    }

    pub fn seek_ge(&mut self, key: InternalKey<'_>) {
        for child in &mut self.children {
            child.seek_ge(key);
        }
        self.reset(Direction::Forward);
    }

    pub fn seek_prefix_ge(&mut self, prefix: &[u8], key: InternalKey<'_>) {
        for child in &mut self.children {
            child.seek_prefix_ge(prefix, key);
        }
        self.reset(Direction::Forward);
    }

    pub fn seek_lt(&mut self, key: InternalKey<'_>) {
        for child in &mut self.children {
            child.seek_lt(key);
        }
        self.reset(Direction::Reverse);
    }

    pub fn first(&mut self) {
        for child in &mut self.children {
            child.first();
        }
        self.reset(Direction::Forward);
    }

    pub fn last(&mut self) {
        for child in &mut self.children {
            child.last();
        }
        self.reset(Direction::Reverse);
    }

    pub fn next(&mut self) {
        if self.any_child_error() {
            return;
        }
        match self.dir {
            Direction::Forward => self.step_top(),
            Direction::Reverse => {
                if self.switch_direction(Direction::Forward) {
                    self.step_top();
                }
            }
        }
        self.latch_child_errors();
    }

    pub fn prev(&mut self) {
        if self.any_child_error() {
            return;
        }
        match self.dir {
            Direction::Reverse => self.step_top(),
            Direction::Forward => {
                if self.switch_direction(Direction::Reverse) {
                    self.step_top();
                }
            }
        }
        self.latch_child_errors();
    }

    pub fn valid(&self) -> bool {
        !self.heap.is_empty()
    }

    pub fn key(&self) -> Option<InternalKey<'_>> {
        self.children[*self.heap.first()?].key()
    }

    pub fn value(&self) -> Option<&[u8]> {
        self.children[*self.heap.first()?].value()
    }

    /// The first latched child error, if any.
    pub fn error(&self) -> Option<&Error> {
        self.children.iter().find_map(|c| c.error())
    }

    // ---- internals ----

    fn reset(&mut self, dir: Direction) {
        self.dir = dir;
        self.rebuild_heap();
        self.latch_child_errors();
    }

    fn any_child_error(&self) -> bool {
        self.children.iter().any(|c| c.error().is_some())
    }

    fn latch_child_errors(&mut self) {
        if self.any_child_error() {
            self.heap.clear();
        }
    }

    /// Advances the top child one step in the current direction and
    /// restores heap order.
    fn step_top(&mut self) {
        let Some(&top) = self.heap.first() else {
            return;
        };
        match self.dir {
            Direction::Forward => self.children[top].next(),
            Direction::Reverse => self.children[top].prev(),
        }
        if self.children[top].valid() {
            self.sift_down(0);
        } else {
            let last = self.heap.len() - 1;
            self.heap.swap(0, last);
            self.heap.pop();
            if !self.heap.is_empty() {
                self.sift_down(0);
            }
        }
    }

    /// Repositions every non-top child to the far side of the current
    /// key and rebuilds the heap for `dir`. Returns true when the caller
    /// should still perform the actual step; reversing out of an
    /// exhausted iterator is already complete (`last`/`first`).
    fn switch_direction(&mut self, dir: Direction) -> bool {
        self.dir = dir;
        let Some(&top) = self.heap.first() else {
            // Exhausted: stepping against the old direction restarts
            // from the appropriate end.
            for child in &mut self.children {
                match dir {
                    Direction::Forward => child.first(),
                    Direction::Reverse => child.last(),
                }
            }
            self.rebuild_heap();
            return false;
        };

        // The current key, copied out so the other children can move.
        let (current_user, current_trailer) = match self.children[top].key() {
            Some(k) => (k.user_key.to_vec(), k.trailer),
            None => return false,
        };
        let current = InternalKey {
            user_key: &current_user,
            trailer: current_trailer,
        };

        let cmp = self.cmp.clone();
        for (i, child) in self.children.iter_mut().enumerate() {
            if i == top {
                continue;
            }
            if !child.valid() && child.error().is_none() {
                match dir {
                    Direction::Forward => child.first(),
                    Direction::Reverse => child.last(),
                }
            }
            loop {
                let step = match child.key() {
                    Some(k) => match dir {
                        // Stepping forward: everything at or before the
                        // current key has already been emitted.
                        Direction::Forward => {
                            k.compare(cmp.as_ref(), current) != Ordering::Greater
                        }
                        Direction::Reverse => {
                            k.compare(cmp.as_ref(), current) != Ordering::Less
                        }
                    },
                    None => false,
                };
                if !step {
                    break;
                }
                match dir {
                    Direction::Forward => child.next(),
                    Direction::Reverse => child.prev(),
                }
            }
        }
        self.rebuild_heap();
        true
    }

    fn rebuild_heap(&mut self) {
        self.heap.clear();
        for (i, child) in self.children.iter().enumerate() {
            if child.valid() {
                self.heap.push(i);
            }
        }
        for i in (0..self.heap.len() / 2).rev() {
            self.sift_down(i);
        }
    }

    /// True when child `a` belongs nearer the top of the heap than `b`.
    fn precedes(&self, a: usize, b: usize) -> bool {
        let (Some(ka), Some(kb)) = (self.children[a].key(), self.children[b].key()) else {
            return false;
        };
        let ord = ka.compare(self.cmp.as_ref(), kb);
        match self.dir {
            Direction::Forward => match ord {
                Ordering::Less => true,
                Ordering::Greater => false,
                Ordering::Equal => a < b,
            },
            Direction::Reverse => match ord {
                Ordering::Greater => true,
                Ordering::Less => false,
                Ordering::Equal => a < b,
            },
        }
    }

    fn sift_down(&mut self, mut pos: usize) {
        loop {
            let left = 2 * pos + 1;
            let right = left + 1;
            let mut best = pos;
            if left < self.heap.len() && self.precedes(self.heap[left], self.heap[best]) {
                best = left;
            }
            if right < self.heap.len() && self.precedes(self.heap[right], self.heap[best]) {
                best = right;
            }
            if best == pos {
                return;
            }
            self.heap.swap(pos, best);
            pos = best;
        }
    }
}

impl InternalIterator for MergingIter<'_> {
    fn seek_ge(&mut self, key: InternalKey<'_>) {
        MergingIter::seek_ge(self, key);
    }

    fn seek_prefix_ge(&mut self, prefix: &[u8], key: InternalKey<'_>) {
        MergingIter::seek_prefix_ge(self, prefix, key);
    }

    fn seek_lt(&mut self, key: InternalKey<'_>) {
        MergingIter::seek_lt(self, key);
    }

    fn first(&mut self) {
        MergingIter::first(self);
    }

    fn last(&mut self) {
        MergingIter::last(self);
    }

    fn next(&mut self) {
        MergingIter::next(self);
    }

    fn prev(&mut self) {
        MergingIter::prev(self);
    }

    fn valid(&self) -> bool {
        MergingIter::valid(self)
    }

    fn key(&self) -> Option<InternalKey<'_>> {
        MergingIter::key(self)
    }

    fn value(&self) -> Option<&[u8]> {
        MergingIter::value(self)
    }

    fn error(&self) -> Option<&Error> {
        MergingIter::error(self)
    }
}
