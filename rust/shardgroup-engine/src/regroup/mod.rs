//! Regroup passes. Each pass works on a [`GroupLookup`] handed in by the
//! engine together with a [`Scan`] describing where documents come from.

use std::{fmt::Debug, hash::Hash};

use shardgroup_columnar::{DocIdStream, IntTermIterator, ShardReader, StringTermIterator};
use shardgroup_memory::MemoryReservationContext;

use crate::buffers_pool::ScratchBuffers;

pub mod metric;
pub mod multi;
pub mod random;
pub mod remap;
pub mod single;

/// Everything a pass needs besides the lookup itself.
pub struct Scan<'a> {
    pub reader: &'a dyn ShardReader,
    pub memory: &'a MemoryReservationContext,
    pub buffers: &'a mut ScratchBuffers,
}

impl Scan<'_> {
    pub fn num_docs(&self) -> usize {
        self.reader.num_docs()
    }
}

/// Uniform view over int and string term iterators.
pub trait TermScan {
    type Term: Ord + Hash + Clone + Debug;

    /// Positions before the first term.
    fn rewind(&mut self);

    /// Positions before the first term `>= term`.
    fn seek(&mut self, term: &Self::Term);

    fn advance(&mut self) -> bool;

    fn current(&self) -> Self::Term;

    fn current_is(&self, term: &Self::Term) -> bool;

    fn docs(&self) -> Box<dyn DocIdStream + '_>;

    /// Moves onto `term` if the field has it.
    fn seek_exact(&mut self, term: &Self::Term) -> bool {
        self.seek(term);
        self.advance() && self.current_is(term)
    }
}

impl<'a> TermScan for Box<dyn IntTermIterator + 'a> {
    type Term = i64;

    fn rewind(&mut self) {
        self.reset(i64::MIN);
    }

    fn seek(&mut self, term: &i64) {
        self.reset(*term);
    }

    fn advance(&mut self) -> bool {
        self.next()
    }

    fn current(&self) -> i64 {
        self.term()
    }

    fn current_is(&self, term: &i64) -> bool {
        self.term() == *term
    }

    fn docs(&self) -> Box<dyn DocIdStream + '_> {
        self.doc_ids()
    }
}

impl<'a> TermScan for Box<dyn StringTermIterator + 'a> {
    type Term = String;

    fn rewind(&mut self) {
        self.reset("");
    }

    fn seek(&mut self, term: &String) {
        self.reset(term);
    }

    fn advance(&mut self) -> bool {
        self.next()
    }

    fn current(&self) -> String {
        self.term().to_string()
    }

    fn current_is(&self, term: &String) -> bool {
        self.term() == term.as_str()
    }

    fn docs(&self) -> Box<dyn DocIdStream + '_> {
        self.doc_ids()
    }
}

/// Rewrites `lookup` chunk by chunk: `f(doc, group)` returns the new group.
pub(crate) fn rewrite_sequential(
    lookup: &mut crate::GroupLookup,
    buffers: &mut ScratchBuffers,
    mut f: impl FnMut(u32, u32) -> u32,
) {
    let num_docs = lookup.len();
    let chunk = buffers.groups.len().max(1);
    let mut start = 0;
    while start < num_docs {
        let n = chunk.min(num_docs - start);
        let groups = &mut buffers.groups[..n];
        lookup.fill_sequential(start, groups);
        for (i, group) in groups.iter_mut().enumerate() {
            *group = f((start + i) as u32, *group);
        }
        lookup.write_sequential(start, groups);
        start += n;
    }
}
