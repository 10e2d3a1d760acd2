//! Boolean queries over term postings.

use serde::{Deserialize, Serialize};
use shardgroup_bits::ReservedDocBitSet;
use shardgroup_common::Result;
use shardgroup_memory::MemoryReservationContext;

use crate::reader::{DocIdStream, ShardReader, for_each_doc_chunk};

const SEARCH_BUFFER_SIZE: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Term {
    Int(i64),
    Str(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Query {
    /// Documents that hold `term` in `field`.
    Term { field: String, term: Term },
    /// Documents with an int value in `min..max` (or `min..=max`).
    IntRange {
        field: String,
        min: i64,
        max: i64,
        #[serde(default)]
        max_inclusive: bool,
    },
    /// Documents with a string value in `min..max` (or `min..=max`), by byte order.
    StringRange {
        field: String,
        min: String,
        max: String,
        #[serde(default)]
        max_inclusive: bool,
    },
    /// Intersection; an empty list matches every document.
    And(Vec<Query>),
    /// Union; an empty list matches nothing.
    Or(Vec<Query>),
    Not(Box<Query>),
}

impl Query {
    pub fn int_term(field: &str, term: i64) -> Query {
        Query::Term {
            field: field.to_string(),
            term: Term::Int(term),
        }
    }

    pub fn string_term(field: &str, term: &str) -> Query {
        Query::Term {
            field: field.to_string(),
            term: Term::Str(term.to_string()),
        }
    }
}

/// Evaluates [`Query`] trees against a shard.
///
/// Every intermediate bit set is charged to the memory context, so a deep
/// query holds at most one set per tree level plus one per sibling result.
pub struct QuerySearcher<'a> {
    reader: &'a dyn ShardReader,
    memory: &'a MemoryReservationContext,
}

impl<'a> QuerySearcher<'a> {
    pub fn new(reader: &'a dyn ShardReader, memory: &'a MemoryReservationContext) -> Self {
        QuerySearcher { reader, memory }
    }

    pub fn search(&self, query: &Query) -> Result<ReservedDocBitSet> {
        let num_docs = self.reader.num_docs();
        match query {
            Query::Term { field, term } => {
                let mut bits = ReservedDocBitSet::empty(num_docs, self.memory)?;
                match term {
                    Term::Int(value) => {
                        let mut iter = self.reader.int_terms(field);
                        iter.reset(*value);
                        if iter.next() && iter.term() == *value {
                            mark_docs(iter.doc_ids().as_mut(), &mut bits);
                        }
                    }
                    Term::Str(value) => {
                        let mut iter = self.reader.string_terms(field);
                        iter.reset(value);
                        if iter.next() && iter.term() == value.as_str() {
                            mark_docs(iter.doc_ids().as_mut(), &mut bits);
                        }
                    }
                }
                Ok(bits)
            }
            Query::IntRange {
                field,
                min,
                max,
                max_inclusive,
            } => {
                let mut bits = ReservedDocBitSet::empty(num_docs, self.memory)?;
                let mut iter = self.reader.int_terms(field);
                iter.reset(*min);
                while iter.next() {
                    let term = iter.term();
                    if term > *max || (term == *max && !max_inclusive) {
                        break;
                    }
                    mark_docs(iter.doc_ids().as_mut(), &mut bits);
                }
                Ok(bits)
            }
            Query::StringRange {
                field,
                min,
                max,
                max_inclusive,
            } => {
                let mut bits = ReservedDocBitSet::empty(num_docs, self.memory)?;
                let mut iter = self.reader.string_terms(field);
                iter.reset(min);
                while iter.next() {
                    let term = iter.term();
                    if term > max.as_str() || (term == max.as_str() && !max_inclusive) {
                        break;
                    }
                    mark_docs(iter.doc_ids().as_mut(), &mut bits);
                }
                Ok(bits)
            }
            Query::And(children) => {
                let mut bits = ReservedDocBitSet::full(num_docs, self.memory)?;
                for child in children {
                    let child = self.search(child)?;
                    *bits &= child.bits();
                }
                Ok(bits)
            }
            Query::Or(children) => {
                let mut bits = ReservedDocBitSet::empty(num_docs, self.memory)?;
                for child in children {
                    let child = self.search(child)?;
                    *bits |= child.bits();
                }
                Ok(bits)
            }
            Query::Not(inner) => {
                let mut bits = self.search(inner)?;
                bits.negate();
                Ok(bits)
            }
        }
    }
}

fn mark_docs(stream: &mut dyn DocIdStream, bits: &mut ReservedDocBitSet) {
    let mut buf = [0u32; SEARCH_BUFFER_SIZE];
    for_each_doc_chunk(stream, &mut buf, |docs| {
        for &doc in docs {
            bits.set(doc as usize);
        }
    });
}
