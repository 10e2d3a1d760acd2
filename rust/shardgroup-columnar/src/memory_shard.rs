//! A shard held entirely in memory as sorted posting lists.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use shardgroup_common::{Error, Result};

use crate::{
    metric::{ArrayValueLookup, IntValueLookup},
    reader::{DocIdStream, IntTermIterator, ShardReader, SliceDocIdStream, StringTermIterator},
};

/// Terms in ascending order, each with its ascending, duplicate-free doc ids.
#[derive(Debug, Clone, Default)]
struct Postings<T> {
    terms: Vec<T>,
    docs: Vec<Vec<u32>>,
}

impl<T: Ord> Postings<T> {
    fn from_map(map: BTreeMap<T, Vec<u32>>) -> Postings<T> {
        let mut postings = Postings {
            terms: Vec::with_capacity(map.len()),
            docs: Vec::with_capacity(map.len()),
        };
        for (term, mut docs) in map {
            docs.sort_unstable();
            docs.dedup();
            postings.terms.push(term);
            postings.docs.push(docs);
        }
        postings
    }
}

static NO_INT_TERMS: Postings<i64> = Postings {
    terms: Vec::new(),
    docs: Vec::new(),
};

static NO_STRING_TERMS: Postings<String> = Postings {
    terms: Vec::new(),
    docs: Vec::new(),
};

/// An in-memory [`ShardReader`].
///
/// Fields may hold any number of values per document. The metric view of an
/// int field reports the largest value of each document, or 0 when the
/// document has none.
#[derive(Debug, Clone)]
pub struct MemoryShard {
    num_docs: usize,
    int_fields: BTreeMap<String, Postings<i64>>,
    string_fields: BTreeMap<String, Postings<String>>,
}

impl MemoryShard {
    pub fn builder(num_docs: usize) -> MemoryShardBuilder {
        MemoryShardBuilder::new(num_docs)
    }

    /// Values of `field` for `doc`, ascending.
    pub fn int_values(&self, field: &str, doc: u32) -> Vec<i64> {
        self.int_fields
            .get(field)
            .map(|p| values_of(p, doc))
            .unwrap_or_default()
    }

    /// Values of `field` for `doc`, ascending.
    pub fn string_values(&self, field: &str, doc: u32) -> Vec<String> {
        self.string_fields
            .get(field)
            .map(|p| values_of(p, doc))
            .unwrap_or_default()
    }
}

fn values_of<T: Clone>(postings: &Postings<T>, doc: u32) -> Vec<T> {
    postings
        .terms
        .iter()
        .zip(&postings.docs)
        .filter(|(_, docs)| docs.binary_search(&doc).is_ok())
        .map(|(term, _)| term.clone())
        .collect()
}

impl ShardReader for MemoryShard {
    fn num_docs(&self) -> usize {
        self.num_docs
    }

    fn int_fields(&self) -> Vec<String> {
        self.int_fields.keys().cloned().collect()
    }

    fn string_fields(&self) -> Vec<String> {
        self.string_fields.keys().cloned().collect()
    }

    fn int_terms(&self, field: &str) -> Box<dyn IntTermIterator + '_> {
        Box::new(PostingsIter::new(
            self.int_fields.get(field).unwrap_or(&NO_INT_TERMS),
        ))
    }

    fn string_terms(&self, field: &str) -> Box<dyn StringTermIterator + '_> {
        Box::new(PostingsIter::new(
            self.string_fields.get(field).unwrap_or(&NO_STRING_TERMS),
        ))
    }

    fn metric(&self, field: &str) -> Option<Box<dyn IntValueLookup>> {
        let postings = self.int_fields.get(field)?;
        let mut values = vec![0i64; self.num_docs];
        // Ascending terms: the last write per doc is its largest value.
        for (&term, docs) in postings.terms.iter().zip(&postings.docs) {
            for &doc in docs {
                values[doc as usize] = term;
            }
        }
        Some(Box::new(ArrayValueLookup::new(values)))
    }
}

struct PostingsIter<'a, T> {
    postings: &'a Postings<T>,
    /// Index of the term the next call to `next` moves onto.
    pos: usize,
}

impl<'a, T> PostingsIter<'a, T> {
    fn new(postings: &'a Postings<T>) -> Self {
        PostingsIter { postings, pos: 0 }
    }

    fn advance(&mut self) -> bool {
        if self.pos < self.postings.terms.len() {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn current(&self) -> usize {
        assert!(self.pos > 0, "term iterator is not positioned");
        self.pos - 1
    }
}

impl IntTermIterator for PostingsIter<'_, i64> {
    fn reset(&mut self, term: i64) {
        self.pos = self.postings.terms.partition_point(|&t| t < term);
    }

    fn next(&mut self) -> bool {
        self.advance()
    }

    fn term(&self) -> i64 {
        self.postings.terms[self.current()]
    }

    fn doc_freq(&self) -> u32 {
        self.postings.docs[self.current()].len() as u32
    }

    fn doc_ids(&self) -> Box<dyn DocIdStream + '_> {
        Box::new(SliceDocIdStream::new(&self.postings.docs[self.current()]))
    }
}

impl StringTermIterator for PostingsIter<'_, String> {
    fn reset(&mut self, term: &str) {
        self.pos = self.postings.terms.partition_point(|t| t.as_str() < term);
    }

    fn next(&mut self) -> bool {
        self.advance()
    }

    fn term(&self) -> &str {
        &self.postings.terms[self.current()]
    }

    fn doc_freq(&self) -> u32 {
        self.postings.docs[self.current()].len() as u32
    }

    fn doc_ids(&self) -> Box<dyn DocIdStream + '_> {
        Box::new(SliceDocIdStream::new(&self.postings.docs[self.current()]))
    }
}

/// Accumulates `(field, doc, value)` triples into a [`MemoryShard`].
#[derive(Debug, Clone)]
pub struct MemoryShardBuilder {
    num_docs: usize,
    int_fields: BTreeMap<String, BTreeMap<i64, Vec<u32>>>,
    string_fields: BTreeMap<String, BTreeMap<String, Vec<u32>>>,
}

impl MemoryShardBuilder {
    pub fn new(num_docs: usize) -> MemoryShardBuilder {
        assert!(num_docs <= u32::MAX as usize);
        MemoryShardBuilder {
            num_docs,
            int_fields: BTreeMap::new(),
            string_fields: BTreeMap::new(),
        }
    }

    /// Registers an int field even if no document ends up with a value.
    pub fn int_field(&mut self, field: &str) -> &mut Self {
        self.int_fields.entry(field.to_string()).or_default();
        self
    }

    pub fn string_field(&mut self, field: &str) -> &mut Self {
        self.string_fields.entry(field.to_string()).or_default();
        self
    }

    pub fn add_int(&mut self, field: &str, doc: u32, value: i64) -> &mut Self {
        assert!((doc as usize) < self.num_docs, "doc {doc} out of range");
        self.int_fields
            .entry(field.to_string())
            .or_default()
            .entry(value)
            .or_default()
            .push(doc);
        self
    }

    pub fn add_string(&mut self, field: &str, doc: u32, value: &str) -> &mut Self {
        assert!((doc as usize) < self.num_docs, "doc {doc} out of range");
        self.string_fields
            .entry(field.to_string())
            .or_default()
            .entry(value.to_string())
            .or_default()
            .push(doc);
        self
    }

    /// Adds one value per document, starting at doc 0.
    pub fn int_column(&mut self, field: &str, values: impl IntoIterator<Item = i64>) -> &mut Self {
        self.int_field(field);
        for (doc, value) in values.into_iter().enumerate() {
            self.add_int(field, doc as u32, value);
        }
        self
    }

    /// Adds one value per document, starting at doc 0.
    pub fn string_column<S: AsRef<str>>(
        &mut self,
        field: &str,
        values: impl IntoIterator<Item = S>,
    ) -> &mut Self {
        self.string_field(field);
        for (doc, value) in values.into_iter().enumerate() {
            self.add_string(field, doc as u32, value.as_ref());
        }
        self
    }

    pub fn build(&self) -> MemoryShard {
        MemoryShard {
            num_docs: self.num_docs,
            int_fields: self
                .int_fields
                .iter()
                .map(|(name, terms)| (name.clone(), Postings::from_map(terms.clone())))
                .collect(),
            string_fields: self
                .string_fields
                .iter()
                .map(|(name, terms)| (name.clone(), Postings::from_map(terms.clone())))
                .collect(),
        }
    }
}

/// Document-oriented serde form of a shard.
///
/// Every column lists one entry per document: `null` for no value, a scalar
/// for one value, or an array for several.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShardDocument {
    pub num_docs: usize,
    #[serde(default)]
    pub int_fields: BTreeMap<String, Vec<Option<Values<i64>>>>,
    #[serde(default)]
    pub string_fields: BTreeMap<String, Vec<Option<Values<String>>>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Values<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> Values<T> {
    fn as_slice(&self) -> &[T] {
        match self {
            Values::One(v) => std::slice::from_ref(v),
            Values::Many(v) => v,
        }
    }
}

impl TryFrom<&ShardDocument> for MemoryShard {
    type Error = Error;

    fn try_from(doc: &ShardDocument) -> Result<MemoryShard> {
        let mut builder = MemoryShardBuilder::new(doc.num_docs);
        for (field, column) in &doc.int_fields {
            check_column_len(field, column.len(), doc.num_docs)?;
            builder.int_field(field);
            for (id, values) in column.iter().enumerate() {
                for &value in values.iter().flat_map(Values::as_slice) {
                    builder.add_int(field, id as u32, value);
                }
            }
        }
        for (field, column) in &doc.string_fields {
            check_column_len(field, column.len(), doc.num_docs)?;
            builder.string_field(field);
            for (id, values) in column.iter().enumerate() {
                for value in values.iter().flat_map(Values::as_slice) {
                    builder.add_string(field, id as u32, value);
                }
            }
        }
        Ok(builder.build())
    }
}

fn check_column_len(field: &str, len: usize, num_docs: usize) -> Result<()> {
    if len == num_docs {
        Ok(())
    } else {
        Err(Error::invalid_arg(
            field,
            format!("column has {len} entries, shard has {num_docs} documents"),
        ))
    }
}
