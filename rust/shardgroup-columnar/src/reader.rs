use crate::metric::IntValueLookup;

/// Streams the posting list of the current term in ascending doc id order.
pub trait DocIdStream {
    /// Fills `buf` with the next doc ids and returns how many were written.
    ///
    /// A return value smaller than `buf.len()` means the stream is exhausted.
    fn fill(&mut self, buf: &mut [u32]) -> usize;
}

/// Ascending iterator over the terms of an integer field.
///
/// After construction and after [`reset`](Self::reset) the iterator is
/// positioned before the first term; [`next`](Self::next) must return `true`
/// before [`term`](Self::term), [`doc_freq`](Self::doc_freq) or
/// [`doc_ids`](Self::doc_ids) may be called.
pub trait IntTermIterator {
    /// Repositions so that the next call to `next` lands on the first term `>= term`.
    fn reset(&mut self, term: i64);

    fn next(&mut self) -> bool;

    fn term(&self) -> i64;

    fn doc_freq(&self) -> u32;

    fn doc_ids(&self) -> Box<dyn DocIdStream + '_>;
}

/// Lexicographically ordered iterator over the terms of a string field.
///
/// Same positioning contract as [`IntTermIterator`].
pub trait StringTermIterator {
    fn reset(&mut self, term: &str);

    fn next(&mut self) -> bool;

    fn term(&self) -> &str;

    fn doc_freq(&self) -> u32;

    fn doc_ids(&self) -> Box<dyn DocIdStream + '_>;
}

/// A columnar shard.
///
/// A field that does not exist behaves like a field without terms.
pub trait ShardReader: Send + Sync {
    fn num_docs(&self) -> usize;

    fn int_fields(&self) -> Vec<String>;

    fn string_fields(&self) -> Vec<String>;

    /// Terms of an int field in ascending order.
    fn int_terms(&self, field: &str) -> Box<dyn IntTermIterator + '_>;

    /// Terms of an int field in storage order.
    ///
    /// Readers whose storage is not sorted can avoid the sort when the
    /// caller only needs to visit every term once.
    fn unsorted_int_terms(&self, field: &str) -> Box<dyn IntTermIterator + '_> {
        self.int_terms(field)
    }

    fn string_terms(&self, field: &str) -> Box<dyn StringTermIterator + '_>;

    /// Per-document values of an int field, or `None` if the field is unknown.
    fn metric(&self, field: &str) -> Option<Box<dyn IntValueLookup>>;

    /// Sum of the document frequencies of every term of an int field.
    fn int_total_doc_freq(&self, field: &str) -> u64 {
        let mut terms = self.unsorted_int_terms(field);
        let mut total = 0;
        while terms.next() {
            total += terms.doc_freq() as u64;
        }
        total
    }

    fn string_total_doc_freq(&self, field: &str) -> u64 {
        let mut terms = self.string_terms(field);
        let mut total = 0;
        while terms.next() {
            total += terms.doc_freq() as u64;
        }
        total
    }
}

/// Drains `stream` through `buf`, handing each filled prefix to `f`.
pub fn for_each_doc_chunk(
    stream: &mut dyn DocIdStream,
    buf: &mut [u32],
    mut f: impl FnMut(&[u32]),
) {
    if buf.is_empty() {
        return;
    }
    loop {
        let n = stream.fill(buf);
        if n > 0 {
            f(&buf[..n]);
        }
        if n < buf.len() {
            break;
        }
    }
}

/// Fallible variant of [`for_each_doc_chunk`]; stops at the first error.
pub fn try_for_each_doc_chunk<E>(
    stream: &mut dyn DocIdStream,
    buf: &mut [u32],
    mut f: impl FnMut(&[u32]) -> Result<(), E>,
) -> Result<(), E> {
    if buf.is_empty() {
        return Ok(());
    }
    loop {
        let n = stream.fill(buf);
        if n > 0 {
            f(&buf[..n])?;
        }
        if n < buf.len() {
            return Ok(());
        }
    }
}

/// A [`DocIdStream`] over an in-memory posting list.
pub struct SliceDocIdStream<'a> {
    docs: &'a [u32],
}

impl<'a> SliceDocIdStream<'a> {
    pub fn new(docs: &'a [u32]) -> Self {
        SliceDocIdStream { docs }
    }
}

impl DocIdStream for SliceDocIdStream<'_> {
    fn fill(&mut self, buf: &mut [u32]) -> usize {
        let n = buf.len().min(self.docs.len());
        buf[..n].copy_from_slice(&self.docs[..n]);
        self.docs = &self.docs[n..];
        n
    }
}
