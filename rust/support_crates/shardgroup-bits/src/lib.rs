//! Fixed-size document bit sets.

pub mod doc_bit_set;
pub mod reserved;

pub use doc_bit_set::{DocBitSet, DocBitSetIter};
pub use reserved::ReservedDocBitSet;
