//! A fixed-size set of document ids backed by `u64` words.

use std::ops::{BitAnd, BitAndAssign, BitOr, BitOrAssign, Not};

/// A fixed-size bit set over document ids `0..len`.
///
/// Bit `i` lives in word `i / 64` at position `i % 64` (LSB first). Bits past
/// `len` in the final word are always zero, so word-level operations such as
/// [`count_ones`](Self::count_ones) and [`negate`](Self::negate) never observe
/// phantom documents.
#[derive(Clone, PartialEq, Eq)]
pub struct DocBitSet {
    len: usize,
    words: Vec<u64>,
}

impl DocBitSet {
    /// Number of bytes needed to hold a set of `len` documents.
    ///
    /// Callers use this to reserve memory before constructing the set.
    pub fn bytes_for(len: usize) -> u64 {
        (len.div_ceil(64) * 8) as u64
    }

    /// Creates a set of `len` documents with no members.
    pub fn empty(len: usize) -> DocBitSet {
        DocBitSet {
            len,
            words: vec![0; len.div_ceil(64)],
        }
    }

    /// Creates a set that contains every document in `0..len`.
    pub fn full(len: usize) -> DocBitSet {
        let mut words = vec![u64::MAX; len.div_ceil(64)];
        Self::mask_tail(&mut words, len);
        DocBitSet { len, words }
    }

    /// Creates a set from document ids.
    ///
    /// # Panics
    ///
    /// Panics if any id is `>= len`.
    pub fn from_positions(positions: impl IntoIterator<Item = usize>, len: usize) -> DocBitSet {
        let mut set = DocBitSet::empty(len);
        for pos in positions {
            set.set(pos);
        }
        set
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn set(&mut self, index: usize) {
        assert!(index < self.len, "{index} < {}", self.len);
        self.words[index / 64] |= 1u64 << (index % 64);
    }

    /// Sets the bit and returns its previous value.
    #[inline]
    pub fn set_replace(&mut self, index: usize) -> bool {
        assert!(index < self.len, "{index} < {}", self.len);
        let word = &mut self.words[index / 64];
        let mask = 1u64 << (index % 64);
        let prev = *word & mask != 0;
        *word |= mask;
        prev
    }

    #[inline]
    pub fn reset(&mut self, index: usize) {
        assert!(index < self.len, "{index} < {}", self.len);
        self.words[index / 64] &= !(1u64 << (index % 64));
    }

    #[inline]
    pub fn contains(&self, index: usize) -> bool {
        index < self.len && self.words[index / 64] & (1u64 << (index % 64)) != 0
    }

    /// Removes every member.
    pub fn clear(&mut self) {
        self.words.fill(0);
    }

    /// Flips membership of every document in `0..len`.
    pub fn negate(&mut self) {
        for word in self.words.iter_mut() {
            *word = !*word;
        }
        Self::mask_tail(&mut self.words, self.len);
    }

    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn count_zeros(&self) -> usize {
        self.len - self.count_ones()
    }

    /// Iterates member document ids in ascending order.
    pub fn iter(&self) -> DocBitSetIter<'_> {
        DocBitSetIter {
            words: self.words.iter(),
            current: 0,
            base: 0,
            next_base: 0,
        }
    }

    pub fn storage(&self) -> &[u64] {
        &self.words
    }

    pub fn heap_size_bytes(&self) -> usize {
        self.words.capacity() * std::mem::size_of::<u64>()
    }

    fn mask_tail(words: &mut [u64], len: usize) {
        let partial = len % 64;
        if partial == 0 {
            return;
        }
        if let Some(last) = words.last_mut() {
            *last &= (1u64 << partial) - 1;
        }
    }
}

impl std::fmt::Debug for DocBitSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocBitSet")
            .field("len", &self.len)
            .field("count", &self.count_ones())
            .finish()
    }
}

pub struct DocBitSetIter<'a> {
    words: std::slice::Iter<'a, u64>,
    current: u64,
    base: usize,
    next_base: usize,
}

impl Iterator for DocBitSetIter<'_> {
    type Item = usize;

    #[inline]
    fn next(&mut self) -> Option<usize> {
        loop {
            if self.current != 0 {
                let offset = self.current.trailing_zeros() as usize;
                self.current &= self.current - 1;
                return Some(self.base + offset);
            }
            let &word = self.words.next()?;
            self.current = word;
            self.base = self.next_base;
            self.next_base += 64;
        }
    }
}

impl<'a> IntoIterator for &'a DocBitSet {
    type Item = usize;
    type IntoIter = DocBitSetIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl BitAnd<&DocBitSet> for &DocBitSet {
    type Output = DocBitSet;

    fn bitand(self, rhs: &DocBitSet) -> DocBitSet {
        let mut result = self.clone();
        result &= rhs;
        result
    }
}

impl BitOr<&DocBitSet> for &DocBitSet {
    type Output = DocBitSet;

    fn bitor(self, rhs: &DocBitSet) -> DocBitSet {
        let mut result = self.clone();
        result |= rhs;
        result
    }
}

impl Not for &DocBitSet {
    type Output = DocBitSet;

    fn not(self) -> DocBitSet {
        let mut result = self.clone();
        result.negate();
        result
    }
}

impl BitAndAssign<&DocBitSet> for DocBitSet {
    fn bitand_assign(&mut self, rhs: &DocBitSet) {
        assert_eq!(self.len, rhs.len);
        for (l, r) in self.words.iter_mut().zip(rhs.words.iter()) {
            *l &= *r;
        }
    }
}

impl BitOrAssign<&DocBitSet> for DocBitSet {
    fn bitor_assign(&mut self, rhs: &DocBitSet) {
        assert_eq!(self.len, rhs.len);
        for (l, r) in self.words.iter_mut().zip(rhs.words.iter()) {
            *l |= *r;
        }
    }
}
