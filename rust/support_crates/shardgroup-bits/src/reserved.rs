//! Bit sets whose storage is charged to a memory context.

use std::ops::{Deref, DerefMut};

use shardgroup_memory::{MemoryReservationContext, OutOfMemory, Reservation};

use crate::DocBitSet;

/// A [`DocBitSet`] together with the reservation that pays for its words.
///
/// The bytes are claimed before the words are allocated and released when
/// the set is dropped.
pub struct ReservedDocBitSet {
    bits: DocBitSet,
    _reservation: Reservation,
}

impl ReservedDocBitSet {
    /// Reserves room for `len` documents and creates an empty set.
    pub fn empty(
        len: usize,
        memory: &MemoryReservationContext,
    ) -> Result<ReservedDocBitSet, OutOfMemory> {
        let reservation = memory.reserve(DocBitSet::bytes_for(len))?;
        Ok(ReservedDocBitSet {
            bits: DocBitSet::empty(len),
            _reservation: reservation,
        })
    }

    /// Reserves room for `len` documents and creates a set containing all of them.
    pub fn full(
        len: usize,
        memory: &MemoryReservationContext,
    ) -> Result<ReservedDocBitSet, OutOfMemory> {
        let reservation = memory.reserve(DocBitSet::bytes_for(len))?;
        Ok(ReservedDocBitSet {
            bits: DocBitSet::full(len),
            _reservation: reservation,
        })
    }

    pub fn bits(&self) -> &DocBitSet {
        &self.bits
    }
}

impl Deref for ReservedDocBitSet {
    type Target = DocBitSet;

    fn deref(&self) -> &DocBitSet {
        &self.bits
    }
}

impl DerefMut for ReservedDocBitSet {
    fn deref_mut(&mut self) -> &mut DocBitSet {
        &mut self.bits
    }
}

impl std::fmt::Debug for ReservedDocBitSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.bits.fmt(f)
    }
}
