//! Document to group mapping with an adaptive storage width.
//!
//! A freshly created or reset session maps every document to the same group
//! and costs no per-document memory. The first regroup that needs to write
//! individual documents replaces it with the narrowest array (`u8`, `u16` or
//! `u32` per document) able to hold the largest group the regroup may
//! produce. Later regroups only widen the array when their groups no longer
//! fit.

use shardgroup_bits::DocBitSet;
use shardgroup_common::Result;
use shardgroup_memory::MemoryReservationContext;

pub use array::{ArrayGroups, GroupWord};

mod array;

/// Read access shared by every lookup representation.
pub trait DocGroups {
    /// Number of documents.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, doc: u32) -> u32;

    /// One more than the largest group id, as of the last recalculation.
    fn num_groups(&self) -> u32;

    /// Bytes of per-document storage.
    fn memory_used(&self) -> u64;
}

/// Every document in the same group.
#[derive(Debug, Clone, Copy)]
pub struct ConstantGroups {
    group: u32,
    len: usize,
}

impl ConstantGroups {
    pub fn group(&self) -> u32 {
        self.group
    }
}

impl DocGroups for ConstantGroups {
    fn len(&self) -> usize {
        self.len
    }

    fn get(&self, doc: u32) -> u32 {
        debug_assert!((doc as usize) < self.len);
        self.group
    }

    fn num_groups(&self) -> u32 {
        self.group + 1
    }

    fn memory_used(&self) -> u64 {
        0
    }
}

impl<T: GroupWord> DocGroups for ArrayGroups<T> {
    fn len(&self) -> usize {
        ArrayGroups::len(self)
    }

    fn get(&self, doc: u32) -> u32 {
        ArrayGroups::get(self, doc)
    }

    fn num_groups(&self) -> u32 {
        ArrayGroups::num_groups(self)
    }

    fn memory_used(&self) -> u64 {
        ArrayGroups::memory_used(self)
    }
}

pub enum GroupLookup {
    Constant(ConstantGroups),
    Byte(ArrayGroups<u8>),
    Char(ArrayGroups<u16>),
    Int(ArrayGroups<u32>),
}

macro_rules! with_groups {
    ($lookup:expr, $groups:ident => $body:expr) => {
        match $lookup {
            GroupLookup::Constant($groups) => $body,
            GroupLookup::Byte($groups) => $body,
            GroupLookup::Char($groups) => $body,
            GroupLookup::Int($groups) => $body,
        }
    };
}

macro_rules! with_array {
    ($lookup:expr, $groups:ident => $body:expr, $constant:ident => $fallback:expr) => {
        match $lookup {
            GroupLookup::Constant($constant) => $fallback,
            GroupLookup::Byte($groups) => $body,
            GroupLookup::Char($groups) => $body,
            GroupLookup::Int($groups) => $body,
        }
    };
}

impl GroupLookup {
    /// Maps all `num_docs` documents to `group` without per-document storage.
    pub fn constant(group: u32, num_docs: usize) -> GroupLookup {
        GroupLookup::Constant(ConstantGroups {
            group,
            len: num_docs,
        })
    }

    /// Allocates a zeroed array lookup of the narrowest width that holds `max_group`.
    pub fn create(
        max_group: u32,
        num_docs: usize,
        memory: &MemoryReservationContext,
    ) -> Result<GroupLookup> {
        let lookup = if max_group <= u8::MAX_GROUP {
            let reservation = memory.reserve(ArrayGroups::<u8>::bytes_for(num_docs))?;
            GroupLookup::Byte(ArrayGroups::zeroed(num_docs, max_group, reservation))
        } else if max_group <= u16::MAX_GROUP {
            let reservation = memory.reserve(ArrayGroups::<u16>::bytes_for(num_docs))?;
            GroupLookup::Char(ArrayGroups::zeroed(num_docs, max_group, reservation))
        } else {
            let reservation = memory.reserve(ArrayGroups::<u32>::bytes_for(num_docs))?;
            GroupLookup::Int(ArrayGroups::zeroed(num_docs, max_group, reservation))
        };
        Ok(lookup)
    }

    /// Makes sure the lookup is array backed and can store `max_group`.
    ///
    /// If the current array already fits, only the capacity hint moves.
    /// Otherwise a wider array is reserved and filled before the current one
    /// is dropped; when the reservation fails `self` is left as it was.
    pub fn grow_to(&mut self, max_group: u32, memory: &MemoryReservationContext) -> Result<()> {
        let fits = match self {
            GroupLookup::Constant(_) => false,
            GroupLookup::Byte(g) => max_group <= u8::MAX_GROUP && {
                g.raise_capacity_hint(max_group);
                true
            },
            GroupLookup::Char(g) => max_group <= u16::MAX_GROUP && {
                g.raise_capacity_hint(max_group);
                true
            },
            GroupLookup::Int(g) => {
                g.raise_capacity_hint(max_group);
                true
            }
        };
        if fits {
            return Ok(());
        }

        let max_group = max_group.max(self.max_capacity());
        let mut wider = GroupLookup::create(max_group, self.len(), memory)?;
        match &*self {
            GroupLookup::Constant(c) => {
                if c.group != 0 {
                    wider.fill(c.group);
                }
            }
            other => {
                for (doc, group) in other.iter().enumerate() {
                    wider.set(doc as u32, group);
                }
            }
        }
        wider.set_num_groups(self.num_groups());
        *self = wider;
        Ok(())
    }

    /// Largest group the lookup is prepared to store without growing.
    pub fn max_capacity(&self) -> u32 {
        match self {
            GroupLookup::Constant(c) => c.group,
            GroupLookup::Byte(g) => g.capacity_hint(),
            GroupLookup::Char(g) => g.capacity_hint(),
            GroupLookup::Int(g) => g.capacity_hint(),
        }
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, GroupLookup::Constant(_))
    }

    pub fn len(&self) -> usize {
        with_groups!(self, g => DocGroups::len(g))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn get(&self, doc: u32) -> u32 {
        with_groups!(self, g => DocGroups::get(g, doc))
    }

    pub fn num_groups(&self) -> u32 {
        with_groups!(self, g => DocGroups::num_groups(g))
    }

    pub fn memory_used(&self) -> u64 {
        with_groups!(self, g => DocGroups::memory_used(g))
    }

    /// Writes one document.
    ///
    /// # Panics
    ///
    /// Panics on a constant lookup unless `group` equals the constant.
    #[inline]
    pub fn set(&mut self, doc: u32, group: u32) {
        with_array!(self, g => g.set(doc, group), c => assert_constant(c, group))
    }

    pub fn batch_set(&mut self, doc_ids: &[u32], groups: &[u32]) {
        with_array!(
            self,
            g => g.batch_set(doc_ids, groups),
            c => groups.iter().for_each(|&group| assert_constant(c, group))
        )
    }

    /// Reads the groups of `doc_ids` into `groups`.
    pub fn fill_doc_groups(&self, doc_ids: &[u32], groups: &mut [u32]) {
        with_array!(
            self,
            g => g.fill_doc_groups(doc_ids, groups),
            c => groups[..doc_ids.len()].fill(c.group)
        )
    }

    /// Reads the groups of documents `start..start + groups.len()`.
    pub fn fill_sequential(&self, start: usize, groups: &mut [u32]) {
        with_array!(
            self,
            g => g.fill_sequential(start, groups),
            c => groups.fill(c.group)
        )
    }

    /// Writes the groups of documents `start..start + groups.len()`.
    pub fn write_sequential(&mut self, start: usize, groups: &[u32]) {
        with_array!(
            self,
            g => g.write_sequential(start, groups),
            c => groups.iter().for_each(|&group| assert_constant(c, group))
        )
    }

    /// Recomputes `num_groups` from the stored values.
    pub fn recalculate_num_groups(&mut self) -> u32 {
        with_array!(self, g => g.recalculate_num_groups(), c => c.group + 1)
    }

    /// Sends every document of `target` to `positive` if its bit is set and
    /// to `negative` otherwise. Other documents keep their group.
    pub fn bit_set_regroup(&mut self, bits: &DocBitSet, target: u32, negative: u32, positive: u32) {
        for doc in 0..self.len() as u32 {
            if self.get(doc) == target {
                let group = if bits.contains(doc as usize) {
                    positive
                } else {
                    negative
                };
                self.set(doc, group);
            }
        }
    }

    pub fn iter(&self) -> Box<dyn Iterator<Item = u32> + '_> {
        with_array!(
            self,
            g => Box::new(g.iter()),
            c => Box::new(std::iter::repeat_n(c.group, c.len))
        )
    }

    /// Copies every document's group into `out`, which must hold exactly `len()` entries.
    pub fn export_into(&self, out: &mut [u32]) {
        assert_eq!(out.len(), self.len());
        self.fill_sequential(0, out);
    }

    /// Number of documents currently in `group`.
    pub fn count_group(&self, group: u32) -> u64 {
        self.iter().filter(|&g| g == group).count() as u64
    }

    /// Document count per group id, `num_groups()` entries long.
    pub fn group_doc_counts(&self) -> Vec<u64> {
        let mut counts = vec![0u64; self.num_groups() as usize];
        for group in self.iter() {
            if let Some(count) = counts.get_mut(group as usize) {
                *count += 1;
            }
        }
        counts
    }

    fn fill(&mut self, group: u32) {
        with_array!(
            self,
            g => (0..g.len() as u32).for_each(|doc| g.set(doc, group)),
            c => assert_constant(c, group)
        )
    }

    fn set_num_groups(&mut self, num_groups: u32) {
        with_array!(
            self,
            g => g.set_num_groups(num_groups),
            c => debug_assert_eq!(c.group + 1, num_groups)
        )
    }
}

fn assert_constant(c: &ConstantGroups, group: u32) {
    assert_eq!(
        c.group, group,
        "constant group lookup is read-only; grow it before writing"
    );
}

impl std::fmt::Debug for GroupLookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let repr = match self {
            GroupLookup::Constant(_) => "constant",
            GroupLookup::Byte(_) => "u8",
            GroupLookup::Char(_) => "u16",
            GroupLookup::Int(_) => "u32",
        };
        f.debug_struct("GroupLookup")
            .field("repr", &repr)
            .field("len", &self.len())
            .field("num_groups", &self.num_groups())
            .finish()
    }
}
