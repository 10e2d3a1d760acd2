use shardgroup_memory::Reservation;

/// Storage word of an [`ArrayGroups`] lookup.
pub trait GroupWord: Copy + Default + Send + Sync + 'static {
    /// Largest group id the word can hold.
    const MAX_GROUP: u32;

    fn from_group(group: u32) -> Self;

    fn to_group(self) -> u32;
}

impl GroupWord for u8 {
    const MAX_GROUP: u32 = u8::MAX as u32;

    #[inline]
    fn from_group(group: u32) -> Self {
        debug_assert!(group <= Self::MAX_GROUP);
        group as u8
    }

    #[inline]
    fn to_group(self) -> u32 {
        self as u32
    }
}

impl GroupWord for u16 {
    const MAX_GROUP: u32 = u16::MAX as u32;

    #[inline]
    fn from_group(group: u32) -> Self {
        debug_assert!(group <= Self::MAX_GROUP);
        group as u16
    }

    #[inline]
    fn to_group(self) -> u32 {
        self as u32
    }
}

impl GroupWord for u32 {
    const MAX_GROUP: u32 = u32::MAX;

    #[inline]
    fn from_group(group: u32) -> Self {
        group
    }

    #[inline]
    fn to_group(self) -> u32 {
        self
    }
}

/// One group id per document, stored as `T`.
pub struct ArrayGroups<T> {
    groups: Vec<T>,
    num_groups: u32,
    /// Largest group the owner announced it may write; at most `T::MAX_GROUP`.
    capacity_hint: u32,
    _reservation: Reservation,
}

impl<T: GroupWord> ArrayGroups<T> {
    pub fn bytes_for(num_docs: usize) -> u64 {
        (num_docs * std::mem::size_of::<T>()) as u64
    }

    /// Creates a zeroed lookup whose storage is paid for by `reservation`.
    pub(crate) fn zeroed(num_docs: usize, capacity_hint: u32, reservation: Reservation) -> Self {
        debug_assert_eq!(reservation.amount(), Self::bytes_for(num_docs));
        ArrayGroups {
            groups: vec![T::default(); num_docs],
            num_groups: 1,
            capacity_hint,
            _reservation: reservation,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    #[inline]
    pub fn get(&self, doc: u32) -> u32 {
        self.groups[doc as usize].to_group()
    }

    #[inline]
    pub fn set(&mut self, doc: u32, group: u32) {
        self.groups[doc as usize] = T::from_group(group);
    }

    pub fn num_groups(&self) -> u32 {
        self.num_groups
    }

    pub fn capacity_hint(&self) -> u32 {
        self.capacity_hint
    }

    pub(crate) fn raise_capacity_hint(&mut self, max_group: u32) {
        debug_assert!(max_group <= T::MAX_GROUP);
        self.capacity_hint = self.capacity_hint.max(max_group);
    }

    pub(crate) fn set_num_groups(&mut self, num_groups: u32) {
        self.num_groups = num_groups;
    }

    pub fn recalculate_num_groups(&mut self) -> u32 {
        let max = self.groups.iter().map(|g| g.to_group()).max().unwrap_or(0);
        self.num_groups = max + 1;
        self.num_groups
    }

    pub fn fill_doc_groups(&self, doc_ids: &[u32], groups: &mut [u32]) {
        for (group, &doc) in groups.iter_mut().zip(doc_ids) {
            *group = self.groups[doc as usize].to_group();
        }
    }

    pub fn batch_set(&mut self, doc_ids: &[u32], groups: &[u32]) {
        for (&doc, &group) in doc_ids.iter().zip(groups) {
            self.groups[doc as usize] = T::from_group(group);
        }
    }

    pub fn fill_sequential(&self, start: usize, groups: &mut [u32]) {
        let src = &self.groups[start..start + groups.len()];
        for (dst, &g) in groups.iter_mut().zip(src) {
            *dst = g.to_group();
        }
    }

    pub fn write_sequential(&mut self, start: usize, groups: &[u32]) {
        let dst = &mut self.groups[start..start + groups.len()];
        for (d, &g) in dst.iter_mut().zip(groups) {
            *d = T::from_group(g);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.groups.iter().map(|g| g.to_group())
    }

    pub fn memory_used(&self) -> u64 {
        Self::bytes_for(self.groups.len())
    }
}
