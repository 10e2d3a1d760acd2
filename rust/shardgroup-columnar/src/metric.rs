use std::sync::Arc;

/// Random access to one integer value per document.
pub trait IntValueLookup: Send + Sync {
    /// Smallest value any document can return.
    fn min(&self) -> i64;

    /// Largest value any document can return.
    fn max(&self) -> i64;

    /// Writes the value of `doc_ids[i]` into `values[i]`.
    ///
    /// `values` must be at least as long as `doc_ids`.
    fn lookup(&self, doc_ids: &[u32], values: &mut [i64]);

    /// Bytes this lookup keeps alive.
    fn memory_used(&self) -> u64;
}

/// Values materialized into an array indexed by doc id.
#[derive(Clone)]
pub struct ArrayValueLookup {
    values: Arc<[i64]>,
    min: i64,
    max: i64,
}

impl ArrayValueLookup {
    pub fn new(values: impl Into<Arc<[i64]>>) -> ArrayValueLookup {
        let values = values.into();
        let min = values.iter().copied().min().unwrap_or(0);
        let max = values.iter().copied().max().unwrap_or(0);
        ArrayValueLookup { values, min, max }
    }

    pub fn values(&self) -> &[i64] {
        &self.values
    }
}

impl IntValueLookup for ArrayValueLookup {
    fn min(&self) -> i64 {
        self.min
    }

    fn max(&self) -> i64 {
        self.max
    }

    fn lookup(&self, doc_ids: &[u32], values: &mut [i64]) {
        for (value, &doc) in values.iter_mut().zip(doc_ids) {
            *value = self.values[doc as usize];
        }
    }

    fn memory_used(&self) -> u64 {
        (self.values.len() * std::mem::size_of::<i64>()) as u64
    }
}

/// The same value for every document.
#[derive(Clone, Copy, Debug)]
pub struct ConstantValueLookup(pub i64);

impl IntValueLookup for ConstantValueLookup {
    fn min(&self) -> i64 {
        self.0
    }

    fn max(&self) -> i64 {
        self.0
    }

    fn lookup(&self, doc_ids: &[u32], values: &mut [i64]) {
        values[..doc_ids.len()].fill(self.0);
    }

    fn memory_used(&self) -> u64 {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_array_lookup_bounds() {
        let lookup = ArrayValueLookup::new(vec![4, -2, 9, 0]);
        assert_eq!(lookup.min(), -2);
        assert_eq!(lookup.max(), 9);
        assert_eq!(lookup.memory_used(), 32);

        let mut values = [0i64; 3];
        lookup.lookup(&[2, 0, 1], &mut values);
        assert_eq!(values, [9, 4, -2]);
    }

    #[test]
    fn test_constant_lookup() {
        let lookup = ConstantValueLookup(7);
        let mut values = [0i64; 4];
        lookup.lookup(&[1, 3], &mut values);
        assert_eq!(values, [7, 7, 0, 0]);
        assert_eq!(lookup.min(), lookup.max());
    }
}
