//! The stat stack: metric lookups pushed by the client and referenced by
//! index from metric regroups and aggregation.

use shardgroup_columnar::{ConstantValueLookup, IntValueLookup, ShardReader};
use shardgroup_common::{Error, Result};
use shardgroup_memory::{MemoryReservationContext, Reservation};

use crate::{GroupLookup, buffers_pool::ScratchBuffers};

/// Name that pushes a stat of 1 per document.
pub const COUNT_STAT: &str = "count()";

struct Stat {
    name: String,
    lookup: Box<dyn IntValueLookup>,
    _reservation: Reservation,
}

/// Bounded stack of metric lookups. The bytes each lookup keeps alive are
/// reserved while it is on the stack.
pub struct StatStack {
    stats: Vec<Stat>,
    max_stats: usize,
}

impl StatStack {
    pub fn new(max_stats: usize) -> StatStack {
        StatStack {
            stats: Vec::new(),
            max_stats,
        }
    }

    pub fn len(&self) -> usize {
        self.stats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }

    /// Pushes `lookup` and returns the new depth.
    pub fn push(
        &mut self,
        name: impl Into<String>,
        lookup: Box<dyn IntValueLookup>,
        memory: &MemoryReservationContext,
    ) -> Result<usize> {
        if self.stats.len() >= self.max_stats {
            return Err(Error::invalid_arg(
                "stat",
                format!("cannot push more than {} stats", self.max_stats),
            ));
        }
        let reservation = memory.reserve(lookup.memory_used())?;
        self.stats.push(Stat {
            name: name.into(),
            lookup,
            _reservation: reservation,
        });
        Ok(self.stats.len())
    }

    /// Pops the top stat, releasing its memory, and returns the new depth.
    pub fn pop(&mut self) -> Result<usize> {
        if self.stats.pop().is_none() {
            return Err(Error::illegal_state("stat stack is empty"));
        }
        Ok(self.stats.len())
    }

    pub fn clear(&mut self) {
        self.stats.clear();
    }

    pub fn get(&self, index: usize) -> Result<&dyn IntValueLookup> {
        self.stats
            .get(index)
            .map(|s| s.lookup.as_ref())
            .ok_or_else(|| {
                Error::invalid_arg(
                    "stat",
                    format!("index {index} out of range, {} stats pushed", self.stats.len()),
                )
            })
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        self.stats.get(index).map(|s| s.name.as_str())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.stats.iter().map(|s| s.name.as_str())
    }
}

impl std::fmt::Debug for StatStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatStack")
            .field("names", &self.names().collect::<Vec<_>>())
            .field("max_stats", &self.max_stats)
            .finish()
    }
}

/// Resolves a stat name: [`COUNT_STAT`], an integer constant, or an int
/// field of the shard.
pub fn resolve_stat(reader: &dyn ShardReader, name: &str) -> Result<Box<dyn IntValueLookup>> {
    if name == COUNT_STAT {
        return Ok(Box::new(ConstantValueLookup(1)));
    }
    if let Ok(value) = name.parse::<i64>() {
        return Ok(Box::new(ConstantValueLookup(value)));
    }
    reader
        .metric(name)
        .ok_or_else(|| Error::invalid_arg("stat", format!("unknown int field '{name}'")))
}

/// Sums `metric` per group. The result has `num_groups` entries and group 0
/// always sums to 0.
pub fn group_sums(
    lookup: &GroupLookup,
    metric: &dyn IntValueLookup,
    buffers: &mut ScratchBuffers,
) -> Vec<i64> {
    let mut sums = vec![0i64; lookup.num_groups() as usize];
    let num_docs = lookup.len();
    let chunk = buffers.doc_ids.len().max(1);
    let mut start = 0;
    while start < num_docs {
        let n = chunk.min(num_docs - start);
        let doc_ids = &mut buffers.doc_ids[..n];
        for (i, doc) in doc_ids.iter_mut().enumerate() {
            *doc = (start + i) as u32;
        }
        let groups = &mut buffers.groups[..n];
        let values = &mut buffers.values[..n];
        lookup.fill_sequential(start, groups);
        metric.lookup(doc_ids, values);
        for (&group, &value) in groups.iter().zip(values.iter()) {
            if group != 0 {
                if let Some(sum) = sums.get_mut(group as usize) {
                    *sum = sum.wrapping_add(value);
                }
            }
        }
        start += n;
    }
    sums
}

#[cfg(test)]
mod tests {
    use shardgroup_columnar::{ArrayValueLookup, MemoryShard};

    use super::*;

    #[test]
    fn test_push_pop_reserves_memory() {
        let memory = MemoryReservationContext::new(100);
        let mut stack = StatStack::new(2);
        stack
            .push("a", Box::new(ArrayValueLookup::new(vec![1, 2, 3])), &memory)
            .unwrap();
        assert_eq!(memory.used(), 24);
        stack.push("one", Box::new(ConstantValueLookup(1)), &memory).unwrap();
        let err = stack
            .push("two", Box::new(ConstantValueLookup(2)), &memory)
            .unwrap_err();
        assert!(err.is_invalid_argument());
        assert_eq!(stack.name(1), Some("one"));
        assert_eq!(stack.pop().unwrap(), 1);
        assert_eq!(stack.pop().unwrap(), 0);
        assert_eq!(memory.used(), 0);
        assert!(stack.pop().unwrap_err().is_illegal_state());
    }

    #[test]
    fn test_push_fails_without_memory() {
        let memory = MemoryReservationContext::new(16);
        let mut stack = StatStack::new(4);
        let err = stack
            .push("big", Box::new(ArrayValueLookup::new(vec![0; 4])), &memory)
            .unwrap_err();
        assert!(err.is_out_of_memory());
        assert!(stack.is_empty());
    }

    #[test]
    fn test_resolve_stat() {
        let shard = MemoryShard::builder(3).int_column("x", [4, 5, 6]).build();
        let count = resolve_stat(&shard, COUNT_STAT).unwrap();
        assert_eq!((count.min(), count.max()), (1, 1));
        let constant = resolve_stat(&shard, "-7").unwrap();
        assert_eq!(constant.max(), -7);
        let field = resolve_stat(&shard, "x").unwrap();
        assert_eq!((field.min(), field.max()), (4, 6));
        assert!(matches!(resolve_stat(&shard, "nope"), Err(e) if e.is_invalid_argument()));
    }

    #[test]
    fn test_group_sums() {
        let memory = MemoryReservationContext::unbounded();
        let mut lookup = GroupLookup::create(3, 5, &memory).unwrap();
        for (doc, group) in [0, 1, 3, 1, 0].into_iter().enumerate() {
            lookup.set(doc as u32, group);
        }
        lookup.recalculate_num_groups();
        let metric = ArrayValueLookup::new(vec![10, 20, 30, 40, 50]);
        let mut buffers = ScratchBuffers::new(2);
        assert_eq!(group_sums(&lookup, &metric, &mut buffers), vec![0, 60, 0, 30]);
    }
}
