#![allow(dead_code)]

use shardgroup_columnar::MemoryShard;
use shardgroup_common::Result;
use shardgroup_engine::{GroupLookup, buffers_pool::BuffersPool, regroup::Scan};
use shardgroup_memory::MemoryReservationContext;

/// A shard with its own memory context and scratch buffers, for driving
/// regroup passes directly.
pub struct Session {
    pub shard: MemoryShard,
    pub memory: MemoryReservationContext,
    pub pool: BuffersPool,
}

impl Session {
    pub fn new(shard: MemoryShard) -> Session {
        Session::with_memory(shard, MemoryReservationContext::unbounded())
    }

    pub fn with_memory(shard: MemoryShard, memory: MemoryReservationContext) -> Session {
        let pool = BuffersPool::new(64, 1, &memory).unwrap();
        Session {
            shard,
            memory,
            pool,
        }
    }

    /// Builds an array lookup holding `groups`.
    pub fn lookup(&self, groups: &[u32]) -> GroupLookup {
        let max_group = groups.iter().copied().max().unwrap_or(0);
        let mut lookup = GroupLookup::create(max_group, groups.len(), &self.memory).unwrap();
        for (doc, &group) in groups.iter().enumerate() {
            lookup.set(doc as u32, group);
        }
        lookup.recalculate_num_groups();
        lookup
    }

    pub fn run(
        &self,
        lookup: &mut GroupLookup,
        pass: impl FnOnce(&mut GroupLookup, Scan<'_>) -> Result<u32>,
    ) -> Result<u32> {
        let mut buffers = self.pool.get_buffers()?;
        let scan = Scan {
            reader: &self.shard,
            memory: &self.memory,
            buffers: &mut *buffers,
        };
        pass(lookup, scan)
    }
}

pub fn groups_of(lookup: &GroupLookup) -> Vec<u32> {
    lookup.iter().collect()
}
