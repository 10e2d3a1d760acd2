//! Read-side view of a columnar shard as seen by the regroup engine:
//! sorted term iteration with posting lists, per-document metric values,
//! and boolean query evaluation into document bit sets.

pub mod memory_shard;
pub mod metric;
pub mod query;
pub mod reader;

pub use memory_shard::{MemoryShard, MemoryShardBuilder, ShardDocument};
pub use metric::{ArrayValueLookup, ConstantValueLookup, IntValueLookup};
pub use query::{Query, QuerySearcher, Term};
pub use reader::{DocIdStream, IntTermIterator, ShardReader, StringTermIterator};

#[cfg(test)]
mod tests;
