//! # Shardgroup: memory-bounded regrouping of shard documents
//!
//! Shardgroup keeps a document to group assignment for one immutable shard
//! and rewrites it through rule-driven, query-driven, metric-driven and
//! hash-driven regroups, the building blocks of a distributed group-by.
//! Group 0 holds filtered out documents; every other id is a live group.
//!
//! Every byte a regroup allocates is claimed from a per-session memory
//! context first. A regroup that cannot get its memory fails with an
//! out-of-memory error and leaves the previous assignment in place.
//!
//! ## Module Organization
//!
//! * [`engine`] - The regroup session, group lookups and regroup passes
//! * [`columnar`] - The read-only shard interface: term dictionaries,
//!   posting streams, metrics and boolean queries
//! * [`common`] - Error and result types shared by every crate
//!
//! ### Support Modules
//!
//! * [`support::bits`] - Document bit sets
//! * [`support::memory`] - Memory pools, session contexts and reservations
//!
//! ## Getting Started
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use shardgroup::columnar::MemoryShard;
//! use shardgroup::engine::{EngineConfig, RegroupEngine};
//! use shardgroup::support::memory::MemoryPool;
//!
//! let shard = MemoryShard::builder(4).int_column("x", [1, 2, 3, 4]).build();
//! let pool = MemoryPool::new(64 << 20);
//! let mut engine =
//!     RegroupEngine::new(Arc::new(shard), pool.context(1 << 20), EngineConfig::default())?;
//! engine.int_or_regroup("x", &[2, 3], 1, 1, 2)?;
//! assert_eq!(engine.num_groups(), 3);
//! # Ok::<(), shardgroup::common::Error>(())
//! ```

pub use shardgroup_columnar as columnar;
pub use shardgroup_common as common;
pub use shardgroup_engine as engine;

pub mod support {
    pub use shardgroup_bits as bits;
    pub use shardgroup_memory as memory;
}
