//! Memory-bounded regrouping of shard documents.
//!
//! A [`RegroupEngine`] keeps a document to group assignment for one shard
//! in a [`GroupLookup`] and rewrites it through term-driven, query-driven,
//! metric-driven and hash-driven regroups. Every allocation a regroup makes
//! is reserved from the engine's
//! [`MemoryReservationContext`](shardgroup_memory::MemoryReservationContext)
//! first, and a failed regroup leaves the previous assignment committed.

pub mod bucket;
pub mod buffers_pool;
pub mod config;
pub mod dynamic;
pub mod engine;
pub mod group_lookup;
pub mod hashing;
pub mod regroup;
pub mod rules;
pub mod stats;
pub mod validate;

pub use config::EngineConfig;
pub use dynamic::DynamicMetric;
pub use engine::RegroupEngine;
pub use group_lookup::{DocGroups, GroupLookup};
pub use rules::{GroupMultiRemapRule, GroupRemapRule, QueryRemapRule, RegroupCondition};
