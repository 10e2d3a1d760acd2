//! Test utilities for the shardgroup crates.
//!
//! - [`data_gen`]: seeded synthetic shards, group assignments and rule sets
//! - [`reference`]: straightforward per-document evaluation of regroups, the
//!   oracle the engine's optimized passes are checked against
//! - [`files`]: temporary JSON files for shard and script fixtures

pub mod data_gen;
pub mod files;
pub mod reference;
