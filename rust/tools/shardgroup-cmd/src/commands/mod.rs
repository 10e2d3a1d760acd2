//! Command implementations for shardgroup-cmd

use anyhow::{Context, Result};
use shardgroup_columnar::{MemoryShard, ShardDocument};
use shardgroup_engine::EngineConfig;

pub mod inspect;
pub mod run;
pub mod script;

/// Reads a shard from its JSON document form.
pub fn load_shard(path: &str) -> Result<MemoryShard> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read shard: {path}"))?;
    let doc: ShardDocument =
        serde_json::from_str(&text).with_context(|| format!("Failed to parse shard: {path}"))?;
    MemoryShard::try_from(&doc).with_context(|| format!("Invalid shard: {path}"))
}

/// Reads an engine configuration, falling back to the defaults.
pub fn load_config(path: Option<&str>) -> Result<EngineConfig> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };
    let text =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read config: {path}"))?;
    EngineConfig::from_json(&text).with_context(|| format!("Invalid config: {path}"))
}
