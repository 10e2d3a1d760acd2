//! Run command implementation

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use shardgroup_engine::RegroupEngine;
use shardgroup_memory::MemoryPool;

use crate::commands::{
    load_config, load_shard,
    script::{Outcome, ScriptCommand},
};

#[derive(Debug, Serialize)]
pub struct StepReport {
    pub step: usize,
    pub op: &'static str,
    #[serde(flatten)]
    pub outcome: Outcome,
}

#[derive(Debug, Serialize)]
pub struct SessionSummary {
    pub num_docs: usize,
    pub num_groups: u32,
    pub filtered_docs: u64,
    pub group_doc_counts: Vec<u64>,
    pub max_memory_used: u64,
}

pub fn run(shard_path: String, script_path: String, config: Option<String>, memory: u64) -> Result<()> {
    let shard = load_shard(&shard_path)?;
    let config = load_config(config.as_deref())?;
    let text = std::fs::read_to_string(&script_path)
        .with_context(|| format!("Failed to read script: {script_path}"))?;
    let script: Vec<ScriptCommand> = serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse script: {script_path}"))?;

    let pool = MemoryPool::new(memory);
    let mut engine = RegroupEngine::new(Arc::new(shard), pool.context(memory), config)
        .with_context(|| "Failed to create regroup session")?;

    for report in execute(&mut engine, &script)? {
        println!("{}", serde_json::to_string(&report)?);
    }
    let summary = summarize(&mut engine);
    println!("{}", serde_json::to_string_pretty(&summary)?);

    engine.close();
    log::debug!("pool usage after close: {} bytes", pool.used());
    Ok(())
}

/// Applies `script` in order, stopping at the first failing command.
pub fn execute(engine: &mut RegroupEngine, script: &[ScriptCommand]) -> Result<Vec<StepReport>> {
    script
        .iter()
        .enumerate()
        .map(|(step, command)| {
            let outcome = command
                .apply(engine)
                .with_context(|| format!("Step {step} ({}) failed", command.name()))?;
            Ok(StepReport {
                step,
                op: command.name(),
                outcome,
            })
        })
        .collect()
}

pub fn summarize(engine: &mut RegroupEngine) -> SessionSummary {
    SessionSummary {
        num_docs: engine.num_docs(),
        num_groups: engine.num_groups(),
        filtered_docs: engine.zero_group_doc_count(),
        group_doc_counts: engine.group_lookup().group_doc_counts(),
        max_memory_used: engine.memory().max_used(),
    }
}
