use serde::{Deserialize, Serialize};
use shardgroup_common::{Error, Result};

/// Documents processed per scratch buffer.
pub const DEFAULT_BUFFER_SIZE: usize = 2048;

/// Maximum depth of the stat stack.
pub const DEFAULT_MAX_STATS: usize = 64;

/// Tunables of a [`RegroupEngine`](crate::RegroupEngine).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub buffer_size: usize,
    pub max_stats: usize,
    /// Log the elapsed time of every regroup at debug level.
    pub log_timing: bool,
    /// Scratch buffer sets kept around between calls.
    pub pooled_buffers: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_stats: DEFAULT_MAX_STATS,
            log_timing: false,
            pooled_buffers: 8,
        }
    }
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<EngineConfig> {
        let config: EngineConfig = serde_json::from_str(json)
            .map_err(|e| Error::invalid_arg("config", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    pub fn with_max_stats(mut self, max_stats: usize) -> Self {
        self.max_stats = max_stats;
        self
    }

    pub fn with_log_timing(mut self, log_timing: bool) -> Self {
        self.log_timing = log_timing;
        self
    }

    pub fn with_pooled_buffers(mut self, pooled_buffers: usize) -> Self {
        self.pooled_buffers = pooled_buffers;
        self
    }

    pub fn validate(&self) -> Result<()> {
        shardgroup_common::verify_arg!(buffer_size, self.buffer_size > 0);
        Ok(())
    }
}
