//! Store configuration

use serde::{Deserialize, Serialize};

use crate::error::{EcsError, Result};

/// Default rows per query chunk
pub const DEFAULT_CHUNK_SIZE: usize = 512;

/// Default matched-row count below which parallel jobs run sequentially
pub const DEFAULT_MIN_PARALLEL_CHUNK_LENGTH: usize = 1024;

/// Tunables for an `EntityStore`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Rows per chunk yielded by queries
    pub chunk_size: usize,
    /// Capacity floor when archetypes shrink. Power of two.
    pub min_archetype_capacity: usize,
    /// `run_parallel` falls back to sequential below this many matched rows
    pub min_parallel_chunk_length: usize,
    /// Highest entity id the store will hand out. The node table is dense,
    /// so this also bounds the memory an explicit-id create can allocate.
    pub max_entities: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            min_archetype_capacity: 1,
            min_parallel_chunk_length: DEFAULT_MIN_PARALLEL_CHUNK_LENGTH,
            max_entities: u32::MAX - 1,
        }
    }
}

impl StoreConfig {
    /// Parse from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: StoreConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(EcsError::InvalidConfig("chunk_size must be > 0".into()));
        }
        if !self.min_archetype_capacity.is_power_of_two() {
            return Err(EcsError::InvalidConfig(format!(
                "min_archetype_capacity must be a power of two, got {}",
                self.min_archetype_capacity
            )));
        }
        if self.max_entities == 0 || self.max_entities == u32::MAX {
            return Err(EcsError::InvalidConfig(format!(
                "max_entities must be in 1..{}",
                u32::MAX
            )));
        }
        Ok(())
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_min_parallel_chunk_length(mut self, length: usize) -> Self {
        self.min_parallel_chunk_length = length;
        self
    }

    pub fn with_max_entities(mut self, max_entities: u32) -> Self {
        self.max_entities = max_entities;
        self
    }
}
