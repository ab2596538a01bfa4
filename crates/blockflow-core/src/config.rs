//! Engine configuration that downstream crates can serialize/deserialize.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::SerializationFormat;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Per-query memory limit (in bytes) enforced by the resource monitor.
    /// `0` disables the limit.
    pub mem_limit_bytes: usize,

    /// Number of capacity classes in the block pool. Class `i` holds blocks
    /// of up to `2^i` cells; larger requests share the last class.
    pub pool_buckets: usize,

    /// How many free blocks each pool bucket keeps before deleting returns.
    pub pool_blocks_per_bucket: usize,

    /// Default number of rows operators ask their dependencies for.
    pub batch_size: usize,

    /// Wire format used when blocks are serialized.
    pub serialization_format: SerializationFormat,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mem_limit_bytes: 0,
            pool_buckets: 12,
            pool_blocks_per_bucket: 7,
            batch_size: 1000,
            serialization_format: SerializationFormat::ShadowRows,
        }
    }
}

/// Snapshot of the settings `BlockPool::new` needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    pub num_buckets: usize,
    pub blocks_per_bucket: usize,
    pub format: SerializationFormat,
}

impl Default for PoolConfig {
    fn default() -> Self {
        EngineConfig::default().pool_config()
    }
}

impl EngineConfig {
    /// Create a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `BLOCKFLOW_MEM_LIMIT_BYTES`: memory limit in bytes (0 = unlimited)
    /// - `BLOCKFLOW_POOL_BUCKETS`: number of pool capacity classes
    /// - `BLOCKFLOW_POOL_BLOCKS_PER_BUCKET`: free blocks kept per class
    /// - `BLOCKFLOW_BATCH_SIZE`: default rows per fetch
    /// - `BLOCKFLOW_SERIALIZATION_FORMAT`: `classic` or `shadowrows`
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(s) = std::env::var("BLOCKFLOW_MEM_LIMIT_BYTES") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.mem_limit_bytes = v;
            }
        }

        if let Ok(s) = std::env::var("BLOCKFLOW_POOL_BUCKETS") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.pool_buckets = v;
            }
        }

        if let Ok(s) = std::env::var("BLOCKFLOW_POOL_BLOCKS_PER_BUCKET") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.pool_blocks_per_bucket = v;
            }
        }

        if let Ok(s) = std::env::var("BLOCKFLOW_BATCH_SIZE") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.batch_size = v;
            }
        }

        if let Ok(s) = std::env::var("BLOCKFLOW_SERIALIZATION_FORMAT") {
            if let Ok(v) = s.parse::<SerializationFormat>() {
                cfg.serialization_format = v;
            }
        }

        cfg
    }

    /// Reject settings the pool and fetchers cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.pool_buckets == 0 {
            return Err(Error::Config("pool_buckets must be at least 1".into()));
        }
        if self.pool_buckets > usize::BITS as usize {
            return Err(Error::Config(format!(
                "pool_buckets must not exceed {}",
                usize::BITS
            )));
        }
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be at least 1".into()));
        }
        Ok(())
    }

    /// Produce the pool configuration snapshot used by the block layer.
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            num_buckets: self.pool_buckets,
            blocks_per_bucket: self.pool_blocks_per_bucket,
            format: self.serialization_format,
        }
    }
}
