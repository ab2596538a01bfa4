//! Convenient re-exports for downstream crates.

pub use crate::budget::ResourceMonitor;
pub use crate::config::{EngineConfig, PoolConfig};
pub use crate::error::{Error, Result};
pub use crate::types::{
    BlockPassthrough, ExecutionState, RegisterCount, RegisterId, SerializationFormat,
};
