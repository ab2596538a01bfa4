#![forbid(unsafe_code)]
//! blockflow-block: the rows x registers batch that flows between operators.
//!
//! - `value`: the cell type
//! - `item_block`: the matrix with per-identity refcounting and memory accounting
//! - `shadow`: ordered shadow-row markers
//! - `codec`: run-length coded JSON wire format
//! - `pool`: bucketed recycler for blocks
//! - `shared`: pool-returning owned and shared handles
//! - `slice`: row copies and steals into fresh pooled blocks

pub mod codec;
pub mod error;
pub mod item_block;
pub mod pool;
pub mod shadow;
pub mod shared;
pub mod slice;
pub mod value;

pub use error::{Error, Result};
pub use item_block::{ConstantRegisters, ItemBlock};
pub use pool::{BlockPool, PoolStats};
pub use shadow::ShadowRows;
pub use shared::{PooledBlock, SharedBlock};
pub use value::{RangeValue, Value, ValueKey};
