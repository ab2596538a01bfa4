#![forbid(unsafe_code)]
//! blockflow: the batch substrate of a pull-based query engine.
//!
//! Re-exports the workspace crates under one name.

pub use blockflow_block as block;
pub use blockflow_core::{budget, config, error, prelude, types};
pub use blockflow_fetch as fetch;
pub use blockflow_mem as mem;
