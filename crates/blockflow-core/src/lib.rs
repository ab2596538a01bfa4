#![forbid(unsafe_code)]
//! blockflow-core: shared vocabulary for the batch-execution substrate.
//!
//! Nothing in here allocates on behalf of a query. The resource monitor is
//! only described as a trait (`budget`); the concrete implementation lives in
//! `blockflow-mem`, the blocks themselves in `blockflow-block`.

pub mod budget;
pub mod config;
pub mod error;
pub mod prelude;
pub mod types;

pub use error::{Error, Result};
