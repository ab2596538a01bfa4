#![forbid(unsafe_code)]
//! blockflow-fetch: how an operator pulls input from its dependencies.
//!
//! Every call answers with an `ExecutionState`: `Waiting` means unwind and
//! call again later, `HasMore` means more may follow, and `Done` is terminal
//! (a `Done` answer may still carry the final payload).

pub mod error;
pub mod multi;
pub mod proxy;
pub mod rows;
pub mod single;
pub mod traits;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{FetchError, Result};
pub use multi::MultiDependencySingleRowFetcher;
pub use proxy::DependencyProxy;
pub use rows::{InputRow, ShadowRow};
pub use single::SingleRowFetcher;
pub use traits::ExecutionBlock;
