//! Contract of an upstream producer.

use blockflow_block::SharedBlock;
use blockflow_core::types::ExecutionState;

use crate::error::Result;

/// A data source an operator pulls from (scan, join, another operator).
///
/// `get_some` returns at most `at_most` rows as one block; `skip_some`
/// advances past at most `at_most` rows without materializing them. A
/// `Waiting` answer carries no payload and must not change the producer's
/// position.
pub trait ExecutionBlock: Send {
    fn get_some(&mut self, at_most: usize) -> Result<(ExecutionState, Option<SharedBlock>)>;

    fn skip_some(&mut self, at_most: usize) -> Result<(ExecutionState, usize)>;
}
