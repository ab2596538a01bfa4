//! Block-level access to an operator's dependencies.
//!
//! The proxy reads its dependencies one after another as if they were a
//! single stream (`fetch_block`, `skip_some`), or addresses them one by one
//! (`fetch_block_for_dependency`, `skip_some_for_dependency`). The two styles
//! must not be mixed on one proxy.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use blockflow_block::{BlockPool, PooledBlock, SharedBlock};
use blockflow_core::types::{BlockPassthrough, ExecutionState, RegisterCount, RegisterId};

use crate::error::Result;
use crate::traits::ExecutionBlock;

pub struct DependencyProxy {
    dependencies: Vec<Box<dyn ExecutionBlock>>,
    dependency_done: Vec<bool>,
    current_dependency: usize,
    pool: Arc<BlockPool>,
    input_registers: Arc<HashSet<RegisterId>>,
    nr_input_registers: RegisterCount,
    passthrough: BlockPassthrough,
    block_queue: VecDeque<(ExecutionState, SharedBlock)>,
    passthrough_queue: VecDeque<(ExecutionState, SharedBlock)>,
    /// Rows skipped by a `skip_some` call that was interrupted by `Waiting`.
    skipped: usize,
}

impl DependencyProxy {
    pub fn new(
        dependencies: Vec<Box<dyn ExecutionBlock>>,
        pool: Arc<BlockPool>,
        input_registers: Arc<HashSet<RegisterId>>,
        nr_input_registers: RegisterCount,
        passthrough: BlockPassthrough,
    ) -> Self {
        let dependency_done = vec![false; dependencies.len()];
        Self {
            dependencies,
            dependency_done,
            current_dependency: 0,
            pool,
            input_registers,
            nr_input_registers,
            passthrough,
            block_queue: VecDeque::new(),
            passthrough_queue: VecDeque::new(),
            skipped: 0,
        }
    }

    pub fn number_dependencies(&self) -> usize {
        self.dependencies.len()
    }

    pub fn input_registers(&self) -> &Arc<HashSet<RegisterId>> {
        &self.input_registers
    }

    pub fn nr_input_registers(&self) -> RegisterCount {
        self.nr_input_registers
    }

    pub fn passthrough(&self) -> BlockPassthrough {
        self.passthrough
    }

    pub fn pool(&self) -> &Arc<BlockPool> {
        &self.pool
    }

    /// Empty block from the proxy's pool.
    pub fn request_block(&self, rows: usize, regs: RegisterCount) -> Result<PooledBlock> {
        Ok(self.pool.request_block(rows, regs)?)
    }

    fn exhausted(&self) -> bool {
        self.current_dependency >= self.dependencies.len()
    }

    /// Mark the current dependency done and move on. Returns `true` if
    /// another dependency is left.
    fn advance_dependency(&mut self) -> bool {
        if let Some(done) = self.dependency_done.get_mut(self.current_dependency) {
            *done = true;
        }
        self.current_dependency += 1;
        !self.exhausted()
    }

    fn check_block(&self, block: &SharedBlock) {
        debug_assert_eq!(
            block.nr_regs(),
            self.nr_input_registers,
            "dependency delivered a block with an unexpected number of registers"
        );
    }

    /// Pull one block from the current dependency into the queue(s).
    fn prefetch_block(&mut self, at_most: usize) -> Result<ExecutionState> {
        loop {
            if self.exhausted() {
                return Ok(ExecutionState::Done);
            }
            let current = self.current_dependency;
            let (mut state, block) = self.dependencies[current].get_some(at_most)?;

            #[cfg(feature = "tracing")]
            tracing::trace!(
                dependency = current,
                %state,
                rows = block.as_ref().map_or(0, |b| b.size()),
                "fetched block"
            );

            if state.is_waiting() {
                debug_assert!(block.is_none(), "a waiting dependency must not deliver rows");
                return Ok(state);
            }
            if state.is_done() && self.advance_dependency() {
                state = ExecutionState::HasMore;
            }
            match block {
                Some(block) => {
                    self.check_block(&block);
                    if self.passthrough == BlockPassthrough::Enable {
                        self.passthrough_queue.push_back((state, block.clone()));
                    }
                    self.block_queue.push_back((state, block));
                    return Ok(state);
                }
                // Finished dependency without a final block: try the next one.
                None if state == ExecutionState::HasMore && current != self.current_dependency => {
                    continue
                }
                None => return Ok(state),
            }
        }
    }

    /// Next block of the combined dependency stream.
    pub fn fetch_block(&mut self, at_most: usize) -> Result<(ExecutionState, Option<SharedBlock>)> {
        if self.block_queue.is_empty() {
            let state = self.prefetch_block(at_most)?;
            if self.block_queue.is_empty() {
                return Ok((state, None));
            }
        }
        Ok(match self.block_queue.pop_front() {
            Some((state, block)) => (state, Some(block)),
            None => (ExecutionState::Done, None),
        })
    }

    /// Next block for an operator that forwards its input unmodified. The
    /// same block is also replayed, in order, through `fetch_block`.
    pub fn fetch_block_for_passthrough(
        &mut self,
        at_most: usize,
    ) -> Result<(ExecutionState, Option<SharedBlock>)> {
        debug_assert_eq!(self.passthrough, BlockPassthrough::Enable);
        if self.passthrough_queue.is_empty() {
            let state = self.prefetch_block(at_most)?;
            if self.passthrough_queue.is_empty() {
                return Ok((state, None));
            }
        }
        Ok(match self.passthrough_queue.pop_front() {
            Some((state, block)) => (state, Some(block)),
            None => (ExecutionState::Done, None),
        })
    }

    /// Next block of dependency `index`. A dependency that reported `Done`
    /// is not asked again.
    pub fn fetch_block_for_dependency(
        &mut self,
        index: usize,
        at_most: usize,
    ) -> Result<(ExecutionState, Option<SharedBlock>)> {
        debug_assert_eq!(self.passthrough, BlockPassthrough::Disable);
        debug_assert!(self.block_queue.is_empty());
        if self.dependency_done[index] {
            return Ok((ExecutionState::Done, None));
        }
        let (state, block) = self.dependencies[index].get_some(at_most)?;

        #[cfg(feature = "tracing")]
        tracing::trace!(dependency = index, %state, "fetched block for dependency");

        if state.is_done() {
            self.dependency_done[index] = true;
        }
        if let Some(block) = &block {
            self.check_block(block);
        }
        Ok((state, block))
    }

    /// Skip up to `at_most` rows of the combined dependency stream.
    ///
    /// On `Waiting` the rows skipped so far are kept and reported by the next
    /// call that finishes.
    pub fn skip_some(&mut self, at_most: usize) -> Result<(ExecutionState, usize)> {
        debug_assert!(self.block_queue.is_empty(), "cannot skip with buffered blocks");
        let mut state = if self.exhausted() {
            ExecutionState::Done
        } else {
            ExecutionState::HasMore
        };
        while self.skipped < at_most && !self.exhausted() {
            let (upstream, skipped) =
                self.dependencies[self.current_dependency].skip_some(at_most - self.skipped)?;
            if upstream.is_waiting() {
                debug_assert_eq!(skipped, 0);
                return Ok((ExecutionState::Waiting, 0));
            }
            self.skipped += skipped;
            state = upstream;
            if state.is_done() {
                if self.advance_dependency() {
                    state = ExecutionState::HasMore;
                }
            } else if skipped == 0 {
                break;
            }
        }
        let skipped = std::mem::take(&mut self.skipped);

        #[cfg(feature = "tracing")]
        tracing::trace!(skipped, %state, "skipped rows");

        Ok((state, skipped))
    }

    /// Skip up to `at_most` rows of dependency `index`.
    pub fn skip_some_for_dependency(
        &mut self,
        index: usize,
        at_most: usize,
    ) -> Result<(ExecutionState, usize)> {
        if self.dependency_done[index] {
            return Ok((ExecutionState::Done, 0));
        }
        let (state, skipped) = self.dependencies[index].skip_some(at_most)?;
        if state.is_done() {
            self.dependency_done[index] = true;
        }
        Ok((state, skipped))
    }

    /// Rewind to the first dependency and drop buffered blocks.
    pub fn reset(&mut self) {
        self.current_dependency = 0;
        self.dependency_done.iter_mut().for_each(|done| *done = false);
        self.block_queue.clear();
        self.passthrough_queue.clear();
        self.skipped = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{pool, proxy_over, Script};

    #[test]
    fn waiting_then_blocks_then_done() {
        let pool = pool();
        let a = crate::testing::block(&pool, &[1, 2]);
        let (script, calls) = Script::new(vec![
            Script::waiting(),
            Script::has_more(a.clone()),
            Script::done(None),
        ]);
        let mut proxy = proxy_over(&pool, vec![script], BlockPassthrough::Disable);

        assert_eq!(proxy.fetch_block(10).unwrap().0, ExecutionState::Waiting);
        let (state, block) = proxy.fetch_block(10).unwrap();
        assert_eq!(state, ExecutionState::HasMore);
        assert!(block.unwrap().ptr_eq(&a));
        let (state, block) = proxy.fetch_block(10).unwrap();
        assert_eq!(state, ExecutionState::Done);
        assert!(block.is_none());
        assert_eq!(proxy.fetch_block(10).unwrap().0, ExecutionState::Done);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn dependencies_are_chained() {
        let pool = pool();
        let a = crate::testing::block(&pool, &[1]);
        let b = crate::testing::block(&pool, &[2]);
        let (first, _) = Script::new(vec![Script::done(Some(a))]);
        let (second, _) = Script::new(vec![Script::done(Some(b.clone()))]);
        let mut proxy = proxy_over(&pool, vec![first, second], BlockPassthrough::Disable);

        assert_eq!(proxy.fetch_block(10).unwrap().0, ExecutionState::HasMore);
        let (state, block) = proxy.fetch_block(10).unwrap();
        assert_eq!(state, ExecutionState::Done);
        assert!(block.unwrap().ptr_eq(&b));
    }

    #[test]
    fn skip_accumulates_across_waiting() {
        let pool = pool();
        let (script, _) = Script::with_skips(vec![
            (ExecutionState::HasMore, 2),
            (ExecutionState::Waiting, 0),
            (ExecutionState::Done, 1),
        ]);
        let mut proxy = proxy_over(&pool, vec![script], BlockPassthrough::Disable);
        assert_eq!(proxy.skip_some(5).unwrap(), (ExecutionState::Waiting, 0));
        assert_eq!(proxy.skip_some(5).unwrap(), (ExecutionState::Done, 3));
        assert_eq!(proxy.skip_some(5).unwrap(), (ExecutionState::Done, 0));
    }
}
