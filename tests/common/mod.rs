//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use blockflow_block::{BlockPool, SharedBlock, Value};
use blockflow_core::config::PoolConfig;
use blockflow_core::types::{BlockPassthrough, ExecutionState};
use blockflow_fetch::{DependencyProxy, ExecutionBlock, Result};
use blockflow_mem::ResourceMonitorImpl;

pub type Answer = (ExecutionState, Option<SharedBlock>);

/// Upstream producer replaying a fixed list of answers. Once the list is
/// used up it keeps answering `Done` without a block.
pub struct ScriptedUpstream {
    answers: VecDeque<Answer>,
    skips: VecDeque<(ExecutionState, usize)>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedUpstream {
    pub fn new(answers: Vec<Answer>) -> (Self, Arc<AtomicUsize>) {
        Self::with_skips(answers, Vec::new())
    }

    pub fn with_skips(
        answers: Vec<Answer>,
        skips: Vec<(ExecutionState, usize)>,
    ) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let upstream = Self {
            answers: answers.into(),
            skips: skips.into(),
            calls: Arc::clone(&calls),
        };
        (upstream, calls)
    }
}

impl ExecutionBlock for ScriptedUpstream {
    fn get_some(&mut self, _at_most: usize) -> Result<Answer> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .answers
            .pop_front()
            .unwrap_or((ExecutionState::Done, None)))
    }

    fn skip_some(&mut self, _at_most: usize) -> Result<(ExecutionState, usize)> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.skips.pop_front().unwrap_or((ExecutionState::Done, 0)))
    }
}

pub fn calls(counter: &Arc<AtomicUsize>) -> usize {
    counter.load(Ordering::SeqCst)
}

pub fn test_pool() -> (ResourceMonitorImpl, Arc<BlockPool>) {
    let monitor = ResourceMonitorImpl::unlimited();
    let pool = BlockPool::new(monitor.shared(), PoolConfig::default());
    (monitor, pool)
}

/// Block with one register per column of `rows`.
pub fn build_block(pool: &Arc<BlockPool>, rows: &[Vec<i64>]) -> SharedBlock {
    let regs = rows.first().map_or(0, Vec::len);
    let mut block = pool
        .request_block(rows.len(), regs)
        .expect("request block");
    for (r, row) in rows.iter().enumerate() {
        for (c, v) in row.iter().enumerate() {
            block.set_value(r, c, Value::Int(*v)).expect("set value");
        }
    }
    block.into_shared()
}

/// One-register block; `Some(depth)` marks a shadow row, data rows hold
/// `100 + row index`.
pub fn build_shadow_block(pool: &Arc<BlockPool>, depths: &[Option<u64>]) -> SharedBlock {
    let mut block = pool
        .request_block(depths.len(), 1)
        .expect("request block");
    for (row, depth) in depths.iter().enumerate() {
        match depth {
            Some(d) => block.make_shadow_row(row, *d),
            None => block
                .set_value(row, 0, Value::Int(100 + row as i64))
                .expect("set value"),
        }
    }
    block.into_shared()
}

pub fn proxy(
    pool: &Arc<BlockPool>,
    upstreams: Vec<ScriptedUpstream>,
    passthrough: BlockPassthrough,
) -> DependencyProxy {
    let deps: Vec<Box<dyn ExecutionBlock>> = upstreams
        .into_iter()
        .map(|u| Box::new(u) as Box<dyn ExecutionBlock>)
        .collect();
    let registers: HashSet<usize> = [0].into_iter().collect();
    DependencyProxy::new(deps, Arc::clone(pool), Arc::new(registers), 1, passthrough)
}
