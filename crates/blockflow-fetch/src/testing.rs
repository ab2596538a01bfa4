//! Scripted upstream producers for unit tests.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use blockflow_block::{BlockPool, SharedBlock, Value};
use blockflow_core::config::PoolConfig;
use blockflow_core::types::{BlockPassthrough, ExecutionState};
use blockflow_mem::ResourceMonitorImpl;

use crate::error::Result;
use crate::proxy::DependencyProxy;
use crate::traits::ExecutionBlock;

type Answer = (ExecutionState, Option<SharedBlock>);

#[derive(Clone, Default)]
pub struct Calls(Arc<AtomicUsize>);

impl Calls {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Replays canned answers; answers `Done` once the script runs out.
pub struct Script {
    fetches: VecDeque<Answer>,
    skips: VecDeque<(ExecutionState, usize)>,
    calls: Calls,
}

impl Script {
    pub fn new(fetches: Vec<Answer>) -> (Box<dyn ExecutionBlock>, Calls) {
        let calls = Calls::default();
        let script = Script {
            fetches: fetches.into(),
            skips: VecDeque::new(),
            calls: calls.clone(),
        };
        (Box::new(script), calls)
    }

    pub fn with_skips(skips: Vec<(ExecutionState, usize)>) -> (Box<dyn ExecutionBlock>, Calls) {
        let calls = Calls::default();
        let script = Script {
            fetches: VecDeque::new(),
            skips: skips.into(),
            calls: calls.clone(),
        };
        (Box::new(script), calls)
    }

    pub fn waiting() -> Answer {
        (ExecutionState::Waiting, None)
    }

    pub fn has_more(block: SharedBlock) -> Answer {
        (ExecutionState::HasMore, Some(block))
    }

    pub fn done(block: Option<SharedBlock>) -> Answer {
        (ExecutionState::Done, block)
    }
}

impl ExecutionBlock for Script {
    fn get_some(&mut self, _at_most: usize) -> Result<Answer> {
        self.calls.0.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .fetches
            .pop_front()
            .unwrap_or((ExecutionState::Done, None)))
    }

    fn skip_some(&mut self, _at_most: usize) -> Result<(ExecutionState, usize)> {
        self.calls.0.fetch_add(1, Ordering::SeqCst);
        Ok(self.skips.pop_front().unwrap_or((ExecutionState::Done, 0)))
    }
}

pub fn pool() -> Arc<BlockPool> {
    BlockPool::new(ResourceMonitorImpl::unlimited().shared(), PoolConfig::default())
}

/// One-register block holding `values`.
pub fn block(pool: &Arc<BlockPool>, values: &[i64]) -> SharedBlock {
    let mut b = pool.request_block(values.len(), 1).unwrap();
    for (row, v) in values.iter().enumerate() {
        b.set_value(row, 0, Value::Int(*v)).unwrap();
    }
    b.into_shared()
}

/// One-register block; `Some(depth)` rows are shadow rows, data rows hold
/// their row index.
pub fn shadow_block(pool: &Arc<BlockPool>, rows: &[Option<u64>]) -> SharedBlock {
    let mut b = pool.request_block(rows.len(), 1).unwrap();
    for (row, depth) in rows.iter().enumerate() {
        match depth {
            Some(depth) => b.make_shadow_row(row, *depth),
            None => b.set_value(row, 0, Value::Int(row as i64)).unwrap(),
        }
    }
    b.into_shared()
}

pub fn proxy_over(
    pool: &Arc<BlockPool>,
    dependencies: Vec<Box<dyn ExecutionBlock>>,
    passthrough: BlockPassthrough,
) -> DependencyProxy {
    let registers: HashSet<usize> = [0].into_iter().collect();
    DependencyProxy::new(dependencies, Arc::clone(pool), Arc::new(registers), 1, passthrough)
}
