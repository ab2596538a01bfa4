//! Handles that return blocks to their pool.

use std::fmt;
use std::mem;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crate::item_block::ItemBlock;
use crate::pool::BlockPool;

/// Exclusively owned block. Dropping it hands the block back to its pool.
pub struct PooledBlock {
    block: ItemBlock,
    pool: Arc<BlockPool>,
}

impl PooledBlock {
    pub(crate) fn new(block: ItemBlock, pool: Arc<BlockPool>) -> Self {
        Self { block, pool }
    }

    pub fn pool(&self) -> &Arc<BlockPool> {
        &self.pool
    }

    pub fn into_shared(self) -> SharedBlock {
        SharedBlock(Arc::new(self))
    }
}

impl Deref for PooledBlock {
    type Target = ItemBlock;

    fn deref(&self) -> &ItemBlock {
        &self.block
    }
}

impl DerefMut for PooledBlock {
    fn deref_mut(&mut self) -> &mut ItemBlock {
        &mut self.block
    }
}

impl Drop for PooledBlock {
    fn drop(&mut self) {
        let dormant = ItemBlock::dormant(Arc::clone(self.pool.monitor()), self.pool.format());
        let block = mem::replace(&mut self.block, dormant);
        self.pool.return_block(block);
    }
}

impl fmt::Debug for PooledBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.block.fmt(f)
    }
}

/// Reference-counted block. The last clone to drop returns it to the pool.
///
/// Shared blocks are read-only; `get_mut` succeeds only for the sole holder.
#[derive(Clone)]
pub struct SharedBlock(Arc<PooledBlock>);

impl SharedBlock {
    pub fn get_mut(&mut self) -> Option<&mut PooledBlock> {
        Arc::get_mut(&mut self.0)
    }

    pub fn ptr_eq(&self, other: &SharedBlock) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Number of live handles to this block.
    pub fn use_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }
}

impl From<PooledBlock> for SharedBlock {
    fn from(block: PooledBlock) -> Self {
        block.into_shared()
    }
}

impl Deref for SharedBlock {
    type Target = PooledBlock;

    fn deref(&self) -> &PooledBlock {
        &self.0
    }
}

impl fmt::Debug for SharedBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SharedBlock").field(&*self.0).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use blockflow_core::config::PoolConfig;
    use blockflow_mem::ResourceMonitorImpl;

    #[test]
    fn last_handle_returns_block() {
        let monitor = ResourceMonitorImpl::unlimited();
        let pool = BlockPool::new(monitor.shared(), PoolConfig::default());
        let mut block = pool.request_block(2, 2).unwrap();
        block.set_value(0, 0, Value::from("held")).unwrap();

        let shared = block.into_shared();
        let second = shared.clone();
        assert_eq!(shared.use_count(), 2);
        assert!(shared.ptr_eq(&second));
        drop(shared);
        assert_eq!(pool.free_blocks(2), 0);
        assert_eq!(second.get_value(0, 0), Value::from("held"));
        drop(second);
        assert_eq!(pool.free_blocks(2), 1);
        assert_eq!(monitor.used_bytes(), 0);
    }

    #[test]
    fn get_mut_requires_sole_ownership() {
        let pool = BlockPool::new(ResourceMonitorImpl::unlimited().shared(), PoolConfig::default());
        let mut shared: SharedBlock = pool.request_block(1, 1).unwrap().into();
        let other = shared.clone();
        assert!(shared.get_mut().is_none());
        drop(other);
        let block = shared.get_mut().unwrap();
        block.set_value(0, 0, Value::Int(5)).unwrap();
        assert_eq!(shared.get_value(0, 0), Value::Int(5));
    }
}
