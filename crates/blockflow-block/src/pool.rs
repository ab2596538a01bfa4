//! Bucketed recycler for item blocks.
//!
//! Bucket `i` keeps free blocks of up to `2^i` cells; requests larger than
//! the last class share the last bucket. Each bucket has its own mutex, which
//! only guards the free list.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use serde_json::Value as JsonValue;

use blockflow_core::budget::ResourceMonitor;
use blockflow_core::config::PoolConfig;
use blockflow_core::types::{RegisterCount, SerializationFormat};

use crate::codec::read_dimensions;
use crate::error::Result;
use crate::item_block::ItemBlock;
use crate::shared::PooledBlock;

/// Buckets probed per request, starting at the ideal one.
const PROBED_BUCKETS: usize = 3;

struct Bucket {
    blocks: Mutex<Vec<ItemBlock>>,
    capacity: usize,
}

impl Bucket {
    fn lock(&self) -> MutexGuard<'_, Vec<ItemBlock>> {
        // A panic while holding the lock cannot leave the free list invalid.
        self.blocks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Counters since the pool was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Blocks allocated because no free block was found.
    pub allocated: u64,
    /// Requests served from a free list.
    pub recycled: u64,
    /// Returned blocks dropped because their bucket was full.
    pub deleted: u64,
}

#[derive(Default)]
struct Counters {
    allocated: AtomicU64,
    recycled: AtomicU64,
    deleted: AtomicU64,
}

pub struct BlockPool {
    buckets: Vec<Bucket>,
    monitor: Arc<dyn ResourceMonitor>,
    format: SerializationFormat,
    counters: Counters,
}

impl BlockPool {
    pub fn new(monitor: Arc<dyn ResourceMonitor>, config: PoolConfig) -> Arc<Self> {
        let buckets = (0..config.num_buckets.max(1))
            .map(|_| Bucket {
                blocks: Mutex::new(Vec::with_capacity(config.blocks_per_bucket)),
                capacity: config.blocks_per_bucket,
            })
            .collect();
        Arc::new(Self {
            buckets,
            monitor,
            format: config.format,
            counters: Counters::default(),
        })
    }

    pub fn monitor(&self) -> &Arc<dyn ResourceMonitor> {
        &self.monitor
    }

    pub fn format(&self) -> SerializationFormat {
        self.format
    }

    pub fn num_buckets(&self) -> usize {
        self.buckets.len()
    }

    /// Capacity class for a block of `cells` cells.
    pub fn bucket_for(&self, cells: usize) -> usize {
        let class = if cells <= 1 {
            0
        } else {
            (usize::BITS - (cells - 1).leading_zeros()) as usize
        };
        class.min(self.buckets.len() - 1)
    }

    /// Free blocks currently held by `bucket`.
    pub fn free_blocks(&self, bucket: usize) -> usize {
        self.buckets.get(bucket).map_or(0, |b| b.lock().len())
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            allocated: self.counters.allocated.load(Ordering::Relaxed),
            recycled: self.counters.recycled.load(Ordering::Relaxed),
            deleted: self.counters.deleted.load(Ordering::Relaxed),
        }
    }

    /// Hand out an empty `rows x regs` block, recycled when possible.
    pub fn request_block(self: &Arc<Self>, rows: usize, regs: RegisterCount) -> Result<PooledBlock> {
        let ideal = self.bucket_for(rows.saturating_mul(regs));
        let mut recycled = None;
        for bucket in self.buckets.iter().skip(ideal).take(PROBED_BUCKETS) {
            if let Some(block) = bucket.lock().pop() {
                recycled = Some(block);
                break;
            }
        }

        let block = match recycled {
            Some(mut block) => {
                block.rescale(rows, regs)?;
                self.counters.recycled.fetch_add(1, Ordering::Relaxed);
                block
            }
            None => {
                let block = ItemBlock::new(Arc::clone(&self.monitor), rows, regs, self.format)?;
                self.counters.allocated.fetch_add(1, Ordering::Relaxed);
                block
            }
        };

        #[cfg(feature = "tracing")]
        tracing::trace!(rows, regs, bucket = ideal, "block requested");

        Ok(PooledBlock::new(block, Arc::clone(self)))
    }

    /// Request a block sized for a serialized block and decode it.
    pub fn request_and_init_block(self: &Arc<Self>, slice: &JsonValue) -> Result<PooledBlock> {
        let (rows, regs) = read_dimensions(slice)?;
        let mut block = self.request_block(rows, regs)?;
        block.init_from_json(slice)?;
        Ok(block)
    }

    /// Take a block back. Its contents are released first, outside any
    /// bucket lock, because dropping nested blocks returns them here too.
    pub fn return_block(&self, mut block: ItemBlock) {
        let bucket = &self.buckets[self.bucket_for(block.size() * block.nr_regs())];
        block.destroy();

        let rejected = {
            let mut free = bucket.lock();
            if free.len() < bucket.capacity {
                free.push(block);
                None
            } else {
                Some(block)
            }
        };
        if let Some(block) = rejected {
            self.counters.deleted.fetch_add(1, Ordering::Relaxed);
            drop(block);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockflow_mem::ResourceMonitorImpl;

    fn pool(buckets: usize, per_bucket: usize) -> Arc<BlockPool> {
        BlockPool::new(
            ResourceMonitorImpl::unlimited().shared(),
            PoolConfig {
                num_buckets: buckets,
                blocks_per_bucket: per_bucket,
                format: SerializationFormat::ShadowRows,
            },
        )
    }

    #[test]
    fn bucket_classes_are_powers_of_two() {
        let p = pool(12, 1);
        assert_eq!(p.bucket_for(0), 0);
        assert_eq!(p.bucket_for(1), 0);
        assert_eq!(p.bucket_for(2), 1);
        assert_eq!(p.bucket_for(3), 2);
        assert_eq!(p.bucket_for(4), 2);
        assert_eq!(p.bucket_for(5), 3);
        assert_eq!(p.bucket_for(1024), 10);
        assert_eq!(p.bucket_for(1 << 20), 11);
    }

    #[test]
    fn returned_block_is_recycled() {
        let p = pool(12, 2);
        let block = p.request_block(4, 2).unwrap();
        drop(block);
        assert_eq!(p.free_blocks(3), 1);

        let block = p.request_block(2, 3).unwrap();
        assert_eq!(block.size(), 2);
        assert_eq!(block.nr_regs(), 3);
        assert_eq!(p.stats(), PoolStats { allocated: 1, recycled: 1, deleted: 0 });
        assert_eq!(p.free_blocks(3), 0);
    }

    #[test]
    fn full_bucket_deletes() {
        let p = pool(4, 1);
        let a = p.request_block(1, 1).unwrap();
        let b = p.request_block(1, 1).unwrap();
        drop(a);
        drop(b);
        assert_eq!(p.free_blocks(0), 1);
        assert_eq!(p.stats().deleted, 1);
    }
}
