//! Derived blocks: row ranges, chosen rows, register subsets, and steals.
//!
//! Copying variants deep-copy heap values but keep one copy per source
//! identity, so a value repeated across source rows is shared again in the
//! destination block.

use std::collections::{HashMap, HashSet};

use blockflow_core::types::{RegisterCount, RegisterId};

use crate::error::Result;
use crate::item_block::ItemBlock;
use crate::shared::PooledBlock;
use crate::value::{Value, ValueKey};

type CopyCache = HashMap<ValueKey, Value>;

fn copy_cached(value: &Value, cache: &mut CopyCache) -> Value {
    match value.key() {
        None => value.clone(),
        Some(key) => cache
            .entry(key)
            .or_insert_with(|| value.deep_clone())
            .clone(),
    }
}

impl ItemBlock {
    /// Copy the stored cells of `src_row` (registers `regs`) into `dst_row`
    /// of `dst`, together with the shadow-row mark.
    fn copy_row_into(
        &self,
        src_row: usize,
        dst: &mut ItemBlock,
        dst_row: usize,
        regs: impl Iterator<Item = RegisterId>,
        cache: &mut CopyCache,
    ) -> Result<()> {
        if let Some(depth) = self.shadow_row_depth(src_row) {
            dst.make_shadow_row(dst_row, depth);
        }
        for reg in regs {
            let value = self.raw_cell(src_row, reg);
            if !value.is_empty() {
                dst.set_value(dst_row, reg, copy_cached(value, cache))?;
            }
        }
        Ok(())
    }
}

impl PooledBlock {
    fn copy_rows(&self, rows: &[usize]) -> Result<PooledBlock> {
        debug_assert!(!rows.is_empty(), "cannot slice zero rows");
        let mut out = self.pool().request_block(rows.len(), self.nr_regs())?;
        out.set_constant_registers(self.constant_registers().cloned());
        let mut cache = CopyCache::new();
        for (dst_row, &src_row) in rows.iter().enumerate() {
            self.copy_row_into(src_row, &mut out, dst_row, 0..self.nr_regs(), &mut cache)?;
        }
        Ok(out)
    }

    /// Copy of rows `from..to`.
    pub fn slice(&self, from: usize, to: usize) -> Result<PooledBlock> {
        debug_assert!(from < to && to <= self.size(), "invalid row range {from}..{to}");
        self.copy_rows(&(from..to).collect::<Vec<_>>())
    }

    /// Copy of the concatenation of several `[from, to)` row ranges.
    pub fn slice_ranges(&self, ranges: &[(usize, usize)]) -> Result<PooledBlock> {
        let rows: Vec<usize> = ranges.iter().flat_map(|&(from, to)| from..to).collect();
        self.copy_rows(&rows)
    }

    /// One-row block holding only `registers` of `row`, widened or narrowed
    /// to `new_nr_regs` registers.
    pub fn slice_row(
        &self,
        row: usize,
        registers: &HashSet<RegisterId>,
        new_nr_regs: RegisterCount,
    ) -> Result<PooledBlock> {
        let mut out = self.pool().request_block(1, new_nr_regs)?;
        let mut cache = CopyCache::new();
        let limit = self.nr_regs().min(new_nr_regs);
        let regs = (0..limit).filter(|reg| registers.contains(reg));
        self.copy_row_into(row, &mut out, 0, regs, &mut cache)?;
        Ok(out)
    }

    /// Copy of `chosen[from..to]`, where `chosen` lists source row indexes in
    /// ascending order.
    pub fn slice_chosen(&self, chosen: &[usize], from: usize, to: usize) -> Result<PooledBlock> {
        debug_assert!(from < to && to <= chosen.len(), "invalid range {from}..{to}");
        self.copy_rows(&chosen[from..to])
    }

    /// Like `slice_chosen`, but moves the values out of this block. The
    /// source cells are left empty.
    pub fn steal(&mut self, chosen: &[usize], from: usize, to: usize) -> Result<PooledBlock> {
        debug_assert!(from < to && to <= chosen.len(), "invalid range {from}..{to}");
        let regs = self.nr_regs();
        let mut out = self.pool().request_block(to - from, regs)?;
        out.set_constant_registers(self.constant_registers().cloned());
        for (dst_row, &src_row) in chosen[from..to].iter().enumerate() {
            if let Some(depth) = self.shadow_row_depth(src_row) {
                out.make_shadow_row(dst_row, depth);
            }
            for reg in 0..regs {
                if !self.raw_cell(src_row, reg).is_empty() {
                    let value = self.erase_value(src_row, reg);
                    out.set_value(dst_row, reg, value)?;
                }
            }
        }
        Ok(out)
    }
}
