//! The rows x registers matrix passed between operators.
//!
//! Cells are addressed as `row * nr_regs + reg`. Every heap-owning value is
//! counted per identity: the first cell holding an identity accounts its
//! memory with the resource monitor, later cells only bump a refcount, and
//! the memory is given back when the last cell releases it.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::mem::size_of;
use std::sync::Arc;

use blockflow_core::budget::ResourceMonitor;
use blockflow_core::types::{RegisterCount, RegisterId, SerializationFormat};
use blockflow_mem::MemoryGuard;

use crate::error::{Error, Result};
use crate::shadow::ShadowRows;
use crate::value::{Value, ValueKey};

/// Bytes accounted per cell slot, independent of the value it holds.
pub const SLOT_BYTES: usize = size_of::<Value>();

/// Slot bytes of a `rows x regs` block, `None` if the size is not representable.
pub fn slot_bytes(rows: usize, regs: RegisterCount) -> Option<usize> {
    rows.checked_mul(regs)?.checked_mul(SLOT_BYTES)
}

fn checked_slot_bytes(rows: usize, regs: RegisterCount) -> Result<usize> {
    slot_bytes(rows, regs).ok_or_else(|| {
        Error::Resource(blockflow_core::Error::Invariant(format!(
            "{rows} x {regs} block does not fit in memory"
        )))
    })
}

#[derive(Debug, Clone, Copy)]
struct ValueInfo {
    refs: usize,
    memory: usize,
}

/// Query-wide constants shared by many blocks. Reads of these registers are
/// answered from here instead of the block's own cells.
#[derive(Debug, Default)]
pub struct ConstantRegisters {
    values: HashMap<RegisterId, Value>,
}

impl ConstantRegisters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, reg: RegisterId, value: impl Into<Value>) -> Self {
        self.values.insert(reg, value.into());
        self
    }

    pub fn get(&self, reg: RegisterId) -> Option<&Value> {
        self.values.get(&reg)
    }

    pub fn contains(&self, reg: RegisterId) -> bool {
        self.values.contains_key(&reg)
    }
}

pub struct ItemBlock {
    data: Vec<Value>,
    value_count: HashMap<ValueKey, ValueInfo>,
    shadow_rows: ShadowRows,
    constants: Option<Arc<ConstantRegisters>>,
    nr_items: usize,
    nr_regs: RegisterCount,
    /// One past the highest row that was written; cells from here on are empty.
    max_modified_row_index: usize,
    format: SerializationFormat,
    monitor: Arc<dyn ResourceMonitor>,
    slots: MemoryGuard,
    tracked_bytes: usize,
}

impl ItemBlock {
    /// Allocate an empty `rows x regs` block and account its slots.
    pub fn new(
        monitor: Arc<dyn ResourceMonitor>,
        rows: usize,
        regs: RegisterCount,
        format: SerializationFormat,
    ) -> Result<Self> {
        debug_assert!(rows > 0, "item blocks must have at least one row");
        let bytes = checked_slot_bytes(rows, regs)?;
        let slots = MemoryGuard::acquire(Arc::clone(&monitor), bytes, "slots")?;
        let mut data = Vec::new();
        data.resize_with(rows * regs, Value::default);
        Ok(Self {
            data,
            value_count: HashMap::new(),
            shadow_rows: ShadowRows::new(),
            constants: None,
            nr_items: rows,
            nr_regs: regs,
            max_modified_row_index: 0,
            format,
            monitor,
            slots,
            tracked_bytes: 0,
        })
    }

    /// A zero-sized placeholder that owns nothing.
    pub(crate) fn dormant(monitor: Arc<dyn ResourceMonitor>, format: SerializationFormat) -> Self {
        let slots = MemoryGuard::empty(Arc::clone(&monitor), "slots");
        Self {
            data: Vec::new(),
            value_count: HashMap::new(),
            shadow_rows: ShadowRows::new(),
            constants: None,
            nr_items: 0,
            nr_regs: 0,
            max_modified_row_index: 0,
            format,
            monitor,
            slots,
            tracked_bytes: 0,
        }
    }

    /// Number of rows.
    pub fn size(&self) -> usize {
        self.nr_items
    }

    pub fn nr_regs(&self) -> RegisterCount {
        self.nr_regs
    }

    pub fn format(&self) -> SerializationFormat {
        self.format
    }

    pub fn monitor(&self) -> &Arc<dyn ResourceMonitor> {
        &self.monitor
    }

    /// Bytes this block currently attributes to the monitor.
    pub fn memory_usage(&self) -> usize {
        self.slots.bytes() + self.tracked_bytes
    }

    /// Bytes accounted for heap values only.
    pub fn value_memory_usage(&self) -> usize {
        self.tracked_bytes
    }

    #[inline]
    fn index(&self, row: usize, reg: RegisterId) -> usize {
        debug_assert!(row < self.nr_items, "row {row} out of bounds ({})", self.nr_items);
        debug_assert!(reg < self.nr_regs, "register {reg} out of bounds ({})", self.nr_regs);
        row * self.nr_regs + reg
    }

    /// Store `value` in an empty cell.
    ///
    /// If accounting the value fails the value is dropped and the cell stays
    /// empty.
    pub fn set_value(&mut self, row: usize, reg: RegisterId, value: Value) -> Result<()> {
        let idx = self.index(row, reg);
        debug_assert!(
            self.data[idx].is_empty(),
            "cell ({row}, {reg}) is not empty"
        );
        if let Some(key) = value.key() {
            match self.value_count.entry(key) {
                Entry::Occupied(mut e) => e.get_mut().refs += 1,
                Entry::Vacant(e) => {
                    let memory = value.memory_usage();
                    self.monitor.increase_memory_usage(memory)?;
                    e.insert(ValueInfo { refs: 1, memory });
                    self.tracked_bytes += memory;
                }
            }
        }
        self.data[idx] = value;
        if row >= self.max_modified_row_index {
            self.max_modified_row_index = row + 1;
        }
        Ok(())
    }

    /// Build a value in place and return a reference to the stored cell.
    pub fn emplace_value(
        &mut self,
        row: usize,
        reg: RegisterId,
        value: impl Into<Value>,
    ) -> Result<&Value> {
        self.set_value(row, reg, value.into())?;
        Ok(&self.data[self.index(row, reg)])
    }

    /// Like `emplace_value` with a fallible constructor. Nothing is written
    /// unless both construction and accounting succeed.
    pub fn emplace_with<F>(&mut self, row: usize, reg: RegisterId, make: F) -> Result<&Value>
    where
        F: FnOnce() -> Result<Value>,
    {
        let value = make()?;
        self.emplace_value(row, reg, value)
    }

    pub fn get_value(&self, row: usize, reg: RegisterId) -> Value {
        self.get_value_reference(row, reg).clone()
    }

    pub fn get_value_reference(&self, row: usize, reg: RegisterId) -> &Value {
        if let Some(constant) = self.constants.as_deref().and_then(|c| c.get(reg)) {
            return constant;
        }
        &self.data[self.index(row, reg)]
    }

    /// Empty a cell and free the value once no other cell references it.
    pub fn destroy_value(&mut self, row: usize, reg: RegisterId) {
        let value = self.erase_value(row, reg);
        drop(value);
    }

    /// Empty a cell and hand its value to the caller. The block stops
    /// accounting the value once no other cell references it.
    pub fn erase_value(&mut self, row: usize, reg: RegisterId) -> Value {
        let idx = self.index(row, reg);
        let value = std::mem::take(&mut self.data[idx]);
        self.release(&value);
        value
    }

    fn release(&mut self, value: &Value) {
        let Some(key) = value.key() else {
            return;
        };
        match self.value_count.entry(key) {
            Entry::Occupied(mut e) => {
                let info = e.get_mut();
                info.refs -= 1;
                if info.refs == 0 {
                    let memory = e.remove().memory;
                    self.tracked_bytes -= memory;
                    self.monitor.decrease_memory_usage(memory);
                }
            }
            Entry::Vacant(_) => debug_assert!(false, "releasing an untracked value"),
        }
    }

    /// Number of cells currently referencing the identity of `value`.
    pub fn value_refcount(&self, value: &Value) -> usize {
        value
            .key()
            .and_then(|k| self.value_count.get(&k))
            .map_or(0, |info| info.refs)
    }

    /// Number of distinct heap values held.
    pub fn distinct_values(&self) -> usize {
        self.value_count.len()
    }

    /// Empty every written cell and give back all value memory.
    pub(crate) fn release_values(&mut self) {
        let used = self.max_modified_row_index * self.nr_regs;
        let mut owned = Vec::new();
        for cell in &mut self.data[..used] {
            if cell.requires_destruction() {
                owned.push(std::mem::take(cell));
            } else {
                *cell = Value::Empty;
            }
        }
        self.value_count.clear();
        if self.tracked_bytes > 0 {
            self.monitor.decrease_memory_usage(self.tracked_bytes);
            self.tracked_bytes = 0;
        }
        self.max_modified_row_index = 0;
        // Dropping nested blocks may hand them back to a pool.
        drop(owned);
    }

    /// Keep only the first `rows` rows.
    pub fn shrink(&mut self, rows: usize) {
        debug_assert!(rows > 0, "cannot shrink a block to zero rows");
        debug_assert!(rows <= self.nr_items, "shrink cannot grow a block");
        if rows >= self.nr_items {
            return;
        }
        for row in rows..self.max_modified_row_index {
            for reg in 0..self.nr_regs {
                let idx = row * self.nr_regs + reg;
                if !self.data[idx].is_empty() {
                    self.destroy_value(row, reg);
                }
            }
        }
        self.max_modified_row_index = self.max_modified_row_index.min(rows);
        self.shadow_rows.truncate(rows);
        self.data.truncate(rows * self.nr_regs);
        self.nr_items = rows;
        self.slots.shrink_to(rows * self.nr_regs * SLOT_BYTES);
    }

    /// Reset to an empty `rows x regs` block, reusing storage.
    ///
    /// On failure the block is left destroyed (zero rows) and owns nothing.
    pub fn rescale(&mut self, rows: usize, regs: RegisterCount) -> Result<()> {
        debug_assert!(rows > 0, "item blocks must have at least one row");
        let bytes = match checked_slot_bytes(rows, regs) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.destroy();
                return Err(e);
            }
        };
        self.release_values();
        self.shadow_rows.clear();
        self.constants = None;
        if let Err(e) = self.slots.try_resize(bytes) {
            self.destroy();
            return Err(e.into());
        }
        self.data.clear();
        self.data.resize_with(rows * regs, Value::default);
        self.nr_items = rows;
        self.nr_regs = regs;
        Ok(())
    }

    /// Release everything but keep the allocation for reuse.
    pub fn destroy(&mut self) {
        self.release_values();
        self.shadow_rows.clear();
        self.constants = None;
        self.slots.shrink_to(0);
        self.data.clear();
        self.nr_items = 0;
        self.nr_regs = 0;
    }

    /// Cell capacity of the backing storage.
    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    pub fn set_constant_registers(&mut self, constants: Option<Arc<ConstantRegisters>>) {
        self.constants = constants;
    }

    pub fn constant_registers(&self) -> Option<&Arc<ConstantRegisters>> {
        self.constants.as_ref()
    }

    pub fn make_shadow_row(&mut self, row: usize, depth: u64) {
        debug_assert!(row < self.nr_items, "row {row} out of bounds ({})", self.nr_items);
        debug_assert!(
            self.shadow_rows.iter().last().map_or(true, |(last, _)| last <= row),
            "shadow rows must be marked in ascending order"
        );
        self.shadow_rows.insert(row, depth);
    }

    pub fn make_data_row(&mut self, row: usize) {
        self.shadow_rows.remove(row);
    }

    pub fn is_shadow_row(&self, row: usize) -> bool {
        self.shadow_rows.contains(row)
    }

    pub fn shadow_row_depth(&self, row: usize) -> Option<u64> {
        self.shadow_rows.depth(row)
    }

    pub fn has_shadow_rows(&self) -> bool {
        !self.shadow_rows.is_empty()
    }

    pub fn num_shadow_rows(&self) -> usize {
        self.shadow_rows.len()
    }

    pub fn shadow_rows(&self) -> &ShadowRows {
        &self.shadow_rows
    }

    /// Stored cell without the constant-register redirect.
    pub(crate) fn raw_cell(&self, row: usize, reg: RegisterId) -> &Value {
        &self.data[self.index(row, reg)]
    }
}

impl Drop for ItemBlock {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl fmt::Debug for ItemBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ItemBlock")
            .field("nr_items", &self.nr_items)
            .field("nr_regs", &self.nr_regs)
            .field("shadow_rows", &self.shadow_rows.len())
            .field("distinct_values", &self.value_count.len())
            .field("memory", &self.memory_usage())
            .finish()
    }
}
