//! Row cursors handed out by the fetchers.

use serde_json::Value as JsonValue;

use blockflow_block::{SharedBlock, Value};
use blockflow_core::types::{RegisterCount, RegisterId};

/// A data row of a shared block.
#[derive(Debug, Clone)]
pub struct InputRow {
    block: SharedBlock,
    index: usize,
}

impl InputRow {
    pub fn new(block: SharedBlock, index: usize) -> Self {
        debug_assert!(index < block.size());
        debug_assert!(!block.is_shadow_row(index), "row {index} is a shadow row");
        Self { block, index }
    }

    pub fn value(&self, reg: RegisterId) -> &Value {
        self.block.get_value_reference(self.index, reg)
    }

    pub fn nr_registers(&self) -> RegisterCount {
        self.block.nr_regs()
    }

    pub fn row_index(&self) -> usize {
        self.index
    }

    pub fn block(&self) -> &SharedBlock {
        &self.block
    }

    pub fn is_last_row_in_block(&self) -> bool {
        self.index + 1 == self.block.size()
    }

    /// Register values as a JSON array.
    pub fn to_json(&self) -> JsonValue {
        JsonValue::Array(
            (0..self.nr_registers())
                .map(|reg| self.value(reg).to_json())
                .collect(),
        )
    }
}

/// A shadow row: the boundary of one subquery iteration at some depth.
#[derive(Debug, Clone)]
pub struct ShadowRow {
    block: SharedBlock,
    index: usize,
    depth: u64,
}

impl ShadowRow {
    pub fn new(block: SharedBlock, index: usize) -> Option<Self> {
        let depth = block.shadow_row_depth(index)?;
        Some(Self {
            block,
            index,
            depth,
        })
    }

    pub fn depth(&self) -> u64 {
        self.depth
    }

    /// A relevant shadow row closes the innermost subquery level.
    pub fn is_relevant(&self) -> bool {
        self.depth == 0
    }

    pub fn value(&self, reg: RegisterId) -> &Value {
        self.block.get_value_reference(self.index, reg)
    }

    pub fn nr_registers(&self) -> RegisterCount {
        self.block.nr_regs()
    }

    pub fn row_index(&self) -> usize {
        self.index
    }

    pub fn block(&self) -> &SharedBlock {
        &self.block
    }

    pub fn to_json(&self) -> JsonValue {
        serde_json::json!({
            "depth": self.depth,
            "values": (0..self.nr_registers())
                .map(|reg| self.value(reg).to_json())
                .collect::<Vec<_>>(),
        })
    }
}
