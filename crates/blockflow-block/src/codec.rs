//! JSON wire format of item blocks.
//!
//! ```text
//! { "nrItems": n, "nrRegs": r, "error": false, "data": [...], "raw": [null, null, ...] }
//! ```
//!
//! Cells are visited column-major. In the shadow-row format a synthetic
//! leading column carries the depth of every shadow row (empty for data rows).
//! `data` is a stream of codes:
//!
//! | code          | meaning                                                  |
//! |---------------|----------------------------------------------------------|
//! | `0`           | one empty cell                                           |
//! | `-1 N`        | `N` empty cells                                          |
//! | `-2 low high` | one range value (never run-compressed)                   |
//! | `1`           | one cell taking the next entry of `raw`                  |
//! | `-3 N`        | `N` cells, each taking the next entry of `raw`           |
//! | `P >= 2`      | one cell repeating the value at `raw[P]`                 |
//! | `-4 N P`      | `N` cells repeating the value at `raw[P]`                |
//!
//! Runs may cross column boundaries. `raw[0]` and `raw[1]` are reserved.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Map, Value as JsonValue};

use blockflow_core::types::SerializationFormat;

use crate::error::{Error, Result};
use crate::item_block::{slot_bytes, ItemBlock};
use crate::value::{RangeValue, Value, ValueKey};

const CODE_EMPTY: i64 = 0;
const CODE_NEXT: i64 = 1;
const CODE_EMPTY_RUN: i64 = -1;
const CODE_RANGE: i64 = -2;
const CODE_NEXT_RUN: i64 = -3;
const CODE_POSITIONAL_RUN: i64 = -4;
const FIRST_RAW_POSITION: usize = 2;

/// Dedup key while encoding: identity for heap values, content for scalars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum WireKey {
    Heap(ValueKey),
    Null,
    Bool(bool),
    Int(i64),
    Double(u64),
}

impl WireKey {
    fn of(value: &Value) -> Option<Self> {
        if let Some(key) = value.key() {
            return Some(WireKey::Heap(key));
        }
        match value {
            Value::Null => Some(WireKey::Null),
            Value::Bool(b) => Some(WireKey::Bool(*b)),
            Value::Int(i) => Some(WireKey::Int(*i)),
            Value::Double(d) => Some(WireKey::Double(d.to_bits())),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Run {
    Empty,
    Next,
    Positional(usize),
}

struct Encoder {
    data: Vec<JsonValue>,
    raw: Vec<JsonValue>,
    positions: HashMap<WireKey, usize>,
    pending: Option<(Run, usize)>,
}

impl Encoder {
    fn new() -> Self {
        Self {
            data: Vec::new(),
            raw: vec![JsonValue::Null, JsonValue::Null],
            positions: HashMap::new(),
            pending: None,
        }
    }

    fn push(&mut self, code: i64) {
        self.data.push(JsonValue::from(code));
    }

    fn commit(&mut self) {
        let Some((run, len)) = self.pending.take() else {
            return;
        };
        match (run, len) {
            (Run::Empty, 1) => self.push(CODE_EMPTY),
            (Run::Next, 1) => self.push(CODE_NEXT),
            (Run::Positional(pos), 1) => self.push(pos as i64),
            (Run::Empty, n) => {
                self.push(CODE_EMPTY_RUN);
                self.push(n as i64);
            }
            (Run::Next, n) => {
                self.push(CODE_NEXT_RUN);
                self.push(n as i64);
            }
            (Run::Positional(pos), n) => {
                self.push(CODE_POSITIONAL_RUN);
                self.push(n as i64);
                self.push(pos as i64);
            }
        }
    }

    fn extend(&mut self, run: Run) {
        if let Some((current, len)) = &mut self.pending {
            if *current == run {
                *len += 1;
                return;
            }
        }
        self.commit();
        self.pending = Some((run, 1));
    }

    fn cell(&mut self, value: &Value) {
        if let Some(r) = value.as_range() {
            self.commit();
            self.push(CODE_RANGE);
            self.push(r.low);
            self.push(r.high);
            return;
        }
        let Some(key) = WireKey::of(value) else {
            self.extend(Run::Empty);
            return;
        };
        match self.positions.get(&key) {
            Some(&pos) => self.extend(Run::Positional(pos)),
            None => {
                self.positions.insert(key, self.raw.len());
                self.raw.push(value.to_json());
                self.extend(Run::Next);
            }
        }
    }

    fn finish(mut self, nr_items: usize, nr_regs: usize) -> JsonValue {
        self.commit();
        json!({
            "nrItems": nr_items,
            "nrRegs": nr_regs,
            "error": false,
            "data": self.data,
            "raw": self.raw,
        })
    }
}

/// Cursor over the `data` stream.
struct Codes<'a> {
    data: &'a [JsonValue],
    pos: usize,
}

impl<'a> Codes<'a> {
    fn next_code(&mut self) -> Result<i64> {
        let entry = self
            .data
            .get(self.pos)
            .ok_or_else(|| Error::malformed("data stream ended early"))?;
        self.pos += 1;
        entry
            .as_i64()
            .ok_or_else(|| Error::malformed(format!("non-numeric data entry {entry}")))
    }

    fn run_length(&mut self) -> Result<usize> {
        let n = self.next_code()?;
        if n < 1 {
            return Err(Error::malformed(format!("invalid run length {n}")));
        }
        Ok(n as usize)
    }
}

struct Decoder<'a> {
    codes: Codes<'a>,
    raw: &'a [JsonValue],
    /// Values decoded so far, indexed by raw position.
    made_here: Vec<Value>,
    pending: Option<(Run, usize)>,
}

impl<'a> Decoder<'a> {
    fn next_raw(&mut self) -> Result<Value> {
        let pos = self.made_here.len();
        let json = self
            .raw
            .get(pos)
            .ok_or_else(|| Error::malformed(format!("raw value {pos} missing")))?;
        let value = Value::from(json.clone());
        self.made_here.push(value.clone());
        Ok(value)
    }

    fn positional(&self, pos: i64) -> Result<Value> {
        usize::try_from(pos)
            .ok()
            .filter(|&p| p >= FIRST_RAW_POSITION)
            .and_then(|p| self.made_here.get(p))
            .cloned()
            .ok_or_else(|| Error::malformed(format!("reference to raw position {pos} out of range")))
    }

    fn cell_from_run(&mut self, run: Run) -> Result<Value> {
        match run {
            Run::Empty => Ok(Value::Empty),
            Run::Next => self.next_raw(),
            Run::Positional(pos) => self.positional(pos as i64),
        }
    }

    fn next_cell(&mut self) -> Result<Value> {
        if let Some((run, left)) = self.pending {
            self.pending = if left > 1 { Some((run, left - 1)) } else { None };
            return self.cell_from_run(run);
        }
        let code = self.codes.next_code()?;
        let (run, len) = match code {
            CODE_EMPTY => return Ok(Value::Empty),
            CODE_NEXT => return self.next_raw(),
            CODE_RANGE => {
                let low = self.codes.next_code()?;
                let high = self.codes.next_code()?;
                return Ok(Value::Range(Arc::new(RangeValue::new(low, high))));
            }
            CODE_EMPTY_RUN => (Run::Empty, self.codes.run_length()?),
            CODE_NEXT_RUN => (Run::Next, self.codes.run_length()?),
            CODE_POSITIONAL_RUN => {
                let len = self.codes.run_length()?;
                let pos = self.codes.next_code()?;
                let value = self.positional(pos)?;
                if len > 1 {
                    self.pending = Some((Run::Positional(pos as usize), len - 1));
                }
                return Ok(value);
            }
            p if p >= FIRST_RAW_POSITION as i64 => return self.positional(p),
            other => return Err(Error::malformed(format!("unknown code {other}"))),
        };
        if len > 1 {
            self.pending = Some((run, len - 1));
        }
        self.cell_from_run(run)
    }

    fn finish(&self) -> Result<()> {
        if self.pending.is_some() || self.codes.pos != self.codes.data.len() {
            return Err(Error::malformed("trailing entries in data stream"));
        }
        Ok(())
    }
}

fn dimension(slice: &JsonValue, field: &str) -> Result<i64> {
    slice
        .get(field)
        .ok_or_else(|| Error::malformed(format!("{field} missing")))?
        .as_i64()
        .ok_or_else(|| Error::malformed(format!("{field} is not an integer")))
}

/// Read `(nrItems, nrRegs)` from a serialized block.
pub fn read_dimensions(slice: &JsonValue) -> Result<(usize, usize)> {
    let items = dimension(slice, "nrItems")?;
    if items <= 0 {
        return Err(Error::malformed(format!("nrItems must be positive, got {items}")));
    }
    let regs = dimension(slice, "nrRegs")?;
    if regs < 0 {
        return Err(Error::malformed(format!("nrRegs must not be negative, got {regs}")));
    }
    let (Ok(items), Ok(regs)) = (usize::try_from(items), usize::try_from(regs)) else {
        return Err(Error::malformed(format!("{items} x {regs} is out of range")));
    };
    if slot_bytes(items, regs).is_none() {
        return Err(Error::malformed(format!(
            "{items} x {regs} exceeds the addressable block size"
        )));
    }
    Ok((items, regs))
}

fn array_field<'a>(slice: &'a JsonValue, field: &str) -> Result<&'a [JsonValue]> {
    slice
        .get(field)
        .and_then(JsonValue::as_array)
        .map(Vec::as_slice)
        .ok_or_else(|| Error::malformed(format!("{field} must be an array")))
}

impl ItemBlock {
    /// Serialize all rows.
    pub fn to_json(&self) -> JsonValue {
        self.to_json_rows(0, self.size())
    }

    /// Serialize rows `from..to` as a standalone block.
    pub fn to_json_rows(&self, from: usize, to: usize) -> JsonValue {
        debug_assert!(from < to && to <= self.size(), "invalid row range {from}..{to}");
        let shadow_column = self.format() == SerializationFormat::ShadowRows;
        debug_assert!(
            shadow_column || !self.has_shadow_rows(),
            "the classic format cannot carry shadow rows"
        );
        let mut enc = Encoder::new();
        if shadow_column {
            for row in from..to {
                match self.shadow_row_depth(row) {
                    Some(depth) => enc.cell(&Value::Int(depth as i64)),
                    None => enc.cell(&Value::Empty),
                }
            }
        }
        for reg in 0..self.nr_regs() {
            for row in from..to {
                enc.cell(self.get_value_reference(row, reg));
            }
        }
        enc.finish(to - from, self.nr_regs())
    }

    /// Replace this block's contents with a serialized block, resizing as
    /// needed. On error the block is left empty and accounts nothing but
    /// its slots.
    pub fn init_from_json(&mut self, slice: &JsonValue) -> Result<()> {
        let (items, regs) = read_dimensions(slice)?;
        self.rescale(items, regs)?;
        let result = self.decode_cells(slice);
        if result.is_err() {
            self.release_values();
            let rows: Vec<usize> = self.shadow_rows().iter().map(|(row, _)| row).collect();
            for row in rows {
                self.make_data_row(row);
            }
        }
        result
    }

    fn decode_cells(&mut self, slice: &JsonValue) -> Result<()> {
        let mut dec = Decoder {
            codes: Codes {
                data: array_field(slice, "data")?,
                pos: 0,
            },
            raw: array_field(slice, "raw")?,
            made_here: vec![Value::Empty; FIRST_RAW_POSITION],
            pending: None,
        };
        if self.format() == SerializationFormat::ShadowRows {
            for row in 0..self.size() {
                match dec.next_cell()? {
                    Value::Empty => {}
                    Value::Int(depth) if depth >= 0 => self.make_shadow_row(row, depth as u64),
                    other => {
                        return Err(Error::malformed(format!(
                            "invalid shadow row depth {other:?} in row {row}"
                        )))
                    }
                }
            }
        }
        for reg in 0..self.nr_regs() {
            for row in 0..self.size() {
                let value = dec.next_cell()?;
                if !value.is_empty() {
                    self.set_value(row, reg, value)?;
                }
            }
        }
        dec.finish()
    }

    /// Human-readable rendering for logs and tests.
    pub fn to_simple_json(&self) -> JsonValue {
        let matrix: Vec<JsonValue> = (0..self.size())
            .map(|row| {
                JsonValue::Array(
                    (0..self.nr_regs())
                        .map(|reg| self.get_value_reference(row, reg).to_json())
                        .collect(),
                )
            })
            .collect();
        let mut out = Map::new();
        out.insert("nrItems".into(), JsonValue::from(self.size()));
        out.insert("nrRegs".into(), JsonValue::from(self.nr_regs()));
        out.insert("matrix".into(), JsonValue::Array(matrix));
        if self.has_shadow_rows() {
            let shadows = self
                .shadow_rows()
                .iter()
                .map(|(row, depth)| json!([row, depth]))
                .collect();
            out.insert("shadowRows".into(), JsonValue::Array(shadows));
        }
        JsonValue::Object(out)
    }
}
