//! Cell values stored in item blocks.
//!
//! Scalars are stored inline. Documents, ranges and block vectors live behind
//! an `Arc`; cloning a `Value` shares the allocation, and the `Arc` pointer is
//! the identity blocks use to count references.

use std::fmt;
use std::mem::size_of;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::shared::SharedBlock;

/// Stable identity of a heap-owning value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueKey(usize);

impl ValueKey {
    fn of<T: ?Sized>(arc: &Arc<T>) -> Self {
        ValueKey(Arc::as_ptr(arc) as *const () as usize)
    }
}

/// Ranges longer than this render as their bounds instead of an array.
pub const MAX_RENDERED_RANGE: usize = 10_000;

/// Inclusive integer range, e.g. the result of `1..10` in a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeValue {
    pub low: i64,
    pub high: i64,
}

impl RangeValue {
    pub fn new(low: i64, high: i64) -> Self {
        Self { low, high }
    }

    /// Number of integers covered; zero for inverted bounds, saturating at
    /// `usize::MAX`.
    pub fn len(&self) -> usize {
        if self.high < self.low {
            return 0;
        }
        usize::try_from(self.high.abs_diff(self.low))
            .ok()
            .and_then(|n| n.checked_add(1))
            .unwrap_or(usize::MAX)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone, Default)]
pub enum Value {
    /// Unset cell.
    #[default]
    Empty,
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    /// Any string, array or object.
    Doc(Arc<JsonValue>),
    Range(Arc<RangeValue>),
    /// Nested blocks, e.g. the materialized result of a subquery.
    DocVec(Arc<Vec<SharedBlock>>),
}

impl Value {
    pub fn doc(json: JsonValue) -> Self {
        Value::Doc(Arc::new(json))
    }

    pub fn range(low: i64, high: i64) -> Self {
        Value::Range(Arc::new(RangeValue::new(low, high)))
    }

    pub fn doc_vec(blocks: Vec<SharedBlock>) -> Self {
        Value::DocVec(Arc::new(blocks))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Value::Empty)
    }

    pub fn is_range(&self) -> bool {
        matches!(self, Value::Range(_))
    }

    /// True if the value owns heap memory a block must account for.
    pub fn requires_destruction(&self) -> bool {
        matches!(self, Value::Doc(_) | Value::Range(_) | Value::DocVec(_))
    }

    /// Identity used for dedup; `None` for inline values.
    pub fn key(&self) -> Option<ValueKey> {
        match self {
            Value::Doc(d) => Some(ValueKey::of(d)),
            Value::Range(r) => Some(ValueKey::of(r)),
            Value::DocVec(v) => Some(ValueKey::of(v)),
            _ => None,
        }
    }

    /// Estimated heap bytes owned by this value.
    pub fn memory_usage(&self) -> usize {
        match self {
            Value::Doc(d) => size_of::<JsonValue>() + json_heap_size(d),
            Value::Range(_) => size_of::<RangeValue>(),
            Value::DocVec(v) => size_of::<Vec<SharedBlock>>() + v.len() * size_of::<SharedBlock>(),
            _ => 0,
        }
    }

    /// Copy that owns fresh heap memory for documents and ranges.
    ///
    /// Nested blocks are read-only once shared, so a `DocVec` copy shares the
    /// block list with the original.
    pub fn deep_clone(&self) -> Self {
        match self {
            Value::Doc(d) => Value::Doc(Arc::new(JsonValue::clone(d))),
            Value::Range(r) => Value::Range(Arc::new(**r)),
            other => other.clone(),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_range(&self) -> Option<&RangeValue> {
        match self {
            Value::Range(r) => Some(r),
            _ => None,
        }
    }

    /// Plain JSON rendering. Ranges up to `MAX_RENDERED_RANGE` items are
    /// materialized, longer ones become `{"low", "high"}`. Block vectors
    /// become an array of the first register of every row.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Empty | Value::Null => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Int(i) => JsonValue::from(*i),
            Value::Double(d) => JsonValue::from(*d),
            Value::Doc(d) => JsonValue::clone(d),
            Value::Range(r) if r.len() > MAX_RENDERED_RANGE => {
                serde_json::json!({"low": r.low, "high": r.high})
            }
            Value::Range(r) => JsonValue::Array((r.low..=r.high).map(JsonValue::from).collect()),
            Value::DocVec(blocks) => {
                let mut out = Vec::new();
                for block in blocks.iter() {
                    if block.nr_regs() == 0 {
                        continue;
                    }
                    for row in 0..block.size() {
                        out.push(block.get_value_reference(row, 0).to_json());
                    }
                }
                JsonValue::Array(out)
            }
        }
    }

    pub fn from_json(json: &JsonValue) -> Self {
        Value::from(json.clone())
    }
}

fn json_heap_size(json: &JsonValue) -> usize {
    match json {
        JsonValue::String(s) => s.capacity(),
        JsonValue::Array(items) => items
            .iter()
            .map(|v| size_of::<JsonValue>() + json_heap_size(v))
            .sum(),
        JsonValue::Object(map) => map
            .iter()
            .map(|(k, v)| k.capacity() + size_of::<JsonValue>() + json_heap_size(v))
            .sum(),
        _ => 0,
    }
}

impl From<JsonValue> for Value {
    fn from(json: JsonValue) -> Self {
        match json {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Double(n.as_f64().unwrap_or(f64::NAN)),
            },
            other => Value::Doc(Arc::new(other)),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::doc(JsonValue::String(v.to_owned()))
    }
}

impl From<RangeValue> for Value {
    fn from(r: RangeValue) -> Self {
        Value::Range(Arc::new(r))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Empty, Value::Empty) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a == b,
            (Value::Doc(a), Value::Doc(b)) => Arc::ptr_eq(a, b) || a == b,
            (Value::Range(a), Value::Range(b)) => a == b,
            (Value::DocVec(a), Value::DocVec(b)) => {
                Arc::ptr_eq(a, b)
                    || (a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.ptr_eq(y)))
            }
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Empty => f.write_str("Empty"),
            Value::Null => f.write_str("Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Int(i) => write!(f, "Int({i})"),
            Value::Double(d) => write!(f, "Double({d})"),
            Value::Doc(d) => write!(f, "Doc({d})"),
            Value::Range(r) => write!(f, "Range({}..={})", r.low, r.high),
            Value::DocVec(v) => write!(f, "DocVec({} blocks)", v.len()),
        }
    }
}
