//! Small shared enums and aliases used by every layer of the pipeline.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Index of a register (column) inside a block.
pub type RegisterId = usize;

/// Number of registers of a block.
pub type RegisterCount = usize;

/// Tri-state answer of every pull call between operators.
///
/// * `Waiting`: upstream is suspended, unwind and call again later.
/// * `HasMore`: a result was produced and more may follow.
/// * `Done`: terminal; the call returning it may still carry a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExecutionState {
    Waiting,
    HasMore,
    Done,
}

impl ExecutionState {
    pub fn is_waiting(self) -> bool {
        self == ExecutionState::Waiting
    }

    pub fn is_done(self) -> bool {
        self == ExecutionState::Done
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionState::Waiting => "WAITING",
            ExecutionState::HasMore => "HASMORE",
            ExecutionState::Done => "DONE",
        };
        f.write_str(s)
    }
}

/// Whether an operator forwards upstream blocks unmodified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockPassthrough {
    Disable,
    Enable,
}

/// Wire format tag for serialized item blocks.
///
/// `ShadowRows` reserves a synthetic leading column carrying shadow-row
/// depths; `Classic` has no such column and cannot transport shadow rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerializationFormat {
    Classic,
    #[default]
    ShadowRows,
}

impl SerializationFormat {
    /// Number of synthetic columns this format prepends to the registers.
    pub fn reserved_columns(self) -> usize {
        match self {
            SerializationFormat::Classic => 0,
            SerializationFormat::ShadowRows => 1,
        }
    }
}

impl FromStr for SerializationFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "classic" => Ok(SerializationFormat::Classic),
            "shadowrows" | "shadow_rows" => Ok(SerializationFormat::ShadowRows),
            other => Err(Error::Config(format!(
                "unknown serialization format '{other}'"
            ))),
        }
    }
}
