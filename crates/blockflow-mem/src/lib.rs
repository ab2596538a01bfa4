#![forbid(unsafe_code)]
//! blockflow-mem: the concrete resource monitor.
//!
//! Implements `blockflow_core::budget::ResourceMonitor`. Item blocks report
//! their slot storage through a [`MemoryGuard`] and their heap values through
//! direct increase/decrease calls; both end up in the same counter.

pub mod guard;
pub mod tracking;

pub use guard::{MemoryGuard, ResourceMonitorImpl};
pub use tracking::PeakTracker;
