//! Abstract resource monitor interface.
//!
//! The concrete implementation lives in `blockflow-mem`. Item blocks hold an
//! `Arc<dyn ResourceMonitor>` and report every byte they attribute to
//! themselves, so a query's memory footprint is always visible in one place.

use crate::error::Result;

/// Per-query memory accounting.
///
/// `increase_memory_usage` is the only place where a quota is enforced. A
/// failed increase leaves the counter untouched, so callers only have to undo
/// their own partial work before propagating the error.
pub trait ResourceMonitor: Send + Sync + 'static {
    /// Account `bytes` more. Fails with `Error::ResourceLimitExceeded` if the
    /// configured limit would be crossed.
    fn increase_memory_usage(&self, bytes: usize) -> Result<()>;

    /// Give back `bytes` previously accounted through `increase_memory_usage`.
    fn decrease_memory_usage(&self, bytes: usize);

    /// Currently accounted bytes (advisory).
    fn current_bytes(&self) -> usize;

    /// Configured limit in bytes. `0` means unlimited.
    fn limit_bytes(&self) -> usize;
}

// NOTE: no blanket/no-op impl here on purpose. Tests use the real monitor from
// `blockflow-mem` with a limit of 0.
