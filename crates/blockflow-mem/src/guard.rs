//! ResourceMonitor + RAII guard implementations.
//!
//! Item blocks account their slot storage through a [`MemoryGuard`]; dropping
//! the guard returns the bytes to the monitor (panic-safe). Heap values are
//! accounted by the block itself through `increase_memory_usage` /
//! `decrease_memory_usage`.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use blockflow_core::budget::ResourceMonitor;
use blockflow_core::error::{Error, Result};

use crate::tracking::PeakTracker;

/// Shared inner state for the monitor.
struct MonitorInner {
    limit: usize,
    used: AtomicUsize,
    peak: PeakTracker,
}

impl MonitorInner {
    fn new(limit: usize) -> Self {
        Self {
            limit,
            used: AtomicUsize::new(0),
            peak: PeakTracker::new(),
        }
    }

    fn try_increase(&self, bytes: usize) -> Result<()> {
        loop {
            let cur = self.used.load(Ordering::Relaxed);
            let next = cur.saturating_add(bytes);
            if self.limit != 0 && next > self.limit {
                self.peak.reject();
                #[cfg(feature = "tracing")]
                tracing::debug!(
                    requested = bytes,
                    used = cur,
                    limit = self.limit,
                    "memory limit exceeded"
                );
                return Err(Error::ResourceLimitExceeded {
                    requested: bytes,
                    limit: self.limit,
                    used: cur,
                });
            }
            if self
                .used
                .compare_exchange(cur, next, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                self.peak.observe(next);
                return Ok(());
            }
        }
    }

    fn decrease(&self, bytes: usize) {
        let prev = self.used.fetch_sub(bytes, Ordering::AcqRel);
        debug_assert!(
            prev >= bytes,
            "monitor underflow: releasing {bytes} bytes with only {prev} accounted"
        );
    }
}

/// Concrete ResourceMonitor used by the engine. Cheap to clone; all clones
/// share one counter.
#[derive(Clone)]
pub struct ResourceMonitorImpl {
    inner: Arc<MonitorInner>,
}

impl ResourceMonitorImpl {
    /// A monitor enforcing `limit_bytes` (`0` = unlimited).
    pub fn new(limit_bytes: usize) -> Self {
        Self {
            inner: Arc::new(MonitorInner::new(limit_bytes)),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(0)
    }

    /// Current usage (advisory).
    pub fn used_bytes(&self) -> usize {
        self.inner.used.load(Ordering::Relaxed)
    }

    /// Highest usage observed so far.
    pub fn peak_bytes(&self) -> usize {
        self.inner.peak.peak()
    }

    /// Number of increases refused because of the limit.
    pub fn rejections(&self) -> usize {
        self.inner.peak.rejections()
    }

    /// Restart peak and rejection tracking from the current usage.
    pub fn reset_tracking(&self) {
        self.inner.peak.reset(self.used_bytes());
    }

    /// Type-erased handle for item blocks and pools.
    pub fn shared(&self) -> Arc<dyn ResourceMonitor> {
        Arc::new(self.clone())
    }
}

impl fmt::Debug for ResourceMonitorImpl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceMonitorImpl")
            .field("limit", &self.inner.limit)
            .field("used", &self.used_bytes())
            .field("peak", &self.peak_bytes())
            .finish()
    }
}

impl ResourceMonitor for ResourceMonitorImpl {
    fn increase_memory_usage(&self, bytes: usize) -> Result<()> {
        if bytes == 0 {
            return Ok(());
        }
        self.inner.try_increase(bytes)
    }

    fn decrease_memory_usage(&self, bytes: usize) {
        if bytes > 0 {
            self.inner.decrease(bytes);
        }
    }

    fn current_bytes(&self) -> usize {
        self.used_bytes()
    }

    fn limit_bytes(&self) -> usize {
        self.inner.limit
    }
}

/// RAII guard that accounts for a number of bytes.
/// Dropping it returns bytes to the monitor.
pub struct MemoryGuard {
    monitor: Arc<dyn ResourceMonitor>,
    bytes: usize,
    tag: &'static str,
}

impl MemoryGuard {
    /// Account `bytes` against `monitor`, failing if the limit would be crossed.
    pub fn acquire(
        monitor: Arc<dyn ResourceMonitor>,
        bytes: usize,
        tag: &'static str,
    ) -> Result<Self> {
        monitor.increase_memory_usage(bytes)?;
        Ok(Self {
            monitor,
            bytes,
            tag,
        })
    }

    /// A guard holding zero bytes; never fails.
    pub fn empty(monitor: Arc<dyn ResourceMonitor>, tag: &'static str) -> Self {
        Self {
            monitor,
            bytes: 0,
            tag,
        }
    }

    /// Number of bytes currently accounted for by this guard.
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    pub fn tag(&self) -> &'static str {
        self.tag
    }

    pub fn monitor(&self) -> &Arc<dyn ResourceMonitor> {
        &self.monitor
    }

    /// Resize this guard to a new byte count.
    /// Shrinking always succeeds; growing fails without side effects if the
    /// extra bytes would exceed the limit.
    pub fn try_resize(&mut self, new_bytes: usize) -> Result<()> {
        if new_bytes < self.bytes {
            self.monitor.decrease_memory_usage(self.bytes - new_bytes);
        } else if new_bytes > self.bytes {
            self.monitor.increase_memory_usage(new_bytes - self.bytes)?;
        }
        self.bytes = new_bytes;
        Ok(())
    }

    /// Infallible variant of `try_resize` for the shrinking direction.
    pub fn shrink_to(&mut self, new_bytes: usize) {
        debug_assert!(new_bytes <= self.bytes, "shrink_to cannot grow a guard");
        if new_bytes < self.bytes {
            self.monitor.decrease_memory_usage(self.bytes - new_bytes);
            self.bytes = new_bytes;
        }
    }
}

impl Drop for MemoryGuard {
    fn drop(&mut self) {
        if self.bytes > 0 {
            self.monitor.decrease_memory_usage(self.bytes);
            // NOTE: do not log here to keep drop path fast.
            self.bytes = 0;
        }
    }
}

impl fmt::Debug for MemoryGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryGuard")
            .field("bytes", &self.bytes)
            .field("tag", &self.tag)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_acquire_and_drop() {
        let monitor = ResourceMonitorImpl::new(1024);
        {
            let guard = MemoryGuard::acquire(monitor.shared(), 100, "test").unwrap();
            assert_eq!(guard.bytes(), 100);
            assert_eq!(monitor.used_bytes(), 100);
        }
        assert_eq!(monitor.used_bytes(), 0);
        assert_eq!(monitor.peak_bytes(), 100);
    }

    #[test]
    fn limit_is_enforced_without_side_effects() {
        let monitor = ResourceMonitorImpl::new(500);
        let _held = MemoryGuard::acquire(monitor.shared(), 400, "test").unwrap();
        let err = MemoryGuard::acquire(monitor.shared(), 200, "test").unwrap_err();
        assert!(matches!(
            err,
            Error::ResourceLimitExceeded {
                requested: 200,
                limit: 500,
                used: 400
            }
        ));
        assert_eq!(monitor.used_bytes(), 400);
        assert_eq!(monitor.rejections(), 1);
        monitor.reset_tracking();
        assert_eq!(monitor.peak_bytes(), 400);
        assert_eq!(monitor.rejections(), 0);
    }

    #[test]
    fn resize_grows_and_shrinks() {
        let monitor = ResourceMonitorImpl::new(1000);
        let mut guard = MemoryGuard::empty(monitor.shared(), "slots");
        guard.try_resize(600).unwrap();
        assert_eq!(monitor.used_bytes(), 600);
        assert!(guard.try_resize(1200).is_err());
        assert_eq!(guard.bytes(), 600);
        assert_eq!(monitor.used_bytes(), 600);
        guard.try_resize(100).unwrap();
        assert_eq!(monitor.used_bytes(), 100);
        drop(guard);
        assert_eq!(monitor.used_bytes(), 0);
    }

    #[test]
    fn unlimited_monitor_accepts_anything() {
        let monitor = ResourceMonitorImpl::unlimited();
        monitor.increase_memory_usage(usize::MAX / 2).unwrap();
        assert_eq!(monitor.limit_bytes(), 0);
        monitor.decrease_memory_usage(usize::MAX / 2);
        assert_eq!(monitor.current_bytes(), 0);
    }
}
