//! Usage statistics kept next to the monitor counter.

use std::sync::atomic::{AtomicUsize, Ordering};

/// High-water mark of accounted bytes and the number of refused increases.
#[derive(Debug, Default)]
pub struct PeakTracker {
    peak_bytes: AtomicUsize,
    rejections: AtomicUsize,
}

impl PeakTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Note a successful increase that brought usage to `used_bytes`.
    pub fn observe(&self, used_bytes: usize) {
        let previous = self.peak_bytes.fetch_max(used_bytes, Ordering::AcqRel);
        if used_bytes > previous {
            #[cfg(feature = "tracing")]
            tracing::trace!(peak = used_bytes, "new peak usage");
        }
    }

    /// Note an increase refused by the limit.
    pub fn reject(&self) {
        self.rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn peak(&self) -> usize {
        self.peak_bytes.load(Ordering::Relaxed)
    }

    pub fn rejections(&self) -> usize {
        self.rejections.load(Ordering::Relaxed)
    }

    /// Start a new measurement window, e.g. between benchmark iterations.
    pub fn reset(&self, current_bytes: usize) {
        self.peak_bytes.store(current_bytes, Ordering::Relaxed);
        self.rejections.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_high_water_mark() {
        let t = PeakTracker::new();
        t.observe(10);
        t.observe(40);
        t.observe(20);
        assert_eq!(t.peak(), 40);
        t.reject();
        assert_eq!(t.rejections(), 1);
        t.reset(20);
        assert_eq!(t.peak(), 20);
        assert_eq!(t.rejections(), 0);
    }
}
