//! Buffer manager metrics.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters tracked by the buffer manager.
///
/// All fields are atomic for lock-free, thread-safe updates. Like all
/// statistics they use `Ordering::Relaxed`: each counter is exact, but
/// different counters are not synchronized with each other.
///
/// # Example
/// ```
/// use tierpool::Metrics;
/// use std::sync::atomic::Ordering;
///
/// let metrics = Metrics::new();
/// metrics.total_hits.fetch_add(3, Ordering::Relaxed);
/// metrics.total_misses.fetch_add(1, Ordering::Relaxed);
/// assert_eq!(metrics.snapshot().hit_rate(), 0.75);
/// ```
#[derive(Debug, Default)]
pub struct Metrics {
    /// Pins that found the page resident.
    pub total_hits: AtomicU64,

    /// Pins that had to read the page from the block device.
    pub total_misses: AtomicU64,

    /// Hits on pages resident in the secondary tier.
    pub secondary_hits: AtomicU64,

    pub total_bytes_read: AtomicU64,
    pub total_bytes_written: AtomicU64,

    pub current_bytes_used_dram: AtomicU64,
    pub current_bytes_used_secondary: AtomicU64,

    /// High-water mark of both tiers combined.
    pub max_bytes_used: AtomicU64,

    pub num_allocs: AtomicU64,
    pub num_deallocs: AtomicU64,

    /// Bytes requested by allocations.
    pub total_allocated_bytes: AtomicU64,

    /// Page capacity handed out beyond the requested bytes.
    pub total_unused_bytes: AtomicU64,

    /// Pages that left a memory tier.
    pub num_evictions: AtomicU64,

    /// DRAM victims moved to the secondary tier.
    pub num_migrations: AtomicU64,

    /// Secondary pages moved back to DRAM on access.
    pub num_promotions: AtomicU64,

    /// Eviction candidates dropped because their frame changed.
    pub num_stale_candidates: AtomicU64,

    pub num_madvise_free_calls: AtomicU64,
    pub num_placement_calls: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment a counter by one.
    #[inline]
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add(counter: &AtomicU64, value: usize) {
        counter.fetch_add(value as u64, Ordering::Relaxed);
    }

    /// Record the current usage of both tiers and update the high-water mark.
    pub(crate) fn record_usage(&self, dram: usize, secondary: usize) {
        self.current_bytes_used_dram.store(dram as u64, Ordering::Relaxed);
        self.current_bytes_used_secondary
            .store(secondary as u64, Ordering::Relaxed);
        self.max_bytes_used
            .fetch_max((dram + secondary) as u64, Ordering::Relaxed);
    }

    /// Get a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        MetricsSnapshot {
            total_hits: load(&self.total_hits),
            total_misses: load(&self.total_misses),
            secondary_hits: load(&self.secondary_hits),
            total_bytes_read: load(&self.total_bytes_read),
            total_bytes_written: load(&self.total_bytes_written),
            current_bytes_used_dram: load(&self.current_bytes_used_dram),
            current_bytes_used_secondary: load(&self.current_bytes_used_secondary),
            max_bytes_used: load(&self.max_bytes_used),
            num_allocs: load(&self.num_allocs),
            num_deallocs: load(&self.num_deallocs),
            total_allocated_bytes: load(&self.total_allocated_bytes),
            total_unused_bytes: load(&self.total_unused_bytes),
            num_evictions: load(&self.num_evictions),
            num_migrations: load(&self.num_migrations),
            num_promotions: load(&self.num_promotions),
            num_stale_candidates: load(&self.num_stale_candidates),
            num_madvise_free_calls: load(&self.num_madvise_free_calls),
            num_placement_calls: load(&self.num_placement_calls),
        }
    }

    /// Reset all event counters to zero.
    ///
    /// Current usage is a gauge, not an event counter, and is kept. The
    /// high-water mark restarts from current usage.
    pub fn reset(&self) {
        for counter in [
            &self.total_hits,
            &self.total_misses,
            &self.secondary_hits,
            &self.total_bytes_read,
            &self.total_bytes_written,
            &self.num_allocs,
            &self.num_deallocs,
            &self.total_allocated_bytes,
            &self.total_unused_bytes,
            &self.num_evictions,
            &self.num_migrations,
            &self.num_promotions,
            &self.num_stale_candidates,
            &self.num_madvise_free_calls,
            &self.num_placement_calls,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        let current = self.current_bytes_used_dram.load(Ordering::Relaxed)
            + self.current_bytes_used_secondary.load(Ordering::Relaxed);
        self.max_bytes_used.store(current, Ordering::Relaxed);
    }
}

/// A point-in-time copy of [`Metrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub total_hits: u64,
    pub total_misses: u64,
    pub secondary_hits: u64,
    pub total_bytes_read: u64,
    pub total_bytes_written: u64,
    pub current_bytes_used_dram: u64,
    pub current_bytes_used_secondary: u64,
    pub max_bytes_used: u64,
    pub num_allocs: u64,
    pub num_deallocs: u64,
    pub total_allocated_bytes: u64,
    pub total_unused_bytes: u64,
    pub num_evictions: u64,
    pub num_migrations: u64,
    pub num_promotions: u64,
    pub num_stale_candidates: u64,
    pub num_madvise_free_calls: u64,
    pub num_placement_calls: u64,
}

impl MetricsSnapshot {
    /// Fraction of pins that were hits (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.total_hits + self.total_misses;
        if total == 0 {
            0.0
        } else {
            self.total_hits as f64 / total as f64
        }
    }

    /// Fraction of allocated page capacity left unused (0.0 to 1.0).
    pub fn internal_fragmentation(&self) -> f64 {
        let capacity = self.total_allocated_bytes + self.total_unused_bytes;
        if capacity == 0 {
            0.0
        } else {
            self.total_unused_bytes as f64 / capacity as f64
        }
    }
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Metrics {{ hits: {}, misses: {}, hit_rate: {:.2}%, read: {} B, written: {} B, \
             dram: {} B, secondary: {} B, evictions: {}, migrations: {} }}",
            self.total_hits,
            self.total_misses,
            self.hit_rate() * 100.0,
            self.total_bytes_read,
            self.total_bytes_written,
            self.current_bytes_used_dram,
            self.current_bytes_used_secondary,
            self.num_evictions,
            self.num_migrations
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = Metrics::new();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
        assert_eq!(metrics.snapshot().hit_rate(), 0.0);
    }

    #[test]
    fn test_record_usage_tracks_high_water_mark() {
        let metrics = Metrics::new();
        metrics.record_usage(8192, 4096);
        metrics.record_usage(4096, 0);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.current_bytes_used_dram, 4096);
        assert_eq!(snapshot.current_bytes_used_secondary, 0);
        assert_eq!(snapshot.max_bytes_used, 12288);
    }

    #[test]
    fn test_internal_fragmentation() {
        let metrics = Metrics::new();
        Metrics::add(&metrics.total_allocated_bytes, 5000);
        Metrics::add(&metrics.total_unused_bytes, 8192 - 5000);
        let snapshot = metrics.snapshot();
        assert!((snapshot.internal_fragmentation() - 3192.0 / 8192.0).abs() < 1e-9);
    }

    #[test]
    fn test_metrics_reset() {
        let metrics = Metrics::new();
        Metrics::bump(&metrics.total_hits);
        metrics.record_usage(4096, 0);
        metrics.record_usage(0, 0);

        metrics.reset();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_hits, 0);
        assert_eq!(snapshot.max_bytes_used, 0);
    }

    #[test]
    fn test_metrics_display() {
        let metrics = Metrics::new();
        metrics.total_hits.fetch_add(80, Ordering::Relaxed);
        metrics.total_misses.fetch_add(20, Ordering::Relaxed);

        let display = format!("{}", metrics.snapshot());
        assert!(display.contains("hits: 80"));
        assert!(display.contains("misses: 20"));
        assert!(display.contains("80.00%"));
    }
}
