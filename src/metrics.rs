//! Tier hit/miss accounting.
//!
//! Each segment keeps best-effort relaxed counters for the two value tiers:
//! "heap" (identity substitutes) and "disk" (proxy substitutes). The store
//! aggregates them into a [`TierMetrics`] snapshot. Exact semantics are not
//! promised under concurrent updates; the counters are hot-path friendly.

use std::sync::atomic::{AtomicU64, Ordering};

/// Per-segment tier counters.
#[derive(Debug, Default)]
pub(crate) struct TierCounters {
    heap_hit: AtomicU64,
    heap_miss: AtomicU64,
    disk_hit: AtomicU64,
    disk_miss: AtomicU64,
}

impl TierCounters {
    #[inline]
    pub(crate) fn record_heap_hit(&self) {
        self.heap_hit.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_heap_miss(&self) {
        self.heap_miss.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_disk_hit(&self) {
        self.disk_hit.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_disk_miss(&self) {
        self.disk_miss.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> TierMetrics {
        TierMetrics {
            heap_hits: self.heap_hit.load(Ordering::Relaxed),
            heap_misses: self.heap_miss.load(Ordering::Relaxed),
            disk_hits: self.disk_hit.load(Ordering::Relaxed),
            disk_misses: self.disk_miss.load(Ordering::Relaxed),
        }
    }
}

/// Aggregated tier hit/miss counts.
///
/// Ratios are derived from summed counts rather than by combining
/// per-segment rates, so they are independent of the stripe count.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TierMetrics {
    /// Lookups satisfied by an in-heap element.
    pub heap_hits: u64,
    /// Lookups that found no in-heap element (the value was a proxy, or the
    /// key was absent).
    pub heap_misses: u64,
    /// Lookups satisfied by a proxy substitute.
    pub disk_hits: u64,
    /// Lookups that found no mapping at all.
    pub disk_misses: u64,
}

impl TierMetrics {
    /// Fraction of lookups satisfied from the heap tier, or 0.0 when no
    /// lookups were recorded.
    pub fn heap_hit_ratio(&self) -> f64 {
        ratio(self.heap_hits, self.heap_misses)
    }

    /// Fraction of heap misses satisfied from the proxy tier, or 0.0 when no
    /// lookups reached it.
    pub fn disk_hit_ratio(&self) -> f64 {
        ratio(self.disk_hits, self.disk_misses)
    }

    /// Combine two snapshots by summing their counts.
    pub fn merged(self, other: TierMetrics) -> TierMetrics {
        TierMetrics {
            heap_hits: self.heap_hits + other.heap_hits,
            heap_misses: self.heap_misses + other.heap_misses,
            disk_hits: self.disk_hits + other.disk_hits,
            disk_misses: self.disk_misses + other.disk_misses,
        }
    }
}

fn ratio(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}
