use std::sync::atomic::{AtomicU64, Ordering};

/// A point in time copy of the cache counters.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CacheStats {
    /// Reads that found a live entry.
    pub hits: u64,
    /// Reads that found nothing.
    pub misses: u64,
    /// Writes that were admitted and stayed admitted.
    pub admitted: u64,
    /// Writes refused by the admission policy, immediately or on replay.
    pub rejected: u64,
    /// Entries removed by the eviction pass.
    pub evicted: u64,
    /// Read records lost to a full stripe.
    pub dropped_reads: u64,
    /// Completed drain passes.
    pub drains: u64,
}

impl CacheStats {
    /// Fraction of reads that hit, or zero before any read.
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct StatCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    admitted: AtomicU64,
    rejected: AtomicU64,
    evicted: AtomicU64,
    dropped_reads: AtomicU64,
    drains: AtomicU64,
}

impl StatCounters {
    pub(crate) fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn admit(&self) {
        self.admitted.fetch_add(1, Ordering::Relaxed);
    }

    // A deferred refusal takes back the admission it was counted as.
    pub(crate) fn reject(&self, was_admitted: bool) {
        if was_admitted {
            self.admitted.fetch_sub(1, Ordering::Relaxed);
        }
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn evict(&self) {
        self.evicted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn drop_read(&self) {
        self.dropped_reads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn drain(&self) {
        self.drains.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            admitted: self.admitted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            dropped_reads: self.dropped_reads.load(Ordering::Relaxed),
            drains: self.drains.load(Ordering::Relaxed),
        }
    }
}
