//! Cache usage statistics.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Subscriptions served from fresh data without a request.
    pub hits: u64,
    /// Subscriptions that had to issue a request.
    pub misses: u64,
    /// Subscriptions and refetches that joined an in-flight request.
    pub joined: u64,
    /// Requests issued to fetchers.
    pub requests: u64,
    /// Responses dropped because a newer request superseded them.
    pub discarded: u64,
    /// Entries removed after their grace window.
    pub evictions: u64,
    /// Invalidation passes applied.
    pub invalidations: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Fraction of demand served without a new request (0.0 to 1.0).
    ///
    /// Counts joined requests as served.
    pub fn dedup_rate(&self) -> f64 {
        let total = self.hits + self.misses + self.joined;
        if total == 0 {
            0.0
        } else {
            (self.hits + self.joined) as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    pub(crate) hits: AtomicU64,
    pub(crate) misses: AtomicU64,
    pub(crate) joined: AtomicU64,
    pub(crate) requests: AtomicU64,
    pub(crate) discarded: AtomicU64,
    pub(crate) evictions: AtomicU64,
    pub(crate) invalidations: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, entry_count: usize) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            joined: self.joined.load(Ordering::Relaxed),
            requests: self.requests.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            entry_count: entry_count as u64,
        }
    }
}
