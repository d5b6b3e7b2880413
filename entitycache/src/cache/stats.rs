// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Cache statistics
//!
//! Monotonic counters updated with relaxed atomic increments. They are used for
//! observability only and never feed control decisions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters of one cache instance
#[derive(Debug)]
pub struct CacheStatistics {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub count_hits: AtomicU64,
    pub count_misses: AtomicU64,

    // Scheduler
    pub jobs_enqueued: AtomicU64,
    pub jobs_merged: AtomicU64,
    pub jobs_started: AtomicU64,
    pub jobs_interrupted: AtomicU64,
    pub jobs_not_started: AtomicU64,
    pub jobs_failed: AtomicU64,
    pub jobs_requeued: AtomicU64,
    pub count_jobs_enqueued: AtomicU64,

    // Generations
    pub evictions: AtomicU64,
    pub invalidations: AtomicU64,
    pub publication_conflicts: AtomicU64,

    pub created_at: DateTime<Utc>,
}

impl Default for CacheStatistics {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStatistics {
    pub fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            count_hits: AtomicU64::new(0),
            count_misses: AtomicU64::new(0),
            jobs_enqueued: AtomicU64::new(0),
            jobs_merged: AtomicU64::new(0),
            jobs_started: AtomicU64::new(0),
            jobs_interrupted: AtomicU64::new(0),
            jobs_not_started: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
            jobs_requeued: AtomicU64::new(0),
            count_jobs_enqueued: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
            publication_conflicts: AtomicU64::new(0),
            created_at: Utc::now(),
        }
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_count_hit(&self) {
        self.count_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_count_miss(&self) {
        self.count_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Add `n` to `counter`
    pub fn add(counter: &AtomicU64, n: u64) {
        if n > 0 {
            counter.fetch_add(n, Ordering::Relaxed);
        }
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> StatisticsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        let hits = load(&self.hits);
        let misses = load(&self.misses);
        let count_hits = load(&self.count_hits);
        let count_misses = load(&self.count_misses);

        StatisticsSnapshot {
            timestamp: Utc::now(),
            created_at: self.created_at,
            hits,
            misses,
            hit_rate: rate(hits, misses),
            count_hits,
            count_misses,
            count_hit_rate: rate(count_hits, count_misses),
            jobs_enqueued: load(&self.jobs_enqueued),
            jobs_merged: load(&self.jobs_merged),
            jobs_started: load(&self.jobs_started),
            jobs_interrupted: load(&self.jobs_interrupted),
            jobs_not_started: load(&self.jobs_not_started),
            jobs_failed: load(&self.jobs_failed),
            jobs_requeued: load(&self.jobs_requeued),
            count_jobs_enqueued: load(&self.count_jobs_enqueued),
            evictions: load(&self.evictions),
            invalidations: load(&self.invalidations),
            publication_conflicts: load(&self.publication_conflicts),
        }
    }

    /// Reset all counters (useful for testing)
    pub fn reset(&self) {
        for counter in [
            &self.hits,
            &self.misses,
            &self.count_hits,
            &self.count_misses,
            &self.jobs_enqueued,
            &self.jobs_merged,
            &self.jobs_started,
            &self.jobs_interrupted,
            &self.jobs_not_started,
            &self.jobs_failed,
            &self.jobs_requeued,
            &self.count_jobs_enqueued,
            &self.evictions,
            &self.invalidations,
            &self.publication_conflicts,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

fn rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

/// Serializable copy of [`CacheStatistics`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,

    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub count_hits: u64,
    pub count_misses: u64,
    pub count_hit_rate: f64,

    pub jobs_enqueued: u64,
    pub jobs_merged: u64,
    pub jobs_started: u64,
    pub jobs_interrupted: u64,
    pub jobs_not_started: u64,
    pub jobs_failed: u64,
    pub jobs_requeued: u64,
    pub count_jobs_enqueued: u64,

    pub evictions: u64,
    pub invalidations: u64,
    pub publication_conflicts: u64,
}

impl StatisticsSnapshot {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Generate a human-readable summary
    pub fn summary(&self) -> String {
        format!(
            "Iterable cache ({}) - {:.1}% hit rate ({} hits, {} misses), \
             {:.1}% count hit rate, jobs: {} enqueued, {} merged, {} started, \
             {} interrupted, {} not started",
            self.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
            self.hit_rate * 100.0,
            self.hits,
            self.misses,
            self.count_hit_rate * 100.0,
            self.jobs_enqueued,
            self.jobs_merged,
            self.jobs_started,
            self.jobs_interrupted,
            self.jobs_not_started
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_rates() {
        let stats = CacheStatistics::new();
        stats.record_hit();
        stats.record_hit();
        stats.record_hit();
        stats.record_miss();
        CacheStatistics::incr(&stats.jobs_enqueued);
        CacheStatistics::add(&stats.invalidations, 5);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.hits, 3);
        assert_eq!(snapshot.misses, 1);
        assert!((snapshot.hit_rate - 0.75).abs() < f64::EPSILON);
        assert_eq!(snapshot.count_hit_rate, 0.0);
        assert_eq!(snapshot.jobs_enqueued, 1);
        assert_eq!(snapshot.invalidations, 5);
        assert!(snapshot.summary().contains("75.0% hit rate"));
    }

    #[test]
    fn test_json_export() {
        let stats = CacheStatistics::new();
        stats.record_count_miss();
        let json = stats.snapshot().to_json().expect("serializable");
        let parsed: serde_json::Value = serde_json::from_str(&json).expect("valid json");
        assert_eq!(parsed["count_misses"], 1);
        assert!(parsed["timestamp"].is_string());
    }

    #[test]
    fn test_reset() {
        let stats = CacheStatistics::new();
        stats.record_hit();
        CacheStatistics::incr(&stats.publication_conflicts);
        stats.reset();
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.hits, 0);
        assert_eq!(snapshot.publication_conflicts, 0);
    }
}
