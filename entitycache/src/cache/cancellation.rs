// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Cooperative cancellation of background materialization
//!
//! A [`CancellationPolicy`] is installed for every job before the backend starts
//! reading. The backend polls [`CancellationPolicy::check`] at iteration boundaries and
//! returns the [`Cancelled`] value it gets back, which the scheduler catches once at
//! the job boundary.

use arc_swap::ArcSwap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::clock::SharedClock;
use super::error::Cancelled;
use super::snapshot::CacheSnapshot;

/// Why a job was cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CancelReason {
    /// A newer snapshot was published; a consistent result would be stale
    CacheAdapterObsolete,
    /// The job ran past its execution timeout
    JobOverdue,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::CacheAdapterObsolete => f.write_str("cache adapter obsolete"),
            CancelReason::JobOverdue => f.write_str("job overdue"),
        }
    }
}

/// Per-job cancellation state
pub struct CancellationPolicy {
    snapshot: Arc<CacheSnapshot>,
    current: Arc<ArcSwap<CacheSnapshot>>,
    clock: SharedClock,
    consistent: bool,
    started_at: Instant,
    timeout: Duration,
}

impl CancellationPolicy {
    /// Policy for a job reading `snapshot`, started now
    pub fn new(
        snapshot: Arc<CacheSnapshot>,
        current: Arc<ArcSwap<CacheSnapshot>>,
        clock: SharedClock,
        consistent: bool,
        timeout: Duration,
    ) -> Self {
        let started_at = clock.now();
        Self {
            snapshot,
            current,
            clock,
            consistent,
            started_at,
            timeout,
        }
    }

    /// The reason this job must stop, if any
    pub fn must_cancel(&self) -> Option<CancelReason> {
        if self.consistent {
            let current = self.current.load();
            if !Arc::ptr_eq(&self.snapshot, &*current) {
                return Some(CancelReason::CacheAdapterObsolete);
            }
        }
        if self.elapsed() > self.timeout {
            return Some(CancelReason::JobOverdue);
        }
        None
    }

    pub fn check(&self) -> Result<(), Cancelled> {
        match self.must_cancel() {
            Some(reason) => Err(Cancelled::new(reason)),
            None => Ok(()),
        }
    }

    /// Snapshot current when the job started
    pub fn snapshot(&self) -> &Arc<CacheSnapshot> {
        &self.snapshot
    }

    pub fn is_consistent(&self) -> bool {
        self.consistent
    }

    pub fn elapsed(&self) -> Duration {
        self.clock.now().saturating_duration_since(self.started_at)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl fmt::Debug for CancellationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationPolicy")
            .field("snapshot_version", &self.snapshot.version())
            .field("consistent", &self.consistent)
            .field("elapsed", &self.elapsed())
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::cache_item::ReclaimablePool;
    use crate::cache::clock::ManualClock;
    use crate::cache::snapshot::GenerationSettings;

    fn current() -> Arc<ArcSwap<CacheSnapshot>> {
        let settings = Arc::new(GenerationSettings {
            capacity: 8,
            max_direct_value_size: 8,
            index_compaction_threshold: 8,
            pool: Arc::new(ReclaimablePool::new(8)),
        });
        Arc::new(ArcSwap::from_pointee(CacheSnapshot::empty(settings)))
    }

    fn publish_next(current: &ArcSwap<CacheSnapshot>) {
        let next = current.load().to_mutable().publish();
        current.store(Arc::new(next));
    }

    #[test]
    fn test_running_policy_passes() {
        let current = current();
        let clock = Arc::new(ManualClock::new());
        let policy = CancellationPolicy::new(
            current.load_full(),
            Arc::clone(&current),
            clock,
            true,
            Duration::from_secs(10),
        );
        assert!(policy.check().is_ok());
    }

    #[test]
    fn test_consistent_job_becomes_obsolete() {
        let current = current();
        let clock = Arc::new(ManualClock::new());
        let policy = CancellationPolicy::new(
            current.load_full(),
            Arc::clone(&current),
            clock,
            true,
            Duration::from_secs(10),
        );
        publish_next(&current);
        assert_eq!(
            policy.check(),
            Err(Cancelled::new(CancelReason::CacheAdapterObsolete))
        );
    }

    #[test]
    fn test_best_effort_job_tolerates_new_snapshot() {
        let current = current();
        let clock = Arc::new(ManualClock::new());
        let policy = CancellationPolicy::new(
            current.load_full(),
            Arc::clone(&current),
            clock,
            false,
            Duration::from_secs(10),
        );
        publish_next(&current);
        assert!(policy.check().is_ok());
    }

    #[test]
    fn test_overdue() {
        let current = current();
        let clock = Arc::new(ManualClock::new());
        let policy = CancellationPolicy::new(
            current.load_full(),
            Arc::clone(&current),
            clock.clone(),
            false,
            Duration::from_secs(1),
        );
        clock.advance(Duration::from_millis(1500));
        assert_eq!(policy.must_cancel(), Some(CancelReason::JobOverdue));
        assert_eq!(
            Cancelled::new(CancelReason::JobOverdue).to_string(),
            "Materialization cancelled: job overdue"
        );
    }
}
