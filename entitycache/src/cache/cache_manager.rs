// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Central cache service
//!
//! [`IterableCache`] owns the current snapshot reference and coordinates the read
//! path, commit-time invalidation and background materialization. The snapshot is
//! replaced, never mutated: every writer builds a [`MutableGeneration`] from the
//! snapshot it read and publishes it with one compare-and-swap.

use arc_swap::ArcSwap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::storage::{StoreBackend, StoreError};
use crate::txn::{may_schedule, TransactionView};

use super::{
    cache_item::ReclaimablePool,
    cancellation::{CancelReason, CancellationPolicy},
    clock::{SharedClock, SystemClock},
    error::{CacheError, Cancelled},
    generation::MutableGeneration,
    handle::IterableHandle,
    iterable::CachedValue,
    mutation::MutationDescriptor,
    scheduler::{JobContext, JobKey, JobKind, JobScheduler, JobTarget, Priority, ScheduleOutcome},
    snapshot::{CacheSnapshot, GenerationSettings, SnapshotLookup},
    stats::{CacheStatistics, StatisticsSnapshot},
    trackers::{CountCache, DeferredTracker, HeavyIterables},
    CacheConfig,
};

/// Attempts a best-effort job makes to publish its result against newer snapshots
const MAX_PUBLISH_ATTEMPTS: usize = 3;

/// Versioned iterable cache
///
/// Cheap to clone; clones share the same cache.
#[derive(Clone)]
pub struct IterableCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    config: CacheConfig,
    current: Arc<ArcSwap<CacheSnapshot>>,
    settings: Arc<GenerationSettings>,
    backend: Arc<dyn StoreBackend>,
    scheduler: JobScheduler,
    deferred: DeferredTracker,
    counts: CountCache,
    heavy: HeavyIterables,
    stats: Arc<CacheStatistics>,
    clock: SharedClock,
}

impl IterableCache {
    /// Create a cache reading from `backend`
    pub fn new(config: CacheConfig, backend: Arc<dyn StoreBackend>) -> Result<Self, CacheError> {
        Self::with_clock(config, backend, Arc::new(SystemClock))
    }

    /// Create a cache whose deadlines, dwell times and lifetimes follow `clock`
    pub fn with_clock(
        config: CacheConfig,
        backend: Arc<dyn StoreBackend>,
        clock: SharedClock,
    ) -> Result<Self, CacheError> {
        config.validate()?;

        let settings = Arc::new(GenerationSettings {
            capacity: config.capacity.max(1),
            max_direct_value_size: config.max_direct_value_size,
            index_compaction_threshold: config.index_compaction_threshold,
            pool: Arc::new(ReclaimablePool::new(config.reclaimable_pool_capacity)),
        });
        let stats = Arc::new(CacheStatistics::new());
        let scheduler = JobScheduler::new(
            config.consistent_workers,
            config.best_effort_workers,
            config.job_start_timeout,
            Arc::clone(&clock),
            Arc::clone(&stats),
        )?;

        log::debug!(
            "Iterable cache created: capacity {}, {} consistent / {} best-effort workers",
            settings.capacity,
            config.consistent_workers,
            config.best_effort_workers
        );

        Ok(Self {
            inner: Arc::new(CacheInner {
                current: Arc::new(ArcSwap::from_pointee(CacheSnapshot::empty(Arc::clone(
                    &settings,
                )))),
                settings,
                backend,
                scheduler,
                deferred: DeferredTracker::new(config.deferred_tracker_size, config.deferred_delay),
                counts: CountCache::new(
                    config.counts_cache_size,
                    config.counts_lifetime,
                    config.counts_max_lifetime,
                ),
                heavy: HeavyIterables::new(
                    config.heavy_iterables_cache_size,
                    config.heavy_iterables_lifespan,
                ),
                stats,
                clock,
                config,
            }),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.config.enabled
    }

    /// The current snapshot
    pub fn snapshot(&self) -> Arc<CacheSnapshot> {
        self.inner.current.load_full()
    }

    /// Pool holding the large cached values; the memory manager shrinks it
    pub fn reclaimable_pool(&self) -> &Arc<ReclaimablePool> {
        &self.inner.settings.pool
    }

    /// Resolve `handle` against the current snapshot without touching statistics
    /// or scheduling anything
    pub fn lookup(&self, handle: &IterableHandle) -> Option<CachedValue> {
        let snapshot = self.snapshot();
        self.inner.resolve(&snapshot, handle)
    }

    /// Return the cached value for `handle`, or `None` meaning "compute it yourself"
    ///
    /// A miss observed by an eligible transaction schedules background caching,
    /// subject to the deferred-caching heuristic when the cache is under pressure.
    pub fn put_if_not_cached(
        &self,
        handle: &IterableHandle,
        txn: &dyn TransactionView,
    ) -> Option<CachedValue> {
        let inner = &self.inner;
        if !inner.config.enabled || !handle.is_cacheable() {
            return None;
        }

        let snapshot = self.snapshot();
        let now = inner.clock.now();
        if let Some(value) = inner.resolve(&snapshot, handle) {
            if handle.is_sticky() || !handle.is_expired(now) {
                inner.stats.record_hit();
                return Some(value);
            }
            log::debug!("Cached value for {} expired", handle.id());
        }
        inner.stats.record_miss();

        if !may_schedule(txn) {
            return None;
        }
        if handle.is_consistent() && inner.heavy.is_heavy(handle.id(), now) {
            log::debug!("Not caching heavy iterable {}", handle.id());
            return None;
        }
        if !snapshot.is_sparse() && !inner.deferred.should_cache(handle.id(), now) {
            log::debug!("Caching of {} deferred", handle.id());
            return None;
        }

        inner.schedule(handle.clone(), JobTarget::Materialize, Priority::Normal, now);
        None
    }

    /// Cached approximate count of `handle`, if still fresh
    pub fn get_cached_count(&self, handle: &IterableHandle) -> Option<u64> {
        let inner = &self.inner;
        match inner.counts.get(handle.id(), inner.clock.now()) {
            Some(count) => {
                inner.stats.record_count_hit();
                Some(count)
            }
            None => {
                inner.stats.record_count_miss();
                None
            }
        }
    }

    pub fn set_cached_count(&self, handle: &IterableHandle, count: u64) {
        let inner = &self.inner;
        inner.counts.set(handle.id(), count, inner.clock.now());
    }

    /// Cached count of `handle`, scheduling a best-effort count job on a miss
    pub fn count_or_schedule(
        &self,
        handle: &IterableHandle,
        txn: &dyn TransactionView,
    ) -> Option<u64> {
        if let Some(count) = self.get_cached_count(handle) {
            return Some(count);
        }
        let inner = &self.inner;
        if inner.config.enabled && handle.is_cacheable() && may_schedule(txn) {
            inner.schedule(
                handle.clone(),
                JobTarget::Count,
                Priority::Normal,
                inner.clock.now(),
            );
        }
        None
    }

    /// Evict everything `mutations` affect, retrying against newer snapshots until
    /// the publication wins; returns the number of evicted entries
    pub fn invalidate(&self, mutations: &[MutationDescriptor]) -> usize {
        loop {
            let base = self.snapshot();
            match self.try_invalidate(&base, mutations) {
                Ok(evicted) => return evicted,
                Err(e) => log::debug!("Retrying invalidation: {}", e),
            }
        }
    }

    /// Single invalidation attempt against `base`
    ///
    /// Fails with [`CacheError::StaleGeneration`] if `base` is no longer current; the
    /// caller rebuilds from the new snapshot or drops the update.
    ///
    /// Sticky objects are shared by every snapshot and absorb the mutations only after
    /// the publication wins, so a losing attempt never applies them. Between the swap
    /// and the absorption a reader can load the new snapshot and still see the sticky
    /// values as of `base`. The window closes before this call returns.
    pub fn try_invalidate(
        &self,
        base: &Arc<CacheSnapshot>,
        mutations: &[MutationDescriptor],
    ) -> Result<usize, CacheError> {
        let inner = &self.inner;
        let mut generation = base.to_mutable();
        let evicted: usize = mutations
            .iter()
            .map(|m| generation.evict_affected(m))
            .sum();

        let published = inner.publish(base, generation)?;
        // Sticky objects are shared across generations; absorb once, after winning.
        for mutation in mutations {
            published.apply_to_sticky(mutation);
        }
        CacheStatistics::add(&inner.stats.invalidations, evicted as u64);
        if evicted > 0 {
            log::debug!(
                "Invalidated {} entries, published version {}",
                evicted,
                published.version()
            );
        }
        Ok(evicted)
    }

    /// Publish a generation the caller built from `base`
    ///
    /// Fails with [`CacheError::StaleGeneration`] if another publication won first;
    /// the generation is then discarded.
    pub fn try_publish(
        &self,
        base: &Arc<CacheSnapshot>,
        generation: MutableGeneration,
    ) -> Result<Arc<CacheSnapshot>, CacheError> {
        self.inner.publish(base, generation)
    }

    /// Cache a value the caller already materialized
    pub fn insert(&self, handle: &IterableHandle, value: CachedValue) {
        self.inner.publish_with(|generation| {
            generation.insert(handle.clone(), Arc::clone(&value))
        });
    }

    /// Register the persistent updatable object of a sticky handle
    ///
    /// # Panics
    /// If `value` is not updatable.
    pub fn register_sticky(&self, handle: &IterableHandle, value: CachedValue) {
        self.inner.publish_with(|generation| {
            generation.register_sticky(handle.clone(), Arc::clone(&value))
        });
    }

    /// Drop every ordinary entry and cached count; sticky objects stay registered
    pub fn clear(&self) {
        self.inner.publish_with(MutableGeneration::clear);
        self.inner.counts.clear();
        self.inner.deferred.clear();
    }

    pub fn statistics(&self) -> StatisticsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Block until no background job is queued or running; `false` on timeout
    pub fn wait_for_jobs(&self, timeout: Duration) -> bool {
        self.inner.scheduler.wait_idle(timeout)
    }

    /// Whether a background job for `handle` is queued
    pub fn is_job_queued(&self, handle: &IterableHandle) -> bool {
        let kind = JobKind::of(handle.is_consistent());
        let key = JobKey::materialize(handle.id().clone());
        self.inner.scheduler.is_queued(&key, kind)
    }

    /// Whether a count job for `handle` is queued
    pub fn is_count_queued(&self, handle: &IterableHandle) -> bool {
        let key = JobKey::count(handle.id().clone());
        self.inner.scheduler.is_queued(&key, JobKind::BestEffort)
    }

    /// Whether `handle` is cooling down after a consistent job timed out
    pub fn is_heavy(&self, handle: &IterableHandle) -> bool {
        let inner = &self.inner;
        inner.heavy.is_heavy(handle.id(), inner.clock.now())
    }
}

impl std::fmt::Debug for IterableCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IterableCache")
            .field("snapshot", &*self.inner.current.load())
            .field("scheduler", &self.inner.scheduler)
            .finish()
    }
}

impl CacheInner {
    /// Resolve `handle`; a dead reclaimable entry is removed on the way
    fn resolve(&self, snapshot: &Arc<CacheSnapshot>, handle: &IterableHandle) -> Option<CachedValue> {
        match snapshot.lookup(handle) {
            SnapshotLookup::Hit(value) => Some(value),
            SnapshotLookup::Miss => None,
            SnapshotLookup::Reclaimed => {
                self.remove_dead(snapshot, handle);
                None
            }
        }
    }

    fn remove_dead(&self, snapshot: &Arc<CacheSnapshot>, handle: &IterableHandle) {
        let mut generation = snapshot.to_mutable();
        generation.remove(handle);
        // Best effort: whoever touches the entry next retries.
        if self.publish(snapshot, generation).is_ok() {
            log::debug!("Removed reclaimed entry {}", handle.id());
        }
    }

    /// Compare-and-swap `generation` over `base`
    fn publish(
        &self,
        base: &Arc<CacheSnapshot>,
        generation: MutableGeneration,
    ) -> Result<Arc<CacheSnapshot>, CacheError> {
        let evictions = generation.evictions();
        let next = Arc::new(generation.publish());
        let previous = self.current.compare_and_swap(base, Arc::clone(&next));
        if !Arc::ptr_eq(&*previous, base) {
            CacheStatistics::incr(&self.stats.publication_conflicts);
            return Err(CacheError::StaleGeneration {
                expected: base.version(),
                actual: previous.version(),
            });
        }
        CacheStatistics::add(&self.stats.evictions, evictions);
        Ok(next)
    }

    /// Apply `change` to the current snapshot until the publication wins
    fn publish_with<F>(&self, mut change: F) -> Arc<CacheSnapshot>
    where
        F: FnMut(&mut MutableGeneration),
    {
        loop {
            let base = self.current.load_full();
            let mut generation = base.to_mutable();
            change(&mut generation);
            if let Ok(published) = self.publish(&base, generation) {
                return published;
            }
        }
    }

    fn schedule(
        self: &Arc<Self>,
        handle: IterableHandle,
        target: JobTarget,
        priority: Priority,
        queued_at: Instant,
    ) -> ScheduleOutcome {
        let kind = match target {
            JobTarget::Materialize => JobKind::of(handle.is_consistent()),
            JobTarget::Count => JobKind::BestEffort,
        };
        let key = JobKey {
            id: handle.id().clone(),
            target,
        };
        let inner = Arc::clone(self);
        let run = move |ctx: JobContext| inner.run_job(handle, target, ctx);

        // A running job re-enqueues itself; inline execution would recurse.
        let outcome = if priority == Priority::BelowNormal {
            self.scheduler.enqueue(key, kind, priority, queued_at, run)
        } else {
            self.scheduler.schedule(key, kind, priority, queued_at, run)
        };
        if target == JobTarget::Count && outcome == ScheduleOutcome::Enqueued {
            CacheStatistics::incr(&self.stats.count_jobs_enqueued);
        }
        outcome
    }

    fn run_job(self: &Arc<Self>, handle: IterableHandle, target: JobTarget, ctx: JobContext) {
        let now = self.clock.now();
        if ctx.kind.is_consistent() && self.heavy.is_heavy(handle.id(), now) {
            log::debug!("Skipping heavy iterable {}", handle.id());
            return;
        }

        let snapshot = self.current.load_full();
        let consistent = target == JobTarget::Materialize && handle.is_consistent();
        if target == JobTarget::Materialize && !handle.is_expired(now) {
            if let SnapshotLookup::Hit(_) = snapshot.lookup(&handle) {
                log::debug!("{} already cached", handle.id());
                return;
            }
        }

        let timeout = match target {
            JobTarget::Materialize => self.config.caching_timeout,
            JobTarget::Count => self.config.counts_caching_timeout,
        };
        let policy = CancellationPolicy::new(
            Arc::clone(&snapshot),
            Arc::clone(&self.current),
            Arc::clone(&self.clock),
            consistent,
            timeout,
        );

        let result = match target {
            JobTarget::Materialize => self
                .backend
                .materialize(&handle, &policy)
                .and_then(|value| policy.check().map(|_| value).map_err(StoreError::from))
                .and_then(|value| self.install(&handle, value, &snapshot, consistent)),
            JobTarget::Count => self
                .backend
                .approximate_size(&handle, &policy)
                .map(|count| self.counts.set(handle.id(), count, self.clock.now())),
        };

        match result {
            Ok(()) => {}
            Err(StoreError::Cancelled(cancelled)) => {
                self.on_cancelled(&handle, consistent, cancelled.reason, policy.elapsed())
            }
            Err(StoreError::ReadOnlyTransaction) => {
                CacheStatistics::incr(&self.stats.jobs_requeued);
                log::debug!("Read-only race on {}, re-enqueueing", handle.id());
                self.schedule(handle, target, Priority::BelowNormal, ctx.queued_at);
            }
            Err(e) => {
                CacheStatistics::incr(&self.stats.jobs_failed);
                log::warn!("{} job for {} failed: {}", ctx.kind, handle.id(), e);
            }
        }
    }

    /// Insert a materialized value
    ///
    /// A consistent result only lands in the snapshot it was read from; losing the
    /// race makes it obsolete. A best-effort result is retried against newer
    /// snapshots a bounded number of times.
    fn install(
        &self,
        handle: &IterableHandle,
        value: CachedValue,
        base: &Arc<CacheSnapshot>,
        consistent: bool,
    ) -> Result<(), StoreError> {
        self.counts.set(handle.id(), value.size(), self.clock.now());

        if consistent {
            let mut generation = base.to_mutable();
            generation.insert(handle.clone(), value);
            return self
                .publish(base, generation)
                .map(|_| ())
                .map_err(|_| StoreError::from(Cancelled::new(CancelReason::CacheAdapterObsolete)));
        }

        let mut base = Arc::clone(base);
        for _ in 0..MAX_PUBLISH_ATTEMPTS {
            let mut generation = base.to_mutable();
            generation.insert(handle.clone(), Arc::clone(&value));
            if self.publish(&base, generation).is_ok() {
                return Ok(());
            }
            base = self.current.load_full();
        }
        log::warn!(
            "Dropping result for {}: lost {} publication attempts",
            handle.id(),
            MAX_PUBLISH_ATTEMPTS
        );
        Ok(())
    }

    fn on_cancelled(
        &self,
        handle: &IterableHandle,
        consistent: bool,
        reason: CancelReason,
        elapsed: Duration,
    ) {
        CacheStatistics::incr(&self.stats.jobs_interrupted);
        // Only a timeout makes a query heavy; an obsolete result is just discarded.
        if consistent && reason == CancelReason::JobOverdue {
            self.heavy.mark(handle.id(), self.clock.now());
        }
        log::info!(
            "Caching of {} cancelled ({}) after {:?}",
            handle.id(),
            reason,
            elapsed
        );
    }
}
