// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Background job scheduler
//!
//! Jobs are partitioned by [`JobKind`] into two independent rayon pools so that a
//! flood of cheap best-effort work cannot starve consistent materializations and vice
//! versa. Each partition owns a priority queue and a dedup set keyed by [`JobKey`]
//! (handle identity plus what the job computes); every accepted job spawns one pool
//! task that pops the best queued job.
//!
//! A job whose start deadline has passed by the time a worker picks it up is dropped
//! without running. A job scheduled from a worker thread runs inline.

use parking_lot::{Condvar, Mutex};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::clock::SharedClock;
use super::error::CacheError;
use super::handle::HandleId;
use super::stats::CacheStatistics;

/// Worker partition of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    /// Full materialization whose result must match the snapshot it was read from
    Consistent,
    /// Staleness-tolerant materialization or count refresh
    BestEffort,
}

impl JobKind {
    pub fn of(consistent: bool) -> Self {
        if consistent {
            JobKind::Consistent
        } else {
            JobKind::BestEffort
        }
    }

    pub fn is_consistent(self) -> bool {
        self == JobKind::Consistent
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::Consistent => f.write_str("consistent"),
            JobKind::BestEffort => f.write_str("best-effort"),
        }
    }
}

/// What a job computes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobTarget {
    /// Full materialization installed into the cache
    Materialize,
    /// Approximate size stored in the count cache
    Count,
}

impl fmt::Display for JobTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobTarget::Materialize => f.write_str("materialization"),
            JobTarget::Count => f.write_str("count"),
        }
    }
}

/// Dedup key of a queued job
///
/// Two requests merge only when they compute the same thing for the same handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobKey {
    pub id: HandleId,
    pub target: JobTarget,
}

impl JobKey {
    pub fn materialize(id: HandleId) -> Self {
        Self {
            id,
            target: JobTarget::Materialize,
        }
    }

    pub fn count(id: HandleId) -> Self {
        Self {
            id,
            target: JobTarget::Count,
        }
    }
}

impl From<HandleId> for JobKey {
    fn from(id: HandleId) -> Self {
        Self::materialize(id)
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} of {}", self.target, self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    BelowNormal,
    Normal,
}

/// Result of [`JobScheduler::schedule`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    Enqueued,
    /// A job with the same key was already queued
    Merged,
    /// The caller is a worker; the job already ran on the calling thread
    RanInline,
}

/// What a job learns about itself when it starts
#[derive(Debug, Clone, Copy)]
pub struct JobContext {
    pub kind: JobKind,
    pub priority: Priority,
    pub queued_at: Instant,
    pub started_at: Instant,
    pub inline: bool,
}

type JobFn = Box<dyn FnOnce(JobContext) + Send + 'static>;

struct QueuedJob {
    key: JobKey,
    priority: Priority,
    seq: u64,
    queued_at: Instant,
    run: JobFn,
}

impl PartialEq for QueuedJob {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for QueuedJob {}

impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedJob {
    // Max-heap: higher priority first, then FIFO.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct PartitionQueue {
    jobs: BinaryHeap<QueuedJob>,
    queued: HashSet<JobKey>,
    next_seq: u64,
}

struct Shared {
    consistent: Mutex<PartitionQueue>,
    best_effort: Mutex<PartitionQueue>,
    /// Jobs queued or running
    pending: Mutex<usize>,
    idle: Condvar,
    clock: SharedClock,
    start_timeout: Duration,
    stats: Arc<CacheStatistics>,
}

impl Shared {
    fn queue(&self, kind: JobKind) -> &Mutex<PartitionQueue> {
        match kind {
            JobKind::Consistent => &self.consistent,
            JobKind::BestEffort => &self.best_effort,
        }
    }

    fn run_next(&self, kind: JobKind) {
        let job = {
            let mut queue = self.queue(kind).lock();
            let job = queue.jobs.pop();
            if let Some(job) = &job {
                queue.queued.remove(&job.key);
            }
            job
        };

        if let Some(job) = job {
            self.start(kind, job);
            self.finish();
        }
    }

    fn start(&self, kind: JobKind, job: QueuedJob) {
        let now = self.clock.now();
        let waited = now.saturating_duration_since(job.queued_at);
        if waited > self.start_timeout {
            CacheStatistics::incr(&self.stats.jobs_not_started);
            log::info!(
                "Dropping {} job for {}: not started within {:?} (waited {:?})",
                kind,
                job.key,
                self.start_timeout,
                waited
            );
            return;
        }

        CacheStatistics::incr(&self.stats.jobs_started);
        (job.run)(JobContext {
            kind,
            priority: job.priority,
            queued_at: job.queued_at,
            started_at: now,
            inline: false,
        });
    }

    fn finish(&self) {
        let mut pending = self.pending.lock();
        *pending = pending.saturating_sub(1);
        if *pending == 0 {
            self.idle.notify_all();
        }
    }
}

/// Two-partition background scheduler
pub struct JobScheduler {
    shared: Arc<Shared>,
    consistent_pool: ThreadPool,
    best_effort_pool: ThreadPool,
}

impl JobScheduler {
    pub fn new(
        consistent_workers: usize,
        best_effort_workers: usize,
        start_timeout: Duration,
        clock: SharedClock,
        stats: Arc<CacheStatistics>,
    ) -> Result<Self, CacheError> {
        let consistent_pool = build_pool("consistent", consistent_workers)?;
        let best_effort_pool = build_pool("best-effort", best_effort_workers)?;

        Ok(Self {
            shared: Arc::new(Shared {
                consistent: Mutex::new(PartitionQueue::default()),
                best_effort: Mutex::new(PartitionQueue::default()),
                pending: Mutex::new(0),
                idle: Condvar::new(),
                clock,
                start_timeout,
                stats,
            }),
            consistent_pool,
            best_effort_pool,
        })
    }

    fn pool(&self, kind: JobKind) -> &ThreadPool {
        match kind {
            JobKind::Consistent => &self.consistent_pool,
            JobKind::BestEffort => &self.best_effort_pool,
        }
    }

    /// Whether the calling thread belongs to either worker pool
    pub fn is_worker_thread(&self) -> bool {
        self.consistent_pool.current_thread_index().is_some()
            || self.best_effort_pool.current_thread_index().is_some()
    }

    /// Queue `run` under (`key`, `kind`)
    ///
    /// `queued_at` is when the work was first requested; a re-enqueued job passes its
    /// original time so the start deadline still bounds it.
    pub fn schedule<F>(
        &self,
        key: impl Into<JobKey>,
        kind: JobKind,
        priority: Priority,
        queued_at: Instant,
        run: F,
    ) -> ScheduleOutcome
    where
        F: FnOnce(JobContext) + Send + 'static,
    {
        let key = key.into();
        if self.is_worker_thread() {
            log::debug!("Running {} job for {} inline on a worker", kind, key);
            run(JobContext {
                kind,
                priority,
                queued_at,
                started_at: self.shared.clock.now(),
                inline: true,
            });
            return ScheduleOutcome::RanInline;
        }
        self.enqueue(key, kind, priority, queued_at, run)
    }

    /// Queue `run` even when called from a worker; used to re-enqueue a running job
    pub fn enqueue<F>(
        &self,
        key: impl Into<JobKey>,
        kind: JobKind,
        priority: Priority,
        queued_at: Instant,
        run: F,
    ) -> ScheduleOutcome
    where
        F: FnOnce(JobContext) + Send + 'static,
    {
        let key = key.into();
        {
            let mut queue = self.shared.queue(kind).lock();
            if queue.queued.contains(&key) {
                CacheStatistics::incr(&self.shared.stats.jobs_merged);
                log::debug!("Merged {} job for {} into the queued one", kind, key);
                return ScheduleOutcome::Merged;
            }
            let seq = queue.next_seq;
            queue.next_seq += 1;
            queue.queued.insert(key.clone());
            queue.jobs.push(QueuedJob {
                key,
                priority,
                seq,
                queued_at,
                run: Box::new(run),
            });
            *self.shared.pending.lock() += 1;
        }

        CacheStatistics::incr(&self.shared.stats.jobs_enqueued);
        let shared = Arc::clone(&self.shared);
        self.pool(kind).spawn(move || shared.run_next(kind));
        ScheduleOutcome::Enqueued
    }

    /// Whether a job for `key` is waiting in the `kind` partition
    pub fn is_queued(&self, key: &JobKey, kind: JobKind) -> bool {
        self.shared.queue(kind).lock().queued.contains(key)
    }

    pub fn queued_len(&self, kind: JobKind) -> usize {
        self.shared.queue(kind).lock().jobs.len()
    }

    /// Jobs queued or running
    pub fn pending(&self) -> usize {
        *self.shared.pending.lock()
    }

    /// Block until no job is queued or running; `false` on timeout
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut pending = self.shared.pending.lock();
        while *pending > 0 {
            if self.shared.idle.wait_until(&mut pending, deadline).timed_out() {
                return *pending == 0;
            }
        }
        true
    }
}

impl fmt::Debug for JobScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobScheduler")
            .field("consistent_workers", &self.consistent_pool.current_num_threads())
            .field("best_effort_workers", &self.best_effort_pool.current_num_threads())
            .field("pending", &self.pending())
            .finish()
    }
}

fn build_pool(name: &'static str, threads: usize) -> Result<ThreadPool, CacheError> {
    ThreadPoolBuilder::new()
        .num_threads(threads.max(1))
        .thread_name(move |i| format!("entitycache-{}-{}", name, i))
        .build()
        .map_err(|e| CacheError::scheduler(format!("Failed to build {} pool: {}", name, e)))
}
