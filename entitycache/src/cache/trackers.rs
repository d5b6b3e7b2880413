// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Bounded side tables living next to the main cache
//!
//! - [`DeferredTracker`]: first sighting of a handle while the cache is under pressure
//! - [`CountCache`]: approximate counts with a size-scaled lifetime
//! - [`HeavyIterables`]: handles whose consistent job recently timed out
//!
//! All three are keyed by handle identity and share one least-recently-written map.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use super::handle::HandleId;

/// Map bounded to `capacity` keys, dropping the least recently written key first
///
/// Rewrites push a fresh stamp onto the order queue; stale queue entries are skipped
/// on eviction and purged once the queue outgrows the map.
#[derive(Debug)]
struct LruTracker<V> {
    entries: HashMap<HandleId, (V, u64)>,
    order: VecDeque<(HandleId, u64)>,
    next_stamp: u64,
    capacity: usize,
}

impl<V> LruTracker<V> {
    fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            next_stamp: 0,
            capacity: capacity.max(1),
        }
    }

    fn get(&self, key: &HandleId) -> Option<&V> {
        self.entries.get(key).map(|(value, _)| value)
    }

    fn insert(&mut self, key: HandleId, value: V) {
        let stamp = self.next_stamp;
        self.next_stamp += 1;
        self.entries.insert(key.clone(), (value, stamp));
        self.order.push_back((key, stamp));

        while self.entries.len() > self.capacity {
            self.remove_lru();
        }
        if self.order.len() > self.capacity * 2 {
            let entries = &self.entries;
            self.order
                .retain(|(key, stamp)| entries.get(key).map(|(_, s)| s) == Some(stamp));
        }
    }

    fn remove(&mut self, key: &HandleId) -> Option<V> {
        self.entries.remove(key).map(|(value, _)| value)
    }

    fn remove_lru(&mut self) -> Option<HandleId> {
        while let Some((key, stamp)) = self.order.pop_front() {
            let current = self.entries.get(&key).map(|(_, s)| *s);
            if current == Some(stamp) {
                self.entries.remove(&key);
                return Some(key);
            }
        }
        None
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}

/// Deferred-caching heuristic state
#[derive(Debug)]
pub struct DeferredTracker {
    first_seen: Mutex<LruTracker<Instant>>,
    delay: Duration,
}

impl DeferredTracker {
    pub fn new(capacity: usize, delay: Duration) -> Self {
        Self {
            first_seen: Mutex::new(LruTracker::new(capacity)),
            delay,
        }
    }

    /// Whether a miss on `id` at `now` may proceed to scheduling
    ///
    /// The first sighting is recorded and refused; a later miss passes once the
    /// dwell time has elapsed, which also forgets the sighting.
    pub fn should_cache(&self, id: &HandleId, now: Instant) -> bool {
        let mut first_seen = self.first_seen.lock();
        match first_seen.get(id).copied() {
            Some(seen_at) if now.saturating_duration_since(seen_at) >= self.delay => {
                first_seen.remove(id);
                true
            }
            Some(_) => false,
            None => {
                first_seen.insert(id.clone(), now);
                false
            }
        }
    }

    pub fn len(&self) -> usize {
        self.first_seen.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.first_seen.lock().clear();
    }
}

#[derive(Debug, Clone, Copy)]
struct CountEntry {
    count: u64,
    computed_at: Instant,
}

/// Approximate counts; larger counts are trusted longer
#[derive(Debug)]
pub struct CountCache {
    counts: Mutex<LruTracker<CountEntry>>,
    lifetime: Duration,
    max_lifetime: Duration,
}

impl CountCache {
    pub fn new(capacity: usize, lifetime: Duration, max_lifetime: Duration) -> Self {
        Self {
            counts: Mutex::new(LruTracker::new(capacity)),
            lifetime,
            max_lifetime,
        }
    }

    /// Lifetime of a cached `count`: one millisecond per entity, at least the base
    /// lifetime and at most the cap
    pub fn lifetime_of(&self, count: u64) -> Duration {
        self.lifetime
            .max(Duration::from_millis(count))
            .min(self.max_lifetime)
    }

    pub fn get(&self, id: &HandleId, now: Instant) -> Option<u64> {
        let mut counts = self.counts.lock();
        let entry = *counts.get(id)?;
        if now.saturating_duration_since(entry.computed_at) < self.lifetime_of(entry.count) {
            Some(entry.count)
        } else {
            counts.remove(id);
            None
        }
    }

    pub fn set(&self, id: &HandleId, count: u64, now: Instant) {
        self.counts.lock().insert(
            id.clone(),
            CountEntry {
                count,
                computed_at: now,
            },
        );
    }

    pub fn remove(&self, id: &HandleId) -> Option<u64> {
        self.counts.lock().remove(id).map(|entry| entry.count)
    }

    pub fn len(&self) -> usize {
        self.counts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.counts.lock().clear();
    }
}

/// Blacklist of handles whose consistent materialization timed out
#[derive(Debug)]
pub struct HeavyIterables {
    cancelled_at: Mutex<LruTracker<Instant>>,
    lifespan: Duration,
}

impl HeavyIterables {
    pub fn new(capacity: usize, lifespan: Duration) -> Self {
        Self {
            cancelled_at: Mutex::new(LruTracker::new(capacity)),
            lifespan,
        }
    }

    pub fn mark(&self, id: &HandleId, now: Instant) {
        self.cancelled_at.lock().insert(id.clone(), now);
    }

    /// Still cooling down at `now`
    pub fn is_heavy(&self, id: &HandleId, now: Instant) -> bool {
        let mut cancelled_at = self.cancelled_at.lock();
        match cancelled_at.get(id).copied() {
            Some(at) if now.saturating_duration_since(at) < self.lifespan => true,
            Some(_) => {
                cancelled_at.remove(id);
                false
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.cancelled_at.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.cancelled_at.lock().clear();
    }
}
