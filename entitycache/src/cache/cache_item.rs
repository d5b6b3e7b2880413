// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Cache items and the reclaimable value pool
//!
//! Small and updatable values are held strongly by the cache item. Large immutable
//! values are held strongly only by the [`ReclaimablePool`]; the item keeps a weak
//! reference, so when the pool lets a value go (memory pressure) the item turns into a
//! tombstone that lookups treat as absent.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Weak};

use super::iterable::{CachedIterable, CachedValue};

/// One slot of the ordinary cache map
#[derive(Clone)]
pub enum CacheItem {
    Direct(CachedValue),
    Reclaimable(Weak<dyn CachedIterable>),
}

impl CacheItem {
    /// Wrap `value`, holding it directly if it is updatable or at most
    /// `max_direct_size` entities large
    pub fn new(value: CachedValue, max_direct_size: u64, pool: &ReclaimablePool) -> Self {
        if value.as_updatable().is_some() || value.size() <= max_direct_size {
            CacheItem::Direct(value)
        } else {
            let weak = Arc::downgrade(&value);
            pool.retain(value);
            CacheItem::Reclaimable(weak)
        }
    }

    /// Resolve the value; `None` once a reclaimable value has been dropped
    pub fn value(&self) -> Option<CachedValue> {
        match self {
            CacheItem::Direct(value) => Some(Arc::clone(value)),
            CacheItem::Reclaimable(weak) => weak.upgrade(),
        }
    }

    pub fn is_alive(&self) -> bool {
        match self {
            CacheItem::Direct(_) => true,
            CacheItem::Reclaimable(weak) => weak.strong_count() > 0,
        }
    }

    pub fn is_reclaimable(&self) -> bool {
        matches!(self, CacheItem::Reclaimable(_))
    }
}

impl fmt::Debug for CacheItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheItem::Direct(value) => f.debug_tuple("Direct").field(value).finish(),
            CacheItem::Reclaimable(_) => f
                .debug_struct("Reclaimable")
                .field("alive", &self.is_alive())
                .finish(),
        }
    }
}

/// Bounded set of strong retainers for large cached values
///
/// The oldest retained value is released first when the pool is full.
pub struct ReclaimablePool {
    retained: Mutex<VecDeque<CachedValue>>,
    capacity: usize,
}

impl ReclaimablePool {
    pub fn new(capacity: usize) -> Self {
        Self {
            retained: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    pub fn retain(&self, value: CachedValue) {
        let mut retained = self.retained.lock();
        retained.push_back(value);
        while retained.len() > self.capacity {
            retained.pop_front();
        }
    }

    /// Release the oldest values until at most `len` remain
    pub fn shrink_to(&self, len: usize) -> usize {
        let mut retained = self.retained.lock();
        let released = retained.len().saturating_sub(len);
        retained.drain(..released);
        released
    }

    /// Release everything, as the memory manager does under pressure
    pub fn release_all(&self) -> usize {
        self.shrink_to(0)
    }

    pub fn len(&self) -> usize {
        self.retained.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl fmt::Debug for ReclaimablePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReclaimablePool")
            .field("retained", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
