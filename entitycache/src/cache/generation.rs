// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Mutable cache generation (write path)
//!
//! Built from a snapshot, a generation accumulates inserts, removals and sticky
//! registrations, evicts through its [`SecondaryIndex`] on [`update`](MutableGeneration::update),
//! and is turned back into an immutable snapshot by [`publish`](MutableGeneration::publish).
//! A generation is owned by one thread and discarded after publication.

use std::collections::HashMap;
use std::sync::Arc;

use super::cache_item::CacheItem;
use super::handle::IterableHandle;
use super::iterable::CachedValue;
use super::mutation::MutationDescriptor;
use super::persistent_map::PersistentMap;
use super::secondary_index::SecondaryIndex;
use super::snapshot::{CacheSnapshot, GenerationSettings};

/// Copy-on-write generation derived from a [`CacheSnapshot`]
pub struct MutableGeneration {
    base_version: u64,
    items: PersistentMap<IterableHandle, CacheItem>,
    sticky: HashMap<IterableHandle, CachedValue>,
    settings: Arc<GenerationSettings>,
    /// Built on first use; lists every key of `items` exactly once
    index: Option<SecondaryIndex>,
    rng: fastrand::Rng,
    evictions: u64,
}

impl MutableGeneration {
    pub(crate) fn from_snapshot(snapshot: &CacheSnapshot) -> Self {
        Self {
            base_version: snapshot.version(),
            items: snapshot.items.clone(),
            sticky: snapshot.sticky.clone(),
            settings: Arc::clone(snapshot.settings()),
            index: None,
            rng: fastrand::Rng::new(),
            evictions: 0,
        }
    }

    /// Version of the snapshot this generation was derived from
    pub fn base_version(&self) -> u64 {
        self.base_version
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Capacity evictions performed by this generation
    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    pub fn get(&self, handle: &IterableHandle) -> Option<CachedValue> {
        if let Some(value) = self.sticky.get(handle) {
            return Some(Arc::clone(value));
        }
        self.items.get(handle).and_then(CacheItem::value)
    }

    pub fn contains(&self, handle: &IterableHandle) -> bool {
        self.sticky.contains_key(handle) || self.items.contains_key(handle)
    }

    /// Cache `value` under `handle`
    ///
    /// An updatable value for a registered sticky handle replaces the sticky slot in
    /// place instead of creating an ordinary entry.
    ///
    /// # Panics
    /// If `handle` is sticky and `value` is not updatable.
    pub fn insert(&mut self, handle: IterableHandle, value: CachedValue) {
        if handle.is_sticky() || self.sticky.contains_key(&handle) {
            self.register_sticky(handle, value);
            return;
        }

        if !self.items.contains_key(&handle) && self.items.len() >= self.settings.capacity {
            self.evict_one();
        }
        let item = CacheItem::new(
            value,
            self.settings.max_direct_value_size,
            &self.settings.pool,
        );
        let replaced = self.items.insert(handle.clone(), item).is_some();
        if !replaced {
            if let Some(index) = &mut self.index {
                index.add_handle(&handle);
            }
        }
    }

    /// Register (or replace) the persistent updatable object of a sticky handle
    ///
    /// # Panics
    /// If `value` is not updatable.
    pub fn register_sticky(&mut self, handle: IterableHandle, value: CachedValue) {
        assert!(
            value.as_updatable().is_some(),
            "sticky handle {} must hold an updatable value",
            handle.id()
        );
        // A handle migrating to sticky leaves the ordinary map.
        if self.items.remove(&handle).is_some() {
            if let Some(index) = &mut self.index {
                index.remove_handle(&handle);
            }
        }
        self.sticky.insert(handle, value);
    }

    /// Remove an ordinary entry; returns whether it was present
    ///
    /// # Panics
    /// If `handle` is sticky: sticky objects are replaced, never removed.
    pub fn remove(&mut self, handle: &IterableHandle) -> bool {
        assert!(
            !handle.is_sticky() && !self.sticky.contains_key(handle),
            "sticky handle {} cannot be removed",
            handle.id()
        );
        self.remove_entry(handle)
    }

    fn remove_entry(&mut self, handle: &IterableHandle) -> bool {
        if self.items.remove(handle).is_none() {
            return false;
        }
        if let Some(index) = &mut self.index {
            index.remove_handle(handle);
        }
        true
    }

    /// Evict every handle affected by `mutation` and let sticky objects absorb it;
    /// returns the number evicted
    pub fn update(&mut self, mutation: &MutationDescriptor) -> usize {
        let evicted = self.evict_affected(mutation);
        self.apply_to_sticky(mutation);
        evicted
    }

    /// Evict every handle affected by `mutation`; returns the number evicted
    ///
    /// Exactly one index grouping is consulted, chosen by
    /// [`MutationDescriptor::strategy`]; a mutation with nothing indexable scans all
    /// entries. Sticky objects are left alone.
    pub fn evict_affected(&mut self, mutation: &MutationDescriptor) -> usize {
        let selected = self.index().handles_for(mutation.strategy());
        let candidates = match selected {
            Some(handles) => handles,
            None => self.items.keys().cloned().collect(),
        };

        let mut evicted = 0;
        for handle in &candidates {
            if self.remove_entry(handle) {
                evicted += 1;
            }
        }
        evicted
    }

    /// Feed `mutation` to every sticky object; returns how many changed
    ///
    /// Sticky objects are shared with the base snapshot, so this must run once per
    /// mutation no matter how many generations are built for it.
    pub fn apply_to_sticky(&self, mutation: &MutationDescriptor) -> usize {
        absorb(&self.sticky, mutation)
    }

    /// Remove every ordinary entry, keeping sticky registrations
    pub fn clear(&mut self) {
        self.items = PersistentMap::new();
        self.index = None;
    }

    fn index(&mut self) -> &mut SecondaryIndex {
        let items = &self.items;
        let threshold = self.settings.index_compaction_threshold;
        self.index
            .get_or_insert_with(|| SecondaryIndex::build(items.keys(), threshold))
    }

    fn evict_one(&mut self) -> Option<IterableHandle> {
        let victim = self.items.random_key(&mut self.rng).cloned()?;
        self.remove_entry(&victim);
        self.evictions += 1;
        log::debug!("Evicted {} to stay within capacity", victim.id());
        Some(victim)
    }

    /// Freeze into the next immutable snapshot
    pub fn publish(self) -> CacheSnapshot {
        CacheSnapshot {
            version: self.base_version + 1,
            items: self.items,
            sticky: self.sticky,
            settings: self.settings,
        }
    }
}

pub(crate) fn absorb(
    sticky: &HashMap<IterableHandle, CachedValue>,
    mutation: &MutationDescriptor,
) -> usize {
    sticky
        .values()
        .filter_map(|value| value.as_updatable())
        .filter(|updatable| updatable.apply(mutation))
        .count()
}
