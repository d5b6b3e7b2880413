// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Immutable cache snapshot (read path)

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::cache_item::{CacheItem, ReclaimablePool};
use super::generation::{absorb, MutableGeneration};
use super::handle::IterableHandle;
use super::iterable::CachedValue;
use super::mutation::MutationDescriptor;
use super::persistent_map::PersistentMap;

/// Settings shared by every generation derived from one cache
#[derive(Debug)]
pub struct GenerationSettings {
    /// Maximum ordinary entries
    pub capacity: usize,
    /// Values at or below this size are held directly
    pub max_direct_value_size: u64,
    /// Tombstones tolerated before the secondary index is compacted
    pub index_compaction_threshold: usize,
    pub pool: Arc<ReclaimablePool>,
}

/// Outcome of a snapshot lookup
#[derive(Debug, Clone)]
pub enum SnapshotLookup {
    Hit(CachedValue),
    Miss,
    /// An entry exists but its reclaimable value has been dropped
    Reclaimed,
}

impl SnapshotLookup {
    pub fn into_value(self) -> Option<CachedValue> {
        match self {
            SnapshotLookup::Hit(value) => Some(value),
            _ => None,
        }
    }
}

/// One immutable version of the whole cache
///
/// Safe for any number of concurrent lock-free readers. Sticky handles live in a plain
/// map copied into every derived generation; a handle present there is never present
/// in the ordinary map.
pub struct CacheSnapshot {
    pub(crate) version: u64,
    pub(crate) items: PersistentMap<IterableHandle, CacheItem>,
    pub(crate) sticky: HashMap<IterableHandle, CachedValue>,
    pub(crate) settings: Arc<GenerationSettings>,
}

impl CacheSnapshot {
    pub fn empty(settings: Arc<GenerationSettings>) -> Self {
        Self {
            version: 0,
            items: PersistentMap::new(),
            sticky: HashMap::new(),
            settings,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Resolve `handle`
    ///
    /// # Panics
    /// If `handle` is sticky and was never registered.
    pub fn lookup(&self, handle: &IterableHandle) -> SnapshotLookup {
        if handle.is_sticky() {
            return match self.sticky.get(handle) {
                Some(value) => SnapshotLookup::Hit(Arc::clone(value)),
                None => panic!("sticky handle {} looked up before registration", handle.id()),
            };
        }
        // A handle may be migrating to sticky, so the sticky map goes first.
        if let Some(value) = self.sticky.get(handle) {
            return SnapshotLookup::Hit(Arc::clone(value));
        }
        match self.items.get(handle) {
            None => SnapshotLookup::Miss,
            Some(item) => match item.value() {
                Some(value) => SnapshotLookup::Hit(value),
                None => SnapshotLookup::Reclaimed,
            },
        }
    }

    /// The registered updatable object for `handle`, if any
    pub fn get_updatable(&self, handle: &IterableHandle) -> Option<CachedValue> {
        self.sticky.get(handle).cloned()
    }

    /// Feed `mutation` to every sticky object; returns how many changed
    pub fn apply_to_sticky(&self, mutation: &MutationDescriptor) -> usize {
        absorb(&self.sticky, mutation)
    }

    /// Number of ordinary entries, reclaimed ones included
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn sticky_count(&self) -> usize {
        self.sticky.len()
    }

    pub fn capacity(&self) -> usize {
        self.settings.capacity
    }

    /// Fewer than half of the slots are used
    pub fn is_sparse(&self) -> bool {
        self.items.len() < self.settings.capacity / 2
    }

    pub fn handles(&self) -> impl Iterator<Item = &IterableHandle> {
        self.items.keys()
    }

    /// Start a mutable generation sharing this snapshot's structure
    pub fn to_mutable(&self) -> MutableGeneration {
        MutableGeneration::from_snapshot(self)
    }

    pub(crate) fn settings(&self) -> &Arc<GenerationSettings> {
        &self.settings
    }
}

impl fmt::Debug for CacheSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheSnapshot")
            .field("version", &self.version)
            .field("entries", &self.items.len())
            .field("sticky", &self.sticky.len())
            .field("capacity", &self.settings.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::iterable::{CachedInstanceIterable, EntityId, LiveCount};

    fn settings(capacity: usize) -> Arc<GenerationSettings> {
        Arc::new(GenerationSettings {
            capacity,
            max_direct_value_size: 4,
            index_compaction_threshold: 8,
            pool: Arc::new(ReclaimablePool::new(16)),
        })
    }

    fn value(handle: &IterableHandle, size: u64) -> CachedValue {
        let entities = (0..size).map(|i| EntityId::new(1, i)).collect();
        CachedInstanceIterable::new(handle.clone(), entities).into_value()
    }

    #[test]
    fn test_lookup_hit_and_miss() {
        let h = IterableHandle::builder("h").entity_type(1).build();
        let other = IterableHandle::builder("other").entity_type(1).build();
        let mut generation = CacheSnapshot::empty(settings(8)).to_mutable();
        generation.insert(h.clone(), value(&h, 2));
        let snapshot = generation.publish();

        assert_eq!(snapshot.version(), 1);
        assert!(matches!(snapshot.lookup(&h), SnapshotLookup::Hit(v) if v.size() == 2));
        assert!(matches!(snapshot.lookup(&other), SnapshotLookup::Miss));
    }

    #[test]
    fn test_reclaimed_entry_reports_reclaimed() {
        let settings = settings(8);
        let h = IterableHandle::builder("big").entity_type(1).build();
        let mut generation = CacheSnapshot::empty(Arc::clone(&settings)).to_mutable();
        generation.insert(h.clone(), value(&h, 100));
        let snapshot = generation.publish();

        assert!(matches!(snapshot.lookup(&h), SnapshotLookup::Hit(_)));
        settings.pool.release_all();
        assert!(matches!(snapshot.lookup(&h), SnapshotLookup::Reclaimed));
    }

    #[test]
    fn test_sparse_threshold() {
        let mut generation = CacheSnapshot::empty(settings(4)).to_mutable();
        let a = IterableHandle::builder("a").build();
        generation.insert(a.clone(), value(&a, 1));
        let snapshot = generation.publish();
        assert!(snapshot.is_sparse());

        let mut generation = snapshot.to_mutable();
        let b = IterableHandle::builder("b").build();
        generation.insert(b.clone(), value(&b, 1));
        assert!(!generation.publish().is_sparse());
    }

    #[test]
    fn test_sticky_lookup() {
        let sticky = IterableHandle::builder("count").entity_type(1).sticky(true).build();
        let mut generation = CacheSnapshot::empty(settings(8)).to_mutable();
        generation.register_sticky(sticky.clone(), LiveCount::new(sticky.clone(), 3).into_value());
        let snapshot = generation.publish();

        assert!(matches!(snapshot.lookup(&sticky), SnapshotLookup::Hit(v) if v.size() == 3));
        assert!(snapshot.get_updatable(&sticky).is_some());
        assert_eq!(snapshot.sticky_count(), 1);
        assert!(snapshot.is_empty());
    }

    #[test]
    #[should_panic(expected = "looked up before registration")]
    fn test_unregistered_sticky_lookup_panics() {
        let snapshot = CacheSnapshot::empty(settings(8));
        let sticky = IterableHandle::builder("count").sticky(true).build();
        let _ = snapshot.lookup(&sticky);
    }
}
