// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Secondary index used for targeted invalidation
//!
//! Four groupings map a field id to the cached handles depending on it. Removed
//! handles are not purged from every grouping list right away; they go into a shared
//! tombstone set consulted during iteration, and the lists are compacted once the set
//! grows past a threshold.

use std::collections::{HashMap, HashSet};

use super::handle::{IterableHandle, NULL_TYPE_ID};
use super::mutation::LookupStrategy;

/// field id -> handles depending on it
#[derive(Debug, Default, Clone)]
pub struct FieldIdGroupedHandles {
    groups: HashMap<i32, Vec<IterableHandle>>,
}

impl FieldIdGroupedHandles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `handle` under every non-negative id
    pub fn add(&mut self, handle: &IterableHandle, ids: &[i32]) {
        for &id in ids.iter().filter(|id| **id >= 0) {
            self.add_one(handle, id);
        }
    }

    fn add_one(&mut self, handle: &IterableHandle, id: i32) {
        self.groups.entry(id).or_default().push(handle.clone());
    }

    pub fn get(&self, id: i32) -> &[IterableHandle] {
        self.groups.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of (id, handle) pairs, tombstoned ones included
    pub fn pair_count(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    fn compact(&mut self, removed: &HashSet<IterableHandle>) {
        self.groups.retain(|_, handles| {
            handles.retain(|h| !removed.contains(h));
            !handles.is_empty()
        });
    }
}

/// Secondary index private to one mutable generation
#[derive(Debug, Clone)]
pub struct SecondaryIndex {
    by_link: FieldIdGroupedHandles,
    by_property: FieldIdGroupedHandles,
    by_type: FieldIdGroupedHandles,
    by_type_affecting_creation: FieldIdGroupedHandles,
    removed: HashSet<IterableHandle>,
    compaction_threshold: usize,
}

impl SecondaryIndex {
    pub fn new(compaction_threshold: usize) -> Self {
        Self {
            by_link: FieldIdGroupedHandles::new(),
            by_property: FieldIdGroupedHandles::new(),
            by_type: FieldIdGroupedHandles::new(),
            by_type_affecting_creation: FieldIdGroupedHandles::new(),
            removed: HashSet::new(),
            compaction_threshold,
        }
    }

    /// Build from the handles of live entries
    pub fn build<'a>(
        handles: impl IntoIterator<Item = &'a IterableHandle>,
        compaction_threshold: usize,
    ) -> Self {
        let mut index = Self::new(compaction_threshold);
        for handle in handles {
            index.add_handle(handle);
        }
        index
    }

    /// Index `handle` under each of its field ids
    ///
    /// A tombstoned handle is still listed everywhere, so reviving it only drops the
    /// tombstone. Callers add each live handle once.
    pub fn add_handle(&mut self, handle: &IterableHandle) {
        if self.removed.remove(handle) {
            return;
        }
        self.by_link.add(handle, handle.link_ids());
        self.by_property.add(handle, handle.property_ids());
        self.by_type_affecting_creation
            .add(handle, handle.type_ids_affecting_creation());

        let type_id = handle.entity_type_id();
        if type_id >= 0 || type_id == NULL_TYPE_ID {
            self.by_type.add_one(handle, type_id);
        }
    }

    /// Tombstone `handle`; lists are compacted once enough tombstones pile up
    pub fn remove_handle(&mut self, handle: &IterableHandle) {
        self.removed.insert(handle.clone());
        if self.removed.len() > self.compaction_threshold {
            self.compact();
        }
    }

    pub fn compact(&mut self) {
        if self.removed.is_empty() {
            return;
        }
        let removed = std::mem::take(&mut self.removed);
        self.by_link.compact(&removed);
        self.by_property.compact(&removed);
        self.by_type.compact(&removed);
        self.by_type_affecting_creation.compact(&removed);
    }

    /// (id, handle) pairs across all groupings, tombstoned ones included
    pub fn pair_count(&self) -> usize {
        self.by_link.pair_count()
            + self.by_property.pair_count()
            + self.by_type.pair_count()
            + self.by_type_affecting_creation.pair_count()
    }

    pub fn tombstone_count(&self) -> usize {
        self.removed.len()
    }

    pub fn is_removed(&self, handle: &IterableHandle) -> bool {
        self.removed.contains(handle)
    }

    /// Live handles selected by `strategy`; `None` means a full scan is required
    pub fn handles_for(&self, strategy: LookupStrategy) -> Option<Vec<IterableHandle>> {
        let mut out = Vec::new();
        match strategy {
            LookupStrategy::Link(id) => self.collect(self.by_link.get(id), &mut out),
            LookupStrategy::Property(id) => self.collect(self.by_property.get(id), &mut out),
            LookupStrategy::TypeAffectingCreation(id) => {
                self.collect(self.by_type_affecting_creation.get(id), &mut out)
            }
            LookupStrategy::EntityType(id) => {
                self.collect(self.by_type.get(id), &mut out);
                if id != NULL_TYPE_ID {
                    self.collect(self.by_type.get(NULL_TYPE_ID), &mut out);
                }
            }
            LookupStrategy::FullScan => return None,
        }
        Some(out)
    }

    fn collect(&self, handles: &[IterableHandle], out: &mut Vec<IterableHandle>) {
        if self.removed.is_empty() {
            out.extend_from_slice(handles);
        } else {
            out.extend(handles.iter().filter(|h| !self.removed.contains(*h)).cloned());
        }
    }
}
