// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Materialized iterables held by the cache

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::handle::IterableHandle;
use super::mutation::{MutationDescriptor, MutationKind};

/// Shared materialized value
pub type CachedValue = Arc<dyn CachedIterable>;

/// Reference to one stored entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId {
    pub type_id: i32,
    pub local_id: u64,
}

impl EntityId {
    pub fn new(type_id: i32, local_id: u64) -> Self {
        Self { type_id, local_id }
    }
}

/// A materialized query result
pub trait CachedIterable: Send + Sync + fmt::Debug {
    fn handle(&self) -> &IterableHandle;

    /// Number of entities in the result
    fn size(&self) -> u64;

    /// Incrementally maintained values expose themselves here
    fn as_updatable(&self) -> Option<&dyn Updatable> {
        None
    }
}

/// A value mutated in place as source data changes instead of being evicted
///
/// Implementations must tolerate concurrent reads of the same instance while
/// `apply` runs.
pub trait Updatable: Send + Sync {
    /// Absorb a committed mutation; returns `true` if the value changed
    fn apply(&self, mutation: &MutationDescriptor) -> bool;
}

/// Plain materialized set of entity references
#[derive(Debug, Clone)]
pub struct CachedInstanceIterable {
    handle: IterableHandle,
    entities: Vec<EntityId>,
    sorted: bool,
}

impl CachedInstanceIterable {
    pub fn new(handle: IterableHandle, entities: Vec<EntityId>) -> Self {
        Self {
            handle,
            entities,
            sorted: false,
        }
    }

    /// Build from entities, sorting them by id
    pub fn sorted(handle: IterableHandle, mut entities: Vec<EntityId>) -> Self {
        entities.sort_unstable();
        Self {
            handle,
            entities,
            sorted: true,
        }
    }

    pub fn entities(&self) -> &[EntityId] {
        &self.entities
    }

    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        if self.sorted {
            self.entities.binary_search(id).is_ok()
        } else {
            self.entities.contains(id)
        }
    }

    pub fn into_value(self) -> CachedValue {
        Arc::new(self)
    }
}

impl CachedIterable for CachedInstanceIterable {
    fn handle(&self) -> &IterableHandle {
        &self.handle
    }

    fn size(&self) -> u64 {
        self.entities.len() as u64
    }
}

/// Live count of the entities of one type, kept current by absorbing mutations
#[derive(Debug)]
pub struct LiveCount {
    handle: IterableHandle,
    count: AtomicU64,
}

impl LiveCount {
    pub fn new(handle: IterableHandle, initial: u64) -> Self {
        Self {
            handle,
            count: AtomicU64::new(initial),
        }
    }

    pub fn get(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }

    pub fn into_value(self) -> CachedValue {
        Arc::new(self)
    }
}

impl CachedIterable for LiveCount {
    fn handle(&self) -> &IterableHandle {
        &self.handle
    }

    fn size(&self) -> u64 {
        self.get()
    }

    fn as_updatable(&self) -> Option<&dyn Updatable> {
        Some(self)
    }
}

impl Updatable for LiveCount {
    fn apply(&self, mutation: &MutationDescriptor) -> bool {
        if mutation.entity_type_id != self.handle.entity_type_id() {
            return false;
        }
        match mutation.kind {
            MutationKind::EntityCreated => {
                self.count.fetch_add(1, Ordering::AcqRel);
                true
            }
            MutationKind::EntityDeleted => self
                .count
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| c.checked_sub(1))
                .is_ok(),
            _ => false,
        }
    }
}
