// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Iterable handles
//!
//! A handle is the structural identity of a query result together with the field ids
//! it depends on. Handles are produced by the query layer and are immutable.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Instant;

/// Entity type id of handles that are not scoped to one entity type
///
/// Unlike other negative ids this sentinel is indexed, so that type-level mutations
/// still reach type-generic cached handles.
pub const NULL_TYPE_ID: i32 = -1;

/// Stable identity of a logical query, equal across generations
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(Arc<str>);

impl HandleId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HandleId({})", self.0)
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for HandleId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for HandleId {
    fn from(id: String) -> Self {
        Self(Arc::from(id))
    }
}

/// Field ids a handle depends on; negative values mean "not applicable"
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldIds {
    pub link_ids: Vec<i32>,
    pub property_ids: Vec<i32>,
    pub type_ids_affecting_creation: Vec<i32>,
}

impl FieldIds {
    /// Whether no id in any group is indexable
    pub fn is_empty(&self) -> bool {
        self.link_ids
            .iter()
            .chain(&self.property_ids)
            .chain(&self.type_ids_affecting_creation)
            .all(|id| *id < 0)
    }
}

#[derive(Debug)]
struct HandleInner {
    id: HandleId,
    entity_type_id: i32,
    fields: FieldIds,
    sticky: bool,
    consistent: bool,
    cacheable: bool,
    expires_at: Option<Instant>,
}

/// Descriptor of a query result: identity plus dependency fingerprint
///
/// Equality and hashing use the identity only. Cloning is cheap.
#[derive(Clone)]
pub struct IterableHandle {
    inner: Arc<HandleInner>,
}

impl IterableHandle {
    pub fn builder(id: impl Into<HandleId>) -> HandleBuilder {
        HandleBuilder::new(id.into())
    }

    pub fn id(&self) -> &HandleId {
        &self.inner.id
    }

    pub fn entity_type_id(&self) -> i32 {
        self.inner.entity_type_id
    }

    pub fn fields(&self) -> &FieldIds {
        &self.inner.fields
    }

    pub fn link_ids(&self) -> &[i32] {
        &self.inner.fields.link_ids
    }

    pub fn property_ids(&self) -> &[i32] {
        &self.inner.fields.property_ids
    }

    pub fn type_ids_affecting_creation(&self) -> &[i32] {
        &self.inner.fields.type_ids_affecting_creation
    }

    /// Sticky handles resolve to a persistent updatable object, never an ordinary entry
    pub fn is_sticky(&self) -> bool {
        self.inner.sticky
    }

    /// Consistent results must reflect exactly the snapshot they were computed against
    pub fn is_consistent(&self) -> bool {
        self.inner.consistent
    }

    /// Whether the query layer allows this result to be cached
    pub fn is_cacheable(&self) -> bool {
        self.inner.cacheable
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.inner.expires_at.is_some_and(|at| now >= at)
    }
}

impl PartialEq for IterableHandle {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for IterableHandle {}

impl Hash for IterableHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for IterableHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IterableHandle")
            .field("id", &self.inner.id.as_str())
            .field("entity_type_id", &self.inner.entity_type_id)
            .field("sticky", &self.inner.sticky)
            .field("consistent", &self.inner.consistent)
            .finish()
    }
}

/// Builder for [`IterableHandle`]
#[derive(Debug)]
pub struct HandleBuilder {
    id: HandleId,
    entity_type_id: i32,
    fields: FieldIds,
    sticky: bool,
    consistent: bool,
    cacheable: bool,
    expires_at: Option<Instant>,
}

impl HandleBuilder {
    fn new(id: HandleId) -> Self {
        Self {
            id,
            entity_type_id: NULL_TYPE_ID,
            fields: FieldIds::default(),
            sticky: false,
            consistent: true,
            cacheable: true,
            expires_at: None,
        }
    }

    pub fn entity_type(mut self, type_id: i32) -> Self {
        self.entity_type_id = type_id;
        self
    }

    pub fn link_ids(mut self, ids: impl IntoIterator<Item = i32>) -> Self {
        self.fields.link_ids = ids.into_iter().collect();
        self
    }

    pub fn property_ids(mut self, ids: impl IntoIterator<Item = i32>) -> Self {
        self.fields.property_ids = ids.into_iter().collect();
        self
    }

    pub fn type_ids_affecting_creation(mut self, ids: impl IntoIterator<Item = i32>) -> Self {
        self.fields.type_ids_affecting_creation = ids.into_iter().collect();
        self
    }

    pub fn sticky(mut self, sticky: bool) -> Self {
        self.sticky = sticky;
        self
    }

    pub fn consistent(mut self, consistent: bool) -> Self {
        self.consistent = consistent;
        self
    }

    pub fn cacheable(mut self, cacheable: bool) -> Self {
        self.cacheable = cacheable;
        self
    }

    pub fn expires_at(mut self, at: Instant) -> Self {
        self.expires_at = Some(at);
        self
    }

    pub fn build(self) -> IterableHandle {
        IterableHandle {
            inner: Arc::new(HandleInner {
                id: self.id,
                entity_type_id: self.entity_type_id,
                fields: self.fields,
                sticky: self.sticky,
                consistent: self.consistent,
                cacheable: self.cacheable,
                expires_at: self.expires_at,
            }),
        }
    }
}
