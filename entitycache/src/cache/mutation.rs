// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Mutation descriptors supplied by the storage layer after a commit

/// What a committed change did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    LinkChanged,
    PropertyChanged,
    EntityCreated,
    EntityDeleted,
    /// Type metadata changed; affects every handle of the type
    TypeChanged,
    /// Change with no indexable dimension
    Global,
}

/// Secondary index grouping chosen to find affected handles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupStrategy {
    Link(i32),
    Property(i32),
    TypeAffectingCreation(i32),
    /// Entity type id, always probed together with [`NULL_TYPE_ID`](super::NULL_TYPE_ID)
    EntityType(i32),
    FullScan,
}

/// Field ids affected by one committed change; negative ids are absent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutationDescriptor {
    pub kind: MutationKind,
    pub entity_type_id: i32,
    pub link_id: i32,
    pub property_id: i32,
    pub type_id_affecting_creation: i32,
}

impl MutationDescriptor {
    fn new(kind: MutationKind, entity_type_id: i32) -> Self {
        Self {
            kind,
            entity_type_id,
            link_id: -1,
            property_id: -1,
            type_id_affecting_creation: -1,
        }
    }

    pub fn link_changed(entity_type_id: i32, link_id: i32) -> Self {
        Self {
            link_id,
            ..Self::new(MutationKind::LinkChanged, entity_type_id)
        }
    }

    pub fn property_changed(entity_type_id: i32, property_id: i32) -> Self {
        Self {
            property_id,
            ..Self::new(MutationKind::PropertyChanged, entity_type_id)
        }
    }

    pub fn entity_created(entity_type_id: i32) -> Self {
        Self {
            type_id_affecting_creation: entity_type_id,
            ..Self::new(MutationKind::EntityCreated, entity_type_id)
        }
    }

    pub fn entity_deleted(entity_type_id: i32) -> Self {
        Self::new(MutationKind::EntityDeleted, entity_type_id)
    }

    pub fn type_changed(entity_type_id: i32) -> Self {
        Self::new(MutationKind::TypeChanged, entity_type_id)
    }

    pub fn global() -> Self {
        Self::new(MutationKind::Global, -1)
    }

    /// Pick exactly one lookup strategy: link, then property, then
    /// type-affecting-creation, then entity type, else full scan
    ///
    /// Assumes a descriptor affects one dimension. A descriptor carrying two ids only
    /// evicts through the higher-priority one.
    pub fn strategy(&self) -> LookupStrategy {
        if self.link_id >= 0 {
            LookupStrategy::Link(self.link_id)
        } else if self.property_id >= 0 {
            LookupStrategy::Property(self.property_id)
        } else if self.type_id_affecting_creation >= 0 {
            LookupStrategy::TypeAffectingCreation(self.type_id_affecting_creation)
        } else if self.entity_type_id >= 0 {
            LookupStrategy::EntityType(self.entity_type_id)
        } else {
            LookupStrategy::FullScan
        }
    }
}
