// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Versioned iterable cache
//!
//! This module provides:
//! - Immutable cache snapshots readable without locks
//! - Copy-on-write generations built at commit boundaries
//! - Secondary index driven invalidation
//! - Background recomputation with cancellation
//! - Cache statistics

pub mod cache_config;
pub mod cache_item;
pub mod cache_manager;
pub mod cancellation;
pub mod clock;
pub mod error;
pub mod generation;
pub mod handle;
pub mod iterable;
pub mod mutation;
pub mod persistent_map;
pub mod scheduler;
pub mod secondary_index;
pub mod snapshot;
pub mod stats;
pub mod trackers;

pub use cache_config::CacheConfig;
pub use cache_item::{CacheItem, ReclaimablePool};
pub use cache_manager::IterableCache;
pub use cancellation::{CancelReason, CancellationPolicy};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{CacheError, Cancelled};
pub use generation::MutableGeneration;
pub use handle::{FieldIds, HandleId, IterableHandle, NULL_TYPE_ID};
pub use iterable::{
    CachedInstanceIterable, CachedIterable, CachedValue, EntityId, LiveCount, Updatable,
};
pub use mutation::{LookupStrategy, MutationDescriptor, MutationKind};
pub use scheduler::{
    JobContext, JobKey, JobKind, JobScheduler, JobTarget, Priority, ScheduleOutcome,
};
pub use secondary_index::{FieldIdGroupedHandles, SecondaryIndex};
pub use snapshot::{CacheSnapshot, GenerationSettings, SnapshotLookup};
pub use stats::{CacheStatistics, StatisticsSnapshot};
pub use trackers::{CountCache, DeferredTracker, HeavyIterables};
