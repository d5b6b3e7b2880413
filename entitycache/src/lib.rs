// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! EntityCache - versioned query-result cache for an embedded entity store
//!
//! Query execution produces iterables (sets of entity references) identified by a
//! structural [`IterableHandle`]. Materializing an iterable from storage is expensive,
//! so the cache remembers previously materialized results while staying consistent
//! with concurrent commits that may invalidate them.
//!
//! # Features
//!
//! - **Lock-free reads**: readers resolve handles against an immutable, structurally
//!   shared [`CacheSnapshot`]
//! - **Copy-on-write commits**: writers derive a [`MutableGeneration`], evict affected
//!   entries through a secondary index and publish with compare-and-swap
//! - **Background materialization**: two worker pools (consistent and best-effort)
//!   with deduplication, deferred caching and a heavy-query blacklist
//! - **Cooperative cancellation**: a polled [`CancellationPolicy`] bounds in-flight work
//!
//! # Usage
//!
//! ```ignore
//! let cache = IterableCache::new(CacheConfig::default(), backend)?;
//!
//! // Read path: either a cached value or "recompute yourself"
//! if let Some(value) = cache.put_if_not_cached(&handle, &txn) {
//!     return value;
//! }
//!
//! // Commit path: evict everything the mutation touched
//! cache.invalidate(&[MutationDescriptor::link_changed(type_id, link_id)]);
//! ```

pub mod cache;
pub mod storage;
pub mod txn;

pub use cache::{
    CacheConfig, CacheError, CacheSnapshot, CachedInstanceIterable, CachedIterable,
    CachedValue, CancelReason, CancellationPolicy, Cancelled, Clock, EntityId, HandleId,
    IterableCache,
    IterableHandle, JobKind, LiveCount, ManualClock, MutableGeneration, MutationDescriptor,
    MutationKind, StatisticsSnapshot, SystemClock, Updatable, NULL_TYPE_ID,
};
pub use storage::{StoreBackend, StoreError};
pub use txn::{TransactionView, TxnFlags};

/// EntityCache version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// EntityCache crate name
pub const CRATE_NAME: &str = env!("CARGO_PKG_NAME");
