// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Storage collaborator interface
//!
//! The cache never reads entities itself. It asks a [`StoreBackend`] to materialize
//! an iterable for a handle, passing the [`CancellationPolicy`] the backend must poll
//! at natural iteration boundaries.

use thiserror::Error;

use crate::cache::{CachedValue, CancellationPolicy, Cancelled, IterableHandle};

/// Errors reported by the storage collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The policy asked the backend to stop
    #[error("{0}")]
    Cancelled(#[from] Cancelled),

    /// The backend raced with a read-only transaction restriction; retryable
    #[error("Read-only transaction race")]
    ReadOnlyTransaction,

    #[error("Materialization failed: {0}")]
    Failed(String),
}

impl StoreError {
    /// Create a generic failure
    pub fn failed<S: Into<String>>(msg: S) -> Self {
        Self::Failed(msg.into())
    }
}

/// Materializes iterables from the underlying storage engine
///
/// Every call runs inside a fresh read-only transaction opened by the backend against
/// the current storage state.
pub trait StoreBackend: Send + Sync + 'static {
    /// Fully materialize the iterable identified by `handle`
    ///
    /// Must call [`CancellationPolicy::check`] periodically and return
    /// [`StoreError::Cancelled`] when it fails.
    fn materialize(
        &self,
        handle: &IterableHandle,
        policy: &CancellationPolicy,
    ) -> Result<CachedValue, StoreError>;

    /// Cheap approximate size, used by count-only jobs
    fn approximate_size(
        &self,
        handle: &IterableHandle,
        policy: &CancellationPolicy,
    ) -> Result<u64, StoreError>;
}
