// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Cache error types

use thiserror::Error;

use super::cancellation::CancelReason;

/// Errors surfaced by the cache service
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Stale generation: expected version {expected}, current is {actual}")]
    StaleGeneration { expected: u64, actual: u64 },

    #[error("Invalid cache configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Scheduler error: {0}")]
    Scheduler(String),
}

impl CacheError {
    /// Create a configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Create a scheduler error
    pub fn scheduler<S: Into<String>>(msg: S) -> Self {
        Self::Scheduler(msg.into())
    }

    /// Whether the caller may rebuild from the current snapshot and retry
    pub fn is_retryable(&self) -> bool {
        matches!(self, CacheError::StaleGeneration { .. })
    }
}

/// Typed cancellation raised by a [`CancellationPolicy`](super::CancellationPolicy)
///
/// Cancellation is an expected outcome, not a failure: it is returned by value from
/// `check()` and caught once at the job boundary.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Materialization cancelled: {reason}")]
pub struct Cancelled {
    pub reason: CancelReason,
}

impl Cancelled {
    pub fn new(reason: CancelReason) -> Self {
        Self { reason }
    }
}
