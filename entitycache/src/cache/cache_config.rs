// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Cache configuration and policies

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::error::CacheError;

/// Iterable cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable/disable caching entirely
    pub enabled: bool,

    /// Maximum number of ordinary entries per snapshot
    pub capacity: usize,

    /// Values with at most this many entities are held strongly
    pub max_direct_value_size: u64,

    /// Number of large values kept alive by the reclaimable pool
    pub reclaimable_pool_capacity: usize,

    /// Dwell time a handle must survive before it is cached under pressure
    pub deferred_delay: Duration,

    /// Bound of the deferred-caching tracker
    pub deferred_tracker_size: usize,

    /// Jobs not started within this time after enqueue are dropped
    pub job_start_timeout: Duration,

    /// Execution timeout for full materializations
    pub caching_timeout: Duration,

    /// Execution timeout for count jobs
    pub counts_caching_timeout: Duration,

    /// Base lifetime of a cached count
    pub counts_lifetime: Duration,

    /// Upper bound of the size-scaled count lifetime
    pub counts_max_lifetime: Duration,

    /// Bound of the count cache
    pub counts_cache_size: usize,

    /// Cool-down of a handle whose consistent job timed out
    pub heavy_iterables_lifespan: Duration,

    /// Bound of the heavy-iterable blacklist
    pub heavy_iterables_cache_size: usize,

    /// Worker threads for consistent jobs
    pub consistent_workers: usize,

    /// Worker threads for best-effort and count jobs
    pub best_effort_workers: usize,

    /// Tombstones tolerated before the secondary index is compacted
    pub index_compaction_threshold: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 8192,
            max_direct_value_size: 512,
            reclaimable_pool_capacity: 1024,
            deferred_delay: Duration::from_secs(2),
            deferred_tracker_size: 4096,
            job_start_timeout: Duration::from_secs(7),
            caching_timeout: Duration::from_secs(10),
            counts_caching_timeout: Duration::from_secs(1),
            counts_lifetime: Duration::from_secs(30),
            counts_max_lifetime: Duration::from_secs(300), // 5 minutes
            counts_cache_size: 8192,
            heavy_iterables_lifespan: Duration::from_secs(60),
            heavy_iterables_cache_size: 2048,
            consistent_workers: 2,
            best_effort_workers: 1,
            index_compaction_threshold: 64,
        }
    }
}

impl CacheConfig {
    /// Configuration with caching switched off
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Create configuration for memory-constrained environments
    pub fn memory_constrained() -> Self {
        let mut config = Self::default();
        config.capacity = 1024;
        config.max_direct_value_size = 128;
        config.reclaimable_pool_capacity = 128;
        config.deferred_tracker_size = 1024;
        config.counts_cache_size = 1024;
        config.heavy_iterables_cache_size = 512;
        config.consistent_workers = 1;
        config
    }

    /// Parse a (possibly partial) JSON configuration and validate it
    pub fn from_json_str(json: &str) -> Result<Self, CacheError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| CacheError::config(format!("Malformed cache configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), CacheError> {
        if !self.enabled {
            return Ok(());
        }

        if self.capacity == 0 {
            return Err(CacheError::config("Cache capacity must be > 0"));
        }

        if self.consistent_workers == 0 || self.best_effort_workers == 0 {
            return Err(CacheError::config(
                "Both worker pools must have at least one thread",
            ));
        }

        if self.counts_max_lifetime < self.counts_lifetime {
            return Err(CacheError::config(format!(
                "counts_max_lifetime ({:?}) is shorter than counts_lifetime ({:?})",
                self.counts_max_lifetime, self.counts_lifetime
            )));
        }

        if self.deferred_tracker_size == 0
            || self.counts_cache_size == 0
            || self.heavy_iterables_cache_size == 0
        {
            return Err(CacheError::config("Tracker sizes must be > 0"));
        }

        Ok(())
    }
}
