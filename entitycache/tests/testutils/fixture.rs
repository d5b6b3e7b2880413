//! Cache fixture with a manual clock and a scripted backend

use entitycache::{
    CacheConfig, CachedInstanceIterable, CachedValue, EntityId, IterableCache, IterableHandle,
    ManualClock, TxnFlags,
};
use std::sync::Arc;
use std::time::Duration;

use super::backend::ScriptedBackend;

/// Generous bound for background work in tests
pub const JOB_TIMEOUT: Duration = Duration::from_secs(10);

pub struct CacheFixture {
    pub cache: IterableCache,
    pub backend: Arc<ScriptedBackend>,
    pub clock: Arc<ManualClock>,
}

impl CacheFixture {
    pub fn new() -> Self {
        Self::with_config(CacheConfig::default())
    }

    pub fn with_config(config: CacheConfig) -> Self {
        init_logging();
        let backend = Arc::new(ScriptedBackend::new());
        let clock = Arc::new(ManualClock::new());
        let cache = IterableCache::with_clock(config, backend.clone(), clock.clone())
            .expect("Failed to create cache");
        Self {
            cache,
            backend,
            clock,
        }
    }

    /// Small cache with one worker per partition
    pub fn small(capacity: usize) -> Self {
        Self::with_config(CacheConfig {
            capacity,
            consistent_workers: 1,
            best_effort_workers: 1,
            ..CacheConfig::default()
        })
    }

    pub fn reader(&self) -> TxnFlags {
        TxnFlags::read_only()
    }

    pub fn get(&self, handle: &IterableHandle) -> Option<CachedValue> {
        self.cache.put_if_not_cached(handle, &self.reader())
    }

    /// Wait for every background job to finish
    pub fn settle(&self) {
        assert!(
            self.cache.wait_for_jobs(JOB_TIMEOUT),
            "background jobs did not finish"
        );
    }

    /// Insert `count` unrelated entries directly
    pub fn fill(&self, count: usize) {
        for i in 0..count {
            let handle = IterableHandle::builder(format!("filler:{}", i))
                .entity_type(100)
                .property_ids([100])
                .build();
            self.cache.insert(&handle, value(&handle, 1));
        }
    }
}

/// Materialized value of `size` entities
pub fn value(handle: &IterableHandle, size: u64) -> CachedValue {
    let entities = (0..size)
        .map(|i| EntityId::new(handle.entity_type_id(), i))
        .collect();
    CachedInstanceIterable::new(handle.clone(), entities).into_value()
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
