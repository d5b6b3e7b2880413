//! Integration tests for the iterable cache
//!
//! Cover the read path, deferred caching, commit-time invalidation, background job
//! outcomes (merge, deadline, cancellation, retry) and snapshot isolation.
//!
//! Timing-sensitive tests drive a manual clock and run serially.

#[path = "testutils/mod.rs"]
mod testutils;

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use entitycache::cache::SnapshotLookup;
use entitycache::{
    CacheConfig, CachedIterable, IterableHandle, LiveCount, MutationDescriptor, StoreError,
    TxnFlags, NULL_TYPE_ID,
};
use serial_test::serial;
use testutils::fixture::{value, CacheFixture, JOB_TIMEOUT};

fn handle(id: &str, type_id: i32, link: i32) -> IterableHandle {
    IterableHandle::builder(id)
        .entity_type(type_id)
        .link_ids([link])
        .build()
}

#[test]
#[serial]
fn test_deferred_caching_under_pressure() {
    let fx = CacheFixture::small(10);
    fx.fill(6);
    assert!(!fx.cache.snapshot().is_sparse());

    let h1 = handle("h1", 1, 7);
    assert!(fx.get(&h1).is_none());
    fx.clock.advance(Duration::from_millis(500));
    assert!(fx.get(&h1).is_none());
    fx.settle();
    assert_eq!(fx.cache.statistics().jobs_enqueued, 0);
    assert_eq!(fx.backend.calls(&h1), 0);

    // dwell time elapsed: the next miss schedules
    fx.clock.advance(Duration::from_millis(1600));
    assert!(fx.get(&h1).is_none());
    fx.settle();
    assert_eq!(fx.cache.statistics().jobs_enqueued, 1);

    let cached = fx.get(&h1).expect("h1 cached");
    assert_eq!(cached.size(), 1);
}

#[test]
#[serial]
fn test_sparse_cache_schedules_immediately() {
    let fx = CacheFixture::small(10);
    fx.fill(4);
    let h = handle("h", 1, 7);

    assert!(fx.get(&h).is_none());
    fx.settle();
    assert!(fx.get(&h).is_some());
}

#[test]
#[serial]
fn test_commit_during_materialization_discards_result() {
    let fx = CacheFixture::small(10);
    fx.fill(6);
    let h1 = handle("h1", 1, 7);

    assert!(fx.get(&h1).is_none());
    fx.clock.advance(Duration::from_millis(2100));
    fx.backend.close_gate(&h1);
    assert!(fx.get(&h1).is_none());
    assert!(fx.backend.wait_entered(&h1, JOB_TIMEOUT));

    fx.cache.invalidate(&[MutationDescriptor::link_changed(1, 7)]);
    fx.backend.open_gate(&h1);
    fx.settle();

    assert!(fx.cache.lookup(&h1).is_none());
    let stats = fx.cache.statistics();
    assert_eq!(stats.jobs_started, 1);
    assert_eq!(stats.jobs_interrupted, 1);
    // an obsolete result is dropped, the query itself is fine
    assert!(!fx.cache.is_heavy(&h1));

    assert!(fx.get(&h1).is_none());
    fx.clock.advance(Duration::from_millis(2100));
    assert!(fx.get(&h1).is_none());
    fx.settle();
    assert_eq!(fx.cache.statistics().jobs_enqueued, 2);
    assert!(fx.cache.lookup(&h1).is_some());
}

#[test]
#[serial]
fn test_concurrent_consistent_jobs_are_not_blacklisted() {
    let fx = CacheFixture::new();
    let first = handle("first", 1, 1);
    let second = handle("second", 2, 2);

    fx.backend.close_gate(&first);
    fx.backend.close_gate(&second);
    fx.get(&first);
    fx.get(&second);
    assert!(fx.backend.wait_entered(&first, JOB_TIMEOUT));
    assert!(fx.backend.wait_entered(&second, JOB_TIMEOUT));

    // publishing `first` makes the snapshot `second` reads from obsolete
    fx.backend.open_gate(&first);
    fx.settle();

    assert!(fx.cache.lookup(&first).is_some());
    assert!(fx.cache.lookup(&second).is_none());
    assert!(!fx.cache.is_heavy(&first));
    assert!(!fx.cache.is_heavy(&second));
    let stats = fx.cache.statistics();
    assert_eq!(stats.jobs_interrupted, 1);
    assert_eq!(stats.jobs_failed, 0);

    fx.backend.open_gate(&second);
    assert!(fx.get(&second).is_none());
    fx.settle();
    assert!(fx.cache.lookup(&second).is_some());
    assert_eq!(fx.cache.statistics().jobs_enqueued, 3);
}

#[test]
fn test_invalidation_completeness_and_precision() {
    let fx = CacheFixture::new();
    let by_link = handle("by_link", 1, 5);
    let by_prop = IterableHandle::builder("by_prop")
        .entity_type(1)
        .property_ids([8])
        .build();
    let by_creation = IterableHandle::builder("by_creation")
        .entity_type(2)
        .type_ids_affecting_creation([2])
        .build();
    let typed = IterableHandle::builder("typed").entity_type(3).build();
    let generic = IterableHandle::builder("generic")
        .entity_type(NULL_TYPE_ID)
        .build();
    let unrelated = handle("unrelated", 4, 6);

    let all = [&by_link, &by_prop, &by_creation, &typed, &generic, &unrelated];
    for h in all {
        fx.cache.insert(h, value(h, 3));
    }
    let count = IterableHandle::builder("count:2")
        .entity_type(2)
        .sticky(true)
        .build();
    fx.cache
        .register_sticky(&count, LiveCount::new(count.clone(), 10).into_value());

    let cached = |h: &IterableHandle| fx.cache.lookup(h).is_some();

    assert_eq!(fx.cache.invalidate(&[MutationDescriptor::link_changed(1, 5)]), 1);
    assert!(!cached(&by_link));
    assert!(cached(&by_prop) && cached(&by_creation) && cached(&typed) && cached(&generic));

    assert_eq!(fx.cache.invalidate(&[MutationDescriptor::property_changed(1, 8)]), 1);
    assert!(!cached(&by_prop));

    assert_eq!(fx.cache.invalidate(&[MutationDescriptor::entity_created(2)]), 1);
    assert!(!cached(&by_creation));
    assert_eq!(fx.cache.lookup(&count).map(|v| v.size()), Some(11));

    // type-level changes also reach type-generic handles
    assert_eq!(fx.cache.invalidate(&[MutationDescriptor::type_changed(3)]), 2);
    assert!(!cached(&typed));
    assert!(!cached(&generic));

    assert!(cached(&unrelated));
    assert_eq!(fx.cache.statistics().invalidations, 5);
}

#[test]
fn test_global_mutation_evicts_everything() {
    let fx = CacheFixture::new();
    let unindexed = IterableHandle::builder("unindexed").entity_type(-9).build();
    let linked = handle("linked", 1, 1);
    fx.cache.insert(&unindexed, value(&unindexed, 1));
    fx.cache.insert(&linked, value(&linked, 1));

    assert_eq!(fx.cache.invalidate(&[MutationDescriptor::global()]), 2);
    assert!(fx.cache.snapshot().is_empty());
}

#[test]
fn test_snapshot_isolation() {
    let fx = CacheFixture::new();
    let group: Vec<_> = (0..8)
        .map(|i| handle(&format!("group:{}", i), 1, 9))
        .collect();
    let done = AtomicBool::new(false);

    std::thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                while !done.load(Ordering::Acquire) {
                    let snapshot = fx.cache.snapshot();
                    let present = group
                        .iter()
                        .filter(|h| matches!(snapshot.lookup(h), SnapshotLookup::Hit(_)))
                        .count();
                    assert!(
                        present == 0 || present == group.len(),
                        "torn snapshot: {} of {} present",
                        present,
                        group.len()
                    );
                }
            });
        }

        for _ in 0..200 {
            let base = fx.cache.snapshot();
            let mut generation = base.to_mutable();
            for h in &group {
                generation.insert(h.clone(), value(h, 2));
            }
            fx.cache
                .try_publish(&base, generation)
                .expect("single writer");
            fx.cache
                .invalidate(&[MutationDescriptor::link_changed(1, 9)]);
        }
        done.store(true, Ordering::Release);
    });
}

#[test]
fn test_reclaimed_entry_is_a_miss_and_removed() {
    let fx = CacheFixture::with_config(CacheConfig {
        max_direct_value_size: 4,
        ..CacheConfig::default()
    });
    let big = handle("big", 1, 1);
    fx.cache.insert(&big, value(&big, 100));
    assert_eq!(fx.cache.lookup(&big).map(|v| v.size()), Some(100));
    assert_eq!(fx.cache.snapshot().len(), 1);

    fx.cache.reclaimable_pool().release_all();
    assert!(fx.cache.lookup(&big).is_none());
    assert_eq!(fx.cache.snapshot().len(), 0);
}

#[test]
#[serial]
fn test_duplicate_jobs_are_merged() {
    let fx = CacheFixture::small(16);
    let blocker = handle("blocker", 1, 1);
    let h = handle("h", 1, 2);

    fx.backend.close_gate(&blocker);
    fx.get(&blocker);
    assert!(fx.backend.wait_entered(&blocker, JOB_TIMEOUT));

    fx.get(&h);
    fx.cache.put_if_not_cached(&h, &TxnFlags::read_only());
    assert!(fx.cache.is_job_queued(&h));
    assert_eq!(fx.cache.statistics().jobs_merged, 1);

    fx.backend.open_gate(&blocker);
    fx.settle();
    assert_eq!(fx.backend.calls(&h), 1);
    assert!(fx.cache.lookup(&h).is_some());
}

#[test]
#[serial]
fn test_count_request_does_not_swallow_materialization() {
    let fx = CacheFixture::small(16);
    let blocker = IterableHandle::builder("blocker")
        .entity_type(1)
        .link_ids([1])
        .consistent(false)
        .build();
    let h = IterableHandle::builder("h")
        .entity_type(1)
        .link_ids([2])
        .consistent(false)
        .build();
    fx.backend.set_size(&h, 5);

    fx.backend.close_gate(&blocker);
    fx.get(&blocker);
    assert!(fx.backend.wait_entered(&blocker, JOB_TIMEOUT));

    let txn = fx.reader();
    assert_eq!(fx.cache.count_or_schedule(&h, &txn), None);
    assert!(fx.get(&h).is_none());
    assert!(fx.cache.is_count_queued(&h));
    assert!(fx.cache.is_job_queued(&h));
    assert_eq!(fx.cache.statistics().jobs_merged, 0);

    fx.backend.open_gate(&blocker);
    fx.settle();
    assert_eq!(fx.backend.calls(&h), 2);
    assert_eq!(fx.cache.lookup(&h).map(|v| v.size()), Some(5));
    assert_eq!(fx.cache.get_cached_count(&h), Some(5));
}

#[test]
#[serial]
fn test_stale_job_is_not_started() {
    let fx = CacheFixture::small(16);
    let blocker = handle("blocker", 1, 1);
    let h = handle("h", 1, 2);

    fx.backend.close_gate(&blocker);
    fx.get(&blocker);
    assert!(fx.backend.wait_entered(&blocker, JOB_TIMEOUT));
    fx.get(&h);

    fx.clock.advance(Duration::from_secs(8));
    fx.backend.open_gate(&blocker);
    fx.settle();

    assert_eq!(fx.cache.statistics().jobs_not_started, 1);
    assert_eq!(fx.backend.calls(&h), 0);
    assert!(fx.cache.lookup(&h).is_none());
    assert!(fx.cache.lookup(&blocker).is_some());
}

#[test]
#[serial]
fn test_overdue_job_blacklists_handle() {
    let fx = CacheFixture::small(16);
    let heavy = handle("heavy", 1, 1);

    fx.backend.close_gate(&heavy);
    fx.get(&heavy);
    assert!(fx.backend.wait_entered(&heavy, JOB_TIMEOUT));
    fx.clock.advance(Duration::from_secs(11));
    fx.settle();

    assert_eq!(fx.cache.statistics().jobs_interrupted, 1);
    assert!(fx.cache.is_heavy(&heavy));
    fx.get(&heavy);
    assert_eq!(fx.cache.statistics().jobs_enqueued, 1);

    // cool-down over
    fx.clock.advance(Duration::from_secs(61));
    fx.backend.open_gate(&heavy);
    fx.get(&heavy);
    fx.settle();
    assert!(fx.get(&heavy).is_some());
    assert_eq!(fx.cache.statistics().jobs_enqueued, 2);
}

#[test]
#[serial]
fn test_read_only_race_is_requeued() {
    let fx = CacheFixture::small(16);
    let h = handle("h", 1, 1);
    fx.backend.fail_next(&h, StoreError::ReadOnlyTransaction);

    fx.get(&h);
    fx.settle();

    assert_eq!(fx.backend.calls(&h), 2);
    assert_eq!(fx.cache.statistics().jobs_requeued, 1);
    assert!(fx.cache.lookup(&h).is_some());
}

#[test]
#[serial]
fn test_store_failure_is_not_retried() {
    let fx = CacheFixture::small(16);
    let h = handle("h", 1, 1);
    fx.backend.fail_next(&h, StoreError::failed("disk unavailable"));

    fx.get(&h);
    fx.settle();

    assert_eq!(fx.backend.calls(&h), 1);
    assert_eq!(fx.cache.statistics().jobs_failed, 1);
    assert!(fx.cache.lookup(&h).is_none());
}

#[test]
#[serial]
fn test_best_effort_result_survives_unrelated_commit() {
    let fx = CacheFixture::small(16);
    let h = IterableHandle::builder("approx")
        .entity_type(1)
        .link_ids([1])
        .consistent(false)
        .build();

    fx.backend.close_gate(&h);
    fx.get(&h);
    assert!(fx.backend.wait_entered(&h, JOB_TIMEOUT));
    fx.cache
        .invalidate(&[MutationDescriptor::link_changed(5, 99)]);
    fx.backend.open_gate(&h);
    fx.settle();

    assert!(fx.cache.lookup(&h).is_some());
    assert!(fx.cache.statistics().publication_conflicts >= 1);
    assert_eq!(fx.cache.statistics().jobs_interrupted, 0);
}

#[test]
#[serial]
fn test_counts() {
    let fx = CacheFixture::small(16);
    let h = handle("h", 1, 1);
    fx.backend.set_size(&h, 40);
    let txn = fx.reader();

    assert_eq!(fx.cache.count_or_schedule(&h, &txn), None);
    fx.settle();
    assert_eq!(fx.cache.count_or_schedule(&h, &txn), Some(40));

    let stats = fx.cache.statistics();
    assert_eq!(stats.count_jobs_enqueued, 1);
    assert_eq!((stats.count_hits, stats.count_misses), (1, 1));

    // materialization refreshes the count too
    let other = handle("other", 1, 2);
    fx.backend.set_size(&other, 3);
    fx.get(&other);
    fx.settle();
    assert_eq!(fx.cache.get_cached_count(&other), Some(3));
}

#[test]
fn test_capacity_is_bounded() {
    let fx = CacheFixture::small(8);
    fx.fill(20);
    assert_eq!(fx.cache.snapshot().len(), 8);
    assert_eq!(fx.cache.statistics().evictions, 12);
}

#[test]
fn test_statistics_export() {
    let fx = CacheFixture::new();
    let h = handle("h", 1, 1);
    fx.cache.insert(&h, value(&h, 1));
    fx.get(&h);

    let stats = fx.cache.statistics();
    assert_eq!(stats.hits, 1);
    let json = stats.to_json().expect("serializable");
    assert!(json.contains("\"hits\": 1"));
    assert!(stats.summary().contains("100.0% hit rate"));
}
