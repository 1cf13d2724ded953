use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};
use tuile::{
    CacheConfig, CacheStore, Fingerprint, InvalidationSignal, QueryExecutor, QueryKey,
    QueryStatus, RetentionClass, RetentionPolicy, RetryConfig, Scope, SyncError, Table,
};

// ============================================================================
// Helpers
// ============================================================================

fn executor(retry: RetryConfig) -> QueryExecutor {
    QueryExecutor::new(Arc::new(CacheStore::default()), retry)
}

fn standard_key(root: &str) -> QueryKey {
    QueryKey::new(Fingerprint::new(root)).class(RetentionClass::Standard)
}

// ============================================================================
// Cache hits and coalescing
// ============================================================================

#[tokio::test(start_paused = true)]
async fn concurrent_callers_share_one_fetch() {
    let executor = executor(RetryConfig::disabled());
    let calls = Arc::new(AtomicU32::new(0));

    let fetch = {
        let calls = Arc::clone(&calls);
        move || {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok::<_, SyncError>(json!({"nouveau": 2}))
            }
        }
    };

    let (a, b) = tokio::join!(
        executor.ensure(standard_key("leadsByStatus"), fetch.clone()),
        executor.ensure(standard_key("leadsByStatus"), fetch),
    );

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let (a, b) = (a.unwrap(), b.unwrap());
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(*a, json!({"nouveau": 2}));
}

#[tokio::test(start_paused = true)]
async fn fresh_entry_is_served_without_fetching() {
    let executor = executor(RetryConfig::disabled());
    let calls = Arc::new(AtomicU32::new(0));
    let fetch = {
        let calls = Arc::clone(&calls);
        move || {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, SyncError>(json!(1))
            }
        }
    };

    executor
        .ensure(standard_key("configuration"), fetch.clone())
        .await
        .unwrap();
    executor
        .ensure(standard_key("configuration"), fetch.clone())
        .await
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Past the five-minute stale window the entry is fetched again.
    tokio::time::advance(Duration::from_secs(301)).await;
    executor
        .ensure(standard_key("configuration"), fetch)
        .await
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn live_entries_always_refetch() {
    let executor = executor(RetryConfig::disabled());
    let calls = Arc::new(AtomicU32::new(0));
    let fetch = {
        let calls = Arc::clone(&calls);
        move || {
            let calls = Arc::clone(&calls);
            async move { Ok::<_, SyncError>(json!(calls.fetch_add(1, Ordering::SeqCst))) }
        }
    };
    let key = || QueryKey::new(Fingerprint::new("kpis")).class(RetentionClass::Live);

    executor.ensure(key(), fetch.clone()).await.unwrap();
    executor.ensure(key(), fetch).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn unchanged_data_keeps_the_same_arc() {
    let executor = executor(RetryConfig::disabled());
    let key = || QueryKey::new(Fingerprint::new("kpis")).class(RetentionClass::Live);
    let fetch = || async { Ok::<_, SyncError>(json!({"leads": 3})) };

    let first = executor.ensure(key(), fetch).await.unwrap();
    let notified = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&notified);
    let _sub = executor
        .store()
        .subscribe(&Fingerprint::new("kpis"), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
    executor.ensure(key(), fetch).await.unwrap();

    let entry = executor.store().get(&Fingerprint::new("kpis")).unwrap();
    assert!(Arc::ptr_eq(&first, entry.data.as_ref().unwrap()));
    // Only the fetching flag toggled; the data did not change.
    assert_eq!(notified.load(Ordering::SeqCst), 2);
}

// ============================================================================
// Ordering
// ============================================================================

#[tokio::test(start_paused = true)]
async fn slow_superseded_fetch_is_discarded() {
    let executor = executor(RetryConfig::disabled());
    let fingerprint = Fingerprint::new("chantiers").with("");
    let calls = Arc::new(AtomicU32::new(0));

    // First fetch is slow and returns the old list, the second is fast.
    let fetch = {
        let calls = Arc::clone(&calls);
        move || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    Ok::<_, SyncError>(json!(["old"]))
                } else {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    Ok(json!(["old", "new"]))
                }
            }
        }
    };

    let _sub = executor.store().subscribe(&fingerprint, |_| {});
    let first = tokio::spawn({
        let executor = executor.clone();
        let key = QueryKey::new(fingerprint.clone());
        async move { executor.ensure(key, fetch).await }
    });
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert!(executor.is_fetching(&fingerprint));

    let report = executor
        .invalidate(InvalidationSignal::manual(Scope::Prefix(
            Fingerprint::new("chantiers"),
        )))
        .await;
    assert_eq!(report.refetched, vec![fingerprint.clone()]);
    let entry = executor.store().get(&fingerprint).unwrap();
    assert_eq!(entry.data.as_deref(), Some(&json!(["old", "new"])));

    // The first fetch completes later and must not overwrite the newer data.
    first.await.unwrap().unwrap();
    let entry = executor.store().get(&fingerprint).unwrap();
    assert_eq!(entry.data.as_deref(), Some(&json!(["old", "new"])));
    assert_eq!(entry.status, QueryStatus::Success);
    assert!(!entry.fetching);
    assert!(!executor.is_fetching(&fingerprint));
}

#[tokio::test(start_paused = true)]
async fn dropping_the_caller_does_not_cancel_the_fetch() {
    let executor = executor(RetryConfig::disabled());
    let fetch = || async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok::<_, SyncError>(json!("done"))
    };

    let caller = tokio::spawn({
        let executor = executor.clone();
        async move { executor.ensure(standard_key("topClients"), fetch).await }
    });
    tokio::time::sleep(Duration::from_millis(1)).await;
    caller.abort();

    tokio::time::sleep(Duration::from_millis(100)).await;
    let entry = executor.store().get(&Fingerprint::new("topClients")).unwrap();
    assert_eq!(entry.data.as_deref(), Some(&json!("done")));
    assert_eq!(entry.status, QueryStatus::Success);
}

// ============================================================================
// Invalidation
// ============================================================================

#[tokio::test(start_paused = true)]
async fn unobserved_entries_are_refetched_lazily() {
    let executor = executor(RetryConfig::disabled());
    let calls = Arc::new(AtomicU32::new(0));
    let fetch = {
        let calls = Arc::clone(&calls);
        move || {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, SyncError>(json!([]))
            }
        }
    };
    let key = || standard_key("leadsForChantier").reads(tuile::Table::Leads);

    executor.ensure(key(), fetch.clone()).await.unwrap();
    let report = executor
        .invalidate(InvalidationSignal::manual(tuile::Table::Leads))
        .await;
    assert_eq!(report.matched, vec![Fingerprint::new("leadsForChantier")]);
    assert!(report.refetched.is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let entry = executor
        .store()
        .get(&Fingerprint::new("leadsForChantier"))
        .unwrap();
    assert!(entry.invalidated);

    // Still within the stale window, but invalidated entries are not fresh.
    executor.ensure(key(), fetch).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    let entry = executor
        .store()
        .get(&Fingerprint::new("leadsForChantier"))
        .unwrap();
    assert!(!entry.invalidated);
}

/// A slow fetch reading the configuration row at its current version.
fn versioned_fetch(
    version: &Arc<AtomicU32>,
    calls: &Arc<AtomicU32>,
) -> impl Fn() -> futures_util::future::BoxFuture<'static, Result<Value, SyncError>>
+ Clone
+ Send
+ Sync
+ 'static {
    let version = Arc::clone(version);
    let calls = Arc::clone(calls);
    move || {
        let version = Arc::clone(&version);
        calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            let read = version.load(Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(json!(read))
        })
    }
}

fn configuration_key() -> QueryKey {
    QueryKey::new(Fingerprint::new("configuration"))
        .class(RetentionClass::Static)
        .reads(Table::Configuration)
}

#[tokio::test(start_paused = true)]
async fn invalidation_during_unobserved_fetch_is_kept() {
    let executor = executor(RetryConfig::disabled());
    let version = Arc::new(AtomicU32::new(1));
    let calls = Arc::new(AtomicU32::new(0));
    let fetch = versioned_fetch(&version, &calls);

    let first = tokio::spawn({
        let executor = executor.clone();
        let fetch = fetch.clone();
        async move { executor.ensure(configuration_key(), fetch).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    // A write lands while the first read is still running.
    version.store(2, Ordering::SeqCst);
    let report = executor
        .invalidate(InvalidationSignal::manual(Table::Configuration))
        .await;
    assert_eq!(report.matched, vec![Fingerprint::new("configuration")]);
    assert!(report.refetched.is_empty());

    assert_eq!(*first.await.unwrap().unwrap(), json!(1));
    let entry = executor
        .store()
        .get(&Fingerprint::new("configuration"))
        .unwrap();
    assert_eq!(entry.data.as_deref(), Some(&json!(1)));
    assert!(entry.invalidated);

    let data = executor.ensure(configuration_key(), fetch).await.unwrap();
    assert_eq!(*data, json!(2));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    let entry = executor
        .store()
        .get(&Fingerprint::new("configuration"))
        .unwrap();
    assert!(!entry.invalidated);
}

#[tokio::test(start_paused = true)]
async fn read_after_invalidation_does_not_join_older_fetch() {
    let executor = executor(RetryConfig::disabled());
    let version = Arc::new(AtomicU32::new(1));
    let calls = Arc::new(AtomicU32::new(0));
    let fetch = versioned_fetch(&version, &calls);

    let first = tokio::spawn({
        let executor = executor.clone();
        let fetch = fetch.clone();
        async move { executor.ensure(configuration_key(), fetch).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    version.store(2, Ordering::SeqCst);
    executor
        .invalidate(InvalidationSignal::manual(Table::Configuration))
        .await;

    // The first fetch is still running, but it started before the write.
    let data = executor.ensure(configuration_key(), fetch).await.unwrap();
    assert_eq!(*data, json!(2));
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    first.await.unwrap().unwrap();
    let entry = executor
        .store()
        .get(&Fingerprint::new("configuration"))
        .unwrap();
    assert_eq!(entry.data.as_deref(), Some(&json!(2)));
    assert!(!entry.invalidated);
    assert!(entry.is_fresh(tokio::time::Instant::now()));
}

#[tokio::test(start_paused = true)]
async fn invalidation_out_of_scope_is_ignored() {
    let executor = executor(RetryConfig::disabled());
    executor
        .ensure(
            standard_key("configuration").reads(tuile::Table::Configuration),
            || async { Ok::<_, SyncError>(Value::Null) },
        )
        .await
        .unwrap();

    let report = executor
        .invalidate(InvalidationSignal::manual(tuile::Table::Chantiers))
        .await;
    assert!(report.matched.is_empty());
    let entry = executor
        .store()
        .get(&Fingerprint::new("configuration"))
        .unwrap();
    assert!(!entry.invalidated);
}

// ============================================================================
// Retries and errors
// ============================================================================

#[tokio::test(start_paused = true)]
async fn transient_failures_are_retried_and_visible() {
    let retry = RetryConfig::new()
        .max_attempts(3)
        .initial_delay(Duration::from_millis(100));
    let executor = executor(retry);
    let calls = Arc::new(AtomicU32::new(0));
    let fetch = {
        let calls = Arc::clone(&calls);
        move || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(SyncError::Http("connection reset".into()))
                } else {
                    Ok(json!({"devis": 4}))
                }
            }
        }
    };

    let failure_counts = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&failure_counts);
    let _sub = executor
        .store()
        .subscribe(&Fingerprint::new("kpis"), move |entry| {
            if entry.is_retrying() {
                seen.lock().unwrap().push(entry.failure_count);
            }
        });

    let data = executor.ensure(standard_key("kpis"), fetch).await.unwrap();
    assert_eq!(*data, json!({"devis": 4}));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(*failure_counts.lock().unwrap(), vec![1, 2]);

    let entry = executor.store().get(&Fingerprint::new("kpis")).unwrap();
    assert_eq!(entry.failure_count, 0);
    assert_eq!(entry.status, QueryStatus::Success);
}

#[tokio::test(start_paused = true)]
async fn terminal_errors_are_not_retried() {
    let executor = executor(RetryConfig::new().max_attempts(5));
    let calls = Arc::new(AtomicU32::new(0));
    let fetch = {
        let calls = Arc::clone(&calls);
        move || {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<Value, _>(SyncError::PermissionDenied("rls".into()))
            }
        }
    };

    let err = executor
        .ensure(standard_key("userRole"), fetch)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::PermissionDenied(_)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let entry = executor.store().get(&Fingerprint::new("userRole")).unwrap();
    assert_eq!(entry.status, QueryStatus::Error);
    assert_eq!(entry.error, Some(err));
    assert!(!entry.fetching);
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_keep_previous_data() {
    let executor = executor(
        RetryConfig::new()
            .max_attempts(2)
            .initial_delay(Duration::from_millis(10)),
    );
    executor
        .ensure(standard_key("topClients"), || async {
            Ok::<_, SyncError>(json!(["Martin"]))
        })
        .await
        .unwrap();

    tokio::time::advance(Duration::from_secs(301)).await;
    let err = executor
        .ensure(standard_key("topClients"), || async {
            Err::<Value, _>(SyncError::Api {
                status: 503,
                message: "unavailable".into(),
            })
        })
        .await
        .unwrap_err();
    assert!(err.is_transient());

    let entry = executor.store().get(&Fingerprint::new("topClients")).unwrap();
    assert_eq!(entry.status, QueryStatus::Error);
    assert_eq!(entry.data.as_deref(), Some(&json!(["Martin"])));
}

#[tokio::test]
async fn panicking_fetch_is_reported_as_aborted() {
    let executor = executor(RetryConfig::disabled());
    let explode = true;
    let err = executor
        .ensure(standard_key("kpis"), move || async move {
            if explode {
                panic!("fetch exploded");
            }
            Ok::<_, SyncError>(Value::Null)
        })
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Aborted(_)));

    let entry = executor.store().get(&Fingerprint::new("kpis")).unwrap();
    assert_eq!(entry.status, QueryStatus::Error);
    assert!(!entry.fetching);
    assert!(!executor.is_fetching(&Fingerprint::new("kpis")));
}

// ============================================================================
// Eviction
// ============================================================================

#[tokio::test(start_paused = true)]
async fn unobserved_entries_are_evicted_after_gc_time() {
    let config = CacheConfig::new().policy_for(
        RetentionClass::Standard,
        RetentionPolicy::new(Duration::from_secs(60), Duration::from_secs(120)),
    );
    let executor = QueryExecutor::new(Arc::new(CacheStore::new(config)), RetryConfig::disabled());
    let fetch = || async { Ok::<_, SyncError>(json!(1)) };

    executor.ensure(standard_key("unobserved"), fetch).await.unwrap();
    executor.ensure(standard_key("observed"), fetch).await.unwrap();
    let _sub = executor
        .store()
        .subscribe(&Fingerprint::new("observed"), |_| {});

    tokio::time::advance(Duration::from_secs(60)).await;
    assert!(executor.evict_stale().is_empty());

    tokio::time::advance(Duration::from_secs(61)).await;
    assert_eq!(executor.evict_stale(), vec![Fingerprint::new("unobserved")]);
    assert!(executor.store().get(&Fingerprint::new("observed")).is_some());
    assert_eq!(executor.store().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn gc_task_sweeps_periodically() {
    let config = CacheConfig::new().policy_for(
        RetentionClass::Standard,
        RetentionPolicy::new(Duration::from_secs(1), Duration::from_secs(5)),
    );
    let executor = QueryExecutor::new(Arc::new(CacheStore::new(config)), RetryConfig::disabled());
    executor
        .ensure(standard_key("kpis"), || async { Ok::<_, SyncError>(json!(1)) })
        .await
        .unwrap();

    let gc = executor.spawn_gc(Duration::from_secs(10));
    tokio::time::sleep(Duration::from_secs(11)).await;
    assert!(executor.store().is_empty());
    gc.abort();
}
