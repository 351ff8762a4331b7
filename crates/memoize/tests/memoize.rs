// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Integration tests for memoized reads.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use std::time::Duration;

use memoize::{Error, ErrorKind, Generated, MemoCache, NoTransaction, RecordFlags, fingerprint};
use memoize_remote::testing::{MockQueue, MockRemote, RemoteOp, TestTransaction};
use serde::{Deserialize, Serialize};
use tick::Clock;

type TestResult = Result<(), Error>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct User {
    id: String,
    name: String,
}

impl User {
    fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
        }
    }
}

fn cache_with(remote: MockRemote) -> MemoCache<MockRemote, MockQueue> {
    MemoCache::builder(remote, Clock::new_frozen()).delete_queue(MockQueue::new()).build()
}

fn counting(calls: &Arc<AtomicUsize>, value: u32) -> impl FnOnce() -> std::future::Ready<Result<Option<u32>, Error>> + Send + 'static {
    let calls = Arc::clone(calls);
    move || {
        calls.fetch_add(1, Ordering::SeqCst);
        std::future::ready(Ok(Some(value)))
    }
}

#[tokio::test]
async fn miss_invokes_generator_exactly_once() -> TestResult {
    let remote = MockRemote::new();
    let cache = cache_with(remote.clone());
    let calls = Arc::new(AtomicUsize::new(0));

    let value = cache.memoize(&NoTransaction, "cold", counting(&calls, 7)).await?;
    assert_eq!(value, 7);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(remote.contains_key(&fingerprint("cold")));

    // Served from cache on the second call.
    let value = cache.memoize(&NoTransaction, "cold", counting(&calls, 8)).await?;
    assert_eq!(value, 7);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn nil_result_is_cached_until_deleted() -> TestResult {
    let remote = MockRemote::new();
    let cache = cache_with(remote.clone());
    let calls = Arc::new(AtomicUsize::new(0));

    let generator = |calls: Arc<AtomicUsize>| move || async move {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok::<Option<u32>, Error>(None)
    };

    for _ in 0..3 {
        let error = cache.memoize(&NoTransaction, "ghost", generator(Arc::clone(&calls))).await.unwrap_err();
        assert!(error.is_not_found());
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let stored = remote.peek(&fingerprint("ghost")).expect("nil marker should be stored");
    assert!(stored.flags().contains(RecordFlags::NIL_MARKER));

    cache.del(&NoTransaction, &["ghost"]).await?;
    let error = cache.memoize(&NoTransaction, "ghost", generator(Arc::clone(&calls))).await.unwrap_err();
    assert!(error.is_not_found());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    Ok(())
}

#[tokio::test]
async fn nil_result_without_cache_nil_asks_again() -> TestResult {
    let remote = MockRemote::new();
    let cache = cache_with(remote.clone());
    let calls = Arc::new(AtomicUsize::new(0));

    for _ in 0..2 {
        let counter = Arc::clone(&calls);
        let error = cache
            .memoize_during(&NoTransaction, "ghost", Duration::from_secs(60), false, move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<Option<u32>, Error>(None)
            })
            .await
            .unwrap_err();
        assert!(error.is_not_found());
    }

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(remote.entry_count(), 0);
    Ok(())
}

#[tokio::test]
async fn batch_scenario_serves_missing_from_nil_cache() -> TestResult {
    let cache = cache_with(MockRemote::new());
    let u1 = User::new("u1", "Ada");
    let u2 = User::new("u2", "Grace");

    let first = |user: Option<User>| move || async move {
        match user {
            Some(user) => Ok(Generated::found(user)),
            None => Err(Error::not_found()),
        }
    };
    let results = cache
        .memoize_multi(
            &NoTransaction,
            true,
            [("u1", first(Some(u1.clone()))), ("u2", first(Some(u2.clone()))), ("missing", first(None))],
        )
        .await?;

    assert_eq!(results[0].as_ref().ok(), Some(&u1));
    assert_eq!(results[1].as_ref().ok(), Some(&u2));
    assert!(results[2].as_ref().unwrap_err().is_not_found());

    // Every generator would panic now; everything must come from the cache.
    let repeat = |key: &'static str| move || async move {
        if !key.is_empty() {
            panic!("generator for {key} must not run");
        }
        Ok::<Generated<User>, Error>(Generated::not_found())
    };
    let results = cache
        .memoize_multi(&NoTransaction, true, [("u1", repeat("u1")), ("u2", repeat("u2")), ("missing", repeat("missing"))])
        .await?;

    assert_eq!(results[0].as_ref().ok(), Some(&u1));
    assert_eq!(results[1].as_ref().ok(), Some(&u2));
    assert!(results[2].as_ref().unwrap_err().is_not_found());
    Ok(())
}

#[tokio::test]
async fn failing_generator_does_not_affect_siblings() -> TestResult {
    let remote = MockRemote::new();
    let cache = cache_with(remote.clone());

    let generator = |value: Option<u32>| move || async move {
        value
            .map(Generated::found)
            .ok_or_else(|| Error::generator(std::io::Error::other("backing store offline")))
    };
    let results = cache
        .memoize_multi(&NoTransaction, true, [("a", generator(Some(1))), ("b", generator(None)), ("c", generator(Some(3)))])
        .await?;

    assert_eq!(results[0].as_ref().ok(), Some(&1));
    assert_eq!(results[1].as_ref().unwrap_err().kind(), ErrorKind::Generator);
    assert_eq!(results[2].as_ref().ok(), Some(&3));

    // Failed generations are never cached.
    assert!(remote.contains_key(&fingerprint("a")));
    assert!(!remote.contains_key(&fingerprint("b")));
    assert!(remote.contains_key(&fingerprint("c")));
    Ok(())
}

#[tokio::test]
async fn panicking_generator_is_reported_after_siblings_finish() {
    let remote = MockRemote::new();
    let cache = cache_with(remote.clone());

    let generator = |value: u32| move || async move {
        if value == 0 {
            panic!("generator exploded");
        }
        tokio::task::yield_now().await;
        Ok(Generated::found(value))
    };
    let error = cache
        .memoize_multi(&NoTransaction, true, [("a", generator(1)), ("boom", generator(0)), ("c", generator(3))])
        .await
        .unwrap_err();

    assert_eq!(error.kind(), ErrorKind::TaskPanicked);
    assert!(error.to_string().contains("generator exploded"), "got: {error}");

    // Siblings ran to completion and wrote their values back.
    assert!(remote.contains_key(&fingerprint("a")));
    assert!(remote.contains_key(&fingerprint("c")));
    assert!(!remote.contains_key(&fingerprint("boom")));
}

#[tokio::test]
async fn generated_expiration_is_stored_per_result() -> TestResult {
    let remote = MockRemote::new();
    let cache = cache_with(remote.clone());

    let value = cache
        .memoize_generated(&NoTransaction, "short", true, || async {
            Ok(Generated::found("fresh".to_string()).expiring(Duration::from_secs(5)))
        })
        .await?;
    assert_eq!(value, "fresh");

    let stored = remote.peek(&fingerprint("short")).expect("value should be stored");
    assert_eq!(stored.expiration(), Some(Duration::from_secs(5)));
    Ok(())
}

#[tokio::test]
async fn transaction_bypasses_lookup_and_write_back() -> TestResult {
    let remote = MockRemote::new();
    let cache = cache_with(remote.clone());
    cache.put("k", &1_u32).await?;
    remote.clear_operations();

    let tx = TestTransaction::begin();
    let calls = Arc::new(AtomicUsize::new(0));
    let value = cache.memoize(&tx, "k", counting(&calls, 2)).await?;

    assert_eq!(value, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(remote.operations().is_empty(), "got: {:?}", remote.operations());

    // The value cached before the transaction is untouched.
    let value: u32 = cache.memoize(&NoTransaction, "k", counting(&calls, 3)).await?;
    assert_eq!(value, 1);
    Ok(())
}

#[tokio::test]
async fn remote_outage_degrades_to_recompute() -> TestResult {
    let remote = MockRemote::new();
    let cache = MemoCache::builder(remote.clone(), Clock::new_frozen())
        .delete_queue(MockQueue::new())
        .retry(memoize::RetryPolicy::no_retry())
        .build();
    remote.fail_when(|op| matches!(op, RemoteOp::GetMulti(_)));

    let calls = Arc::new(AtomicUsize::new(0));
    for _ in 0..2 {
        let value = cache.memoize(&NoTransaction, "k", counting(&calls, 5)).await?;
        assert_eq!(value, 5);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    Ok(())
}

#[tokio::test]
async fn disabled_cache_always_generates() -> TestResult {
    let remote = MockRemote::new();
    let cache = MemoCache::builder(remote.clone(), Clock::new_frozen())
        .delete_queue(MockQueue::new())
        .enabled(false)
        .build();

    let calls = Arc::new(AtomicUsize::new(0));
    for _ in 0..2 {
        assert_eq!(cache.memoize(&NoTransaction, "k", counting(&calls, 9)).await?, 9);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(remote.operations().is_empty());
    Ok(())
}
