// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The memoizing cache client and its single-entry operations.

use std::{
    fmt::{Debug, Formatter},
    sync::Arc,
    time::Duration,
};

use memoize_remote::{CacheRecord, DeleteQueue, Error, RemoteCache, Result, TransactionContext};
use serde::{Serialize, de::DeserializeOwned};
use tick::Clock;

use crate::{
    MemoConfig, codec,
    builder::MemoCacheBuilder,
    fingerprint,
    retry::with_retry,
    telemetry::{CacheName, MemoActivity, MemoOperation, MemoTelemetry},
};

pub(crate) struct Inner<R, Q> {
    pub(crate) name: CacheName,
    pub(crate) config: MemoConfig,
    pub(crate) clock: Clock,
    pub(crate) remote: R,
    pub(crate) queue: Q,
    pub(crate) telemetry: MemoTelemetry,
}

/// A memoizing client in front of a remote cache.
///
/// `MemoCache` fingerprints logical keys, serves values from the remote cache
/// when it can, and otherwise runs caller-supplied generators and writes their
/// results back. Remote failures on the read path are logged and absorbed:
/// they only ever forfeit a cache hit.
///
/// Cloning is cheap; all clones share the same remote, queue and settings.
///
/// # Examples
///
/// ```
/// use memoize::{MemoCache, NoTransaction};
/// use memoize_remote::testing::{MockQueue, MockRemote};
/// use tick::Clock;
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), memoize::Error> {
///
/// let cache = MemoCache::builder(MockRemote::new(), Clock::new_frozen())
///     .delete_queue(MockQueue::new())
///     .build();
///
/// cache.put("greeting", &"hello").await?;
/// let value: Option<String> = cache.get(&NoTransaction, "greeting").await;
/// assert_eq!(value.as_deref(), Some("hello"));
/// # Ok(())
/// # }
/// ```
pub struct MemoCache<R, Q> {
    pub(crate) inner: Arc<Inner<R, Q>>,
}

impl<R, Q> Clone for MemoCache<R, Q> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R, Q> Debug for MemoCache<R, Q> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoCache")
            .field("name", &self.inner.name)
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl MemoCache<(), ()> {
    /// Creates a new cache builder around `remote`.
    ///
    /// `clock` drives retry backoff and lookup timing.
    #[must_use]
    pub fn builder<R>(remote: R, clock: Clock) -> MemoCacheBuilder<R> {
        MemoCacheBuilder::new(remote, clock)
    }
}

impl<R, Q> MemoCache<R, Q> {
    pub(crate) fn new(name: CacheName, config: MemoConfig, clock: Clock, remote: R, queue: Q) -> Self {
        let telemetry = MemoTelemetry::new(name, config.logs);
        Self {
            inner: Arc::new(Inner {
                name,
                config,
                clock,
                remote,
                queue,
                telemetry,
            }),
        }
    }

    /// Returns the name used in log events.
    #[must_use]
    pub fn name(&self) -> CacheName {
        self.inner.name
    }

    /// Returns the active configuration.
    #[must_use]
    pub fn config(&self) -> &MemoConfig {
        &self.inner.config
    }

    /// Returns the clock used for backoff and timing.
    #[must_use]
    pub fn clock(&self) -> &Clock {
        &self.inner.clock
    }

    /// Returns the underlying remote cache.
    #[must_use]
    pub fn remote(&self) -> &R {
        &self.inner.remote
    }

    /// Returns the delete queue.
    #[must_use]
    pub fn delete_queue(&self) -> &Q {
        &self.inner.queue
    }

    pub(crate) fn enabled(&self) -> bool {
        self.inner.config.enabled
    }

    pub(crate) fn telemetry(&self) -> &MemoTelemetry {
        &self.inner.telemetry
    }
}

impl<R, Q> MemoCache<R, Q>
where
    R: RemoteCache,
    Q: DeleteQueue,
{
    /// Looks up `key` and decodes its value.
    ///
    /// Returns `None` when caching is disabled, while `ctx` is inside a
    /// transaction, on a miss, for a cached nil marker, and when the remote
    /// cache fails or holds a payload that does not decode as `V`. Failures are
    /// logged, never returned.
    pub async fn get<V>(&self, ctx: &(impl TransactionContext + ?Sized), key: &str) -> Option<V>
    where
        V: DeserializeOwned,
    {
        if !self.enabled() || ctx.in_transaction() {
            return None;
        }

        let telemetry = self.telemetry();
        let stopwatch = self.inner.clock.stopwatch();
        let record = match self.inner.remote.get(&fingerprint(key)).await {
            Ok(Some(record)) if !record.is_nil_marker() => record,
            Ok(_) => {
                telemetry.record(MemoOperation::Get, MemoActivity::Miss, Some(stopwatch.elapsed()));
                return None;
            }
            Err(e) => {
                telemetry.record_error(MemoOperation::Get, MemoActivity::RemoteError, &e);
                return None;
            }
        };

        match codec::decode(record.payload()) {
            Ok(value) => {
                telemetry.record(MemoOperation::Get, MemoActivity::Hit, Some(stopwatch.elapsed()));
                Some(value)
            }
            Err(e) => {
                telemetry.record_error(MemoOperation::Get, MemoActivity::DecodeError, &e);
                None
            }
        }
    }

    /// Stores `value` under `key` until the remote cache evicts it.
    ///
    /// Does nothing when caching is disabled.
    ///
    /// # Errors
    ///
    /// Returns an error if `value` cannot be serialized or the write still
    /// fails once the retry deadline has passed.
    pub async fn put<V>(&self, key: &str, value: &V) -> Result<()>
    where
        V: Serialize + ?Sized,
    {
        self.put_record(key, value, None).await
    }

    /// Stores `value` under `key` for at most `ttl`.
    ///
    /// # Errors
    ///
    /// Same as [`put`](Self::put).
    pub async fn put_until<V>(&self, key: &str, value: &V, ttl: Duration) -> Result<()>
    where
        V: Serialize + ?Sized,
    {
        self.put_record(key, value, Some(ttl)).await
    }

    async fn put_record<V>(&self, key: &str, value: &V, ttl: Option<Duration>) -> Result<()>
    where
        V: Serialize + ?Sized,
    {
        if !self.enabled() {
            return Ok(());
        }
        let record = CacheRecord::new(codec::encode(value)?).with_optional_expiration(ttl);
        self.write(MemoOperation::Put, &fingerprint(key), record).await
    }

    /// Replaces the value under `key` with `replacement` if it currently
    /// equals `expected`.
    ///
    /// The stored payload is compared byte for byte with the serialized
    /// `expected`. Returns `Ok(false)` when the key is absent, the value
    /// differs, another writer got there first, or caching is disabled.
    ///
    /// # Errors
    ///
    /// Returns an error if a value cannot be serialized or the remote cache
    /// fails.
    pub async fn cas<V>(&self, key: &str, expected: &V, replacement: &V) -> Result<bool>
    where
        V: Serialize + ?Sized,
    {
        if !self.enabled() {
            return Ok(false);
        }

        let telemetry = self.telemetry();
        let fp = fingerprint(key);
        let Some(mut record) = self.inner.remote.get(&fp).await? else {
            telemetry.record(MemoOperation::CompareAndSwap, MemoActivity::Miss, None);
            return Ok(false);
        };

        if record.is_nil_marker() || record.payload() != codec::encode(expected)?.as_slice() {
            telemetry.record(MemoOperation::CompareAndSwap, MemoActivity::Conflict, None);
            return Ok(false);
        }

        record.set_payload(codec::encode(replacement)?);
        let swapped = self.inner.remote.compare_and_swap(&fp, record).await?;
        let activity = if swapped { MemoActivity::Swapped } else { MemoActivity::Conflict };
        telemetry.record(MemoOperation::CompareAndSwap, activity, None);
        Ok(swapped)
    }

    /// Atomically adds `delta` to the counter under `key`, creating it from
    /// `initial` when absent, and returns the new value.
    ///
    /// Counters are remote state rather than memoized reads and ignore the
    /// enabled flag.
    ///
    /// # Errors
    ///
    /// Returns an error if the remote cache fails.
    pub async fn incr(&self, key: &str, delta: i64, initial: u64) -> Result<u64> {
        self.increment(key, delta, Some(initial)).await
    }

    /// Atomically adds `delta` to an existing counter and returns the new value.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if the counter does not exist, or an error if
    /// the remote cache fails.
    pub async fn incr_existing(&self, key: &str, delta: i64) -> Result<u64> {
        self.increment(key, delta, None).await
    }

    async fn increment(&self, key: &str, delta: i64, initial: Option<u64>) -> Result<u64> {
        match self.inner.remote.increment(&fingerprint(key), delta, initial).await {
            Ok(Some(value)) => Ok(value),
            Ok(None) => Err(Error::not_found()),
            Err(e) => {
                self.telemetry().record_error(MemoOperation::Increment, MemoActivity::RemoteError, &e);
                Err(e)
            }
        }
    }

    /// Writes `record` under an already fingerprinted key, with retry.
    pub(crate) async fn write(&self, operation: MemoOperation, fp: &str, record: CacheRecord) -> Result<()> {
        let activity = if record.is_nil_marker() {
            MemoActivity::NilWritten
        } else {
            MemoActivity::Written
        };
        let stopwatch = self.inner.clock.stopwatch();

        let result = with_retry(&self.inner.clock, self.inner.config.retry, || self.inner.remote.set(fp, record.clone())).await;

        match &result {
            Ok(()) => self.telemetry().record(operation, activity, Some(stopwatch.elapsed())),
            Err(e) => self.telemetry().record_error(operation, MemoActivity::WriteFailed, e),
        }
        result
    }
}
