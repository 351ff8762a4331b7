// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Batch memoization with per-key concurrent generation.

use std::{any::Any, collections::HashMap, panic::AssertUnwindSafe, time::Duration};

use futures::FutureExt;
use memoize_remote::{CacheRecord, DeleteQueue, Error, RemoteCache, Result, TransactionContext};
use serde::{Serialize, de::DeserializeOwned};
use tokio::task::JoinSet;

use crate::{
    MemoCache, codec, fingerprint,
    telemetry::{MemoActivity, MemoOperation},
};

/// What a generator produced for one key: a value or a confirmed absence,
/// and how long the result may stay cached.
///
/// # Examples
///
/// ```
/// use memoize::Generated;
/// use std::time::Duration;
///
/// let hit = Generated::found(42).expiring(Duration::from_secs(60));
/// assert_eq!(hit.value(), Some(&42));
/// assert_eq!(hit.expiration(), Some(Duration::from_secs(60)));
///
/// let miss: Generated<i32> = None.into();
/// assert!(miss.value().is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generated<V> {
    value: Option<V>,
    expiration: Option<Duration>,
}

impl<V> Generated<V> {
    /// A present value, cached until evicted.
    #[must_use]
    pub fn found(value: V) -> Self {
        Self {
            value: Some(value),
            expiration: None,
        }
    }

    /// A confirmed absence of value.
    #[must_use]
    pub fn not_found() -> Self {
        Self {
            value: None,
            expiration: None,
        }
    }

    /// Limits how long the result stays cached.
    #[must_use]
    pub fn expiring(mut self, ttl: Duration) -> Self {
        self.expiration = Some(ttl);
        self
    }

    /// Returns the generated value, if any.
    #[must_use]
    pub fn value(&self) -> Option<&V> {
        self.value.as_ref()
    }

    /// Returns the requested cache lifetime, if any.
    #[must_use]
    pub fn expiration(&self) -> Option<Duration> {
        self.expiration
    }

    /// Consumes the result and returns the value, if any.
    #[must_use]
    pub fn into_value(self) -> Option<V> {
        self.value
    }
}

impl<V> From<Option<V>> for Generated<V> {
    fn from(value: Option<V>) -> Self {
        Self { value, expiration: None }
    }
}

type TaskOutcome<V> = (usize, std::result::Result<Result<V>, Box<dyn Any + Send>>);

impl<R, Q> MemoCache<R, Q>
where
    R: RemoteCache + 'static,
    Q: DeleteQueue + 'static,
{
    /// Serves many keys at once, generating and caching the ones that miss.
    ///
    /// All keys are looked up in one batched remote call; the lookup is
    /// skipped when caching is disabled or `ctx` is inside a transaction. Each
    /// miss then runs its generator on its own task, concurrently with the
    /// others, and this call returns once every task has finished.
    ///
    /// The returned vector has one slot per request, in request order:
    ///
    /// - `Ok(value)` for a cached or generated value.
    /// - `Err(e)` with [`e.is_not_found()`](Error::is_not_found) when the key
    ///   has no value, either because the generator said so (by returning
    ///   [`Generated::not_found`] or `Err(Error::not_found())`) or because a
    ///   nil marker was cached earlier. With `cache_nil` set, a fresh absence
    ///   is cached as a nil marker so the generator is not asked again.
    /// - Any other `Err` when the generator failed, in which case nothing is
    ///   cached, or when writing the result back failed after retries.
    ///
    /// Results are written back only outside transactions.
    ///
    /// # Errors
    ///
    /// Returns an error of kind
    /// [`TaskPanicked`](memoize_remote::ErrorKind::TaskPanicked) if any
    /// generator task panicked. Sibling tasks still run to completion first.
    ///
    /// # Examples
    ///
    /// ```
    /// use memoize::{Generated, MemoCache, NoTransaction};
    /// use memoize_remote::testing::{MockQueue, MockRemote};
    /// use tick::Clock;
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() -> Result<(), memoize::Error> {
    ///
    /// let cache = MemoCache::builder(MockRemote::new(), Clock::new_frozen())
    ///     .delete_queue(MockQueue::new())
    ///     .build();
    ///
    /// let lookup = |id: u32| move || async move {
    ///     Ok(if id == 0 { Generated::not_found() } else { Generated::found(id * 10) })
    /// };
    ///
    /// let results = cache
    ///     .memoize_multi(&NoTransaction, true, [("a", lookup(1)), ("b", lookup(0))])
    ///     .await?;
    ///
    /// assert_eq!(results[0].as_ref().ok(), Some(&10));
    /// assert!(results[1].as_ref().unwrap_err().is_not_found());
    /// # Ok(())
    /// # }
    /// ```
    pub async fn memoize_multi<I, K, V, F, Fut>(&self, ctx: &(impl TransactionContext + ?Sized), cache_nil: bool, requests: I) -> Result<Vec<Result<V>>>
    where
        I: IntoIterator<Item = (K, F)>,
        K: AsRef<str>,
        V: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Generated<V>>> + Send + 'static,
    {
        let (fingerprints, generators): (Vec<String>, Vec<F>) = requests
            .into_iter()
            .map(|(key, generator)| (fingerprint(key.as_ref()), generator))
            .unzip();

        let use_cache = self.enabled() && !ctx.in_transaction();
        let cached = if use_cache {
            self.lookup(&fingerprints).await
        } else {
            HashMap::new()
        };

        let telemetry = self.telemetry();
        let mut results: Vec<Option<Result<V>>> = std::iter::repeat_with(|| None).take(fingerprints.len()).collect();
        let mut tasks = JoinSet::new();

        for (index, (fp, generator)) in fingerprints.into_iter().zip(generators).enumerate() {
            if let Some(served) = cached.get(&fp).and_then(|record| self.serve(record)) {
                results[index] = Some(served);
                continue;
            }

            telemetry.record(MemoOperation::Memoize, MemoActivity::Miss, None);
            let this = self.clone();
            let task = this.generate(fp, cache_nil, use_cache, generator);
            tasks.spawn(AssertUnwindSafe(task).catch_unwind().map(move |outcome| (index, outcome)));
        }

        let panics = Self::join_all(&mut tasks, &mut results).await;
        if !panics.is_empty() {
            let error = Error::tasks_panicked(&panics);
            telemetry.record_error(MemoOperation::Memoize, MemoActivity::TaskPanicked, &error);
            return Err(error);
        }

        Ok(results
            .into_iter()
            .map(|slot| slot.unwrap_or_else(|| Err(Error::generator("worker task produced no result"))))
            .collect())
    }

    /// Memoizes one key, caching absence as well as values.
    ///
    /// The generator returns `Ok(None)` when the key has no value; the call
    /// then fails with a not-found error, now and on later calls until the
    /// key is deleted.
    ///
    /// # Errors
    ///
    /// Same as one slot of [`memoize_multi`](Self::memoize_multi).
    pub async fn memoize<V, F, Fut>(&self, ctx: &(impl TransactionContext + ?Sized), key: &str, generator: F) -> Result<V>
    where
        V: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Option<V>>> + Send + 'static,
    {
        self.memoize_one(ctx, key, true, move || async move { generator().await.map(Generated::from) })
            .await
    }

    /// Memoizes one key with a fixed cache lifetime for both values and nil markers.
    ///
    /// # Errors
    ///
    /// Same as one slot of [`memoize_multi`](Self::memoize_multi).
    pub async fn memoize_during<V, F, Fut>(
        &self,
        ctx: &(impl TransactionContext + ?Sized),
        key: &str,
        ttl: Duration,
        cache_nil: bool,
        generator: F,
    ) -> Result<V>
    where
        V: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Option<V>>> + Send + 'static,
    {
        self.memoize_one(ctx, key, cache_nil, move || async move {
            generator().await.map(|value| Generated::from(value).expiring(ttl))
        })
        .await
    }

    /// Memoizes one key whose generator picks the cache lifetime per result.
    ///
    /// # Errors
    ///
    /// Same as one slot of [`memoize_multi`](Self::memoize_multi).
    pub async fn memoize_generated<V, F, Fut>(
        &self,
        ctx: &(impl TransactionContext + ?Sized),
        key: &str,
        cache_nil: bool,
        generator: F,
    ) -> Result<V>
    where
        V: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Generated<V>>> + Send + 'static,
    {
        self.memoize_one(ctx, key, cache_nil, generator).await
    }

    async fn memoize_one<V, F, Fut>(&self, ctx: &(impl TransactionContext + ?Sized), key: &str, cache_nil: bool, generator: F) -> Result<V>
    where
        V: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Generated<V>>> + Send + 'static,
    {
        self.memoize_multi(ctx, cache_nil, [(key, generator)])
            .await?
            .pop()
            .unwrap_or_else(|| Err(Error::not_found()))
    }

    /// Batched lookup. Remote failures are logged and read as all-miss.
    async fn lookup(&self, fingerprints: &[String]) -> HashMap<String, CacheRecord> {
        if fingerprints.is_empty() {
            return HashMap::new();
        }

        let telemetry = self.telemetry();
        let stopwatch = self.inner.clock.stopwatch();
        let result = self.inner.remote.get_multi(fingerprints).await;

        let elapsed = stopwatch.elapsed();
        if elapsed > self.inner.config.slow_lookup_threshold {
            telemetry.record(MemoOperation::Memoize, MemoActivity::SlowLookup, Some(elapsed));
        }

        result.unwrap_or_else(|e| {
            telemetry.record_error(MemoOperation::Memoize, MemoActivity::RemoteError, &e);
            HashMap::new()
        })
    }

    /// Turns a cached record into a slot result, or `None` if it must be regenerated.
    fn serve<V: DeserializeOwned>(&self, record: &CacheRecord) -> Option<Result<V>> {
        let telemetry = self.telemetry();
        if record.is_nil_marker() {
            telemetry.record(MemoOperation::Memoize, MemoActivity::NilHit, None);
            return Some(Err(Error::not_found()));
        }

        match codec::decode(record.payload()) {
            Ok(value) => {
                telemetry.record(MemoOperation::Memoize, MemoActivity::Hit, None);
                Some(Ok(value))
            }
            Err(e) => {
                telemetry.record_error(MemoOperation::Memoize, MemoActivity::DecodeError, &e);
                None
            }
        }
    }

    /// Runs one generator and writes its outcome back.
    async fn generate<V, F, Fut>(self, fp: String, cache_nil: bool, write_back: bool, generator: F) -> Result<V>
    where
        V: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Generated<V>>>,
    {
        let telemetry = self.telemetry();
        let stopwatch = self.inner.clock.stopwatch();

        let Generated { value, expiration } = match generator().await {
            Ok(generated) => generated,
            Err(e) if e.is_not_found() => Generated::not_found(),
            Err(e) => {
                telemetry.record_error(MemoOperation::Memoize, MemoActivity::GeneratorError, &e);
                return Err(e);
            }
        };

        let Some(value) = value else {
            telemetry.record(MemoOperation::Memoize, MemoActivity::NotFound, Some(stopwatch.elapsed()));
            if write_back && cache_nil {
                let record = CacheRecord::nil_marker().with_optional_expiration(expiration);
                self.write(MemoOperation::Memoize, &fp, record).await?;
            }
            return Err(Error::not_found());
        };

        telemetry.record(MemoOperation::Memoize, MemoActivity::Generated, Some(stopwatch.elapsed()));
        if write_back {
            let record = CacheRecord::new(codec::encode(&value)?).with_optional_expiration(expiration);
            self.write(MemoOperation::Memoize, &fp, record).await?;
        }
        Ok(value)
    }

    /// Waits for every task, filling slots and collecting panic messages.
    async fn join_all<V: 'static>(tasks: &mut JoinSet<TaskOutcome<V>>, results: &mut [Option<Result<V>>]) -> Vec<String> {
        let mut panics = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, Ok(result))) => results[index] = Some(result),
                Ok((_, Err(payload))) => panics.push(panic_message(payload.as_ref())),
                Err(e) => panics.push(e.to_string()),
            }
        }
        panics
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use memoize_remote::{
        NoTransaction,
        testing::{MockQueue, MockRemote, RemoteOp},
    };
    use tick::{Clock, ClockControl};

    use super::*;
    use crate::telemetry::testing::LogCapture;

    fn cache(remote: &MockRemote) -> MemoCache<MockRemote, MockQueue> {
        MemoCache::builder(remote.clone(), Clock::new_frozen())
            .delete_queue(MockQueue::new())
            .build()
    }

    #[test]
    fn panic_message_handles_payload_types() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&"owned".to_string()), "owned");
        assert_eq!(panic_message(&42_u8), "non-string panic payload");
    }

    #[test]
    fn generated_builders() {
        let generated = Generated::found("v").expiring(Duration::from_secs(1));
        assert_eq!(generated.expiration(), Some(Duration::from_secs(1)));
        assert_eq!(generated.into_value(), Some("v"));
        assert_eq!(Generated::<u8>::not_found(), Generated::from(None));
    }

    #[tokio::test]
    async fn empty_batch_skips_remote() {
        let remote = MockRemote::new();
        let cache = cache(&remote);

        let requests: Vec<(&str, fn() -> std::future::Ready<Result<Generated<u8>>>)> = Vec::new();
        let results = cache.memoize_multi(&NoTransaction, true, requests).await.unwrap();

        assert!(results.is_empty());
        assert!(remote.operations().is_empty());
    }

    #[tokio::test]
    async fn generator_not_found_error_is_cached_as_nil() {
        let remote = MockRemote::new();
        let cache = cache(&remote);

        let result = cache
            .memoize_generated::<u8, _, _>(&NoTransaction, "k", true, || async { Err(Error::not_found()) })
            .await;

        assert!(result.unwrap_err().is_not_found());
        assert!(remote.peek(&fingerprint("k")).unwrap().is_nil_marker());
    }

    #[tokio::test]
    async fn undecodable_hit_is_regenerated() {
        let remote = MockRemote::new();
        let cache = cache(&remote);
        remote
            .set(&fingerprint("k"), CacheRecord::new(b"\"text\"".to_vec()))
            .await
            .unwrap();

        let value = cache.memoize(&NoTransaction, "k", || async { Ok(Some(7_u32)) }).await.unwrap();

        assert_eq!(value, 7);
        assert_eq!(remote.peek(&fingerprint("k")).unwrap().payload(), b"7");
    }

    #[tokio::test]
    async fn lookup_failure_is_absorbed() {
        let remote = MockRemote::new();
        let cache = cache(&remote);
        remote.fail_when(|op| matches!(op, RemoteOp::GetMulti(_)));

        let capture = LogCapture::new();
        let _guard = tracing::subscriber::set_default(capture.subscriber());

        let value = cache.memoize(&NoTransaction, "k", || async { Ok(Some(1_u8)) }).await.unwrap();

        assert_eq!(value, 1);
        capture.assert_contains(MemoActivity::RemoteError.as_str());
        assert!(remote.contains_key(&fingerprint("k")));
    }

    #[tokio::test]
    async fn slow_lookup_is_logged() {
        let control = ClockControl::new();
        let remote = MockRemote::new();
        let cache = MemoCache::builder(remote.clone(), control.to_clock())
            .slow_lookup_threshold(Duration::from_millis(10))
            .delete_queue(MockQueue::new())
            .build();

        let capture = LogCapture::new();
        let _guard = tracing::subscriber::set_default(capture.subscriber());

        // Advance the clock from inside the remote call.
        let advancing = control.clone();
        remote.fail_when(move |op| {
            if matches!(op, RemoteOp::GetMulti(_)) {
                advancing.advance(Duration::from_millis(50));
            }
            false
        });

        cache.memoize(&NoTransaction, "k", || async { Ok(Some(1_u8)) }).await.unwrap();

        capture.assert_contains(MemoActivity::SlowLookup.as_str());
        capture.assert_contains("WARN");
    }

    #[tokio::test]
    async fn write_back_failure_is_reported_for_that_key() {
        let remote = MockRemote::new();
        let cache = MemoCache::builder(remote.clone(), ClockControl::new().auto_advance_timers(true).to_clock())
            .delete_queue(MockQueue::new())
            .build();
        let failing = fingerprint("bad");
        remote.fail_when(move |op| matches!(op, RemoteOp::Set { key, .. } if *key == failing));

        let generator = |value: u8| move || async move { Ok(Generated::found(value)) };
        let results = cache
            .memoize_multi(&NoTransaction, true, [("good", generator(1)), ("bad", generator(2))])
            .await
            .unwrap();

        assert_eq!(*results[0].as_ref().unwrap(), 1);
        assert_eq!(results[1].as_ref().unwrap_err().kind(), memoize_remote::ErrorKind::Remote);
    }
}
