// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Composite keys derived from a seed stored under a parent key.
//!
//! Child keys are formed as `"{sub_key}@{seed}"`. Deleting the parent key
//! discards the seed, and the next access mints a new one, so every child
//! cached under the old seed becomes unreachable at once without being
//! enumerated. Stale children are left to expire.

use memoize_remote::{CacheRecord, DeleteQueue, RemoteCache, Result, TransactionContext};
use serde::{Serialize, de::DeserializeOwned};

use crate::{
    MemoCache, fingerprint,
    telemetry::{MemoActivity, MemoOperation},
};

impl<R, Q> MemoCache<R, Q>
where
    R: RemoteCache + 'static,
    Q: DeleteQueue + 'static,
{
    /// Memoizes `sub_key` within the key family owned by `super_key`.
    ///
    /// Behaves like [`memoize`](Self::memoize) on the derived key. The first
    /// access to a family stores a random seed under `super_key`; two racing
    /// first accesses may both store one, and the last write decides the
    /// family. Inside a transaction, or with caching disabled, this is plain
    /// [`memoize`](Self::memoize) on `sub_key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the seed still cannot be stored once the retry
    /// deadline has passed, or as [`memoize`](Self::memoize) does.
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
    /// let name: String = cache
    ///     .memoize2(&NoTransaction, "team:7", "members", || async { Ok(Some("ada".to_string())) })
    ///     .await?;
    /// assert_eq!(name, "ada");
    ///
    /// // Invalidates every key memoized under "team:7".
    /// cache.del(&NoTransaction, &["team:7"]).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn memoize2<V, F, Fut>(&self, ctx: &(impl TransactionContext + ?Sized), super_key: &str, sub_key: &str, generator: F) -> Result<V>
    where
        V: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Option<V>>> + Send + 'static,
    {
        if !self.enabled() || ctx.in_transaction() {
            return self.memoize(ctx, sub_key, generator).await;
        }

        let seed = self.seed(super_key).await?;
        self.memoize(ctx, &format!("{sub_key}@{seed}"), generator).await
    }

    /// Reads the seed under `super_key`, minting and storing one if absent.
    async fn seed(&self, super_key: &str) -> Result<String> {
        let telemetry = self.telemetry();
        let fp = fingerprint(super_key);

        match self.inner.remote.get(&fp).await {
            Ok(Some(record)) if !record.is_nil_marker() && !record.payload().is_empty() => {
                if let Ok(seed) = String::from_utf8(record.into_payload()) {
                    telemetry.record(MemoOperation::Seed, MemoActivity::Hit, None);
                    return Ok(seed);
                }
            }
            Ok(_) => {}
            Err(e) => telemetry.record_error(MemoOperation::Seed, MemoActivity::RemoteError, &e),
        }

        telemetry.record(MemoOperation::Seed, MemoActivity::Miss, None);
        let seed = fastrand::i64(0..=i64::MAX).to_string();
        self.write(MemoOperation::Seed, &fp, CacheRecord::new(seed.clone().into_bytes()))
            .await?;
        Ok(seed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use memoize_remote::{
        ErrorKind, NoTransaction,
        testing::{MockQueue, MockRemote, RemoteOp},
    };
    use tick::{Clock, ClockControl};

    use super::*;

    fn cache(remote: &MockRemote) -> MemoCache<MockRemote, MockQueue> {
        MemoCache::builder(remote.clone(), Clock::new_frozen())
            .delete_queue(MockQueue::new())
            .build()
    }

    #[tokio::test]
    async fn seed_is_stored_as_decimal_text() {
        let remote = MockRemote::new();
        let cache = cache(&remote);

        let seed = cache.seed("parent").await.unwrap();

        assert!(seed.parse::<i64>().unwrap() >= 0);
        assert_eq!(remote.peek(&fingerprint("parent")).unwrap().payload(), seed.as_bytes());
        assert_eq!(cache.seed("parent").await.unwrap(), seed);
    }

    #[tokio::test]
    async fn child_key_embeds_seed() {
        let remote = MockRemote::new();
        let cache = cache(&remote);
        remote
            .set(&fingerprint("parent"), CacheRecord::new(b"12345".to_vec()))
            .await
            .unwrap();

        let value: u8 = cache
            .memoize2(&NoTransaction, "parent", "child", || async { Ok(Some(3)) })
            .await
            .unwrap();

        assert_eq!(value, 3);
        assert!(remote.contains_key(&fingerprint("child@12345")));
    }

    #[tokio::test]
    async fn seed_read_failure_mints_new_seed() {
        let remote = MockRemote::new();
        let cache = cache(&remote);
        remote
            .set(&fingerprint("parent"), CacheRecord::new(b"1".to_vec()))
            .await
            .unwrap();
        remote.fail_when(|op| matches!(op, RemoteOp::Get(_)));

        let seed = cache.seed("parent").await.unwrap();

        assert_ne!(seed, "1");
    }

    #[tokio::test]
    async fn seed_write_is_retried() {
        let remote = MockRemote::new();
        let cache = MemoCache::builder(remote.clone(), ClockControl::new().auto_advance_timers(true).to_clock())
            .delete_queue(MockQueue::new())
            .build();
        let parent = fingerprint("parent");
        let failed = AtomicBool::new(false);
        // Only the first seed write fails.
        remote.fail_when(move |op| matches!(op, RemoteOp::Set { key, .. } if *key == parent) && !failed.swap(true, Ordering::SeqCst));

        let value: u8 = cache
            .memoize2(&NoTransaction, "parent", "child", || async { Ok(Some(1)) })
            .await
            .unwrap();

        assert_eq!(value, 1);
        let seed_writes = remote
            .operations()
            .iter()
            .filter(|op| matches!(op, RemoteOp::Set { key, .. } if *key == fingerprint("parent")))
            .count();
        assert_eq!(seed_writes, 2);
        assert!(remote.contains_key(&fingerprint("parent")));
    }

    #[tokio::test]
    async fn seed_write_failure_is_returned() {
        let remote = MockRemote::new();
        let cache = MemoCache::builder(remote.clone(), ClockControl::new().auto_advance_timers(true).to_clock())
            .delete_queue(MockQueue::new())
            .build();
        remote.fail_when(|op| matches!(op, RemoteOp::Set { .. }));

        let error = cache
            .memoize2::<u8, _, _>(&NoTransaction, "parent", "child", || async { Ok(Some(1)) })
            .await
            .unwrap_err();

        assert_eq!(error.kind(), ErrorKind::Remote);
    }
}
