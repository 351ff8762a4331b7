// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Invalidation with retry and a durable fallback.
//!
//! A delete that the remote cache keeps rejecting must not be lost, or readers
//! would see stale values until the record expires on its own. After the retry
//! deadline passes, the logical keys are handed to a [`DeleteQueue`] whose
//! worker replays the delete later through
//! [`MemoCache::run_deferred_delete`].

use memoize_remote::{DeferredDelete, DeleteQueue, Error, RemoteCache, Result, TransactionContext, after_commit};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::{
    MemoCache, fingerprint,
    retry::with_retry,
    telemetry::{MemoActivity, MemoOperation},
};

/// An in-process [`DeleteQueue`] backed by an unbounded tokio channel.
///
/// Tasks survive remote cache outages but not process restarts. Pair it with
/// [`MemoCache::drain_deferred_deletes`] running on a background task.
///
/// # Examples
///
/// ```
/// use memoize::{ChannelQueue, DeferredDelete, DeleteQueue};
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), memoize::Error> {
///
/// let (queue, mut receiver) = ChannelQueue::channel();
/// queue.enqueue(DeferredDelete::new(vec!["user:1".to_string()])).await?;
///
/// let task = receiver.recv().await.unwrap();
/// assert_eq!(task.keys(), ["user:1"]);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ChannelQueue {
    sender: UnboundedSender<DeferredDelete>,
}

impl ChannelQueue {
    /// Creates a queue and the receiver its tasks are delivered to.
    #[must_use]
    pub fn channel() -> (Self, UnboundedReceiver<DeferredDelete>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl DeleteQueue for ChannelQueue {
    async fn enqueue(&self, task: DeferredDelete) -> Result<()> {
        self.sender
            .send(task)
            .map_err(|e| Error::enqueue(format!("deferred delete receiver dropped, {} key(s) lost", e.0.keys().len())))
    }
}

impl<R, Q> MemoCache<R, Q>
where
    R: RemoteCache + 'static,
    Q: DeleteQueue + 'static,
{
    /// Deletes the values cached under `keys`.
    ///
    /// Inside a transaction the delete is registered to run after commit, so
    /// a rolled-back write never invalidates anything. Otherwise the remote
    /// delete is retried until the retry deadline and, if it still fails, the
    /// keys are handed to the delete queue. Keys with no cached value count as
    /// deleted. Does nothing when caching is disabled.
    ///
    /// # Errors
    ///
    /// Returns an error only if the transaction rejects the callback or the
    /// delete queue rejects the task.
    pub async fn del<K>(&self, ctx: &(impl TransactionContext + ?Sized), keys: &[K]) -> Result<()>
    where
        K: AsRef<str>,
    {
        if !self.enabled() || keys.is_empty() {
            return Ok(());
        }

        let keys: Vec<String> = keys.iter().map(|k| k.as_ref().to_owned()).collect();

        if ctx.in_transaction() {
            let this = self.clone();
            ctx.after_transaction(after_commit(move || async move { this.del_with_fallback(keys).await }))?;
            self.telemetry().record(MemoOperation::Delete, MemoActivity::AfterCommit, None);
            return Ok(());
        }

        self.del_with_fallback(keys).await
    }

    async fn del_with_fallback(&self, keys: Vec<String>) -> Result<()> {
        let telemetry = self.telemetry();
        let fingerprints: Vec<String> = keys.iter().map(|k| fingerprint(k)).collect();
        let stopwatch = self.inner.clock.stopwatch();

        let error = match with_retry(&self.inner.clock, self.inner.config.retry, || self.delete_once(&fingerprints)).await {
            Ok(()) => {
                telemetry.record(MemoOperation::Delete, MemoActivity::Invalidated, Some(stopwatch.elapsed()));
                return Ok(());
            }
            Err(e) => e,
        };
        telemetry.record_error(MemoOperation::Delete, MemoActivity::RemoteError, &error);

        match self.inner.queue.enqueue(DeferredDelete::new(keys)).await {
            Ok(()) => {
                telemetry.record(MemoOperation::Delete, MemoActivity::Deferred, Some(stopwatch.elapsed()));
                Ok(())
            }
            Err(e) => {
                telemetry.record_error(MemoOperation::Delete, MemoActivity::DeleteFailed, &e);
                Err(e)
            }
        }
    }

    /// Replays a deferred delete with a single remote attempt.
    ///
    /// This is the handler a durable queue worker calls for each task. The
    /// task's logical keys are fingerprinted again here.
    ///
    /// # Errors
    ///
    /// Returns the remote error so the queue can schedule another attempt.
    pub async fn run_deferred_delete(&self, task: &DeferredDelete) -> Result<()> {
        let fingerprints: Vec<String> = task.keys().iter().map(|k| fingerprint(k)).collect();
        let telemetry = self.telemetry();

        match self.delete_once(&fingerprints).await {
            Ok(()) => {
                telemetry.record(MemoOperation::DeferredDelete, MemoActivity::Invalidated, None);
                Ok(())
            }
            Err(e) => {
                telemetry.record_error(MemoOperation::DeferredDelete, MemoActivity::RemoteError, &e);
                Err(e)
            }
        }
    }

    /// Replays every task delivered through a [`ChannelQueue`] until all
    /// senders are dropped, including the one inside any cache built with
    /// that queue. Typically spawned once for the lifetime of the process.
    ///
    /// A channel cannot redeliver, so each task is retried under the
    /// configured policy and dropped with an error event if it still fails.
    pub async fn drain_deferred_deletes(&self, mut receiver: UnboundedReceiver<DeferredDelete>) {
        while let Some(task) = receiver.recv().await {
            if self.run_deferred_delete(&task).await.is_ok() {
                continue;
            }

            let fingerprints: Vec<String> = task.keys().iter().map(|k| fingerprint(k)).collect();
            match with_retry(&self.inner.clock, self.inner.config.retry, || self.delete_once(&fingerprints)).await {
                Ok(()) => self
                    .telemetry()
                    .record(MemoOperation::DeferredDelete, MemoActivity::Invalidated, None),
                Err(e) => self
                    .telemetry()
                    .record_error(MemoOperation::DeferredDelete, MemoActivity::DeleteFailed, &e),
            }
        }
    }

    async fn delete_once(&self, fingerprints: &[String]) -> Result<()> {
        // Keys that were already absent come back as `false`, which is fine.
        self.inner.remote.delete_multi(fingerprints).await.map(drop)
    }
}
