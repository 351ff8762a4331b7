// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Durable fallback for invalidations the remote cache could not apply.

use serde::{Deserialize, Serialize};

use crate::Result;

/// Name of the durable queue that carries deferred deletes.
pub const DEFERRED_DELETE_QUEUE: &str = "deferred-cache-invalidate";

/// A delete that could not be applied in time and must be retried later.
///
/// Carries the logical keys; the worker that runs it fingerprints them again.
///
/// # Examples
///
/// ```
/// use memoize_remote::{DeferredDelete, DEFERRED_DELETE_QUEUE};
///
/// let task = DeferredDelete::new(vec!["user:1".to_string()]);
/// assert_eq!(task.queue_name(), DEFERRED_DELETE_QUEUE);
/// assert_eq!(task.keys(), ["user:1"]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferredDelete {
    keys: Vec<String>,
}

impl DeferredDelete {
    /// Creates a deferred delete for `keys`.
    #[must_use]
    pub fn new(keys: Vec<String>) -> Self {
        Self { keys }
    }

    /// Returns the logical keys to delete.
    #[must_use]
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Consumes the task and returns its keys.
    #[must_use]
    pub fn into_keys(self) -> Vec<String> {
        self.keys
    }

    /// Returns the queue this task belongs on.
    #[must_use]
    pub fn queue_name(&self) -> &'static str {
        DEFERRED_DELETE_QUEUE
    }
}

/// A durable task queue that accepts deferred deletes.
///
/// An accepted task must eventually be delivered to a worker, which hands it
/// back to the cache layer for another delete attempt.
pub trait DeleteQueue: Send + Sync {
    /// Durably enqueues `task`.
    fn enqueue(&self, task: DeferredDelete) -> impl Future<Output = Result<()>> + Send;
}
