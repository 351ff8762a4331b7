// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Transaction awareness.
//!
//! Memoized reads must never observe or publish state from inside an
//! uncommitted database transaction, and invalidations issued inside one must
//! wait until it commits. [`TransactionContext`] is how the caller tells the
//! cache layer which situation it is in.

use futures::{FutureExt, future::BoxFuture};

use crate::{Error, Result};

/// Work scheduled to run after the current transaction commits.
pub type AfterCommit = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;

/// Wraps an async closure as an [`AfterCommit`] callback.
///
/// # Examples
///
/// ```
/// use memoize_remote::{after_commit, NoTransaction, TransactionContext};
///
/// let callback = after_commit(|| async { Ok(()) });
///
/// // Outside a transaction there is nothing to wait for.
/// assert!(NoTransaction.after_transaction(callback).is_err());
/// ```
pub fn after_commit<F, Fut>(callback: F) -> AfterCommit
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Box::new(move || callback().boxed())
}

/// The execution context of a cache operation.
///
/// # Examples
///
/// ```
/// use memoize_remote::{NoTransaction, TransactionContext};
///
/// assert!(!NoTransaction.in_transaction());
/// ```
pub trait TransactionContext: Send + Sync {
    /// Returns `true` while a transaction is open.
    fn in_transaction(&self) -> bool;

    /// Registers `callback` to run once the open transaction commits.
    ///
    /// Callbacks registered in a transaction that rolls back never run.
    ///
    /// # Errors
    ///
    /// Returns an error when no transaction is open or the context refuses the
    /// callback.
    fn after_transaction(&self, callback: AfterCommit) -> Result<()>;
}

/// A context that is never inside a transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NoTransaction;

impl TransactionContext for NoTransaction {
    fn in_transaction(&self) -> bool {
        false
    }

    fn after_transaction(&self, _callback: AfterCommit) -> Result<()> {
        Err(Error::transaction("no transaction is open"))
    }
}

impl<T: TransactionContext + ?Sized> TransactionContext for &T {
    fn in_transaction(&self) -> bool {
        (**self).in_transaction()
    }

    fn after_transaction(&self, callback: AfterCommit) -> Result<()> {
        (**self).after_transaction(callback)
    }
}
