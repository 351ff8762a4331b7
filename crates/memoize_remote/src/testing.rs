// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Test doubles for the remote cache, the durable queue and transactions.
//!
//! This module provides `MockRemote`, an in-memory remote cache that records
//! all operations and supports failure injection for testing error paths,
//! `MockQueue`, which collects deferred deletes, and `TestTransaction`, a
//! context whose commit runs the registered callbacks.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, SystemTime},
};

use parking_lot::Mutex;
use tick::Clock;

use crate::{AfterCommit, CacheRecord, DeferredDelete, DeleteQueue, Error, RemoteCache, TransactionContext};

/// Recorded remote operation with full context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteOp {
    /// A single-key lookup.
    Get(String),
    /// A batched lookup.
    GetMulti(Vec<String>),
    /// An unconditional write.
    Set {
        /// The key that was written.
        key: String,
        /// The record that was written.
        record: CacheRecord,
    },
    /// A compare-and-swap write.
    CompareAndSwap {
        /// The key that was written.
        key: String,
        /// The replacement record, carrying the expected token.
        record: CacheRecord,
    },
    /// A batched delete.
    DeleteMulti(Vec<String>),
    /// A counter increment.
    Increment {
        /// The counter key.
        key: String,
        /// The amount added.
        delta: i64,
        /// The value used when the counter is absent.
        initial: Option<u64>,
    },
}

impl RemoteOp {
    /// Returns `true` if this operation touches `key`.
    #[must_use]
    pub fn touches(&self, key: &str) -> bool {
        match self {
            Self::Get(k) | Self::Set { key: k, .. } | Self::CompareAndSwap { key: k, .. } | Self::Increment { key: k, .. } => k == key,
            Self::GetMulti(keys) | Self::DeleteMulti(keys) => keys.iter().any(|k| k == key),
        }
    }
}

type FailPredicate = Box<dyn Fn(&RemoteOp) -> bool + Send + Sync>;

#[derive(Debug, Clone)]
struct Stored {
    record: CacheRecord,
    version: u64,
    expires_at: Option<SystemTime>,
}

/// A configurable in-memory remote cache for testing.
///
/// Records are versioned so compare-and-swap behaves like a real memcache
/// service, expirations are honored against the supplied clock, and every
/// operation is recorded for later verification.
///
/// # Examples
///
/// ```
/// use memoize_remote::{testing::{MockRemote, RemoteOp}, CacheRecord, RemoteCache};
///
/// # futures::executor::block_on(async {
/// let remote = MockRemote::new();
///
/// remote.set("key", CacheRecord::new(b"1".to_vec())).await.unwrap();
/// let record = remote.get("key").await.unwrap().unwrap();
/// assert_eq!(record.payload(), b"1");
///
/// // Fail every lookup of one key
/// remote.fail_when(|op| matches!(op, RemoteOp::Get(k) if k == "key"));
/// assert!(remote.get("key").await.is_err());
/// # });
/// ```
pub struct MockRemote {
    data: Arc<Mutex<HashMap<String, Stored>>>,
    operations: Arc<Mutex<Vec<RemoteOp>>>,
    fail_when: Arc<Mutex<Option<FailPredicate>>>,
    next_version: Arc<Mutex<u64>>,
    clock: Clock,
}

impl std::fmt::Debug for MockRemote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockRemote")
            .field("data", &self.data)
            .field("operations", &self.operations)
            .field("fail_when", &self.fail_when.lock().is_some())
            .finish_non_exhaustive()
    }
}

impl Clone for MockRemote {
    fn clone(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
            operations: Arc::clone(&self.operations),
            fail_when: Arc::clone(&self.fail_when),
            next_version: Arc::clone(&self.next_version),
            clock: self.clock.clone(),
        }
    }
}

impl Default for MockRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRemote {
    /// Creates an empty mock with a frozen clock; expirations never elapse.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Clock::new_frozen())
    }

    /// Creates an empty mock that expires records against `clock`.
    #[must_use]
    pub fn with_clock(clock: Clock) -> Self {
        Self {
            data: Arc::new(Mutex::new(HashMap::new())),
            operations: Arc::new(Mutex::new(Vec::new())),
            fail_when: Arc::new(Mutex::new(None)),
            next_version: Arc::new(Mutex::new(1)),
            clock,
        }
    }

    /// Sets a predicate that determines when operations should fail.
    ///
    /// Failing operations are still recorded but leave the data untouched.
    pub fn fail_when<F>(&self, predicate: F)
    where
        F: Fn(&RemoteOp) -> bool + Send + Sync + 'static,
    {
        *self.fail_when.lock() = Some(Box::new(predicate));
    }

    /// Clears the failure predicate, allowing all operations to succeed.
    pub fn clear_failures(&self) {
        *self.fail_when.lock() = None;
    }

    /// Returns a clone of all recorded operations.
    #[must_use]
    pub fn operations(&self) -> Vec<RemoteOp> {
        self.operations.lock().clone()
    }

    /// Clears all recorded operations.
    pub fn clear_operations(&self) {
        self.operations.lock().clear();
    }

    /// Returns the number of live records.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        let now = self.clock.system_time();
        self.data.lock().values().filter(|s| !Self::is_expired(s, now)).count()
    }

    /// Returns true if a live record is stored under `key`.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.peek(key).is_some()
    }

    /// Returns the live record under `key` without recording an operation.
    #[must_use]
    pub fn peek(&self, key: &str) -> Option<CacheRecord> {
        let now = self.clock.system_time();
        self.data
            .lock()
            .get(key)
            .filter(|s| !Self::is_expired(s, now))
            .map(|s| s.record.clone())
    }

    /// Drops every record, as a cache service restart would.
    pub fn evict_all(&self) {
        self.data.lock().clear();
    }

    fn is_expired(stored: &Stored, now: SystemTime) -> bool {
        stored.expires_at.is_some_and(|at| at <= now)
    }

    fn check(&self, op: RemoteOp) -> Result<(), Error> {
        let fail = self.fail_when.lock().as_ref().is_some_and(|predicate| predicate(&op));
        self.operations.lock().push(op);
        if fail {
            return Err(Error::remote("mock: remote operation failed"));
        }
        Ok(())
    }

    fn live(&self, data: &mut HashMap<String, Stored>, key: &str) -> Option<CacheRecord> {
        let now = self.clock.system_time();
        if data.get(key).is_some_and(|s| Self::is_expired(s, now)) {
            data.remove(key);
        }
        data.get(key).map(|s| s.record.clone().with_cas_token(s.version))
    }

    fn store(&self, data: &mut HashMap<String, Stored>, key: &str, record: CacheRecord) {
        let version = {
            let mut next = self.next_version.lock();
            let version = *next;
            *next += 1;
            version
        };
        let expires_at = record.expiration().map(|ttl: Duration| self.clock.system_time() + ttl);
        data.insert(
            key.to_owned(),
            Stored {
                record,
                version,
                expires_at,
            },
        );
    }
}

impl RemoteCache for MockRemote {
    async fn get(&self, key: &str) -> Result<Option<CacheRecord>, Error> {
        self.check(RemoteOp::Get(key.to_owned()))?;
        Ok(self.live(&mut self.data.lock(), key))
    }

    async fn get_multi(&self, keys: &[String]) -> Result<HashMap<String, CacheRecord>, Error> {
        self.check(RemoteOp::GetMulti(keys.to_vec()))?;
        let mut data = self.data.lock();
        Ok(keys
            .iter()
            .filter_map(|key| self.live(&mut data, key).map(|record| (key.clone(), record)))
            .collect())
    }

    async fn set(&self, key: &str, record: CacheRecord) -> Result<(), Error> {
        self.check(RemoteOp::Set {
            key: key.to_owned(),
            record: record.clone(),
        })?;
        self.store(&mut self.data.lock(), key, record);
        Ok(())
    }

    async fn compare_and_swap(&self, key: &str, record: CacheRecord) -> Result<bool, Error> {
        self.check(RemoteOp::CompareAndSwap {
            key: key.to_owned(),
            record: record.clone(),
        })?;
        let mut data = self.data.lock();
        let current = self.live(&mut data, key).and_then(|r| r.cas_token());
        if current.is_none() || current != record.cas_token() {
            return Ok(false);
        }
        self.store(&mut data, key, record);
        Ok(true)
    }

    async fn delete_multi(&self, keys: &[String]) -> Result<Vec<bool>, Error> {
        self.check(RemoteOp::DeleteMulti(keys.to_vec()))?;
        let mut data = self.data.lock();
        Ok(keys
            .iter()
            .map(|key| {
                let present = self.live(&mut data, key).is_some();
                data.remove(key);
                present
            })
            .collect())
    }

    async fn increment(&self, key: &str, delta: i64, initial: Option<u64>) -> Result<Option<u64>, Error> {
        self.check(RemoteOp::Increment {
            key: key.to_owned(),
            delta,
            initial,
        })?;
        let mut data = self.data.lock();
        let current = match self.live(&mut data, key) {
            Some(record) => std::str::from_utf8(record.payload())
                .ok()
                .and_then(|s| s.trim().parse::<u64>().ok())
                .ok_or_else(|| Error::remote("mock: cannot increment non-numeric value"))?,
            None => match initial {
                Some(initial) => initial,
                None => return Ok(None),
            },
        };
        let updated = current.saturating_add_signed(delta);
        self.store(&mut data, key, CacheRecord::new(updated.to_string().into_bytes()));
        Ok(Some(updated))
    }
}

/// An in-memory [`DeleteQueue`] that records every accepted task.
///
/// # Examples
///
/// ```
/// use memoize_remote::{testing::MockQueue, DeferredDelete, DeleteQueue};
///
/// # futures::executor::block_on(async {
/// let queue = MockQueue::new();
/// queue.enqueue(DeferredDelete::new(vec!["k".to_string()])).await.unwrap();
/// assert_eq!(queue.tasks().len(), 1);
///
/// queue.fail_enqueue(true);
/// assert!(queue.enqueue(DeferredDelete::new(vec![])).await.is_err());
/// # });
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockQueue {
    tasks: Arc<Mutex<Vec<DeferredDelete>>>,
    failing: Arc<AtomicBool>,
}

impl MockQueue {
    /// Creates an empty queue that accepts every task.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent enqueues fail (or succeed again).
    pub fn fail_enqueue(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Returns a clone of the accepted tasks.
    #[must_use]
    pub fn tasks(&self) -> Vec<DeferredDelete> {
        self.tasks.lock().clone()
    }

    /// Removes and returns the accepted tasks, as a worker would.
    #[must_use]
    pub fn take_tasks(&self) -> Vec<DeferredDelete> {
        std::mem::take(&mut *self.tasks.lock())
    }
}

impl DeleteQueue for MockQueue {
    async fn enqueue(&self, task: DeferredDelete) -> Result<(), Error> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::enqueue("mock: queue unavailable"));
        }
        self.tasks.lock().push(task);
        Ok(())
    }
}

/// A [`TransactionContext`] that is open until committed or rolled back.
///
/// Callbacks registered while open run, in registration order, when
/// [`commit`](Self::commit) is awaited.
///
/// # Examples
///
/// ```
/// use memoize_remote::{after_commit, testing::TestTransaction, TransactionContext};
///
/// # futures::executor::block_on(async {
/// let tx = TestTransaction::begin();
/// assert!(tx.in_transaction());
/// tx.after_transaction(after_commit(|| async { Ok(()) })).unwrap();
/// assert_eq!(tx.pending(), 1);
///
/// tx.commit().await.unwrap();
/// assert!(!tx.in_transaction());
/// # });
/// ```
pub struct TestTransaction {
    open: AtomicBool,
    callbacks: Mutex<Vec<AfterCommit>>,
}

impl std::fmt::Debug for TestTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestTransaction")
            .field("open", &self.open.load(Ordering::SeqCst))
            .field("pending", &self.pending())
            .finish()
    }
}

impl TestTransaction {
    /// Opens a new transaction.
    #[must_use]
    pub fn begin() -> Self {
        Self {
            open: AtomicBool::new(true),
            callbacks: Mutex::new(Vec::new()),
        }
    }

    /// Returns the number of callbacks waiting for commit.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.callbacks.lock().len()
    }

    /// Closes the transaction and runs every registered callback.
    ///
    /// All callbacks run even if one fails; the first failure is returned.
    ///
    /// # Errors
    ///
    /// Returns the first error produced by a callback.
    pub async fn commit(&self) -> Result<(), Error> {
        self.open.store(false, Ordering::SeqCst);
        let callbacks = std::mem::take(&mut *self.callbacks.lock());
        let mut first_error = None;
        for callback in callbacks {
            if let Err(e) = callback().await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Closes the transaction and drops every registered callback.
    pub fn rollback(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.callbacks.lock().clear();
    }
}

impl TransactionContext for TestTransaction {
    fn in_transaction(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn after_transaction(&self, callback: AfterCommit) -> Result<(), Error> {
        if !self.in_transaction() {
            return Err(Error::transaction("test transaction is closed"));
        }
        self.callbacks.lock().push(callback);
        Ok(())
    }
}
