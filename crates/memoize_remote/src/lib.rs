// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Remote cache abstractions for memoized reads.
//!
//! This crate defines the [`RemoteCache`] trait that a memcache-style key-value
//! service must satisfy, the raw [`CacheRecord`] stored under each key, and the
//! [`Error`] type shared by every layer built on top of it. It also holds the
//! two other seams a memoizing layer needs from its host: the
//! [`TransactionContext`] of each call and the durable [`DeleteQueue`] that
//! absorbs invalidations the remote cache could not apply.
//!
//! # Overview
//!
//! Keys handed to a [`RemoteCache`] are already fingerprinted and opaque. Every
//! operation may fail transiently, and a missing key is a normal outcome rather
//! than an error: lookups return `None`, deletes report `false`, and
//! compare-and-swap reports `false` when the record vanished or changed.
//!
//! # Implementing a Remote Cache
//!
//! ```
//! use std::collections::HashMap;
//! use std::sync::RwLock;
//!
//! use memoize_remote::{CacheRecord, Error, RemoteCache};
//!
//! #[derive(Default)]
//! struct Naive(RwLock<HashMap<String, CacheRecord>>);
//!
//! impl RemoteCache for Naive {
//!     async fn get(&self, key: &str) -> Result<Option<CacheRecord>, Error> {
//!         Ok(self.0.read().unwrap().get(key).cloned())
//!     }
//!
//!     async fn get_multi(&self, keys: &[String]) -> Result<HashMap<String, CacheRecord>, Error> {
//!         let map = self.0.read().unwrap();
//!         Ok(keys.iter().filter_map(|k| map.get(k).map(|r| (k.clone(), r.clone()))).collect())
//!     }
//!
//!     async fn set(&self, key: &str, record: CacheRecord) -> Result<(), Error> {
//!         self.0.write().unwrap().insert(key.to_owned(), record);
//!         Ok(())
//!     }
//!
//!     async fn compare_and_swap(&self, key: &str, record: CacheRecord) -> Result<bool, Error> {
//!         self.set(key, record).await.map(|()| true)
//!     }
//!
//!     async fn delete_multi(&self, keys: &[String]) -> Result<Vec<bool>, Error> {
//!         let mut map = self.0.write().unwrap();
//!         Ok(keys.iter().map(|k| map.remove(k).is_some()).collect())
//!     }
//!
//!     async fn increment(&self, _key: &str, _delta: i64, initial: Option<u64>) -> Result<Option<u64>, Error> {
//!         Ok(initial)
//!     }
//! }
//! ```

mod context;
pub mod error;
mod queue;
mod record;
mod remote;
#[cfg(any(feature = "test-util", test))]
pub mod testing;

#[doc(inline)]
pub use context::{AfterCommit, NoTransaction, TransactionContext, after_commit};
#[doc(inline)]
pub use error::{Error, ErrorKind, Result};
#[doc(inline)]
pub use queue::{DEFERRED_DELETE_QUEUE, DeferredDelete, DeleteQueue};
#[doc(inline)]
pub use record::{CacheRecord, RecordFlags};
#[doc(inline)]
pub use remote::RemoteCache;
