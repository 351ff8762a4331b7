// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The core trait for remote cache services.
//!
//! [`RemoteCache`] is the seam between memoization logic and a concrete
//! memcache-style service. Keys are opaque, already fingerprinted strings.

use std::collections::HashMap;

use crate::{CacheRecord, Error};

/// Trait for remote key-value cache services.
///
/// The service is shared, externally synchronized state: records may vanish at
/// any time through eviction or expiration, and every operation may fail
/// transiently. A missing key is never an error.
pub trait RemoteCache: Send + Sync {
    /// Gets a single record, with its compare-and-swap token attached.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<CacheRecord>, Error>> + Send;

    /// Gets many records in one round trip.
    ///
    /// Keys without a record are simply absent from the returned map.
    fn get_multi(&self, keys: &[String]) -> impl Future<Output = Result<HashMap<String, CacheRecord>, Error>> + Send;

    /// Stores a record unconditionally.
    fn set(&self, key: &str, record: CacheRecord) -> impl Future<Output = Result<(), Error>> + Send;

    /// Replaces a record only if it is still at the version identified by
    /// [`CacheRecord::cas_token`].
    ///
    /// Returns `false` when the record changed or disappeared since it was read.
    fn compare_and_swap(&self, key: &str, record: CacheRecord) -> impl Future<Output = Result<bool, Error>> + Send;

    /// Deletes many records in one round trip.
    ///
    /// Returns one flag per key, `true` if a record was removed and `false` if
    /// none was present.
    fn delete_multi(&self, keys: &[String]) -> impl Future<Output = Result<Vec<bool>, Error>> + Send;

    /// Atomically adds `delta` to a decimal counter and returns the new value.
    ///
    /// When the counter is absent it is created as `initial + delta` if
    /// `initial` is given; otherwise `None` is returned and nothing is stored.
    /// Counters never drop below zero.
    fn increment(&self, key: &str, delta: i64, initial: Option<u64>) -> impl Future<Output = Result<Option<u64>, Error>> + Send;
}
