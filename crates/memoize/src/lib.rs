// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Memoized reads in front of a remote key-value cache.
//!
//! Callers ask for a value under a logical key and supply a generator that
//! computes it. [`MemoCache`] serves the value from the remote cache when it
//! can, otherwise runs the generator and writes the result back. On top of
//! that it provides:
//!
//! - **Batching with stampede protection**: [`MemoCache::memoize_multi`] looks up
//!   many keys in one round trip and runs the generators of the misses
//!   concurrently, one task per key, joining all of them before returning.
//! - **Nil caching**: a confirmed absence is cached as a nil marker, so "not
//!   found" is not recomputed on every call.
//! - **Graceful degradation**: remote cache failures on the read path are logged
//!   and treated as misses; they never fail a call whose generator succeeds.
//! - **Durable invalidation**: [`MemoCache::del`] retries with exponential
//!   backoff and hands deletes it cannot apply to a [`DeleteQueue`].
//! - **Transaction awareness**: inside a [`TransactionContext`] that reports an
//!   open transaction the cache is neither read nor written, and deletes wait
//!   for commit.
//! - **Composite keys**: [`MemoCache::memoize2`] derives child keys from a seed
//!   so a whole family can be invalidated by deleting its parent.
//!
//! Logical keys are turned into fixed-length remote keys by [`fingerprint`].
//!
//! # Examples
//!
//! ```
//! use memoize::{MemoCache, NoTransaction};
//! use memoize_remote::testing::{MockQueue, MockRemote};
//! use tick::Clock;
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), memoize::Error> {
//!
//! let cache = MemoCache::builder(MockRemote::new(), Clock::new_frozen())
//!     .name("users")
//!     .delete_queue(MockQueue::new())
//!     .build();
//!
//! let ctx = NoTransaction;
//! let name: String = cache
//!     .memoize(&ctx, "User{Id:42}", || async { Ok(Some("ada".to_string())) })
//!     .await?;
//! assert_eq!(name, "ada");
//!
//! // Served from the cache; this generator never runs.
//! let again: String = cache
//!     .memoize(&ctx, "User{Id:42}", || async { unreachable!() })
//!     .await?;
//! assert_eq!(again, "ada");
//!
//! // After a write to the backing store:
//! cache.del(&ctx, &["User{Id:42}"]).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! [`MemoConfig`] holds every setting and deserializes with serde, so it can
//! be embedded in an application's configuration file. Individual settings can
//! also be overridden on the [`MemoCacheBuilder`].

mod batch;
mod builder;
mod cache;
mod codec;
mod composite;
mod config;
mod delete;
mod fingerprint;
mod retry;
mod telemetry;

#[doc(inline)]
pub use batch::Generated;
#[doc(inline)]
pub use builder::MemoCacheBuilder;
#[doc(inline)]
pub use cache::MemoCache;
#[doc(inline)]
pub use config::{MemoConfig, RetryPolicy};
#[doc(inline)]
pub use delete::ChannelQueue;
#[doc(inline)]
pub use fingerprint::{FINGERPRINT_LEN, fingerprint};
#[doc(inline)]
pub use memoize_remote::{
    AfterCommit, CacheRecord, DEFERRED_DELETE_QUEUE, DeferredDelete, DeleteQueue, Error, ErrorKind, NoTransaction, RecordFlags,
    RemoteCache, Result, TransactionContext, after_commit,
};
#[doc(inline)]
pub use telemetry::CacheName;
