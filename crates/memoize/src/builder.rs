// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Builder for [`MemoCache`].

use std::time::Duration;

use memoize_remote::{DeleteQueue, RemoteCache};
use tick::Clock;

use crate::{MemoCache, MemoConfig, RetryPolicy, telemetry::CacheName};

const DEFAULT_NAME: CacheName = "memoize";

/// Builder for constructing a [`MemoCache`].
///
/// Created by calling [`MemoCache::builder`]. A delete queue must be supplied
/// before the cache can be built, since failed invalidations have nowhere
/// else to go.
///
/// # Examples
///
/// ```
/// use memoize::{ChannelQueue, MemoCache};
/// use memoize_remote::testing::MockRemote;
/// use std::time::Duration;
/// use tick::Clock;
///
/// let (queue, _receiver) = ChannelQueue::channel();
/// let cache = MemoCache::builder(MockRemote::new(), Clock::new_frozen())
///     .name("users")
///     .slow_lookup_threshold(Duration::from_millis(25))
///     .delete_queue(queue)
///     .build();
///
/// assert_eq!(cache.name(), "users");
/// ```
#[derive(Debug)]
pub struct MemoCacheBuilder<R, Q = ()> {
    name: CacheName,
    config: MemoConfig,
    clock: Clock,
    remote: R,
    queue: Q,
}

impl<R> MemoCacheBuilder<R, ()> {
    pub(crate) fn new(remote: R, clock: Clock) -> Self {
        Self {
            name: DEFAULT_NAME,
            config: MemoConfig::default(),
            clock,
            remote,
            queue: (),
        }
    }

    /// Sets the durable queue that receives deletes the remote cache could not apply.
    pub fn delete_queue<Q>(self, queue: Q) -> MemoCacheBuilder<R, Q>
    where
        Q: DeleteQueue,
    {
        MemoCacheBuilder {
            name: self.name,
            config: self.config,
            clock: self.clock,
            remote: self.remote,
            queue,
        }
    }
}

impl<R, Q> MemoCacheBuilder<R, Q> {
    /// Sets the name that identifies this cache in log events.
    #[must_use]
    pub fn name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    /// Replaces the whole configuration.
    #[must_use]
    pub fn config(mut self, config: MemoConfig) -> Self {
        self.config = config;
        self
    }

    /// Enables or disables all caching behavior.
    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.config.enabled = enabled;
        self
    }

    /// Enables or disables `memoize.event` logging.
    #[must_use]
    pub fn logs(mut self, logs: bool) -> Self {
        self.config.logs = logs;
        self
    }

    /// Sets the backoff used for remote writes and deletes.
    #[must_use]
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    /// Sets the latency above which a batched lookup is logged as slow.
    #[must_use]
    pub fn slow_lookup_threshold(mut self, threshold: Duration) -> Self {
        self.config.slow_lookup_threshold = threshold;
        self
    }

    /// Returns a reference to the builder's clock.
    #[must_use]
    pub fn clock(&self) -> &Clock {
        &self.clock
    }
}

impl<R, Q> MemoCacheBuilder<R, Q>
where
    R: RemoteCache + 'static,
    Q: DeleteQueue + 'static,
{
    /// Builds the cache.
    #[must_use]
    pub fn build(self) -> MemoCache<R, Q> {
        MemoCache::new(self.name, self.config, self.clock, self.remote, self.queue)
    }
}
