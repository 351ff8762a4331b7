// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Configuration for a [`MemoCache`](crate::MemoCache).

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Bounded exponential backoff used for remote writes and deletes.
///
/// The first retry waits `initial_delay`, each following wait doubles, and no
/// attempt starts after `deadline` has elapsed since the first one.
///
/// # Examples
///
/// ```
/// use memoize::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::default();
/// assert_eq!(policy.initial_delay, Duration::from_millis(10));
/// assert_eq!(policy.deadline, Duration::from_secs(2));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct RetryPolicy {
    /// Wait before the first retry.
    pub initial_delay: Duration,
    /// Total time budget across all attempts.
    pub deadline: Duration,
}

impl RetryPolicy {
    /// Creates a policy with the given first delay and total deadline.
    #[must_use]
    pub fn new(initial_delay: Duration, deadline: Duration) -> Self {
        Self { initial_delay, deadline }
    }

    /// A policy that makes exactly one attempt.
    #[must_use]
    pub fn no_retry() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(10), Duration::from_secs(2))
    }
}

/// Settings of a memoizing cache instance.
///
/// Every field has a default, so a partial document deserializes cleanly:
///
/// ```
/// use memoize::MemoConfig;
///
/// let config: MemoConfig = serde_json::from_str(r#"{ "enabled": false }"#).unwrap();
/// assert!(!config.enabled);
/// assert!(config.logs);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct MemoConfig {
    /// When `false`, reads report misses, writes are no-ops and deletes are skipped.
    pub enabled: bool,
    /// Emits `memoize.event` tracing events.
    pub logs: bool,
    /// Backoff for remote writes and deletes.
    pub retry: RetryPolicy,
    /// Batched lookups slower than this are logged as a warning.
    pub slow_lookup_threshold: Duration,
}

impl Default for MemoConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            logs: true,
            retry: RetryPolicy::default(),
            slow_lookup_threshold: Duration::from_millis(10),
        }
    }
}
