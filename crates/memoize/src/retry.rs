// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Bounded exponential backoff for remote writes and deletes.

use std::time::Duration;

use memoize_remote::Result;
use recoverable::{Recovery, RecoveryKind};
use tick::Clock;

use crate::RetryPolicy;

impl RetryPolicy {
    /// Returns the waits between attempts, doubling from `initial_delay`.
    pub(crate) fn delays(&self) -> impl Iterator<Item = Duration> {
        std::iter::successors(Some(self.initial_delay), |d| Some(d.saturating_mul(2)))
    }
}

/// Runs `attempt` until it succeeds, fails with a non-retryable error, or the
/// policy deadline passes.
///
/// The last error is returned when retries are exhausted.
pub(crate) async fn with_retry<T, F, Fut>(clock: &Clock, policy: RetryPolicy, mut attempt: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let stopwatch = clock.stopwatch();
    let mut delays = policy.delays();

    loop {
        let error = match attempt().await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        if error.recovery().kind() != RecoveryKind::Retry {
            return Err(error);
        }

        let remaining = policy.deadline.saturating_sub(stopwatch.elapsed());
        match delays.next() {
            Some(delay) if !remaining.is_zero() => clock.delay(delay.min(remaining)).await,
            _ => return Err(error),
        }
    }
}
