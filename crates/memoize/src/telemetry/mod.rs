// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Structured logging of memoization outcomes.
//!
//! Every notable outcome becomes one `memoize.event` tracing event, emitted at
//! a level derived from the activity so that hits and misses stay quiet while
//! absorbed remote failures and lost invalidations stand out.

use std::time::Duration;

use memoize_remote::Error;
use tracing::Level;

#[cfg(test)]
pub(crate) mod testing;

/// Type alias for cache names used in telemetry.
pub type CacheName = &'static str;

#[cfg(test)]
pub(crate) const MEMOIZE_NAME: &str = "memoize.name";

#[cfg(test)]
pub(crate) const MEMOIZE_EVENT_NAME: &str = "memoize.event";

#[cfg(test)]
pub(crate) const MEMOIZE_OPERATION_NAME: &str = "memoize.operation";

#[cfg(test)]
pub(crate) const MEMOIZE_ACTIVITY_NAME: &str = "memoize.activity";

#[cfg(test)]
pub(crate) const MEMOIZE_DURATION_NAME: &str = "memoize.duration_ns";

#[derive(Debug, Clone, Copy)]
pub(crate) enum MemoOperation {
    Get,
    Put,
    CompareAndSwap,
    Increment,
    Delete,
    DeferredDelete,
    Memoize,
    Seed,
}

impl MemoOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "memoize.get",
            Self::Put => "memoize.put",
            Self::CompareAndSwap => "memoize.cas",
            Self::Increment => "memoize.incr",
            Self::Delete => "memoize.delete",
            Self::DeferredDelete => "memoize.deferred_delete",
            Self::Memoize => "memoize.memoize",
            Self::Seed => "memoize.seed",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum MemoActivity {
    Hit,
    NilHit,
    Miss,
    Generated,
    NotFound,
    Conflict,
    Written,
    NilWritten,
    Swapped,
    Invalidated,
    AfterCommit,
    Deferred,
    SlowLookup,
    RemoteError,
    DecodeError,
    GeneratorError,
    WriteFailed,
    DeleteFailed,
    TaskPanicked,
}

impl MemoActivity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "memoize.hit",
            Self::NilHit => "memoize.nil_hit",
            Self::Miss => "memoize.miss",
            Self::Generated => "memoize.generated",
            Self::NotFound => "memoize.not_found",
            Self::Conflict => "memoize.conflict",
            Self::Written => "memoize.written",
            Self::NilWritten => "memoize.nil_written",
            Self::Swapped => "memoize.swapped",
            Self::Invalidated => "memoize.invalidated",
            Self::AfterCommit => "memoize.after_commit",
            Self::Deferred => "memoize.deferred",
            Self::SlowLookup => "memoize.slow_lookup",
            Self::RemoteError => "memoize.remote_error",
            Self::DecodeError => "memoize.decode_error",
            Self::GeneratorError => "memoize.generator_error",
            Self::WriteFailed => "memoize.write_failed",
            Self::DeleteFailed => "memoize.delete_failed",
            Self::TaskPanicked => "memoize.task_panicked",
        }
    }

    pub fn level(self) -> Level {
        match self {
            Self::Hit | Self::NilHit | Self::Miss | Self::Generated | Self::NotFound | Self::Conflict => Level::DEBUG,
            Self::Written | Self::NilWritten | Self::Swapped | Self::Invalidated | Self::AfterCommit | Self::Deferred => Level::INFO,
            Self::SlowLookup | Self::RemoteError | Self::DecodeError | Self::GeneratorError => Level::WARN,
            Self::WriteFailed | Self::DeleteFailed | Self::TaskPanicked => Level::ERROR,
        }
    }
}

/// Emits memoization events for one cache instance.
#[derive(Clone, Debug)]
pub(crate) struct MemoTelemetry {
    name: CacheName,
    logging_enabled: bool,
}

impl MemoTelemetry {
    pub fn new(name: CacheName, logging_enabled: bool) -> Self {
        Self { name, logging_enabled }
    }

    #[inline]
    pub fn record(&self, operation: MemoOperation, activity: MemoActivity, duration: Option<Duration>) {
        if self.logging_enabled {
            Self::emit(self.name, operation, activity, duration, None);
        }
    }

    /// Records an outcome caused by `error`, attaching the error to the event.
    #[inline]
    pub fn record_error(&self, operation: MemoOperation, activity: MemoActivity, error: &Error) {
        if self.logging_enabled {
            Self::emit(self.name, operation, activity, None, Some(error));
        }
    }

    fn emit(name: CacheName, operation: MemoOperation, activity: MemoActivity, duration: Option<Duration>, error: Option<&Error>) {
        let op = operation.as_str();
        let act = activity.as_str();
        let duration_ns = duration.map(|d| d.as_nanos());
        let error = error.map(tracing::field::display);

        // Tracing level must be constant, so we use a macro to select the appropriate level.
        macro_rules! emit_event {
            ($level:ident) => {
                tracing::$level!(
                    memoize.name = name,
                    memoize.operation = op,
                    memoize.activity = act,
                    memoize.duration_ns = ?duration_ns,
                    memoize.error = error,
                    "memoize.event"
                )
            };
        }

        match activity.level() {
            Level::ERROR => emit_event!(error),
            Level::WARN => emit_event!(warn),
            Level::INFO => emit_event!(info),
            _ => emit_event!(debug),
        }
    }
}
