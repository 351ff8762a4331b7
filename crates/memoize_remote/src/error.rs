// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Error types for remote cache and memoization operations.

use std::fmt::{Display, Formatter};

use recoverable::{Recovery, RecoveryInfo};

/// The category of an [`Error`].
///
/// The category decides how callers react: [`ErrorKind::NotFound`] is an
/// expected outcome, [`ErrorKind::Remote`] is worth retrying, and the rest are
/// terminal for the operation that produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The key has no value. Used as the "no such value" sentinel.
    NotFound,
    /// The remote cache service failed or could not be reached.
    Remote,
    /// A value could not be serialized or deserialized.
    Codec,
    /// A caller-supplied generator failed.
    Generator,
    /// A deferred delete could not be handed to the durable queue.
    Enqueue,
    /// The execution context rejected a transaction callback.
    Transaction,
    /// One or more per-key worker tasks panicked.
    TaskPanicked,
}

impl ErrorKind {
    /// Returns a stable, lowercase name for this kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Remote => "remote",
            Self::Codec => "codec",
            Self::Generator => "generator",
            Self::Enqueue => "enqueue",
            Self::Transaction => "transaction",
            Self::TaskPanicked => "task_panicked",
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error from a remote cache or memoization operation.
///
/// This is an opaque error type. Inspect [`Error::kind`] to branch on the
/// category and use [`std::error::Error::source()`] to reach the underlying
/// cause.
///
/// # Examples
///
/// ```
/// use memoize_remote::{Error, ErrorKind};
///
/// let error = Error::not_found();
/// assert!(error.is_not_found());
///
/// let error = Error::remote("connection reset");
/// assert_eq!(error.kind(), ErrorKind::Remote);
/// ```
#[ohno::error]
pub struct Error {
    kind: ErrorKind,
}

impl Error {
    /// Creates the "no such value" sentinel.
    ///
    /// Generators return this to signal that a key has no value; memoization
    /// reports it for keys whose absence was generated or served from cache.
    #[must_use]
    pub fn not_found() -> Self {
        Self::caused_by(ErrorKind::NotFound, "no such value")
    }

    /// Creates a transient remote cache failure.
    pub fn remote(cause: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::caused_by(ErrorKind::Remote, cause)
    }

    /// Creates a serialization failure.
    pub fn codec(cause: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::caused_by(ErrorKind::Codec, cause)
    }

    /// Creates a generator failure from any error the generator produced.
    ///
    /// # Examples
    ///
    /// ```
    /// use memoize_remote::{Error, ErrorKind};
    ///
    /// let io = std::io::Error::other("database offline");
    /// assert_eq!(Error::generator(io).kind(), ErrorKind::Generator);
    /// ```
    pub fn generator(cause: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::caused_by(ErrorKind::Generator, cause)
    }

    /// Creates a failure to enqueue a deferred delete.
    pub fn enqueue(cause: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::caused_by(ErrorKind::Enqueue, cause)
    }

    /// Creates a failure reported by the execution context.
    pub fn transaction(cause: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::caused_by(ErrorKind::Transaction, cause)
    }

    /// Creates the aggregate error for panicked worker tasks.
    #[must_use]
    pub fn tasks_panicked(messages: &[String]) -> Self {
        Self::caused_by(
            ErrorKind::TaskPanicked,
            format!("{} worker task(s) panicked: [{}]", messages.len(), messages.join("; ")),
        )
    }

    /// Returns the category of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns `true` for the "no such value" sentinel.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }
}

impl Recovery for Error {
    fn recovery(&self) -> RecoveryInfo {
        match self.kind {
            ErrorKind::Remote => RecoveryInfo::retry(),
            _ => RecoveryInfo::never(),
        }
    }
}

/// A specialized [`Result`] type for remote cache and memoization operations.
pub type Result<T> = std::result::Result<T, Error>;
