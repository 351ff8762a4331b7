// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::{
    fmt::{Debug, Formatter},
    ops::BitOr,
    time::Duration,
};

/// Small integer flag set stored alongside a [`CacheRecord`] payload.
///
/// # Examples
///
/// ```
/// use memoize_remote::RecordFlags;
///
/// let flags = RecordFlags::NONE | RecordFlags::NIL_MARKER;
/// assert!(flags.contains(RecordFlags::NIL_MARKER));
/// assert_eq!(flags.bits(), 1);
/// ```
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct RecordFlags(u32);

impl RecordFlags {
    /// No flags set: a regular cached value.
    pub const NONE: Self = Self(0);

    /// The record stands for a confirmed absence of value, not an empty value.
    pub const NIL_MARKER: Self = Self(1);

    /// Creates a flag set from raw bits as stored by the remote service.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Returns the raw bits.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns `true` if every flag in `other` is also set in `self`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for RecordFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl Debug for RecordFlags {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.contains(Self::NIL_MARKER) {
            write!(f, "RecordFlags(NIL_MARKER, {:#x})", self.0)
        } else {
            write!(f, "RecordFlags({:#x})", self.0)
        }
    }
}

/// The raw unit stored in a remote cache: serialized payload plus metadata.
///
/// A record read back from a [`RemoteCache`](crate::RemoteCache) carries the
/// compare-and-swap token the service assigned to that version of the record.
/// Writing the same record back through
/// [`compare_and_swap`](crate::RemoteCache::compare_and_swap) only succeeds
/// while that version is still current.
///
/// # Examples
///
/// ```
/// use memoize_remote::CacheRecord;
/// use std::time::Duration;
///
/// let record = CacheRecord::new(b"42".to_vec()).with_expiration(Duration::from_secs(60));
/// assert_eq!(record.payload(), b"42");
/// assert_eq!(record.expiration(), Some(Duration::from_secs(60)));
/// assert!(!record.is_nil_marker());
///
/// let nil = CacheRecord::nil_marker();
/// assert!(nil.is_nil_marker());
/// assert!(nil.payload().is_empty());
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheRecord {
    payload: Vec<u8>,
    flags: RecordFlags,
    /// Lifetime requested by the writer; `None` keeps the record until evicted.
    expiration: Option<Duration>,
    cas_token: Option<u64>,
}

impl CacheRecord {
    /// Creates a regular record with the given payload.
    #[must_use]
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            payload,
            flags: RecordFlags::NONE,
            expiration: None,
            cas_token: None,
        }
    }

    /// Creates a record that caches the absence of a value.
    ///
    /// Its payload is empty and never decoded.
    #[must_use]
    pub fn nil_marker() -> Self {
        Self {
            payload: Vec::new(),
            flags: RecordFlags::NIL_MARKER,
            expiration: None,
            cas_token: None,
        }
    }

    /// Sets the lifetime after which the remote service may drop this record.
    #[must_use]
    pub fn with_expiration(mut self, expiration: Duration) -> Self {
        self.expiration = Some(expiration);
        self
    }

    /// Sets an optional lifetime.
    #[must_use]
    pub fn with_optional_expiration(mut self, expiration: Option<Duration>) -> Self {
        self.expiration = expiration;
        self
    }

    /// Replaces the flag set.
    #[must_use]
    pub fn with_flags(mut self, flags: RecordFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Attaches the compare-and-swap token of the version this record replaces.
    ///
    /// Remote cache implementations call this when returning a record.
    #[must_use]
    pub fn with_cas_token(mut self, token: u64) -> Self {
        self.cas_token = Some(token);
        self
    }

    /// Replaces the payload, keeping flags and compare-and-swap token.
    pub fn set_payload(&mut self, payload: Vec<u8>) {
        self.payload = payload;
    }

    /// Returns the serialized payload.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Consumes the record and returns its payload.
    #[must_use]
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Returns the flag set.
    #[must_use]
    pub fn flags(&self) -> RecordFlags {
        self.flags
    }

    /// Returns `true` if this record caches the absence of a value.
    #[must_use]
    pub fn is_nil_marker(&self) -> bool {
        self.flags.contains(RecordFlags::NIL_MARKER)
    }

    /// Returns the requested lifetime, if any.
    #[must_use]
    pub fn expiration(&self) -> Option<Duration> {
        self.expiration
    }

    /// Returns the compare-and-swap token, if the record was read from a remote cache.
    #[must_use]
    pub fn cas_token(&self) -> Option<u64> {
        self.cas_token
    }
}
