// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use base64::{Engine as _, engine::general_purpose::URL_SAFE};
use sha2::{Digest, Sha256};

/// Length in characters of every fingerprint.
pub const FINGERPRINT_LEN: usize = 44;

/// Derives the remote cache key for a logical key.
///
/// The logical key is hashed with SHA-256 and the digest is encoded as
/// URL-safe base64, so the result is always [`FINGERPRINT_LEN`] ASCII
/// characters no matter how long the logical key is.
///
/// # Examples
///
/// ```
/// use memoize::{fingerprint, FINGERPRINT_LEN};
///
/// let short = fingerprint("User{Id:42}");
/// let long = fingerprint(&"x".repeat(10_000));
///
/// assert_eq!(short.len(), FINGERPRINT_LEN);
/// assert_eq!(long.len(), FINGERPRINT_LEN);
/// assert_eq!(short, fingerprint("User{Id:42}"));
/// assert_ne!(short, fingerprint("User{Id:43}"));
/// ```
#[must_use]
pub fn fingerprint(key: &str) -> String {
    URL_SAFE.encode(Sha256::digest(key.as_bytes()))
}
