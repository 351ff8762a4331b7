// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Value serialization for cache payloads.

use memoize_remote::{Error, Result};
use serde::{Serialize, de::DeserializeOwned};

pub(crate) fn encode<V: Serialize + ?Sized>(value: &V) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(Error::codec)
}

pub(crate) fn decode<V: DeserializeOwned>(payload: &[u8]) -> Result<V> {
    serde_json::from_slice(payload).map_err(Error::codec)
}
