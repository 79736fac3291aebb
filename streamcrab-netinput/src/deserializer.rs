//! Pluggable decoding of record payloads into user values.

use std::marker::PhantomData;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;

/// Turns the payload of a complete record frame into a value.
///
/// Called on the task thread once per record; implementations must not block.
pub trait RecordDeserializer {
    type Value;

    fn deserialize(&self, payload: &[u8]) -> Result<Self::Value>;
}

/// Decodes payloads written with `bincode::serialize`.
pub struct BincodeDeserializer<T> {
    _phantom: PhantomData<fn() -> T>,
}

impl<T> BincodeDeserializer<T> {
    pub fn new() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

impl<T> Default for BincodeDeserializer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned> RecordDeserializer for BincodeDeserializer<T> {
    type Value = T;

    fn deserialize(&self, payload: &[u8]) -> Result<T> {
        bincode::deserialize(payload).context("bincode record deserialization failed")
    }
}

/// Passes payload bytes through untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawBytesDeserializer;

impl RecordDeserializer for RawBytesDeserializer {
    type Value = Vec<u8>;

    fn deserialize(&self, payload: &[u8]) -> Result<Vec<u8>> {
        Ok(payload.to_vec())
    }
}

/// Encode a value the way [`BincodeDeserializer`] expects it.
pub fn bincode_payload<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).context("bincode record serialization failed")
}
