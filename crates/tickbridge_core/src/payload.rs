//! # Payload Codecs
//!
//! The relay forwards raw bytes. How those bytes are read is up to whoever
//! observes them, so the schema is a pluggable codec rather than a fixed
//! format.
//!
//! | Codec              | Value        | Wire form                 |
//! |--------------------|--------------|---------------------------|
//! | `Utf8Codec`        | `String`     | UTF-8 bytes               |
//! | `IntegerListCodec` | `Vec<i64>`   | JSON array, e.g. `[1,2,3]`|
//! | `JsonCodec<T>`     | any serde `T`| JSON document             |

use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::PayloadResult;

/// Encodes values to payload bytes and decodes them back.
pub trait PayloadCodec {
    /// The decoded value type.
    type Value;

    /// Encodes a value into payload bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be represented in this format.
    fn encode(&self, value: &Self::Value) -> PayloadResult<Vec<u8>>;

    /// Decodes payload bytes into a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are malformed for this format.
    fn decode(&self, payload: &[u8]) -> PayloadResult<Self::Value>;
}

/// Plain UTF-8 text payloads.
#[derive(Clone, Copy, Debug, Default)]
pub struct Utf8Codec;

impl PayloadCodec for Utf8Codec {
    type Value = String;

    fn encode(&self, value: &String) -> PayloadResult<Vec<u8>> {
        Ok(value.as_bytes().to_vec())
    }

    fn decode(&self, payload: &[u8]) -> PayloadResult<String> {
        Ok(std::str::from_utf8(payload)?.to_owned())
    }
}

/// JSON payloads for any serde type.
pub struct JsonCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
    /// Creates a JSON codec.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonCodec<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for JsonCodec<T> {}

impl<T> std::fmt::Debug for JsonCodec<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JsonCodec<{}>", std::any::type_name::<T>())
    }
}

impl<T: Serialize + DeserializeOwned> PayloadCodec for JsonCodec<T> {
    type Value = T;

    fn encode(&self, value: &T) -> PayloadResult<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode(&self, payload: &[u8]) -> PayloadResult<T> {
        Ok(serde_json::from_slice(payload)?)
    }
}

/// Integer-list payloads, encoded as a JSON array.
pub type IntegerListCodec = JsonCodec<Vec<i64>>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PayloadError;

    #[test]
    fn test_utf8_codec() {
        let codec = Utf8Codec;
        let bytes = codec.encode(&"Building 7".to_string()).unwrap();
        assert_eq!(bytes, b"Building 7");
        assert_eq!(codec.decode(&bytes).unwrap(), "Building 7");
    }

    #[test]
    fn test_utf8_codec_rejects_invalid_bytes() {
        let result = Utf8Codec.decode(&[0xc3, 0x28]);
        assert!(matches!(result, Err(PayloadError::InvalidUtf8(_))));
    }

    #[test]
    fn test_integer_list_codec() {
        let codec = IntegerListCodec::new();
        assert_eq!(codec.encode(&vec![3, 14, 15]).unwrap(), b"[3,14,15]");
        assert_eq!(codec.decode(b"[ 1, -2, 3 ]").unwrap(), vec![1, -2, 3]);
    }

    #[test]
    fn test_integer_list_codec_rejects_malformed() {
        let codec = IntegerListCodec::new();
        assert!(matches!(codec.decode(b"[1, \"two\"]"), Err(PayloadError::Json(_))));
        assert!(matches!(codec.decode(b"not json"), Err(PayloadError::Json(_))));
    }

    #[test]
    fn test_json_codec_custom_type() {
        #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
        struct Click {
            building_id: u32,
        }

        let codec = JsonCodec::<Click>::new();
        let decoded = codec.decode(br#"{"building_id": 12}"#).unwrap();
        assert_eq!(decoded, Click { building_id: 12 });
    }
}
