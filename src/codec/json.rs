//! JSON codec using `serde_json`.
//!
//! Structs are encoded as objects with their (serde-renamed) field names,
//! which is what callers on the other side of the broker decode.

use serde_json::Value;

use crate::error::Result;

/// JSON codec for message bodies.
pub struct JsonCodec;

impl JsonCodec {
    /// Encode a value to JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    /// Decode JSON bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes cannot be deserialized to type T.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Parse bytes into an untyped JSON tree.
    #[inline]
    pub fn parse(bytes: &[u8]) -> Result<Value> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Convert an untyped JSON tree into a typed value.
    #[inline]
    pub fn from_value<T: serde::de::DeserializeOwned>(value: Value) -> Result<T> {
        Ok(serde_json::from_value(value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Order {
        id: u32,
        sku: String,
        gift: bool,
    }

    #[test]
    fn test_encode_decode_struct() {
        let original = Order {
            id: 7,
            sku: "A-1".to_string(),
            gift: false,
        };

        let encoded = JsonCodec::encode(&original).unwrap();
        let decoded: Order = JsonCodec::decode(&encoded).unwrap();

        assert_eq!(decoded, original);
    }

    #[test]
    fn test_struct_encodes_as_object() {
        let encoded = JsonCodec::encode(&Order {
            id: 1,
            sku: "x".to_string(),
            gift: true,
        })
        .unwrap();

        let value = JsonCodec::parse(&encoded).unwrap();
        assert!(value.is_object());
        assert_eq!(value["sku"], "x");
    }

    #[test]
    fn test_null_option() {
        let encoded = JsonCodec::encode(&Option::<i32>::None).unwrap();
        assert_eq!(encoded, b"null");
    }

    #[test]
    fn test_decode_error_on_invalid_data() {
        let result: Result<Order> = JsonCodec::decode(b"{not json");
        assert!(result.is_err());
    }

    #[test]
    fn test_decode_error_on_shape_mismatch() {
        let result: Result<Order> = JsonCodec::decode(br#"{"id": "seven"}"#);
        assert!(result.is_err());
    }
}
