//! Codec module - serialization/deserialization for message bodies.
//!
//! Request and reply bodies are UTF-8 JSON. [`JsonCodec`] wraps
//! `serde_json` so every body goes through one encode/decode path.
//!
//! # Design
//!
//! Codecs are implemented as marker structs with static methods rather than trait objects.
//!
//! # Example
//!
//! ```
//! use queuerpc::codec::JsonCodec;
//!
//! let encoded = JsonCodec::encode(&"hello").unwrap();
//! assert_eq!(encoded, b"\"hello\"");
//! let decoded: String = JsonCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, "hello");
//! ```

mod json;

pub use json::JsonCodec;
