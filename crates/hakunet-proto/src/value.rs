//! Dynamic payload values
//!
//! Envelope payloads, positional arguments, and named arguments are arbitrary
//! MessagePack values ([`rmpv::Value`]): primitives, sequences, and mappings
//! in any nesting. Typed Rust data crosses the boundary through the serde
//! bridge below.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::ProtocolError;

pub use rmpv::Value;

/// Named arguments carried as a MessagePack map.
pub type Kwargs = Vec<(Value, Value)>;

/// Convert a serializable Rust value into a dynamic payload value.
pub fn to_value<T: Serialize>(value: &T) -> Result<Value, ProtocolError> {
    rmpv::ext::to_value(value).map_err(|e| ProtocolError::Encode(e.to_string()))
}

/// Convert a dynamic payload value into a typed Rust value.
pub fn from_value<T: DeserializeOwned>(value: Value) -> Result<T, ProtocolError> {
    rmpv::ext::from_value(value).map_err(|e| ProtocolError::Decode(e.to_string()))
}

/// Look up a named argument by key.
pub fn kwarg<'a>(kwargs: &'a Kwargs, key: &str) -> Option<&'a Value> {
    kwargs
        .iter()
        .find(|(k, _)| k.as_str() == Some(key))
        .map(|(_, v)| v)
}
