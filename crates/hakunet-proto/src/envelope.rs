//! Envelope structure and MessagePack conversion
//!
//! An envelope is the decoded value inside a frame: a tagged MessagePack
//! array whose first element discriminates the kind. Reserved tags select
//! control messages; any other string tag is an event name.

use rmpv::Value;

use crate::error::ProtocolError;
use crate::value::Kwargs;

/// Tag for a call request envelope.
pub const TAG_CALL: &str = "call";
/// Tag for a call response envelope.
pub const TAG_RESP: &str = "resp";
/// Tag for a call error-response envelope.
pub const TAG_RESP_ERR: &str = "resp_err";
/// Tag for a transaction data envelope.
pub const TAG_TX_DATA: &str = "tsc";
/// Tag for a transaction start envelope.
pub const TAG_TX_START: &str = "tsc_st";

/// Check whether a string collides with a control tag and therefore cannot
/// be used as an event name.
pub fn is_reserved_tag(name: &str) -> bool {
    matches!(
        name,
        TAG_CALL | TAG_RESP | TAG_RESP_ERR | TAG_TX_DATA | TAG_TX_START
    )
}

/// A decoded protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// Fire-and-forget named notification: `[name, args, kwargs]`
    Event {
        /// Event name (any non-reserved string)
        name: String,
        /// Positional arguments
        args: Vec<Value>,
        /// Named arguments
        kwargs: Kwargs,
    },
    /// Request half of a call round trip: `["call", method, call_id, args, kwargs]`
    Call {
        /// Method name
        method: String,
        /// Correlation identifier
        call_id: u64,
        /// Positional arguments
        args: Vec<Value>,
        /// Named arguments
        kwargs: Kwargs,
    },
    /// Successful response half of a call: `["resp", call_id, result]`
    Response {
        /// Correlation identifier of the originating call
        call_id: u64,
        /// Handler return value
        result: Value,
    },
    /// Error response for a failed or unknown call: `["resp_err", call_id, message]`
    ResponseError {
        /// Correlation identifier of the originating call
        call_id: u64,
        /// Human-readable failure description
        message: String,
    },
    /// Opens a transaction sub-stream: `["tsc_st", tx_id, tx_type]`
    TransactionStart {
        /// Transaction identifier
        tx_id: u64,
        /// Registered transaction type name
        tx_type: String,
    },
    /// One ordered payload within a transaction: `["tsc", tx_id, payload]`
    TransactionData {
        /// Transaction identifier
        tx_id: u64,
        /// Arbitrary payload value
        payload: Value,
    },
}

impl Envelope {
    /// Build the tagged-array representation of this envelope.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Event { name, args, kwargs } => Value::Array(vec![
                Value::from(name.as_str()),
                Value::Array(args.clone()),
                Value::Map(kwargs.clone()),
            ]),
            Self::Call {
                method,
                call_id,
                args,
                kwargs,
            } => Value::Array(vec![
                Value::from(TAG_CALL),
                Value::from(method.as_str()),
                Value::from(*call_id),
                Value::Array(args.clone()),
                Value::Map(kwargs.clone()),
            ]),
            Self::Response { call_id, result } => Value::Array(vec![
                Value::from(TAG_RESP),
                Value::from(*call_id),
                result.clone(),
            ]),
            Self::ResponseError { call_id, message } => Value::Array(vec![
                Value::from(TAG_RESP_ERR),
                Value::from(*call_id),
                Value::from(message.as_str()),
            ]),
            Self::TransactionStart { tx_id, tx_type } => Value::Array(vec![
                Value::from(TAG_TX_START),
                Value::from(*tx_id),
                Value::from(tx_type.as_str()),
            ]),
            Self::TransactionData { tx_id, payload } => Value::Array(vec![
                Value::from(TAG_TX_DATA),
                Value::from(*tx_id),
                payload.clone(),
            ]),
        }
    }

    /// Reconstruct an envelope from its tagged-array representation.
    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        let items = match value {
            Value::Array(items) => items,
            other => {
                return Err(ProtocolError::Decode(format!(
                    "envelope is not an array: {}",
                    other
                )))
            }
        };

        let mut fields = items.into_iter();
        let tag = match fields.next() {
            Some(Value::String(s)) => s
                .into_str()
                .ok_or_else(|| ProtocolError::Decode("envelope tag is not UTF-8".into()))?,
            Some(other) => {
                return Err(ProtocolError::Decode(format!(
                    "envelope tag is not a string: {}",
                    other
                )))
            }
            None => return Err(ProtocolError::Decode("empty envelope array".into())),
        };

        let envelope = match tag.as_str() {
            TAG_CALL => {
                let method = take_str(&mut fields, "method")?;
                let call_id = take_u64(&mut fields, "call id")?;
                let args = take_array(&mut fields, "args")?;
                let kwargs = take_map(&mut fields, "kwargs")?;
                Self::Call {
                    method,
                    call_id,
                    args,
                    kwargs,
                }
            }
            TAG_RESP => {
                let call_id = take_u64(&mut fields, "call id")?;
                let result = take_any(&mut fields, "result")?;
                Self::Response { call_id, result }
            }
            TAG_RESP_ERR => {
                let call_id = take_u64(&mut fields, "call id")?;
                let message = take_str(&mut fields, "message")?;
                Self::ResponseError { call_id, message }
            }
            TAG_TX_START => {
                let tx_id = take_u64(&mut fields, "transaction id")?;
                let tx_type = take_str(&mut fields, "transaction type")?;
                Self::TransactionStart { tx_id, tx_type }
            }
            TAG_TX_DATA => {
                let tx_id = take_u64(&mut fields, "transaction id")?;
                let payload = take_any(&mut fields, "payload")?;
                Self::TransactionData { tx_id, payload }
            }
            _ => {
                let args = take_array(&mut fields, "args")?;
                let kwargs = take_map(&mut fields, "kwargs")?;
                Self::Event {
                    name: tag,
                    args,
                    kwargs,
                }
            }
        };

        if fields.next().is_some() {
            return Err(ProtocolError::Decode(
                "envelope has trailing fields".into(),
            ));
        }

        Ok(envelope)
    }

    /// Serialize this envelope to MessagePack bytes.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut buf = Vec::new();
        rmpv::encode::write_value(&mut buf, &self.to_value())
            .map_err(|e| ProtocolError::Encode(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize an envelope from MessagePack bytes.
    ///
    /// An empty payload is the deliberate end-of-session marker and decodes
    /// to `None`; callers terminate the session cleanly on it.
    pub fn decode(bytes: &[u8]) -> Result<Option<Self>, ProtocolError> {
        if bytes.is_empty() {
            return Ok(None);
        }

        let mut cursor = bytes;
        let value = rmpv::decode::read_value(&mut cursor)
            .map_err(|e| ProtocolError::Decode(e.to_string()))?;
        Ok(Some(Self::from_value(value)?))
    }
}

fn take_any(
    fields: &mut std::vec::IntoIter<Value>,
    name: &str,
) -> Result<Value, ProtocolError> {
    fields
        .next()
        .ok_or_else(|| ProtocolError::Decode(format!("envelope missing {} field", name)))
}

fn take_str(
    fields: &mut std::vec::IntoIter<Value>,
    name: &str,
) -> Result<String, ProtocolError> {
    match take_any(fields, name)? {
        Value::String(s) => s
            .into_str()
            .ok_or_else(|| ProtocolError::Decode(format!("{} is not UTF-8", name))),
        other => Err(ProtocolError::Decode(format!(
            "{} is not a string: {}",
            name, other
        ))),
    }
}

fn take_u64(
    fields: &mut std::vec::IntoIter<Value>,
    name: &str,
) -> Result<u64, ProtocolError> {
    let value = take_any(fields, name)?;
    value
        .as_u64()
        .ok_or_else(|| ProtocolError::Decode(format!("{} is not an unsigned integer", name)))
}

fn take_array(
    fields: &mut std::vec::IntoIter<Value>,
    name: &str,
) -> Result<Vec<Value>, ProtocolError> {
    match take_any(fields, name)? {
        Value::Array(items) => Ok(items),
        other => Err(ProtocolError::Decode(format!(
            "{} is not an array: {}",
            name, other
        ))),
    }
}

fn take_map(
    fields: &mut std::vec::IntoIter<Value>,
    name: &str,
) -> Result<Kwargs, ProtocolError> {
    match take_any(fields, name)? {
        Value::Map(pairs) => Ok(pairs),
        other => Err(ProtocolError::Decode(format!(
            "{} is not a map: {}",
            name, other
        ))),
    }
}
