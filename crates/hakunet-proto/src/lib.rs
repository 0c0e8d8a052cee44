//! # Hakunet Protocol
//!
//! Wire format, envelope types, and frame codec for the hakunet
//! session-multiplexing protocol.
//!
//! One frame on the wire is an 8-byte big-endian length prefix followed by a
//! MessagePack-encoded envelope: a tagged array carrying an event, a call
//! request/response, or a transaction start/data message. A zero-length frame
//! marks a deliberate end of session.

#![warn(missing_docs)]

/// Envelope structure and MessagePack conversion
pub mod envelope;

/// Frame codec for async streams
pub mod codec;

/// Dynamic payload values
pub mod value;

/// Error types for wire-level operations
pub mod error;

pub use codec::{FrameCodec, LEN_PREFIX_SIZE, MAX_FRAME_SIZE};
pub use envelope::{is_reserved_tag, Envelope};
pub use error::ProtocolError;
pub use value::{from_value, kwarg, to_value, Kwargs, Value};
