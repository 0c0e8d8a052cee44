//! Error types for wire-level operations

use thiserror::Error;

/// Wire-level errors. Every variant is fatal to the session that produced
/// it: a MessagePack stream cannot be resynchronized mid-frame, so the only
/// safe reaction is to close the connection.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The stream closed in the middle of a length prefix or payload
    #[error("truncated frame: stream closed mid-frame")]
    TruncatedFrame,

    /// Declared frame length exceeds the configured limit
    #[error("frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Declared frame size
        size: u64,
        /// Maximum allowed size
        max: usize,
    },

    /// Payload bytes did not decode to a valid envelope
    #[error("decode error: {0}")]
    Decode(String),

    /// A value could not be serialized
    #[error("encode error: {0}")]
    Encode(String),

    /// Underlying stream I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
