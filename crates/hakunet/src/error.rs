//! Error types for the hakunet library

use hakunet_proto::ProtocolError;
use thiserror::Error;

/// Main error type for hakunet operations
#[derive(Debug, Error)]
pub enum HakunetError {
    /// Wire-level failure (framing, truncation, encode/decode)
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A frame could not be written because the session is closing or the
    /// stream write failed
    #[error("send failed: {0}")]
    SendFailed(String),

    /// The peer closed while a task was suspended waiting on this session
    #[error("peer disconnected")]
    Disconnected,

    /// Transaction start for a type with no registered handler
    #[error("unknown transaction type: {0}")]
    UnknownTransaction(String),

    /// Event name collides with a protocol control tag
    #[error("reserved event name: {0}")]
    ReservedName(String),

    /// The peer reported a call failure
    #[error("remote call failed: {0}")]
    Remote(String),

    /// An application handler returned an error
    #[error("handler failed: {0}")]
    Handler(String),
}
