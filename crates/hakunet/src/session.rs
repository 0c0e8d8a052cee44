//! Transport session: single owner of one duplex stream's write side
//!
//! The read side is driven by exactly one read-loop task per connection (see
//! the client and server modules); the write side lives here behind a mutex
//! so one frame's bytes always hit the stream contiguously.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::debug;

use hakunet_proto::{is_reserved_tag, Envelope, FrameCodec, Kwargs, ProtocolError, Value};

use crate::error::HakunetError;
use crate::Result;

/// Type-erased write half of a duplex stream.
pub(crate) type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Type-erased read half of a duplex stream.
pub(crate) type BoxReader = Box<dyn AsyncRead + Send + Unpin>;

/// One side of a live connection: encodes envelopes and writes framed bytes.
///
/// Shared between application tasks (events, call requests, transaction
/// sends) and never touched by the read loop except at teardown.
pub struct Session {
    /// Write half, locked for the duration of one frame's bytes
    writer: Mutex<BoxWriter>,
    /// Codec used for framing outbound payloads
    codec: FrameCodec,
    /// Set once the session starts closing; later sends fail fast
    closing: AtomicBool,
}

impl Session {
    pub(crate) fn new(writer: BoxWriter) -> Self {
        Self {
            writer: Mutex::new(writer),
            codec: FrameCodec::new(),
            closing: AtomicBool::new(false),
        }
    }

    /// Encode, frame, and write one envelope.
    pub async fn send(&self, envelope: &Envelope) -> Result<()> {
        if self.is_closing() {
            return Err(HakunetError::SendFailed("session is closing".into()));
        }

        let payload = envelope.encode()?;

        let mut writer = self.writer.lock().await;
        self.codec
            .write_frame(&mut *writer, &payload)
            .await
            .map_err(|e| match e {
                ProtocolError::Io(io) => HakunetError::SendFailed(io.to_string()),
                other => HakunetError::Protocol(other),
            })
    }

    /// Send a fire-and-forget event to the peer.
    pub async fn emit(&self, event: &str, args: Vec<Value>, kwargs: Kwargs) -> Result<()> {
        if is_reserved_tag(event) {
            return Err(HakunetError::ReservedName(event.to_string()));
        }

        self.send(&Envelope::Event {
            name: event.to_string(),
            args,
            kwargs,
        })
        .await
    }

    /// Close the stream exactly once: write the end-of-session marker and
    /// shut the write side down. Both writes are best effort since the peer
    /// may already be gone.
    pub async fn close(&self) {
        if self.closing.swap(true, Ordering::AcqRel) {
            return;
        }

        debug!("closing session");
        let mut writer = self.writer.lock().await;
        let _ = self.codec.write_close(&mut *writer).await;
        let _ = writer.shutdown().await;
    }

    /// Whether the session has started closing.
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink_session() -> Session {
        Session::new(Box::new(tokio::io::sink()))
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let session = sink_session();
        session.close().await;

        let result = session
            .send(&Envelope::Response {
                call_id: 1,
                result: Value::Nil,
            })
            .await;

        assert!(matches!(result, Err(HakunetError::SendFailed(_))));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let session = sink_session();
        session.close().await;
        session.close().await;
        assert!(session.is_closing());
    }

    #[tokio::test]
    async fn test_emit_rejects_reserved_names() {
        let session = sink_session();
        let result = session.emit("resp", vec![], vec![]).await;
        assert!(matches!(result, Err(HakunetError::ReservedName(_))));
    }

    #[tokio::test]
    async fn test_emit_writes_event_frame() {
        let (client_io, mut server_io) = tokio::io::duplex(1024);
        let (_, writer) = tokio::io::split(client_io);
        let session = Session::new(Box::new(writer));

        session
            .emit("mes", vec![Value::from("hi")], vec![])
            .await
            .unwrap();

        let mut codec = FrameCodec::new();
        let payload = codec.read_frame(&mut server_io).await.unwrap().unwrap();
        let envelope = Envelope::decode(&payload).unwrap().unwrap();

        assert_eq!(
            envelope,
            Envelope::Event {
                name: "mes".into(),
                args: vec![Value::from("hi")],
                kwargs: vec![],
            }
        );
    }
}
