//! Frame codec for async streams
//!
//! Every frame on the wire is `[8-byte unsigned big-endian length][payload]`.
//! A zero-length frame is the deliberate end-of-session marker. Frames are
//! fully buffered before a payload is handed to the caller; a stream that
//! closes mid-frame is a truncation error, never a silent partial read.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::ProtocolError;

/// Width of the length prefix in bytes.
pub const LEN_PREFIX_SIZE: usize = 8;

/// Maximum frame size (16MB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Frame codec for reading and writing length-prefixed frames.
pub struct FrameCodec {
    /// Read buffer for incoming data
    read_buf: BytesMut,
    /// Maximum frame size allowed
    max_frame_size: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    /// Create a new frame codec with default settings
    pub fn new() -> Self {
        Self {
            read_buf: BytesMut::with_capacity(8192),
            max_frame_size: MAX_FRAME_SIZE,
        }
    }

    /// Create a new frame codec with a custom max frame size
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            read_buf: BytesMut::with_capacity(8192),
            max_frame_size,
        }
    }

    /// Prepend the length prefix to a payload.
    pub fn frame(&self, payload: &[u8]) -> Result<Bytes, ProtocolError> {
        if payload.len() > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: payload.len() as u64,
                max: self.max_frame_size,
            });
        }

        let mut buf = BytesMut::with_capacity(LEN_PREFIX_SIZE + payload.len());
        buf.put_u64(payload.len() as u64);
        buf.put_slice(payload);
        Ok(buf.freeze())
    }

    /// Write one framed payload to an async writer.
    ///
    /// The frame is assembled before writing so a single `write_all` carries
    /// the whole frame; callers still serialize concurrent writers so frames
    /// cannot interleave at the byte level.
    pub async fn write_frame<W>(&self, writer: &mut W, payload: &[u8]) -> Result<(), ProtocolError>
    where
        W: AsyncWrite + Unpin,
    {
        let framed = self.frame(payload)?;
        writer.write_all(&framed).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Write the zero-length end-of-session marker.
    pub async fn write_close<W>(&self, writer: &mut W) -> Result<(), ProtocolError>
    where
        W: AsyncWrite + Unpin,
    {
        writer.write_all(&[0u8; LEN_PREFIX_SIZE]).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Read one frame payload from an async reader.
    ///
    /// Returns `Ok(None)` when the stream ends cleanly at a frame boundary.
    /// A zero-length payload (the close sentinel) is returned as an empty
    /// `Bytes`; EOF inside a frame fails with [`ProtocolError::TruncatedFrame`].
    pub async fn read_frame<R>(&mut self, reader: &mut R) -> Result<Option<Bytes>, ProtocolError>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            if let Some(payload) = self.try_decode()? {
                return Ok(Some(payload));
            }

            let mut temp_buf = [0u8; 8192];
            let n = reader.read(&mut temp_buf).await?;

            if n == 0 {
                if self.read_buf.is_empty() {
                    return Ok(None);
                }
                return Err(ProtocolError::TruncatedFrame);
            }

            self.read_buf.extend_from_slice(&temp_buf[..n]);
        }
    }

    /// Try to extract one complete payload from the internal buffer.
    pub fn try_decode(&mut self) -> Result<Option<Bytes>, ProtocolError> {
        if self.read_buf.len() < LEN_PREFIX_SIZE {
            return Ok(None);
        }

        let frame_len = (&self.read_buf[..LEN_PREFIX_SIZE]).get_u64();

        if frame_len > self.max_frame_size as u64 {
            return Err(ProtocolError::FrameTooLarge {
                size: frame_len,
                max: self.max_frame_size,
            });
        }
        let frame_len = frame_len as usize;

        if self.read_buf.len() < LEN_PREFIX_SIZE + frame_len {
            return Ok(None);
        }

        self.read_buf.advance(LEN_PREFIX_SIZE);
        Ok(Some(self.read_buf.split_to(frame_len).freeze()))
    }

    /// Get the current buffer size
    pub fn buffer_size(&self) -> usize {
        self.read_buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_frame_roundtrip() {
        let mut codec = FrameCodec::new();
        let framed = codec.frame(b"test payload").unwrap();
        assert_eq!(framed.len(), LEN_PREFIX_SIZE + 12);

        let mut cursor = Cursor::new(framed);
        let payload = codec.read_frame(&mut cursor).await.unwrap().unwrap();
        assert_eq!(&payload[..], b"test payload");
    }

    #[tokio::test]
    async fn test_write_read_frame() {
        let codec = FrameCodec::new();
        let mut buffer = Vec::new();
        codec.write_frame(&mut buffer, b"hello").await.unwrap();

        let mut codec2 = FrameCodec::new();
        let mut cursor = Cursor::new(buffer);
        let payload = codec2.read_frame(&mut cursor).await.unwrap().unwrap();
        assert_eq!(&payload[..], b"hello");
    }

    #[tokio::test]
    async fn test_partial_frame_buffering() {
        let codec = FrameCodec::new();
        let framed = codec.frame(b"buffered").unwrap();

        let mut codec2 = FrameCodec::new();
        let mid = framed.len() / 2;

        codec2.read_buf.extend_from_slice(&framed[..mid]);
        assert!(codec2.try_decode().unwrap().is_none());

        codec2.read_buf.extend_from_slice(&framed[mid..]);
        let payload = codec2.try_decode().unwrap().unwrap();
        assert_eq!(&payload[..], b"buffered");
    }

    #[tokio::test]
    async fn test_multiple_frames_in_buffer() {
        let codec = FrameCodec::new();
        let mut combined = BytesMut::new();
        combined.extend_from_slice(&codec.frame(b"first").unwrap());
        combined.extend_from_slice(&codec.frame(b"second").unwrap());

        let mut codec2 = FrameCodec::new();
        let mut cursor = Cursor::new(combined.freeze());

        let first = codec2.read_frame(&mut cursor).await.unwrap().unwrap();
        assert_eq!(&first[..], b"first");

        let second = codec2.read_frame(&mut cursor).await.unwrap().unwrap();
        assert_eq!(&second[..], b"second");

        assert!(codec2.read_frame(&mut cursor).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_close_sentinel() {
        let codec = FrameCodec::new();
        let mut buffer = Vec::new();
        codec.write_close(&mut buffer).await.unwrap();

        let mut codec2 = FrameCodec::new();
        let mut cursor = Cursor::new(buffer);
        let payload = codec2.read_frame(&mut cursor).await.unwrap().unwrap();
        assert!(payload.is_empty());
    }

    #[tokio::test]
    async fn test_truncated_frame() {
        let codec = FrameCodec::new();
        let framed = codec.frame(b"will be cut short").unwrap();

        let mut codec2 = FrameCodec::new();
        let mut cursor = Cursor::new(framed.slice(..framed.len() - 4));
        let result = codec2.read_frame(&mut cursor).await;

        assert!(matches!(result, Err(ProtocolError::TruncatedFrame)));
    }

    #[tokio::test]
    async fn test_truncated_length_prefix() {
        let mut codec = FrameCodec::new();
        let mut cursor = Cursor::new(vec![0u8; 3]);
        let result = codec.read_frame(&mut cursor).await;

        assert!(matches!(result, Err(ProtocolError::TruncatedFrame)));
    }

    #[tokio::test]
    async fn test_frame_too_large_on_write() {
        let codec = FrameCodec::with_max_frame_size(100);
        let result = codec.frame(&[0u8; 200]);
        assert!(matches!(result, Err(ProtocolError::FrameTooLarge { .. })));
    }

    #[tokio::test]
    async fn test_frame_too_large_on_read() {
        let mut codec = FrameCodec::with_max_frame_size(100);
        let mut declared = BytesMut::new();
        declared.put_u64(1_000_000);

        let mut cursor = Cursor::new(declared.freeze());
        let result = codec.read_frame(&mut cursor).await;
        assert!(matches!(result, Err(ProtocolError::FrameTooLarge { .. })));
    }

    #[tokio::test]
    async fn test_empty_stream() {
        let mut codec = FrameCodec::new();
        let mut cursor = Cursor::new(Vec::<u8>::new());
        assert!(codec.read_frame(&mut cursor).await.unwrap().is_none());
    }

    proptest! {
        #[test]
        fn test_codec_roundtrip_properties(
            payload in prop::collection::vec(any::<u8>(), 0..2048)
        ) {
            let decoded = tokio_test::block_on(async {
                let codec = FrameCodec::new();
                let framed = codec.frame(&payload).unwrap();

                let mut codec2 = FrameCodec::new();
                let mut cursor = Cursor::new(framed);
                codec2.read_frame(&mut cursor).await.unwrap().unwrap()
            });

            prop_assert_eq!(&decoded[..], &payload[..]);
        }
    }
}
