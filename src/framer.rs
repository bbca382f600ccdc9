//! Adapter between a byte stream and a sequence of frames.

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;

use crate::codec::Codec;
use crate::frame::Frame;
use crate::Result;

/// Owns a bidirectional byte stream and exposes it as a lazy sequence of
/// incoming [`Frame`]s plus a buffered outgoing frame sink.
///
/// The stream is typically a TCP or TLS connection on which the HTTP
/// upgrade has already completed. Outgoing frames accumulate in a write
/// buffer until [`Framer::flush`] is called; a [`crate::Connection`]
/// flushes for you at the appropriate points.
pub struct Framer<S> {
    inner: Framed<S, Codec>,
}

impl<S> Framer<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps a byte stream with the default frame size limit.
    pub fn new(stream: S) -> Self {
        Self {
            inner: Framed::new(stream, Codec::new()),
        }
    }

    /// Wraps a byte stream, refusing incoming frames whose payload exceeds
    /// `limit` bytes. Oversized frames surface as
    /// [`crate::Error::FrameTooLarge`].
    pub fn with_max_frame_size(stream: S, limit: usize) -> Self {
        Self {
            inner: Framed::new(stream, Codec::with_max_frame_size(limit)),
        }
    }

    /// Reads the next frame from the stream.
    ///
    /// Returns `Ok(None)` on a clean end of stream, which can only happen
    /// on a frame boundary; end of stream in the middle of a frame is
    /// [`crate::Error::ShortRead`].
    pub async fn read_frame(&mut self) -> Result<Option<Frame>> {
        self.inner.next().await.transpose()
    }

    /// Encodes a frame into the write buffer without flushing it.
    pub async fn write_frame(&mut self, frame: Frame) -> Result<()> {
        self.inner.feed(frame).await
    }

    /// Flushes all buffered frames to the stream.
    pub async fn flush(&mut self) -> Result<()> {
        self.inner.flush().await
    }

    /// Flushes buffered frames and shuts down the stream.
    pub async fn close(&mut self) -> Result<()> {
        self.inner.close().await
    }

    /// A reference to the underlying stream.
    pub fn get_ref(&self) -> &S {
        self.inner.get_ref()
    }

    /// A mutable reference to the underlying stream.
    pub fn get_mut(&mut self) -> &mut S {
        self.inner.get_mut()
    }

    /// Consumes the framer, returning the underlying stream. Any bytes in
    /// the framer's buffers are discarded.
    pub fn into_inner(self) -> S {
        self.inner.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::OpCode;
    use crate::Error;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn reads_frames_until_clean_eof() {
        let (mut raw, peer) = tokio::io::duplex(256);
        let mut framer = Framer::new(peer);

        raw.write_all(&[0x81, 0x05, 0x48, 0x65, 0x6C, 0x6C, 0x6F])
            .await
            .expect("write");
        drop(raw);

        let frame = framer.read_frame().await.expect("read").expect("frame");
        assert_eq!(frame.opcode, OpCode::Text);
        assert_eq!(&frame.payload[..], b"Hello");

        assert!(framer.read_frame().await.expect("eof").is_none());
    }

    #[tokio::test]
    async fn eof_mid_frame_is_an_error() {
        let (mut raw, peer) = tokio::io::duplex(256);
        let mut framer = Framer::new(peer);

        raw.write_all(&[0x81, 0x05, 0x48]).await.expect("write");
        drop(raw);

        let err = framer.read_frame().await.expect_err("must reject");
        assert!(matches!(err, Error::ShortRead));
    }

    #[tokio::test]
    async fn frame_size_limit_applies_to_reads() {
        let (mut raw, peer) = tokio::io::duplex(256);
        let mut framer = Framer::with_max_frame_size(peer, 4);

        raw.write_all(&[0x81, 0x05, 0x48, 0x65, 0x6C, 0x6C, 0x6F])
            .await
            .expect("write");

        let err = framer.read_frame().await.expect_err("must reject");
        assert!(matches!(err, Error::FrameTooLarge));
    }

    #[tokio::test]
    async fn write_frame_buffers_until_flush() {
        use futures::FutureExt;
        use tokio::io::AsyncReadExt;

        let (peer, mut probe) = tokio::io::duplex(256);
        let mut framer = Framer::new(peer);

        framer
            .write_frame(Frame::text("Hello"))
            .await
            .expect("write");

        let mut buf = [0u8; 16];
        // Nothing has been flushed yet, so the peer has nothing to read.
        assert!(probe.read(&mut buf).now_or_never().is_none());

        framer.flush().await.expect("flush");
        let n = probe.read(&mut buf).await.expect("read");
        assert_eq!(&buf[..n], &[0x81, 0x05, 0x48, 0x65, 0x6C, 0x6C, 0x6F]);
    }
}
