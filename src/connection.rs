//! Message-level connection state machine.
//!
//! A [`Connection`] owns a [`Framer`] and raises frames to messages: data
//! frames are buffered until a FIN flag completes the message, pings are
//! answered on the spot, pongs are ignored, and a close frame (sent or
//! received) moves the connection to its terminal closed state. The
//! fragment buffer always holds a text or binary frame followed by
//! continuations, of which only the last may carry FIN.

use bytes::{Bytes, BytesMut};

use crate::close::CloseCode;
use crate::frame::{Frame, OpCode};
use crate::framer::Framer;
use crate::{Error, Result};
use tokio::io::{AsyncRead, AsyncWrite};

/// A complete WebSocket message, assembled from one or more frames.
///
/// Text payloads are kept as bytes: RFC 6455 requires them to be UTF-8,
/// but by default this layer leaves validation to the caller (see
/// [`Connection::strict_utf8`]), so [`Message::as_text`] can return `None`
/// on a misbehaving peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// A message sent with the text opcode.
    Text(Bytes),
    /// A message sent with the binary opcode.
    Binary(Bytes),
}

impl Message {
    /// A text message.
    pub fn text(payload: impl Into<Bytes>) -> Self {
        Self::Text(payload.into())
    }

    /// A binary message.
    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self::Binary(payload.into())
    }

    /// Whether this message was sent with the text opcode.
    pub fn is_text(&self) -> bool {
        matches!(self, Self::Text(_))
    }

    /// The message payload, whatever its kind.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(data) | Self::Binary(data) => data,
        }
    }

    /// Consumes the message, returning its payload.
    pub fn into_bytes(self) -> Bytes {
        match self {
            Self::Text(data) | Self::Binary(data) => data,
        }
    }

    /// The payload as a string slice, when this is a text message holding
    /// valid UTF-8.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(data) => std::str::from_utf8(data).ok(),
            Self::Binary(_) => None,
        }
    }
}

/// A stateful WebSocket connection over a byte stream.
///
/// The connection is single-owner: one task drives both reading and
/// writing, and the only suspension points are the underlying stream
/// operations. Clients construct it with a masking key
/// ([`Connection::with_random_mask`] for a fresh one); servers use
/// [`Connection::new`] and send unmasked, as the RFC requires.
///
/// Once closed, locally or by the peer, the connection stays closed:
/// sends fail with [`Error::ConnectionClosed`], and [`Connection::read`]
/// returns `None`. Only [`Connection::close`] remains safe to call again.
pub struct Connection<S> {
    framer: Framer<S>,
    /// Masking key stamped on every outgoing frame, if any. Immutable
    /// after construction.
    mask: Option<[u8; 4]>,
    strict_utf8: bool,
    closed: bool,
    /// Fragments of the message currently being assembled.
    fragments: Vec<Frame>,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// A connection that sends unmasked frames, as a server does.
    pub fn new(framer: Framer<S>) -> Self {
        Self {
            framer,
            mask: None,
            strict_utf8: false,
            closed: false,
            fragments: Vec::new(),
        }
    }

    /// A connection masking outgoing frames with the given key.
    pub fn with_mask(framer: Framer<S>, key: [u8; 4]) -> Self {
        let mut conn = Self::new(framer);
        conn.mask = Some(key);
        conn
    }

    /// A connection masking outgoing frames with a key drawn from the
    /// thread-local cryptographic RNG, as a client does. The key is
    /// generated once and used for the life of the connection.
    pub fn with_random_mask(framer: Framer<S>) -> Self {
        Self::with_mask(framer, rand::random())
    }

    /// Enables or disables UTF-8 validation of incoming text messages.
    ///
    /// Off by default. When enabled, a text message that is not valid
    /// UTF-8 fails the connection with close code 1007.
    pub fn strict_utf8(mut self, strict: bool) -> Self {
        self.strict_utf8 = strict;
        self
    }

    /// Whether the connection has been closed, by either side.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// The outgoing masking key, if any.
    pub fn mask(&self) -> Option<[u8; 4]> {
        self.mask
    }

    /// Reads the next complete message.
    ///
    /// Flushes any buffered outgoing frames first, then reads frames until
    /// one carries the FIN flag, answering pings and ignoring pongs along
    /// the way. The fragments' payloads are concatenated in arrival order.
    ///
    /// Returns `Ok(None)` on a clean end of stream or once the connection
    /// is closed. A peer close with a non-normal status code surfaces as
    /// [`Error::Closed`].
    pub async fn read(&mut self) -> Result<Option<Message>> {
        if self.closed {
            return Ok(None);
        }
        if let Err(err) = self.framer.flush().await {
            return Err(self.fail(err).await);
        }

        loop {
            if self.read_frame().await?.is_none() {
                return Ok(None);
            }
            if self.closed {
                return Ok(None);
            }
            if !self.fragments.last().is_some_and(|frame| frame.fin) {
                continue;
            }

            let fragments = std::mem::take(&mut self.fragments);
            let is_text = fragments[0].opcode == OpCode::Text;
            let mut payload =
                BytesMut::with_capacity(fragments.iter().map(|frame| frame.payload.len()).sum());
            for frame in &fragments {
                payload.extend_from_slice(&frame.payload);
            }
            let payload = payload.freeze();

            if is_text && self.strict_utf8 && std::str::from_utf8(&payload).is_err() {
                return Err(self.fail(Error::InvalidUtf8).await);
            }

            return Ok(Some(if is_text {
                Message::Text(payload)
            } else {
                Message::Binary(payload)
            }));
        }
    }

    /// Reads a single frame, applies it to the connection state, and
    /// returns it. This is the frame-level escape hatch under
    /// [`Connection::read`].
    ///
    /// Returns `Ok(None)` on a clean end of stream. On a protocol error
    /// the connection sends a close frame carrying the error's code before
    /// surfacing it; on an I/O error a close frame with code 1002 is
    /// attempted and its failure ignored.
    pub async fn read_frame(&mut self) -> Result<Option<Frame>> {
        match self.framer.read_frame().await {
            Ok(Some(frame)) => {
                if let Err(err) = self.handle(&frame).await {
                    return Err(self.fail(err).await);
                }
                Ok(Some(frame))
            }
            Ok(None) => Ok(None),
            Err(err) => Err(self.fail(err).await),
        }
    }

    /// Sends a message, choosing the text or binary opcode from its kind.
    pub async fn write(&mut self, message: Message) -> Result<()> {
        let frame = match message {
            Message::Text(data) => Frame::text(&data[..]),
            Message::Binary(data) => Frame::binary(&data[..]),
        };
        self.send_frame(frame).await
    }

    /// Sends a single-frame text message.
    pub async fn send_text(&mut self, payload: impl Into<BytesMut>) -> Result<()> {
        self.send_frame(Frame::text(payload)).await
    }

    /// Sends a single-frame binary message.
    pub async fn send_binary(&mut self, payload: impl Into<BytesMut>) -> Result<()> {
        self.send_frame(Frame::binary(payload)).await
    }

    /// Sends a ping carrying up to 125 payload bytes.
    pub async fn send_ping(&mut self, payload: impl Into<BytesMut>) -> Result<()> {
        self.send_frame(Frame::ping(payload)).await
    }

    /// Sends a close frame and marks the connection closed.
    ///
    /// The state moves to closed even when the write fails, so this is
    /// safe to call from error paths; callers that only want to shut down
    /// cleanly should prefer [`Connection::close`].
    pub async fn send_close(&mut self, code: CloseCode, reason: Option<&str>) -> Result<()> {
        if self.closed {
            return Err(Error::ConnectionClosed);
        }

        let mut frame = Frame::close(code, reason.unwrap_or(""));
        frame.set_mask(self.mask);
        let result = match self.framer.write_frame(frame).await {
            Ok(()) => self.framer.flush().await,
            Err(err) => Err(err),
        };
        self.closed = true;
        log::debug!("sent close frame with code {code}");
        result
    }

    /// Closes the connection: sends a close frame if one has not been sent
    /// yet, then shuts down the stream. Safe to call more than once.
    pub async fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.send_close(CloseCode::Normal, None).await?;
        }
        self.framer.close().await
    }

    /// Writes a frame as given, without stamping the connection's mask.
    /// This is the frame-level escape hatch under the `send_*` methods.
    pub async fn write_frame(&mut self, frame: Frame) -> Result<()> {
        if self.closed {
            return Err(Error::ConnectionClosed);
        }
        self.framer.write_frame(frame).await?;
        self.framer.flush().await
    }

    /// Stamps the outgoing mask on a frame, writes and flushes it.
    async fn send_frame(&mut self, mut frame: Frame) -> Result<()> {
        if self.closed {
            return Err(Error::ConnectionClosed);
        }
        frame.set_mask(self.mask);
        self.framer.write_frame(frame).await?;
        self.framer.flush().await
    }

    /// Applies a received frame to the connection state. This is the
    /// single dispatch point for all incoming frames.
    async fn handle(&mut self, frame: &Frame) -> Result<()> {
        match frame.opcode {
            OpCode::Text | OpCode::Binary => {
                if !self.fragments.is_empty() {
                    return Err(Error::UnexpectedDataFrame);
                }
                self.fragments.push(frame.clone());
            }
            OpCode::Continuation => {
                if self.fragments.is_empty() {
                    return Err(Error::UnexpectedContinuation);
                }
                self.fragments.push(frame.clone());
            }
            OpCode::Ping => {
                if self.closed {
                    return Err(Error::ConnectionClosed);
                }
                self.send_frame(frame.reply()).await?;
            }
            OpCode::Pong => {}
            OpCode::Close => {
                if frame.payload.len() == 1 {
                    return Err(Error::InvalidCloseFrame);
                }
                self.closed = true;
                log::debug!("peer sent close frame");
                if let Some(code) = frame.close_code() {
                    if code != CloseCode::Normal {
                        let reason = frame.close_reason().unwrap_or("").to_owned();
                        return Err(Error::Closed { code, reason });
                    }
                }
            }
            OpCode::Reserved(opcode) => {
                log::warn!("ignoring frame with reserved opcode {opcode:#x}");
            }
        }
        Ok(())
    }

    /// Read-path failure: report the error to the peer with a close frame
    /// when still possible, move to closed, and hand the error back.
    async fn fail(&mut self, err: Error) -> Error {
        if !self.closed && !matches!(err, Error::Closed { .. }) {
            let reason = err.to_string();
            // Best effort; the peer may already be gone.
            let _ = self.send_close(err.close_code(), Some(&reason)).await;
        }
        self.closed = true;
        err
    }
}
