//! Low-level WebSocket wire protocol support per [RFC 6455](https://datatracker.ietf.org/doc/html/rfc6455).
//!
//! This crate sits below the HTTP upgrade handshake: it assumes the caller
//! already holds a bidirectional byte stream that has been switched to the
//! WebSocket protocol, and takes care of everything from there down to the
//! wire bits. It is organized in three layers:
//!
//! - [`Frame`] is a single wire record: FIN flag, opcode, optional masking
//!   key and payload.
//! - [`Framer`] turns a byte stream into a sequence of frames and back,
//!   buffering outgoing frames until flushed.
//! - [`Connection`] assembles frames into messages, answers pings, and
//!   enforces the open/closed lifecycle and fragmentation rules.
//!
//! Handshake negotiation, subprotocols, extensions such as
//! permessage-deflate, and TLS are out of scope; pair this crate with an
//! HTTP library for the upgrade and hand the upgraded stream to
//! [`Framer::new`].
//!
//! ```no_run
//! use tokio::io::{AsyncRead, AsyncWrite};
//! use wsframe::{Connection, Framer, Message};
//!
//! # async fn example<S>(stream: S) -> wsframe::Result<()>
//! # where
//! #     S: AsyncRead + AsyncWrite + Unpin,
//! # {
//! // `stream` has already completed the HTTP upgrade.
//! let mut conn = Connection::new(Framer::new(stream));
//! conn.send_text("hello").await?;
//! while let Some(message) = conn.read().await? {
//!     if let Message::Text(data) = message {
//!         println!("got {} bytes of text", data.len());
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod close;
mod codec;
mod connection;
pub mod frame;
mod framer;
mod mask;

pub use close::CloseCode;
pub use connection::{Connection, Message};
pub use frame::{Frame, OpCode};
pub use framer::Framer;

/// A result type for WebSocket operations, using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the codec and the connection state machine.
///
/// Most variants are protocol violations: either the peer sent framing that
/// RFC 6455 forbids, or a local call was made in a state that does not allow
/// it. On the read path the connection reports these to the peer with a
/// close frame carrying [`Error::close_code`] before surfacing the error.
///
/// [`Error::Closed`] is different in kind: the peer closed the connection in
/// an orderly fashion but with a non-normal status code, and the caller of
/// [`Connection::read`] gets to see why.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A text or binary frame arrived while a fragmented message was still
    /// being assembled.
    #[error("received text or binary frame, but expecting continuation")]
    UnexpectedDataFrame,

    /// A continuation frame arrived with no fragmented message in progress.
    #[error("received unexpected continuation frame")]
    UnexpectedContinuation,

    /// A control frame (close, ping, pong) had its FIN bit clear.
    /// RFC 6455 requires that control frames are never fragmented.
    #[error("control frame must not be fragmented")]
    ControlFrameFragmented,

    /// A control frame carried more than the 125 payload bytes RFC 6455
    /// allows.
    #[error("control frame payload exceeds 125 bytes")]
    ControlFrameTooLarge,

    /// The 8-byte extended payload length had its most significant bit set,
    /// which RFC 6455 forbids.
    #[error("frame length exceeds the 63-bit range")]
    LengthOverflow,

    /// A frame's payload exceeded the configured size limit.
    /// See [`Framer::with_max_frame_size`].
    #[error("frame payload exceeds the configured size limit")]
    FrameTooLarge,

    /// A close frame carried a single payload byte. Close payloads must be
    /// empty or start with a full 2-byte status code.
    #[error("close frame payload must be empty or at least two bytes")]
    InvalidCloseFrame,

    /// A text message failed UTF-8 validation in strict mode.
    /// See [`Connection::strict_utf8`].
    #[error("invalid UTF-8 in text message")]
    InvalidUtf8,

    /// The stream ended in the middle of a frame. End of stream is only
    /// clean on a frame boundary.
    #[error("stream ended in the middle of a frame")]
    ShortRead,

    /// A send was attempted on a connection that is already closed, or a
    /// ping arrived after the peer's close frame.
    #[error("connection is closed")]
    ConnectionClosed,

    /// The peer closed the connection with a status code other than
    /// [`CloseCode::Normal`].
    #[error("connection closed by peer: {reason} ({code})")]
    Closed {
        /// Status code carried in the peer's close frame.
        code: CloseCode,
        /// Reason text carried after the status code, possibly empty.
        reason: String,
    },

    /// An I/O error from the underlying stream.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// The close code the connection reports to the peer when this error is
    /// raised on the read path.
    pub fn close_code(&self) -> CloseCode {
        match self {
            Error::FrameTooLarge => CloseCode::Size,
            Error::InvalidUtf8 => CloseCode::Invalid,
            Error::Closed { code, .. } => *code,
            _ => CloseCode::Protocol,
        }
    }
}
