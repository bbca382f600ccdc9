//! Frame-level encoder and decoder, pluggable into
//! [`tokio_util::codec::Framed`].
//!
//! The decoder is an explicit state machine over the read buffer: it first
//! parses the two fixed header bytes, then the extended length and masking
//! key, then waits for the full payload. Each stage returns to the caller
//! when the buffer does not yet hold enough bytes, so partial input from a
//! slow peer never blocks or errors.

use bytes::{Buf, BytesMut};
use tokio_util::codec;

use crate::frame::{Frame, OpCode, MAX_HEAD_SIZE};
use crate::Error;

/// Payload size limit applied by a default-configured codec, 16 MiB.
const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Reading state of the decoder.
enum ReadState {
    /// The fixed header bytes are parsed, the extended length and masking
    /// key are not yet complete.
    Header(Header),
    /// The full header is parsed, the payload is not yet complete.
    Payload(HeaderAndMask),
}

/// Fields recovered from the two fixed header bytes.
struct Header {
    fin: bool,
    opcode: OpCode,
    masked: bool,
    /// Raw 7-bit length field; 126 and 127 select an extended length.
    length_code: u8,
    /// Size of the extended length field in bytes (0, 2, or 8).
    extra: usize,
    /// Remaining header bytes to wait for: extended length plus key.
    header_size: usize,
}

/// Fully parsed header, waiting on the payload.
struct HeaderAndMask {
    header: Header,
    mask: Option<[u8; 4]>,
    payload_len: usize,
}

/// Encoder and decoder for WebSocket frames.
///
/// On decode, masked payloads are unmasked in place in the codec's own
/// buffer and the key is kept on the [`Frame`]; on encode, a frame with a
/// key attached is masked and written together with its header in one
/// buffered write, so the key and payload never interleave with other
/// output on the wire.
pub(crate) struct Codec {
    state: Option<ReadState>,
    max_frame_size: usize,
}

impl Codec {
    /// A codec with the default frame size limit.
    pub(crate) fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// A codec refusing frames whose payload exceeds `limit` bytes.
    pub(crate) fn with_max_frame_size(limit: usize) -> Self {
        Self {
            state: None,
            max_frame_size: limit,
        }
    }
}

impl codec::Decoder for Codec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, Error> {
        loop {
            match self.state.take() {
                None => {
                    if src.remaining() < 2 {
                        return Ok(None);
                    }

                    let fin = src[0] & 0b1000_0000 != 0;
                    // RSV bits select extensions, which are not in play
                    // here; they are read and ignored.
                    let opcode = OpCode::from(src[0] & 0b0000_1111);
                    let masked = src[1] & 0b1000_0000 != 0;
                    let length_code = src[1] & 0x7F;

                    let extra = match length_code {
                        126 => 2,
                        127 => 8,
                        _ => 0,
                    };
                    let header_size = extra + masked as usize * 4;
                    src.advance(2);

                    self.state = Some(ReadState::Header(Header {
                        fin,
                        opcode,
                        masked,
                        length_code,
                        extra,
                        header_size,
                    }));
                }
                Some(ReadState::Header(header)) => {
                    if src.remaining() < header.header_size {
                        self.state = Some(ReadState::Header(header));
                        return Ok(None);
                    }

                    let payload_len: usize = match header.extra {
                        0 => usize::from(header.length_code),
                        2 => src.get_u16() as usize,
                        _ => {
                            let length = src.get_u64();
                            // The most significant bit of the 64-bit
                            // length must be zero.
                            if length & (1 << 63) != 0 {
                                return Err(Error::LengthOverflow);
                            }
                            #[cfg(target_pointer_width = "64")]
                            {
                                length as usize
                            }
                            #[cfg(not(target_pointer_width = "64"))]
                            {
                                usize::try_from(length).map_err(|_| Error::FrameTooLarge)?
                            }
                        }
                    };

                    let mask = if header.masked {
                        Some(src.get_u32().to_be_bytes())
                    } else {
                        None
                    };

                    if header.opcode.is_control() {
                        if !header.fin {
                            return Err(Error::ControlFrameFragmented);
                        }
                        if payload_len > 125 {
                            return Err(Error::ControlFrameTooLarge);
                        }
                    }
                    if payload_len > self.max_frame_size {
                        return Err(Error::FrameTooLarge);
                    }

                    self.state = Some(ReadState::Payload(HeaderAndMask {
                        header,
                        mask,
                        payload_len,
                    }));
                }
                Some(ReadState::Payload(pending)) => {
                    if src.remaining() < pending.payload_len {
                        self.state = Some(ReadState::Payload(pending));
                        return Ok(None);
                    }

                    let payload = src.split_to(pending.payload_len);
                    let mut frame = Frame::new(
                        pending.header.fin,
                        pending.header.opcode,
                        pending.mask,
                        payload,
                    );
                    frame.unmask_payload();

                    break Ok(Some(frame));
                }
            }
        }
    }

    /// End-of-stream handling: an empty buffer between frames is the clean
    /// end of the frame sequence, while any partially received frame is a
    /// [`Error::ShortRead`].
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None => {
                if self.state.is_some() || !src.is_empty() {
                    return Err(Error::ShortRead);
                }
                Ok(None)
            }
        }
    }
}

impl codec::Encoder<Frame> for Codec {
    type Error = Error;

    fn encode(&mut self, mut frame: Frame, dst: &mut BytesMut) -> Result<(), Error> {
        if frame.opcode.is_control() {
            if !frame.fin {
                return Err(Error::ControlFrameFragmented);
            }
            if frame.payload.len() > 125 {
                return Err(Error::ControlFrameTooLarge);
            }
        }

        frame.mask_payload();

        let mut head = [0u8; MAX_HEAD_SIZE];
        let size = frame.fmt_head(&mut head);

        dst.reserve(size + frame.payload.len());
        dst.extend_from_slice(&head[..size]);
        dst.extend_from_slice(&frame.payload);

        Ok(())
    }
}
