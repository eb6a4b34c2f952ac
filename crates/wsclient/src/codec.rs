//! # codec
//!
//! Byte-level frame encoding and decoding.
//!
//! This is the lowest layer of the client. It turns [`Frame`] values into wire
//! bytes and back, and nothing more: fragment assembly, UTF-8 validation and
//! control-frame replies live in [`fragment`](crate::fragment) and the
//! session.
//!
//! Two surfaces are provided:
//!
//! - [`encode`] and [`decode`] / [`decode_with_limit`]: plain functions over
//!   buffers. Decoding never assumes a whole frame is present and reports
//!   [`Decoded::NeedMoreData`] instead.
//! - [`Encoder`] and [`Decoder`]: `tokio_util::codec` implementations for
//!   use with `FramedRead` / `FramedWrite`. The encoder
//!   always masks, as a client must.
//!
//! ```rust
//! use bytes::BytesMut;
//! use wsclient::codec::{self, Decoded};
//! use wsclient::frame::Frame;
//!
//! let mut buf = BytesMut::new();
//! codec::encode(&Frame::text("Hello"), &mut buf);
//! assert_eq!(&buf[..2], &[0x81, 0x05]);
//!
//! match codec::decode(&buf[..3]).unwrap() {
//!     Decoded::NeedMoreData { needed } => assert_eq!(needed, 4),
//!     Decoded::Frame { .. } => unreachable!(),
//! }
//! ```

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec;

use crate::{
    Result, WebSocketError,
    frame::{Frame, MAX_CONTROL_PAYLOAD, MAX_HEAD_SIZE, OpCode},
    mask,
};

/// Outcome of a decode attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum Decoded {
    /// A complete frame and the number of input bytes it occupied.
    Frame { frame: Frame, consumed: usize },
    /// The input ends before the frame does. `needed` is the number of
    /// additional bytes required to make progress.
    NeedMoreData { needed: usize },
}

/// Parsed frame header.
#[derive(Debug, Clone, Copy)]
struct Head {
    fin: bool,
    opcode: OpCode,
    header_len: usize,
    payload_len: usize,
}

enum Parsed {
    Head(Head),
    NeedMoreData(usize),
}

fn parse_head(src: &[u8], max_payload_size: usize) -> Result<Parsed> {
    if src.len() < 2 {
        return Ok(Parsed::NeedMoreData(2 - src.len()));
    }

    let fin = src[0] & 0b1000_0000 != 0;
    if src[0] & 0b0111_0000 != 0 {
        return Err(WebSocketError::ReservedBitsNotZero);
    }
    let opcode = OpCode::try_from(src[0] & 0b0000_1111)?;

    if src[1] & 0b1000_0000 != 0 {
        return Err(WebSocketError::MaskedFrame);
    }

    let length_code = src[1] & 0x7F;
    let extra = match length_code {
        126 => 2,
        127 => 8,
        _ => 0,
    };
    let header_len = 2 + extra;
    if src.len() < header_len {
        return Ok(Parsed::NeedMoreData(header_len - src.len()));
    }

    let mut ext = &src[2..header_len];
    let payload_len = match extra {
        0 => usize::from(length_code),
        2 => usize::from(ext.get_u16()),
        _ => usize::try_from(ext.get_u64()).map_err(|_| WebSocketError::FrameTooLarge)?,
    };

    if opcode.is_control() {
        if !fin {
            return Err(WebSocketError::ControlFrameFragmented);
        }
        if payload_len > MAX_CONTROL_PAYLOAD {
            return Err(WebSocketError::ControlFrameTooLarge);
        }
    }
    if payload_len > max_payload_size {
        return Err(WebSocketError::FrameTooLarge);
    }

    Ok(Parsed::Head(Head {
        fin,
        opcode,
        header_len,
        payload_len,
    }))
}

impl Head {
    /// Total frame length, or `None` if it does not fit in `usize`.
    fn frame_len(&self) -> Option<usize> {
        self.header_len.checked_add(self.payload_len)
    }
}

/// Decodes one server frame from the start of `src` with no payload limit.
pub fn decode(src: &[u8]) -> Result<Decoded> {
    decode_with_limit(src, usize::MAX)
}

/// Decodes one server frame from the start of `src`.
///
/// Frames larger than `max_payload_size` fail with
/// [`WebSocketError::FrameTooLarge`] as soon as the header is readable.
/// Server frames must not be masked; a set mask bit is rejected with
/// [`WebSocketError::MaskedFrame`].
pub fn decode_with_limit(src: &[u8], max_payload_size: usize) -> Result<Decoded> {
    let head = match parse_head(src, max_payload_size)? {
        Parsed::Head(head) => head,
        Parsed::NeedMoreData(needed) => return Ok(Decoded::NeedMoreData { needed }),
    };

    let frame_len = head.frame_len().ok_or(WebSocketError::FrameTooLarge)?;
    if src.len() < frame_len {
        return Ok(Decoded::NeedMoreData {
            needed: frame_len - src.len(),
        });
    }

    let payload = Bytes::copy_from_slice(&src[head.header_len..frame_len]);
    Ok(Decoded::Frame {
        frame: Frame::new(head.fin, head.opcode, None, payload),
        consumed: frame_len,
    })
}

/// Appends the wire form of `frame` to `dst`.
///
/// The payload is copied into `dst` and, when the frame carries a masking
/// key, masked there. `frame` itself is left untouched.
pub fn encode(frame: &Frame, dst: &mut BytesMut) {
    dst.reserve(MAX_HEAD_SIZE + frame.payload.len());
    frame.write_head(dst);

    let index = dst.len();
    dst.extend_from_slice(&frame.payload);

    if let Some(key) = frame.mask {
        mask::apply_mask(&mut dst[index..], key);
    }
}

/// Frame decoder for `FramedRead`.
#[derive(Debug, Clone)]
pub struct Decoder {
    max_payload_size: usize,
}

impl Decoder {
    pub fn new(max_payload_size: usize) -> Self {
        Self { max_payload_size }
    }
}

impl codec::Decoder for Decoder {
    type Item = Frame;
    type Error = WebSocketError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let head = match parse_head(src, self.max_payload_size)? {
            Parsed::Head(head) => head,
            Parsed::NeedMoreData(_) => return Ok(None),
        };

        let frame_len = head.frame_len().ok_or(WebSocketError::FrameTooLarge)?;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        src.advance(head.header_len);
        let payload = src.split_to(head.payload_len).freeze();
        Ok(Some(Frame::new(head.fin, head.opcode, None, payload)))
    }
}

/// Client frame encoder for `FramedWrite`. Every frame leaves masked; a
/// fresh random key is chosen for frames that carry none.
#[derive(Debug, Clone, Default)]
pub struct Encoder;

impl codec::Encoder<Frame> for Encoder {
    type Error = WebSocketError;

    fn encode(&mut self, mut frame: Frame, dst: &mut BytesMut) -> Result<()> {
        frame.set_random_mask_if_not_set();
        encode(&frame, dst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tokio_util::codec::{Decoder as _, Encoder as _};

    use super::*;
    use crate::close::CloseCode;

    fn expect_frame(decoded: Decoded) -> (Frame, usize) {
        match decoded {
            Decoded::Frame { frame, consumed } => (frame, consumed),
            other => panic!("expected a frame, got {other:?}"),
        }
    }

    #[test]
    fn test_round_trip_length_variants() {
        for len in [0usize, 1, 125, 126, 127, 65535, 65536] {
            let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let frame = Frame::binary(payload.clone());

            let mut buf = BytesMut::new();
            encode(&frame, &mut buf);

            let header_len = match len {
                0..=125 => 2,
                126..=65535 => 4,
                _ => 10,
            };
            assert_eq!(buf.len(), header_len + len, "len={len}");

            let (decoded, consumed) = expect_frame(decode(&buf).unwrap());
            assert_eq!(consumed, buf.len());
            assert!(decoded.is_fin());
            assert_eq!(decoded.opcode(), OpCode::Binary);
            assert_eq!(decoded.payload().as_ref(), &payload[..]);
        }
    }

    #[test]
    fn test_large_length_header() {
        // 2^32 + 1 bytes announced, only the header present
        let mut header = vec![0x82, 127];
        header.extend_from_slice(&(u32::MAX as u64 + 2).to_be_bytes());

        if cfg!(target_pointer_width = "64") {
            match decode(&header).unwrap() {
                Decoded::NeedMoreData { needed } => {
                    assert_eq!(needed as u64, u32::MAX as u64 + 2)
                }
                other => panic!("unexpected {other:?}"),
            }
        }

        assert!(matches!(
            decode_with_limit(&header, 1 << 20),
            Err(WebSocketError::FrameTooLarge)
        ));
    }

    #[test]
    fn test_masked_encode_leaves_frame_untouched() {
        let key = [0x37, 0xfa, 0x21, 0x3d];
        let frame = Frame::text("Hello").with_mask(key);

        let mut buf = BytesMut::new();
        encode(&frame, &mut buf);

        assert_eq!(&buf[..2], &[0x81, 0x85]);
        assert_eq!(&buf[2..6], &key);
        // RFC 6455 section 5.7 sample
        assert_eq!(&buf[6..], &[0x7f, 0x9f, 0x4d, 0x51, 0x58]);
        assert_eq!(frame.payload().as_ref(), b"Hello");
    }

    #[test]
    fn test_masked_server_frame_rejected() {
        let bytes = [0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58];
        assert!(matches!(decode(&bytes), Err(WebSocketError::MaskedFrame)));
    }

    #[test]
    fn test_need_more_data() {
        assert_eq!(decode(&[]).unwrap(), Decoded::NeedMoreData { needed: 2 });
        assert_eq!(decode(&[0x81]).unwrap(), Decoded::NeedMoreData { needed: 1 });
        assert_eq!(
            decode(&[0x82, 126, 0x01]).unwrap(),
            Decoded::NeedMoreData { needed: 1 }
        );
        assert_eq!(
            decode(&[0x81, 0x05, b'H', b'e']).unwrap(),
            Decoded::NeedMoreData { needed: 3 }
        );
    }

    #[test]
    fn test_decode_reports_consumed_with_trailing_bytes() {
        let bytes = [0x81, 0x02, b'H', b'i', 0x89, 0x00];
        let (frame, consumed) = expect_frame(decode(&bytes).unwrap());
        assert_eq!(consumed, 4);
        assert_eq!(frame.payload().as_ref(), b"Hi");

        let (ping, consumed) = expect_frame(decode(&bytes[4..]).unwrap());
        assert_eq!(consumed, 2);
        assert_eq!(ping.opcode(), OpCode::Ping);
    }

    #[test]
    fn test_protocol_violations() {
        assert!(matches!(
            decode(&[0xC1, 0x00]),
            Err(WebSocketError::ReservedBitsNotZero)
        ));
        assert!(matches!(
            decode(&[0x83, 0x00]),
            Err(WebSocketError::InvalidOpCode(0x3))
        ));
        assert!(matches!(
            decode(&[0x09, 0x00]),
            Err(WebSocketError::ControlFrameFragmented)
        ));
        assert!(matches!(
            decode(&[0x89, 126, 0x00, 126]),
            Err(WebSocketError::ControlFrameTooLarge)
        ));
    }

    #[test]
    fn test_limit_enforced() {
        let mut buf = BytesMut::new();
        encode(&Frame::binary(vec![0u8; 200]), &mut buf);
        assert!(matches!(
            decode_with_limit(&buf, 100),
            Err(WebSocketError::FrameTooLarge)
        ));
        assert!(matches!(
            decode_with_limit(&buf, 200),
            Ok(Decoded::Frame { .. })
        ));
    }

    #[test]
    fn test_tokio_decoder_streams_partial_input() {
        let mut wire = BytesMut::new();
        encode(&Frame::text("Hello"), &mut wire);
        encode(&Frame::close(CloseCode::Normal, ""), &mut wire);

        let mut decoder = Decoder::new(1024);
        let mut src = BytesMut::new();

        src.extend_from_slice(&wire[..3]);
        assert!(decoder.decode(&mut src).unwrap().is_none());

        src.extend_from_slice(&wire[3..]);
        let text = decoder.decode(&mut src).unwrap().unwrap();
        assert_eq!(text.payload().as_ref(), b"Hello");

        let close = decoder.decode(&mut src).unwrap().unwrap();
        assert_eq!(close.close_code(), Some(CloseCode::Normal));
        assert!(src.is_empty());
    }

    #[test]
    fn test_client_encoder_always_masks() {
        let mut encoder = Encoder;
        let mut dst = BytesMut::new();
        encoder.encode(Frame::text("abc"), &mut dst).unwrap();

        assert_eq!(dst[1] & 0x80, 0x80);
        assert_eq!(dst.len(), 2 + 4 + 3);

        let key: [u8; 4] = dst[2..6].try_into().unwrap();
        let mut payload = dst[6..].to_vec();
        mask::apply_mask(&mut payload, key);
        assert_eq!(payload, b"abc");
    }
}
