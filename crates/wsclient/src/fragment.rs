//! # fragment
//!
//! Reassembly of fragmented data messages
//! ([RFC 6455 Section 5.4](https://datatracker.ietf.org/doc/html/rfc6455#section-5.4)).
//!
//! A message is either a single final `Text`/`Binary` frame or a run that
//! starts with a non-final `Text`/`Binary` frame, continues with zero or more
//! non-final `Continuation` frames and ends with a final `Continuation`. The
//! message type is taken from the first frame of the run. Control frames may
//! be interleaved with a run and are not handled here.

use std::collections::VecDeque;

use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    Message, Result, WebSocketError,
    frame::{Frame, OpCode},
};

/// Fragments collected so far for the message in progress.
#[derive(Debug)]
struct Pending {
    opcode: OpCode,
    bytes_read: usize,
    parts: VecDeque<Bytes>,
}

/// Turns a stream of data frames into complete messages.
#[derive(Debug)]
pub struct Reassembler {
    pending: Option<Pending>,
    max_message_size: usize,
}

impl Reassembler {
    /// `max_message_size` bounds the total payload of a fragmented run.
    pub fn new(max_message_size: usize) -> Self {
        Self {
            pending: None,
            max_message_size,
        }
    }

    /// Whether a fragmented message is in progress.
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Feeds one data frame.
    ///
    /// Returns `Ok(Some(message))` when `frame` completes a message and
    /// `Ok(None)` while a run is still open. A run that is rejected is
    /// discarded.
    pub fn push(&mut self, frame: Frame) -> Result<Option<Message>> {
        let (opcode, fin, payload) = frame.into_parts();

        match opcode {
            OpCode::Text | OpCode::Binary => {
                if self.pending.is_some() {
                    self.pending = None;
                    return Err(WebSocketError::InvalidFragment);
                }

                if fin {
                    // unfragmented: hand the payload over without copying
                    return to_message(opcode, payload).map(Some);
                }

                self.check_size(payload.len())?;
                self.pending = Some(Pending {
                    opcode,
                    bytes_read: payload.len(),
                    parts: VecDeque::from([payload]),
                });
                Ok(None)
            }
            OpCode::Continuation => {
                let mut pending = self
                    .pending
                    .take()
                    .ok_or(WebSocketError::InvalidContinuationFrame)?;

                pending.bytes_read += payload.len();
                self.check_size(pending.bytes_read)?;
                pending.parts.push_back(payload);

                if !fin {
                    self.pending = Some(pending);
                    return Ok(None);
                }

                let assembled = pending
                    .parts
                    .into_iter()
                    .fold(BytesMut::with_capacity(pending.bytes_read), |mut acc, b| {
                        acc.put(b);
                        acc
                    })
                    .freeze();

                to_message(pending.opcode, assembled).map(Some)
            }
            // control frames never reach the reassembler
            other => Err(WebSocketError::InvalidOpCode(u8::from(other))),
        }
    }

    fn check_size(&self, size: usize) -> Result<()> {
        if size > self.max_message_size {
            return Err(WebSocketError::FrameTooLarge);
        }
        Ok(())
    }
}

fn to_message(opcode: OpCode, payload: Bytes) -> Result<Message> {
    match opcode {
        OpCode::Text => String::from_utf8(Vec::from(payload))
            .map(Message::Text)
            .map_err(|_| WebSocketError::InvalidUTF8),
        _ => Ok(Message::Binary(payload)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reassembler() -> Reassembler {
        Reassembler::new(1024)
    }

    #[test]
    fn test_single_frame_passes_through() {
        let mut r = reassembler();
        let msg = r.push(Frame::text("Hello")).unwrap();
        assert_eq!(msg, Some(Message::Text("Hello".into())));
        assert!(!r.is_pending());

        let payload = Bytes::from_static(b"\x01\x02");
        let msg = r.push(Frame::binary(payload.clone())).unwrap();
        assert_eq!(msg, Some(Message::Binary(payload)));
    }

    #[test]
    fn test_three_fragments() {
        let mut r = reassembler();
        assert_eq!(r.push(Frame::text("He").with_fin(false)).unwrap(), None);
        assert!(r.is_pending());
        assert_eq!(r.push(Frame::continuation("ll").with_fin(false)).unwrap(), None);
        let msg = r.push(Frame::continuation("o")).unwrap();
        assert_eq!(msg, Some(Message::Text("Hello".into())));
        assert!(!r.is_pending());
    }

    #[test]
    fn test_type_comes_from_first_frame() {
        let mut r = reassembler();
        r.push(Frame::binary(vec![0xFF]).with_fin(false)).unwrap();
        let msg = r.push(Frame::continuation(vec![0xFE])).unwrap().unwrap();
        assert_eq!(msg, Message::Binary(Bytes::from_static(&[0xFF, 0xFE])));
    }

    #[test]
    fn test_utf8_split_across_fragments() {
        let bytes = "é".as_bytes();
        let mut r = reassembler();
        r.push(Frame::text(bytes[..1].to_vec()).with_fin(false)).unwrap();
        let msg = r.push(Frame::continuation(bytes[1..].to_vec())).unwrap();
        assert_eq!(msg, Some(Message::Text("é".into())));
    }

    #[test]
    fn test_invalid_utf8() {
        let mut r = reassembler();
        assert!(matches!(
            r.push(Frame::text(vec![0xFF, 0xFE])),
            Err(WebSocketError::InvalidUTF8)
        ));
    }

    #[test]
    fn test_continuation_without_start() {
        let mut r = reassembler();
        assert!(matches!(
            r.push(Frame::continuation("x")),
            Err(WebSocketError::InvalidContinuationFrame)
        ));
    }

    #[test]
    fn test_new_message_during_run() {
        let mut r = reassembler();
        r.push(Frame::text("a").with_fin(false)).unwrap();
        assert!(matches!(
            r.push(Frame::text("b")),
            Err(WebSocketError::InvalidFragment)
        ));
        assert!(!r.is_pending());
    }

    #[test]
    fn test_size_limit() {
        let mut r = Reassembler::new(4);
        r.push(Frame::binary(vec![0u8; 3]).with_fin(false)).unwrap();
        assert!(matches!(
            r.push(Frame::continuation(vec![0u8; 2])),
            Err(WebSocketError::FrameTooLarge)
        ));
        assert!(!r.is_pending());
    }
}
