//! Length-prefixed frame codec for the browser's native messaging pipe.
//!
//! A frame is a 4-byte little-endian `u32` length followed by that many
//! bytes of UTF-8 JSON. Lengths outside `1..=MAX_FRAME_LEN` are reported
//! as [`Frame::Rejected`] instead of an error so the read loop survives a
//! bad prefix.

use std::io;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Hard ceiling on a single frame body (10 MiB).
pub const MAX_FRAME_LEN: u32 = 10 * 1024 * 1024;

const LEN_PREFIX: usize = 4;

/// One decoded unit from the pipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A complete frame body, prefix stripped.
    Payload(Bytes),
    /// A length prefix of zero or above [`MAX_FRAME_LEN`]. Only the prefix
    /// itself has been consumed.
    Rejected { len: u32 },
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, io::Error> {
        if src.len() < LEN_PREFIX {
            return Ok(None);
        }

        let len = u32::from_le_bytes([src[0], src[1], src[2], src[3]]);
        if len == 0 || len > MAX_FRAME_LEN {
            src.advance(LEN_PREFIX);
            return Ok(Some(Frame::Rejected { len }));
        }

        let total = LEN_PREFIX + len as usize;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(LEN_PREFIX);
        Ok(Some(Frame::Payload(src.split_to(len as usize).freeze())))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, io::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None => {
                // A short prefix or a truncated body both mean the peer went
                // away mid-frame. That is end-of-stream, not a codec error.
                if !src.is_empty() {
                    tracing::debug!(trailing = src.len(), "discarding partial frame at end of stream");
                    src.clear();
                }
                Ok(None)
            }
        }
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, body: Bytes, dst: &mut BytesMut) -> Result<(), io::Error> {
        let len = u32::try_from(body.len())
            .ok()
            .filter(|len| (1..=MAX_FRAME_LEN).contains(len))
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("frame body of {} bytes is outside 1..={MAX_FRAME_LEN}", body.len()),
                )
            })?;

        dst.reserve(LEN_PREFIX + body.len());
        dst.put_u32_le(len);
        dst.extend_from_slice(&body);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn framed(body: &[u8]) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u32_le(body.len() as u32);
        buf.extend_from_slice(body);
        buf
    }

    #[test]
    fn decodes_complete_frame() {
        let mut buf = framed(br#"{"action":"ping"}"#);
        let frame = FrameCodec.decode(&mut buf).unwrap();
        assert_eq!(frame, Some(Frame::Payload(Bytes::from_static(br#"{"action":"ping"}"#))));
        assert!(buf.is_empty());
    }

    #[test]
    fn waits_for_rest_of_body() {
        let full = framed(b"0123456789");
        let mut buf = BytesMut::from(&full[..7]);
        assert_eq!(FrameCodec.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(&full[7..]);
        assert_eq!(
            FrameCodec.decode(&mut buf).unwrap(),
            Some(Frame::Payload(Bytes::from_static(b"0123456789")))
        );
    }

    #[test]
    fn zero_length_is_rejected_and_stream_continues() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(0);
        buf.extend_from_slice(&framed(b"{}"));

        assert_eq!(FrameCodec.decode(&mut buf).unwrap(), Some(Frame::Rejected { len: 0 }));
        assert_eq!(
            FrameCodec.decode(&mut buf).unwrap(),
            Some(Frame::Payload(Bytes::from_static(b"{}")))
        );
    }

    #[test]
    fn oversized_length_is_rejected_without_buffering_body() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(MAX_FRAME_LEN + 1);

        assert_eq!(
            FrameCodec.decode(&mut buf).unwrap(),
            Some(Frame::Rejected { len: MAX_FRAME_LEN + 1 })
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn ceiling_itself_is_accepted_as_a_length() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(MAX_FRAME_LEN);
        // Body not yet available: the codec must wait rather than reject.
        assert_eq!(FrameCodec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn short_prefix_at_eof_is_end_of_stream() {
        let mut buf = BytesMut::from(&[0x05, 0x00][..]);
        assert_eq!(FrameCodec.decode_eof(&mut buf).unwrap(), None);
        assert!(buf.is_empty());
    }

    #[test]
    fn encode_writes_little_endian_prefix() {
        let mut dst = BytesMut::new();
        FrameCodec
            .encode(Bytes::from_static(b"abc"), &mut dst)
            .unwrap();
        assert_eq!(&dst[..], &[3, 0, 0, 0, b'a', b'b', b'c']);
    }

    #[test]
    fn encode_refuses_empty_body() {
        let mut dst = BytesMut::new();
        let err = FrameCodec.encode(Bytes::new(), &mut dst).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert!(dst.is_empty());
    }
}
