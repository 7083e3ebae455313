//! Length-prefixed framing shared by the TCP channel, grounded on
//! `nyx_stream::frame_codec::FrameCodec` (4-byte big-endian length prefix,
//! encoder/decoder pair, configurable size cap).

use crate::errors::TransportError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024; // 16 MiB (system specification §4.1)

pub struct LengthPrefixedCodec {
    max_len: usize,
}

impl LengthPrefixedCodec {
    pub fn new(max_len: usize) -> Self {
        Self { max_len }
    }
}

impl Default for LengthPrefixedCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}

impl Encoder<Bytes> for LengthPrefixedCodec {
    type Error = TransportError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.len() > self.max_len {
            return Err(TransportError::Oversize(item.len()));
        }
        dst.reserve(4 + item.len());
        dst.put_u32(item.len() as u32);
        dst.extend_from_slice(&item);
        Ok(())
    }
}

impl Decoder for LengthPrefixedCodec {
    type Item = Bytes;
    type Error = TransportError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < 4 {
            return Ok(None);
        }
        let len = (&src[..4]).get_u32() as usize;
        if len > self.max_len {
            return Err(TransportError::Oversize(len));
        }
        if src.len() < 4 + len {
            src.reserve(4 + len - src.len());
            return Ok(None);
        }
        src.advance(4);
        Ok(Some(src.split_to(len).freeze()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let mut codec = LengthPrefixedCodec::default();
        let mut buf = BytesMut::new();
        codec
            .encode(Bytes::from_static(b"hello"), &mut buf)
            .unwrap();
        let got = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&got[..], b"hello");
    }

    #[test]
    fn partial_then_complete() {
        let mut codec = LengthPrefixedCodec::default();
        let mut buf = BytesMut::new();
        codec.encode(Bytes::from_static(b"abc"), &mut buf).unwrap();
        let header = buf.split_to(4);
        let mut acc = BytesMut::new();
        acc.extend_from_slice(&header);
        assert!(codec.decode(&mut acc).unwrap().is_none());
        acc.extend_from_slice(&buf);
        let got = codec.decode(&mut acc).unwrap().unwrap();
        assert_eq!(&got[..], b"abc");
    }

    #[test]
    fn oversize_rejected() {
        let mut codec = LengthPrefixedCodec::new(4);
        let mut buf = BytesMut::new();
        let err = codec.encode(Bytes::from_static(b"abcde"), &mut buf).unwrap_err();
        assert!(matches!(err, TransportError::Oversize(5)));
    }
}
