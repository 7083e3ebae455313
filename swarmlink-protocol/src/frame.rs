//! Wire frames for the chunk transfer protocol (system specification §4.7):
//! a tagged-union `Frame` carried as the payload of any
//! `swarmlink_transport::Channel` frame. CBOR encode/decode follows the
//! teacher's `nyx_stream::plugin_frame::PluginFrame` pattern — `serde` +
//! `ciborium`, with a bounded decode to cap pathological allocations.

use serde::{Deserialize, Serialize};
use swarmlink_core::{ContentDigest, ContentId};
use thiserror::Error;

/// First byte of every encoded frame. Bumped on incompatible wire changes;
/// a receiver that sees a different version rejects the frame outright
/// rather than guessing at its shape.
pub const PROTOCOL_VERSION: u8 = 1;

/// Conservative cap on a single frame's CBOR body, independent of whatever
/// limit the underlying channel enforces on its own length prefix.
pub const MAX_FRAME_CBOR_LEN: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame cbor too large: {0} bytes")]
    Oversize(usize),
    #[error("empty frame")]
    Empty,
    #[error("unsupported protocol version: {0}")]
    VersionMismatch(u8),
    #[error("cbor encode error: {0}")]
    Encode(String),
    #[error("cbor decode error: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChunkError {
    NotFound,
    Choked,
}

/// Reason carried on a terminal chunk response (system specification §4.7's
/// `ChunkResp`: `chunkIndex, payload | err`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum Frame {
    MetadataReq {
        content_id: ContentId,
    },
    MetadataResp {
        digest: ContentDigest,
        total_bytes: u64,
        chunk_size: u32,
        total_chunks: u32,
        err: Option<String>,
    },
    ChunkReq {
        content_id: ContentId,
        chunk_index: u32,
    },
    ChunkResp {
        chunk_index: u32,
        #[serde(with = "serde_bytes")]
        payload: Option<Vec<u8>>,
        err: Option<ChunkError>,
    },
    Cancel {
        content_id: ContentId,
        chunk_index: u32,
    },
    Choke,
    Unchoke,
    Have {
        bitmap_delta: Vec<u32>,
    },
}

impl Frame {
    pub fn to_cbor(&self) -> Result<Vec<u8>, FrameError> {
        let mut out = Vec::with_capacity(128);
        out.push(PROTOCOL_VERSION);
        ciborium::ser::into_writer(self, &mut out).map_err(|e| FrameError::Encode(e.to_string()))?;
        if out.len() > MAX_FRAME_CBOR_LEN {
            return Err(FrameError::Oversize(out.len()));
        }
        Ok(out)
    }

    pub fn from_cbor(bytes: &[u8]) -> Result<Self, FrameError> {
        Self::from_cbor_bounded(bytes, MAX_FRAME_CBOR_LEN)
    }

    /// Decode with an upper bound on input length to avoid oversized
    /// allocations from a malicious or corrupted peer.
    pub fn from_cbor_bounded(bytes: &[u8], max_len: usize) -> Result<Self, FrameError> {
        if bytes.is_empty() {
            return Err(FrameError::Empty);
        }
        if bytes.len() > max_len {
            return Err(FrameError::Oversize(bytes.len()));
        }
        let version = bytes[0];
        if version != PROTOCOL_VERSION {
            return Err(FrameError::VersionMismatch(version));
        }
        ciborium::de::from_reader(&bytes[1..]).map_err(|e| FrameError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_req_round_trips() {
        let frame = Frame::MetadataReq {
            content_id: ContentId::new("movie.iso"),
        };
        let bytes = frame.to_cbor().unwrap();
        assert_eq!(bytes[0], PROTOCOL_VERSION);
        let decoded = Frame::from_cbor(&bytes).unwrap();
        assert_eq!(frame, decoded);
    }

    #[test]
    fn chunk_resp_with_payload_round_trips() {
        let frame = Frame::ChunkResp {
            chunk_index: 7,
            payload: Some(vec![1, 2, 3, 4]),
            err: None,
        };
        let bytes = frame.to_cbor().unwrap();
        let decoded = Frame::from_cbor(&bytes).unwrap();
        assert_eq!(frame, decoded);
    }

    #[test]
    fn rejects_wrong_version() {
        let frame = Frame::Choke;
        let mut bytes = frame.to_cbor().unwrap();
        bytes[0] = PROTOCOL_VERSION + 1;
        assert!(matches!(Frame::from_cbor(&bytes), Err(FrameError::VersionMismatch(_))));
    }

    #[test]
    fn rejects_empty_input() {
        assert!(matches!(Frame::from_cbor(&[]), Err(FrameError::Empty)));
    }

    #[test]
    fn rejects_oversize_input() {
        let frame = Frame::Choke;
        let bytes = frame.to_cbor().unwrap();
        assert!(matches!(
            Frame::from_cbor_bounded(&bytes, 1),
            Err(FrameError::Oversize(_))
        ));
    }

    use proptest::prelude::*;
    proptest! {
        #[test]
        fn prop_chunk_resp_round_trips_random_payload(chunk_index in 0u32..10_000, data in proptest::collection::vec(any::<u8>(), 0..4096)) {
            let frame = Frame::ChunkResp { chunk_index, payload: Some(data.clone()), err: None };
            let bytes = frame.to_cbor()?;
            let decoded = Frame::from_cbor(&bytes)?;
            prop_assert_eq!(decoded, frame);
        }
    }
}
