//! Client side of the chunk transfer protocol (system specification §4.7).
//! Drives one `Channel` against one peer: issues `MetadataReq`, pipelines
//! `ChunkReq`s up to a configurable window, and verifies the completed
//! download against the expected digest before returning.
//!
//! Multi-peer assignment, rarest-first selection, and retry-on-failure live
//! one layer up in the scheduler (C8); this module only speaks the protocol
//! for a single already-connected peer.

use crate::{
    errors::{ProtocolError, Result},
    frame::{ChunkError, Frame},
    wire::{recv_frame, send_frame},
};
use std::{
    collections::{BTreeMap, HashMap},
    time::{Duration, Instant},
};
use swarmlink_core::{ContentDigest, ContentId};
use swarmlink_transport::Channel;
use tokio::io::{AsyncSeek, AsyncSeekExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

/// Maximum simultaneously outstanding `ChunkReq`s on one channel (system
/// specification §4.7, default `N = 5`).
pub const DEFAULT_PIPELINE: usize = 5;

/// Per-chunk response deadline before the client cancels and gives up on
/// this peer for that chunk (system specification §4.7, default 30s).
pub const DEFAULT_CHUNK_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy)]
pub struct DownloadOptions {
    pub pipeline: usize,
    pub chunk_timeout: Duration,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            pipeline: DEFAULT_PIPELINE,
            chunk_timeout: DEFAULT_CHUNK_TIMEOUT,
        }
    }
}

/// Metadata the server reported for a content id, mirroring `MetadataResp`
/// minus the wire-only `err` field (already unwrapped by [`fetch_metadata`]).
#[derive(Debug, Clone, Copy)]
pub struct RemoteMetadata {
    pub digest: ContentDigest,
    pub total_bytes: u64,
    pub chunk_size: u32,
    pub total_chunks: u32,
}

pub async fn fetch_metadata(channel: &dyn Channel, content_id: &ContentId) -> Result<RemoteMetadata> {
    send_frame(channel, &Frame::MetadataReq { content_id: content_id.clone() }).await?;
    match recv_frame(channel).await? {
        Frame::MetadataResp { err: Some(msg), .. } => Err(ProtocolError::Metadata(msg)),
        Frame::MetadataResp { digest, total_bytes, chunk_size, total_chunks, err: None } => {
            Ok(RemoteMetadata { digest, total_bytes, chunk_size, total_chunks })
        }
        _ => Err(ProtocolError::UnexpectedFrame),
    }
}

/// Hashes chunk payloads in index order even when they arrive out of
/// order off the wire. Disk writes happen immediately on arrival; only the
/// rolling digest waits for its turn (system specification §4.7: "the
/// hasher requires ordered input ... buffered only for hashing, not for
/// disk I/O").
pub struct OrderedHasher {
    next_index: u32,
    pending: BTreeMap<u32, Vec<u8>>,
    hasher: sha2::Sha256,
}

impl OrderedHasher {
    pub fn new() -> Self {
        Self {
            next_index: 0,
            pending: BTreeMap::new(),
            hasher: ContentDigest::hasher(),
        }
    }

    pub fn feed(&mut self, index: u32, data: Vec<u8>) {
        self.pending.insert(index, data);
        while let Some(data) = self.pending.remove(&self.next_index) {
            use sha2::Digest;
            self.hasher.update(&data);
            self.next_index += 1;
        }
    }

    pub fn finalize(self) -> ContentDigest {
        ContentDigest::finalize(self.hasher)
    }
}

impl Default for OrderedHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of a completed, integrity-verified download.
#[derive(Debug)]
pub struct DownloadOutcome {
    pub total_bytes: u64,
    pub total_chunks: u32,
}

/// Runs the client algorithm end to end against `channel`, writing
/// verified bytes into `sink` (expected to already be open/truncated by the
/// caller). `already_present` marks chunk indices the caller has determined
/// are present from a prior partial download (resume); those are skipped
/// entirely, including from the digest — callers resuming a download must
/// have persisted (or be willing to recompute) a digest over those bytes
/// separately, since this function only hashes what it actually receives.
pub async fn download<W>(
    channel: &dyn Channel,
    content_id: &ContentId,
    expected_digest: ContentDigest,
    sink: &mut W,
    already_present: &[u32],
    options: DownloadOptions,
) -> Result<DownloadOutcome>
where
    W: AsyncWrite + AsyncSeek + Unpin,
{
    let meta = fetch_metadata(channel, content_id).await?;
    if meta.digest != expected_digest {
        return Err(ProtocolError::Metadata("digest mismatch with expected content".into()));
    }

    let present: std::collections::HashSet<u32> = already_present.iter().copied().collect();
    let mut missing: std::collections::VecDeque<u32> =
        (0..meta.total_chunks).filter(|c| !present.contains(c)).collect();

    // The rolling hasher only covers bytes this call actually receives, so a
    // whole-file integrity check is only meaningful for a from-scratch
    // download. A caller resuming a partial download from a previous run is
    // responsible for having verified those earlier bytes itself (or for
    // re-fetching everything if it can't).
    let mut hasher = if present.is_empty() { Some(OrderedHasher::new()) } else { None };

    let mut outstanding: HashMap<u32, Instant> = HashMap::new();

    while !missing.is_empty() || !outstanding.is_empty() {
        while outstanding.len() < options.pipeline {
            let Some(chunk_index) = missing.pop_front() else { break };
            send_frame(channel, &Frame::ChunkReq { content_id: content_id.clone(), chunk_index }).await?;
            outstanding.insert(chunk_index, Instant::now() + options.chunk_timeout);
        }

        let deadline = outstanding.values().min().copied();
        let recv_fut = recv_frame(channel);
        let frame = match deadline {
            Some(deadline) => match tokio::time::timeout_at(tokio::time::Instant::from(deadline), recv_fut).await {
                Ok(result) => result?,
                Err(_elapsed) => {
                    let (&timed_out_index, _) = outstanding.iter().min_by_key(|(_, d)| **d).expect("outstanding non-empty");
                    warn!(chunk_index = timed_out_index, "chunk deadline exceeded, cancelling");
                    send_frame(channel, &Frame::Cancel { content_id: content_id.clone(), chunk_index: timed_out_index }).await?;
                    return Err(ProtocolError::ChunkTimeout(timed_out_index));
                }
            },
            None => recv_fut.await?,
        };

        match frame {
            Frame::ChunkResp { chunk_index, payload: Some(data), err: None } => {
                outstanding.remove(&chunk_index);
                let start = chunk_index as u64 * meta.chunk_size as u64;
                sink.seek(std::io::SeekFrom::Start(start)).await?;
                sink.write_all(&data).await?;
                if let Some(hasher) = hasher.as_mut() {
                    hasher.feed(chunk_index, data);
                }
            }
            Frame::ChunkResp { chunk_index, err: Some(ChunkError::Choked), .. } => {
                outstanding.remove(&chunk_index);
                debug!(chunk_index, "peer choked us, requeuing");
                missing.push_back(chunk_index);
            }
            Frame::ChunkResp { chunk_index, .. } => {
                outstanding.remove(&chunk_index);
                return Err(ProtocolError::Remote(ChunkError::NotFound));
            }
            Frame::Choke | Frame::Unchoke | Frame::Have { .. } => continue,
            _ => return Err(ProtocolError::UnexpectedFrame),
        }
    }

    if let Some(hasher) = hasher {
        if hasher.finalize() != expected_digest {
            return Err(ProtocolError::Integrity);
        }
    }

    sink.flush().await?;
    Ok(DownloadOutcome { total_bytes: meta.total_bytes, total_chunks: meta.total_chunks })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordered_hasher_buffers_out_of_order_chunks() {
        let mut hasher = OrderedHasher::new();
        hasher.feed(1, b"b".to_vec());
        assert_eq!(hasher.next_index, 0);
        hasher.feed(0, b"a".to_vec());
        assert_eq!(hasher.next_index, 2);
        let digest = hasher.finalize();
        assert_eq!(digest, ContentDigest::of_slice(b"ab"));
    }

    #[test]
    fn ordered_hasher_matches_sequential_feed() {
        let mut in_order = OrderedHasher::new();
        in_order.feed(0, b"hello".to_vec());
        in_order.feed(1, b" world".to_vec());
        let mut out_of_order = OrderedHasher::new();
        out_of_order.feed(1, b" world".to_vec());
        out_of_order.feed(0, b"hello".to_vec());
        assert_eq!(in_order.finalize(), out_of_order.finalize());
    }
}
