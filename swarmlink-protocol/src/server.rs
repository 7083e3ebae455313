//! Server side of the chunk transfer protocol (system specification §4.7):
//! answers `MetadataReq`/`ChunkReq` from a caller-supplied content source,
//! applying the choke decision made by the choke controller (C9) on every
//! `ChunkReq`.

use crate::{
    errors::Result,
    frame::{ChunkError, Frame},
    wire::{recv_frame, send_frame},
};
use async_trait::async_trait;
use swarmlink_core::{ContentDigest, ContentId, PeerIdentity};
use swarmlink_transport::Channel;
use tracing::{debug, warn};

/// Default chunk size the server uses when probing a [`ContentSource`] that
/// can't report its size up front (system specification §6's `chunkSize`
/// default).
pub const DEFAULT_CHUNK_SIZE: u32 = 65_536;

/// Callback interface the embedder implements to serve bytes (system
/// specification §4.7: "probe the file-serving callback").
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Digest advertised for `content_id`. Returning `None` means this
    /// source doesn't have the content at all.
    async fn digest(&self, content_id: &ContentId) -> Option<ContentDigest>;

    /// Declared total size, if known up front (system specification §9 open
    /// question: an implementation may extend `MetadataResp` with a
    /// declared total to skip exhaustive probing). `None` falls back to
    /// probing via [`read_chunk`](Self::read_chunk) until it returns `None`.
    async fn size_hint(&self, content_id: &ContentId) -> Option<u64> {
        let _ = content_id;
        None
    }

    /// Read one chunk, or `None` past the end of the content.
    async fn read_chunk(&self, content_id: &ContentId, chunk_index: u32, chunk_size: u32) -> std::io::Result<Option<Vec<u8>>>;
}

/// Read-side of the choke controller's (C9) decision for one peer.
#[async_trait]
pub trait ChokeGate: Send + Sync {
    async fn is_choked(&self, peer: &PeerIdentity) -> bool;
}

/// A gate that never chokes anyone, useful for tests and single-peer
/// embedders that don't run a choke controller.
pub struct AlwaysUnchoked;

#[async_trait]
impl ChokeGate for AlwaysUnchoked {
    async fn is_choked(&self, _peer: &PeerIdentity) -> bool {
        false
    }
}

pub struct ServerSession<'a> {
    channel: &'a dyn Channel,
    peer: PeerIdentity,
    source: &'a dyn ContentSource,
    choke: &'a dyn ChokeGate,
    chunk_size: u32,
}

impl<'a> ServerSession<'a> {
    pub fn new(channel: &'a dyn Channel, peer: PeerIdentity, source: &'a dyn ContentSource, choke: &'a dyn ChokeGate) -> Self {
        Self { channel, peer, source, choke, chunk_size: DEFAULT_CHUNK_SIZE }
    }

    pub fn with_chunk_size(mut self, chunk_size: u32) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Serve requests on `channel` until it closes or a fatal protocol
    /// error occurs.
    pub async fn run(&self) -> Result<()> {
        loop {
            let frame = match recv_frame(self.channel).await {
                Ok(frame) => frame,
                Err(_closed) => return Ok(()),
            };

            match frame {
                Frame::MetadataReq { content_id } => self.handle_metadata_req(&content_id).await?,
                Frame::ChunkReq { content_id, chunk_index } => self.handle_chunk_req(&content_id, chunk_index).await?,
                Frame::Cancel { chunk_index, .. } => {
                    // This session answers one request at a time, so there is
                    // nothing in flight to actually cancel; logged for
                    // observability only.
                    debug!(peer = %self.peer, chunk_index, "peer cancelled a chunk request");
                }
                other => {
                    warn!(peer = %self.peer, ?other, "unexpected client-to-server frame");
                }
            }
        }
    }

    async fn handle_metadata_req(&self, content_id: &ContentId) -> Result<()> {
        let Some(digest) = self.source.digest(content_id).await else {
            send_frame(
                self.channel,
                &Frame::MetadataResp {
                    digest: ContentDigest::from_bytes([0; 32]),
                    total_bytes: 0,
                    chunk_size: self.chunk_size,
                    total_chunks: 0,
                    err: Some("content not found".into()),
                },
            )
            .await?;
            return Ok(());
        };

        let total_bytes = match self.source.size_hint(content_id).await {
            Some(size) => size,
            None => self.probe_size(content_id).await?,
        };
        let total_chunks = total_bytes.div_ceil(self.chunk_size as u64) as u32;

        send_frame(
            self.channel,
            &Frame::MetadataResp { digest, total_bytes, chunk_size: self.chunk_size, total_chunks, err: None },
        )
        .await
    }

    async fn probe_size(&self, content_id: &ContentId) -> Result<u64> {
        let mut total = 0u64;
        let mut index = 0u32;
        loop {
            match self.source.read_chunk(content_id, index, self.chunk_size).await? {
                Some(data) if data.len() == self.chunk_size as usize => {
                    total += data.len() as u64;
                    index += 1;
                }
                Some(data) => {
                    total += data.len() as u64;
                    break;
                }
                None => break,
            }
        }
        Ok(total)
    }

    async fn handle_chunk_req(&self, content_id: &ContentId, chunk_index: u32) -> Result<()> {
        if self.choke.is_choked(&self.peer).await {
            return send_frame(
                self.channel,
                &Frame::ChunkResp { chunk_index, payload: None, err: Some(ChunkError::Choked) },
            )
            .await;
        }

        match self.source.read_chunk(content_id, chunk_index, self.chunk_size).await? {
            Some(data) => {
                send_frame(self.channel, &Frame::ChunkResp { chunk_index, payload: Some(data), err: None }).await
            }
            None => {
                send_frame(
                    self.channel,
                    &Frame::ChunkResp { chunk_index, payload: None, err: Some(ChunkError::NotFound) },
                )
                .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        collections::HashMap,
        sync::{Arc, Mutex},
    };
    use swarmlink_transport::{Channel, RelayBackend, RelayChannel};

    struct InMemorySource {
        content: HashMap<String, Vec<u8>>,
    }

    #[async_trait]
    impl ContentSource for InMemorySource {
        async fn digest(&self, content_id: &ContentId) -> Option<ContentDigest> {
            self.content.get(content_id.as_str()).map(|bytes| ContentDigest::of_slice(bytes))
        }

        async fn read_chunk(&self, content_id: &ContentId, chunk_index: u32, chunk_size: u32) -> std::io::Result<Option<Vec<u8>>> {
            let Some(bytes) = self.content.get(content_id.as_str()) else { return Ok(None) };
            let start = chunk_index as usize * chunk_size as usize;
            if start >= bytes.len() {
                return Ok(None);
            }
            let end = (start + chunk_size as usize).min(bytes.len());
            Ok(Some(bytes[start..end].to_vec()))
        }
    }

    struct LoopbackRelay {
        queues: Mutex<HashMap<(String, String), std::collections::VecDeque<bytes::Bytes>>>,
    }

    impl LoopbackRelay {
        fn new() -> Self {
            Self { queues: Mutex::new(HashMap::new()) }
        }
    }

    #[async_trait]
    impl RelayBackend for LoopbackRelay {
        async fn relay_send(&self, from: &str, to: &str, frame: bytes::Bytes) -> swarmlink_transport::Result<()> {
            self.queues.lock().unwrap().entry((from.to_string(), to.to_string())).or_default().push_back(frame);
            Ok(())
        }

        async fn relay_recv(&self, from: &str, to: &str) -> swarmlink_transport::Result<bytes::Bytes> {
            loop {
                if let Some(frame) = self
                    .queues
                    .lock()
                    .unwrap()
                    .get_mut(&(from.to_string(), to.to_string()))
                    .and_then(|q| q.pop_front())
                {
                    return Ok(frame);
                }
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        }
    }

    #[tokio::test]
    async fn serves_metadata_and_chunks_over_a_relay_channel() {
        let backend: Arc<dyn RelayBackend> = Arc::new(LoopbackRelay::new());
        let server_channel = RelayChannel::new(backend.clone(), "server", "client");
        let client_channel = RelayChannel::new(backend, "client", "server");

        let mut content = HashMap::new();
        content.insert("movie.iso".to_string(), b"hello world, this is a test payload".to_vec());
        let source = InMemorySource { content };
        let session = ServerSession::new(&server_channel, PeerIdentity::new("client"), &source, &AlwaysUnchoked)
            .with_chunk_size(8);

        // Drive both sides inline: the relay queues don't block the sender,
        // so the server-side handlers can run synchronously against the
        // frames the client side has already queued.
        send_frame(&client_channel, &Frame::MetadataReq { content_id: ContentId::new("movie.iso") }).await.unwrap();
        session.handle_metadata_req(&ContentId::new("movie.iso")).await.unwrap();
        let resp = recv_frame(&client_channel).await.unwrap();
        let Frame::MetadataResp { total_chunks, chunk_size, err: None, .. } = resp else { panic!("unexpected {resp:?}") };
        assert_eq!(chunk_size, 8);
        assert_eq!(total_chunks, 5); // 36 bytes / 8-byte chunks, rounded up

        send_frame(&client_channel, &Frame::ChunkReq { content_id: ContentId::new("movie.iso"), chunk_index: 0 }).await.unwrap();
        session.handle_chunk_req(&ContentId::new("movie.iso"), 0).await.unwrap();
        let resp = recv_frame(&client_channel).await.unwrap();
        let Frame::ChunkResp { payload: Some(data), err: None, .. } = resp else { panic!("unexpected {resp:?}") };
        assert_eq!(&data, b"hello wo");
    }

    #[tokio::test]
    async fn choked_peer_gets_choked_error_instead_of_a_chunk() {
        struct AlwaysChoked;
        #[async_trait]
        impl ChokeGate for AlwaysChoked {
            async fn is_choked(&self, _peer: &PeerIdentity) -> bool {
                true
            }
        }

        let backend: Arc<dyn RelayBackend> = Arc::new(LoopbackRelay::new());
        let server_channel = RelayChannel::new(backend.clone(), "server", "client");
        let client_channel = RelayChannel::new(backend, "client", "server");

        let mut content = HashMap::new();
        content.insert("movie.iso".to_string(), b"data".to_vec());
        let source = InMemorySource { content };
        let session = ServerSession::new(&server_channel, PeerIdentity::new("client"), &source, &AlwaysChoked);

        send_frame(&client_channel, &Frame::ChunkReq { content_id: ContentId::new("movie.iso"), chunk_index: 0 }).await.unwrap();
        session.handle_chunk_req(&ContentId::new("movie.iso"), 0).await.unwrap();
        let resp = recv_frame(&client_channel).await.unwrap();
        assert!(matches!(resp, Frame::ChunkResp { err: Some(ChunkError::Choked), .. }));
    }
}
