use async_trait::async_trait;
use std::io::Cursor;
use swarmlink_core::{ContentDigest, ContentId, PeerIdentity};
use swarmlink_protocol::{client, server::{AlwaysUnchoked, ContentSource, ServerSession}};
use swarmlink_transport::{Channel, TcpFrameChannel};
use tokio::net::TcpListener;

struct InMemorySource {
    bytes: Vec<u8>,
}

#[async_trait]
impl ContentSource for InMemorySource {
    async fn digest(&self, _content_id: &ContentId) -> Option<ContentDigest> {
        Some(ContentDigest::of_slice(&self.bytes))
    }

    async fn read_chunk(&self, _content_id: &ContentId, chunk_index: u32, chunk_size: u32) -> std::io::Result<Option<Vec<u8>>> {
        let start = chunk_index as usize * chunk_size as usize;
        if start >= self.bytes.len() {
            return Ok(None);
        }
        let end = (start + chunk_size as usize).min(self.bytes.len());
        Ok(Some(self.bytes[start..end].to_vec()))
    }
}

#[tokio::test]
async fn downloads_and_verifies_a_small_file_over_tcp() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let payload = b"the quick brown fox jumps over the lazy dog, repeated a few times for good measure".to_vec();
    let expected_digest = ContentDigest::of_slice(&payload);
    let content_id = ContentId::new("fox.txt");

    let server_payload = payload.clone();
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let channel = TcpFrameChannel::new(stream, 1024 * 1024).unwrap();
        let source = InMemorySource { bytes: server_payload };
        let session = ServerSession::new(&channel, PeerIdentity::new("client"), &source, &AlwaysUnchoked).with_chunk_size(16);
        session.run().await.unwrap();
    });

    let client_channel = TcpFrameChannel::connect(addr).await.unwrap();
    let mut sink = Cursor::new(Vec::new());
    let outcome = client::download(
        &client_channel,
        &content_id,
        expected_digest,
        &mut sink,
        &[],
        client::DownloadOptions::default(),
    )
    .await
    .unwrap();

    assert_eq!(outcome.total_bytes, payload.len() as u64);
    assert_eq!(sink.into_inner(), payload);

    // Dropping (not just `close()`-flagging) the client side actually shuts
    // the socket down, which is what lets the server's `run()` loop see EOF
    // and return.
    drop(client_channel);
    server.await.unwrap();
}

#[tokio::test]
async fn digest_mismatch_surfaces_as_metadata_error_before_any_chunk_is_requested() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let payload = b"real content".to_vec();
    let content_id = ContentId::new("real.bin");
    let wrong_digest = ContentDigest::of_slice(b"not the real content");

    let server_payload = payload;
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let channel = TcpFrameChannel::new(stream, 1024 * 1024).unwrap();
        let source = InMemorySource { bytes: server_payload };
        let session = ServerSession::new(&channel, PeerIdentity::new("client"), &source, &AlwaysUnchoked);
        session.run().await.unwrap();
    });

    let client_channel = TcpFrameChannel::connect(addr).await.unwrap();
    let mut sink = Cursor::new(Vec::new());
    let result = client::download(
        &client_channel,
        &content_id,
        wrong_digest,
        &mut sink,
        &[],
        client::DownloadOptions::default(),
    )
    .await;

    assert!(result.is_err());
    drop(client_channel);
    server.await.unwrap();
}
