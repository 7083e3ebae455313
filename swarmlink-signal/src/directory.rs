//! Content directory: the `/content/{contentId}` leg of the coordination
//! store schema (system specification §6), kept separate from
//! [`crate::store::CoordinationStore`] because it is a replace-on-write
//! set rather than a message queue, but backed by the same
//! eventually-consistent store so the coordination-store discovery backend
//! gets the fallback behaviour the specification describes.

use async_trait::async_trait;
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};
use swarmlink_core::{ContentDigest, ContentId, PeerIdentity};
use tokio::sync::Mutex;

use crate::store::{Result, SignalError};

#[derive(Debug, Clone, Default)]
pub struct ContentEntry {
    pub digest: Option<ContentDigest>,
    pub peers: HashSet<PeerIdentity>,
}

#[async_trait]
pub trait ContentDirectory: Send + Sync {
    /// Register `peer` as a source for `content`, optionally recording its digest.
    async fn announce(&self, content: &ContentId, peer: PeerIdentity, digest: Option<ContentDigest>) -> Result<()>;

    /// Current known sources for `content`; empty if unknown.
    async fn peers_for(&self, content: &ContentId) -> Result<ContentEntry>;
}

#[derive(Default, Clone)]
pub struct InMemoryContentDirectory {
    entries: Arc<Mutex<HashMap<ContentId, ContentEntry>>>,
}

impl InMemoryContentDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ContentDirectory for InMemoryContentDirectory {
    async fn announce(&self, content: &ContentId, peer: PeerIdentity, digest: Option<ContentDigest>) -> Result<()> {
        let mut entries = self.entries.lock().await;
        let entry = entries.entry(content.clone()).or_default();
        entry.peers.insert(peer);
        if digest.is_some() {
            entry.digest = digest;
        }
        Ok(())
    }

    async fn peers_for(&self, content: &ContentId) -> Result<ContentEntry> {
        let entries = self.entries.lock().await;
        Ok(entries.get(content).cloned().unwrap_or_default())
    }
}

/// HTTP-backed directory speaking the `/content/{contentId}` route.
#[derive(Clone)]
pub struct HttpContentDirectory {
    base_url: String,
    agent: ureq::Agent,
}

impl HttpContentDirectory {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            agent: ureq::Agent::new(),
        }
    }
}

#[derive(serde::Serialize)]
struct AnnounceBody {
    peer_id: String,
    digest: Option<String>,
}

#[derive(serde::Deserialize, Default)]
struct ContentResponse {
    digest: Option<String>,
    peers: Vec<String>,
}

#[async_trait]
impl ContentDirectory for HttpContentDirectory {
    async fn announce(&self, content: &ContentId, peer: PeerIdentity, digest: Option<ContentDigest>) -> Result<()> {
        let url = format!("{}/content/{}", self.base_url, content.as_str());
        let body = AnnounceBody {
            peer_id: peer.as_str().to_string(),
            digest: digest.map(|d| d.to_string()),
        };
        let payload = serde_json::to_string(&body).map_err(|e| SignalError::Transport(e.to_string()))?;
        let agent = self.agent.clone();
        tokio::task::spawn_blocking(move || agent.post(&url).send_string(&payload))
            .await
            .map_err(|e| SignalError::Transport(e.to_string()))?
            .map_err(|e| SignalError::Transport(e.to_string()))?;
        Ok(())
    }

    async fn peers_for(&self, content: &ContentId) -> Result<ContentEntry> {
        let url = format!("{}/content/{}", self.base_url, content.as_str());
        let agent = self.agent.clone();
        let response = tokio::task::spawn_blocking(move || agent.get(&url).call())
            .await
            .map_err(|e| SignalError::Transport(e.to_string()))?;
        let response = match response {
            Ok(r) => r,
            Err(ureq::Error::Status(404, _)) => return Ok(ContentEntry::default()),
            Err(e) => return Err(SignalError::Transport(e.to_string())),
        };
        let text = response.into_string().map_err(|e| SignalError::Transport(e.to_string()))?;
        let parsed: ContentResponse = serde_json::from_str(&text).map_err(|e| SignalError::Transport(e.to_string()))?;
        Ok(ContentEntry {
            digest: parsed.digest.and_then(|d| d.parse().ok()),
            peers: parsed.peers.into_iter().map(PeerIdentity::from).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn announce_then_lookup_accumulates_peers() {
        let dir = InMemoryContentDirectory::new();
        let content = ContentId::new("movie.iso");
        dir.announce(&content, PeerIdentity::new("peer-a"), None).await.unwrap();
        dir.announce(&content, PeerIdentity::new("peer-b"), None).await.unwrap();

        let entry = dir.peers_for(&content).await.unwrap();
        assert_eq!(entry.peers.len(), 2);
    }

    #[tokio::test]
    async fn unknown_content_returns_empty_entry() {
        let dir = InMemoryContentDirectory::new();
        let entry = dir.peers_for(&ContentId::new("nope")).await.unwrap();
        assert!(entry.peers.is_empty());
        assert!(entry.digest.is_none());
    }
}
