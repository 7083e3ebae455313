//! Peer exchange (system specification §4.5): gossip of recently-seen peers
//! across existing channels, rate-limited to ≤ 1 message/minute/peer and
//! capped at ≤ 50 peers/message. The cache shape mirrors
//! `swarmlink_discovery::dht`'s per-content map; the rate limiter is a plain
//! last-sent timestamp since PEX needs no burst allowance.

use crate::backend::DiscoveryBackend;
use async_trait::async_trait;
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use swarmlink_core::{ContentId, PeerIdentity, PeerRecord};
use tokio::sync::Mutex;

pub const GOSSIP_INTERVAL: Duration = Duration::from_secs(60);
pub const MAX_PEERS_PER_MESSAGE: usize = 50;

#[derive(Default)]
struct State {
    cache: HashMap<ContentId, Vec<PeerRecord>>,
    last_sent: HashMap<PeerIdentity, Instant>,
}

/// Local cache fed by gossip messages received over live channels. Since
/// this crate has no channel wiring of its own, the embedder (scheduler or
/// orchestrator) calls [`PexBackend::ingest_gossip`] whenever a peer sends a
/// gossip frame, and [`PexBackend::outgoing_gossip`] to decide what (if
/// anything) to send back, honoring the rate limit.
pub struct PexBackend {
    state: Arc<Mutex<State>>,
}

impl Default for PexBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl PexBackend {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    /// Record peers learned from `from`'s gossip message for `content`.
    /// Caps the ingested set at [`MAX_PEERS_PER_MESSAGE`] to bound memory
    /// even if a misbehaving peer sends an oversized message.
    pub async fn ingest_gossip(&self, content: &ContentId, _from: &PeerIdentity, peers: Vec<PeerRecord>) {
        let mut state = self.state.lock().await;
        let entry = state.cache.entry(content.clone()).or_default();
        for peer in peers.into_iter().take(MAX_PEERS_PER_MESSAGE) {
            if let Some(existing) = entry.iter_mut().find(|p| p.peer_id == peer.peer_id) {
                existing.merge(&peer);
            } else {
                entry.push(peer);
            }
        }
    }

    /// Returns the peers to gossip to `to` about `content`, or `None` if
    /// the rate limit hasn't elapsed since the last send to that peer.
    pub async fn outgoing_gossip(&self, content: &ContentId, to: &PeerIdentity) -> Option<Vec<PeerRecord>> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        if let Some(last) = state.last_sent.get(to) {
            if now.duration_since(*last) < GOSSIP_INTERVAL {
                return None;
            }
        }
        state.last_sent.insert(to.clone(), now);
        Some(
            state
                .cache
                .get(content)
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .take(MAX_PEERS_PER_MESSAGE)
                .collect(),
        )
    }
}

#[async_trait]
impl DiscoveryBackend for PexBackend {
    async fn announce(&self, content: &ContentId, port: u16, _ttl: Duration) {
        // Self-announcement has no effect on a gossip-only backend; peers
        // learn about us when another backend's result is relayed via gossip.
        let _ = (content, port);
    }

    async fn lookup(&self, content: &ContentId) -> Vec<PeerRecord> {
        let state = self.state.lock().await;
        state.cache.get(content).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarmlink_core::PeerSource;

    fn make_record(id: &str) -> PeerRecord {
        PeerRecord::new(PeerIdentity::new(id), PeerSource::Pex, 0.5)
    }

    #[tokio::test]
    async fn ingest_then_lookup_returns_cached_peers() {
        let pex = PexBackend::new();
        let content = ContentId::new("movie.iso");
        pex.ingest_gossip(&content, &PeerIdentity::new("relay"), vec![make_record("a"), make_record("b")])
            .await;

        let found = pex.lookup(&content).await;
        assert_eq!(found.len(), 2);
    }

    #[tokio::test]
    async fn ingest_caps_at_max_peers_per_message() {
        let pex = PexBackend::new();
        let content = ContentId::new("movie.iso");
        let many: Vec<_> = (0..200).map(|i| make_record(&format!("peer-{i}"))).collect();
        pex.ingest_gossip(&content, &PeerIdentity::new("relay"), many).await;

        let found = pex.lookup(&content).await;
        assert_eq!(found.len(), MAX_PEERS_PER_MESSAGE);
    }

    #[tokio::test]
    async fn outgoing_gossip_is_rate_limited_per_peer() {
        let pex = PexBackend::new();
        let content = ContentId::new("movie.iso");
        pex.ingest_gossip(&content, &PeerIdentity::new("relay"), vec![make_record("a")]).await;

        let to = PeerIdentity::new("downstream");
        assert!(pex.outgoing_gossip(&content, &to).await.is_some());
        assert!(pex.outgoing_gossip(&content, &to).await.is_none());
    }
}
