//! Coordination-store discovery backend (system specification §4.5):
//! fallback lookup path when the DHT is unreachable, using the same
//! eventually-consistent store as C3 under the `/content/{contentId}`
//! namespace (`swarmlink_signal::ContentDirectory`).

use crate::backend::DiscoveryBackend;
use async_trait::async_trait;
use std::{sync::Arc, time::Duration};
use swarmlink_core::{ContentId, Family, PeerAddress, PeerIdentity, PeerRecord, PeerSource};
use swarmlink_signal::ContentDirectory;
use tracing::warn;

const CONFIDENCE: f64 = 0.4;

pub struct CoordBackend<D: ContentDirectory> {
    directory: Arc<D>,
    self_id: PeerIdentity,
    self_host: String,
}

impl<D: ContentDirectory> CoordBackend<D> {
    pub fn new(directory: Arc<D>, self_id: PeerIdentity, self_host: impl Into<String>) -> Self {
        Self {
            directory,
            self_id,
            self_host: self_host.into(),
        }
    }
}

#[async_trait]
impl<D: ContentDirectory + 'static> DiscoveryBackend for CoordBackend<D> {
    async fn announce(&self, content: &ContentId, port: u16, _ttl: Duration) {
        if let Err(e) = self.directory.announce(content, self.self_id.clone(), None).await {
            warn!("coordination store announce failed: {e}");
        }
        let _ = (port, &self.self_host); // address is published alongside via C3, not this leg
    }

    async fn lookup(&self, content: &ContentId) -> Vec<PeerRecord> {
        let entry = match self.directory.peers_for(content).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!("coordination store lookup failed: {e}");
                return Vec::new();
            }
        };
        entry
            .peers
            .into_iter()
            .filter(|p| *p != self.self_id)
            .map(|peer_id| {
                let mut record = PeerRecord::new(peer_id, PeerSource::Coord, CONFIDENCE);
                // The directory records membership, not reachability; address
                // exchange still rides over the signalling rendezvous (C3).
                record.addresses.insert(PeerAddress {
                    family: Family::V4,
                    host: String::new(),
                    port: 0,
                });
                record
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarmlink_signal::InMemoryContentDirectory;

    #[tokio::test]
    async fn announce_then_lookup_excludes_self() {
        let dir = Arc::new(InMemoryContentDirectory::new());
        let content = ContentId::new("movie.iso");

        let a = CoordBackend::new(dir.clone(), PeerIdentity::new("a"), "10.0.0.1");
        let b = CoordBackend::new(dir.clone(), PeerIdentity::new("b"), "10.0.0.2");

        a.announce(&content, 9000, Duration::from_secs(60)).await;
        b.announce(&content, 9001, Duration::from_secs(60)).await;

        let found_by_a = a.lookup(&content).await;
        assert_eq!(found_by_a.len(), 1);
        assert_eq!(found_by_a[0].peer_id, PeerIdentity::new("b"));
    }
}
