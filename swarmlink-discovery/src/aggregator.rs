//! Discovery aggregator (system specification §4.6): fans a lookup out to
//! all enabled backends in parallel with a global deadline, merges by
//! `peerId`, ranks by confidence/recency/source priority. Fan-out pattern
//! mirrors `nyx_daemon::path_builder`'s parallel-candidate-gathering shape,
//! generalized from path segments to discovery backends.

use crate::backend::DiscoveryBackend;
use std::{
    collections::HashMap,
    sync::Arc,
    time::Duration,
};
use swarmlink_core::{ContentDigest, ContentId, PeerIdentity, PeerRecord};
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy)]
pub struct FindPeersOptions {
    pub deadline: Duration,
}

impl Default for FindPeersOptions {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(5),
        }
    }
}

/// Fans `findPeers` out across every registered backend and owns the local
/// `addContentMapping` binding between a [`ContentId`] and its
/// [`ContentDigest`], used to translate results keyed by digest.
pub struct DiscoveryAggregator {
    backends: Vec<Arc<dyn DiscoveryBackend>>,
    content_digests: Mutex<HashMap<ContentId, ContentDigest>>,
}

impl DiscoveryAggregator {
    pub fn new(backends: Vec<Arc<dyn DiscoveryBackend>>) -> Self {
        Self {
            backends,
            content_digests: Mutex::new(HashMap::new()),
        }
    }

    pub async fn start_all(&self) {
        for backend in &self.backends {
            backend.start().await;
        }
    }

    pub async fn stop_all(&self) {
        for backend in &self.backends {
            backend.stop().await;
        }
    }

    pub async fn announce(&self, content: &ContentId, port: u16, ttl: Duration) {
        for backend in &self.backends {
            backend.announce(content, port, ttl).await;
        }
    }

    /// Record the `(contentId, digest)` binding used both to answer
    /// requests as a host and to translate digest-keyed results from
    /// backends that key by digest rather than contentId.
    pub async fn add_content_mapping(&self, content: ContentId, digest: ContentDigest) {
        self.content_digests.lock().await.insert(content, digest);
    }

    /// Fan out `lookup` to every backend with a shared deadline, merge
    /// results by `peerId`, and rank per the specification: higher
    /// confidence first, then more recent `lastSeen`, then source priority.
    pub async fn find_peers(&self, content: &ContentId, options: FindPeersOptions) -> Vec<PeerRecord> {
        let futures = self.backends.iter().map(|backend| {
            let backend = backend.clone();
            let content = content.clone();
            async move { backend.lookup(&content).await }
        });

        let results = match tokio::time::timeout(options.deadline, futures::future::join_all(futures)).await {
            Ok(results) => results,
            Err(_) => Vec::new(),
        };

        let mut merged: HashMap<PeerIdentity, PeerRecord> = HashMap::new();
        for records in results {
            for record in records {
                merged
                    .entry(record.peer_id.clone())
                    .and_modify(|existing| existing.merge(&record))
                    .or_insert(record);
            }
        }

        let mut ranked: Vec<PeerRecord> = merged.into_values().collect();
        ranked.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.last_seen.cmp(&a.last_seen))
                .then_with(|| a.source.cmp(&b.source))
        });
        ranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{dht::DhtBackend, pex::PexBackend};
    use swarmlink_core::PeerSource;

    #[tokio::test]
    async fn merges_and_dedupes_across_backends() {
        let dht = Arc::new(DhtBackend::new(PeerIdentity::new("self"), 9000, vec![]));
        let pex = Arc::new(PexBackend::new());
        let content = ContentId::new("movie.iso");

        dht.announce(&content, 9000, Duration::from_secs(60)).await;
        pex.ingest_gossip(
            &content,
            &PeerIdentity::new("relay"),
            vec![PeerRecord::new(PeerIdentity::new("self"), PeerSource::Pex, 0.9)],
        )
        .await;
        pex.ingest_gossip(
            &content,
            &PeerIdentity::new("relay"),
            vec![PeerRecord::new(PeerIdentity::new("other"), PeerSource::Pex, 0.3)],
        )
        .await;

        let agg = DiscoveryAggregator::new(vec![dht, pex]);
        let found = agg.find_peers(&content, FindPeersOptions::default()).await;

        assert_eq!(found.len(), 2);
        let self_record = found.iter().find(|r| r.peer_id == PeerIdentity::new("self")).unwrap();
        assert_eq!(self_record.source, PeerSource::Dht); // higher priority than Pex survives merge
    }

    #[tokio::test]
    async fn ranks_by_confidence_then_source_priority() {
        let mut high = PeerRecord::new(PeerIdentity::new("a"), PeerSource::Pex, 0.9);
        let low = PeerRecord::new(PeerIdentity::new("b"), PeerSource::Manual, 0.1);
        high.addresses.clear();
        let agg = DiscoveryAggregator::new(vec![]);
        let _ = &agg;

        let mut records = vec![low.clone(), high.clone()];
        records.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap()
                .then_with(|| b.last_seen.cmp(&a.last_seen))
                .then_with(|| a.source.cmp(&b.source))
        });
        assert_eq!(records[0].peer_id, high.peer_id);
    }
}
