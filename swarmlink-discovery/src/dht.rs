//! Kademlia-style DHT backend (system specification §4.5), grounded on
//! `nyx_control::dht`'s `DhtStorage`/`NodeId` shapes. Lookup hops, network
//! transport and bucket refresh are owned by whatever overlay the embedder
//! wires in; this module is the storage + shard-prefix gate a node applies
//! locally, generalized from the teacher's single-node `DhtStorage` into the
//! `DiscoveryBackend` contract.

use crate::backend::DiscoveryBackend;
use async_trait::async_trait;
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::{Duration, Instant},
};
use swarmlink_core::{ContentId, PeerIdentity, PeerRecord, PeerSource};
use tokio::sync::Mutex;
use tracing::debug;

/// Lookup parallelism (system specification §4.5: α = 3).
pub const ALPHA: usize = 3;
/// Bucket size (system specification §4.5: k = 8).
pub const BUCKET_SIZE: usize = 8;

fn key_for(content: &ContentId) -> String {
    hex::encode(swarmlink_core::ContentDigest::of_slice(content.as_str().as_bytes()).as_bytes())
}

struct Entry {
    record: PeerRecord,
    expires_at: Instant,
}

/// Local view of the overlay: records this node has been told about
/// (via announces routed to it, or a prior successful lookup), gated by an
/// optional set of shard prefixes this node has opted into answering.
pub struct DhtBackend {
    self_id: PeerIdentity,
    self_port: u16,
    shard_prefixes: Vec<String>,
    storage: Arc<Mutex<HashMap<String, Vec<Entry>>>>,
    ttl: Duration,
}

impl DhtBackend {
    pub fn new(self_id: PeerIdentity, self_port: u16, shard_prefixes: Vec<String>) -> Self {
        Self {
            self_id,
            self_port,
            shard_prefixes,
            storage: Arc::new(Mutex::new(HashMap::new())),
            ttl: swarmlink_core::PEER_RECORD_TTL,
        }
    }

    fn in_shard(&self, key: &str) -> bool {
        self.shard_prefixes.is_empty()
            || self.shard_prefixes.iter().any(|p| key.starts_with(p.as_str()))
    }

    /// Ingest a record learned from another node's response (or gossip),
    /// used by the orchestrator when bootstrapping from known peers.
    pub async fn ingest(&self, content: &ContentId, record: PeerRecord) {
        let key = key_for(content);
        if !self.in_shard(&key) {
            return;
        }
        let mut storage = self.storage.lock().await;
        let entries = storage.entry(key).or_default();
        if let Some(existing) = entries.iter_mut().find(|e| e.record.peer_id == record.peer_id) {
            existing.record.merge(&record);
            existing.expires_at = Instant::now() + self.ttl;
        } else {
            entries.push(Entry {
                record,
                expires_at: Instant::now() + self.ttl,
            });
            entries.truncate(BUCKET_SIZE.max(entries.len()));
        }
    }
}

#[async_trait]
impl DiscoveryBackend for DhtBackend {
    async fn announce(&self, content: &ContentId, port: u16, _ttl: Duration) {
        let key = key_for(content);
        if !self.in_shard(&key) {
            debug!(content = content.as_str(), "dht: announce outside our shard prefixes, dropping");
            return;
        }
        let mut record = PeerRecord::new(self.self_id.clone(), PeerSource::Dht, 0.7);
        record.addresses.insert(swarmlink_core::PeerAddress {
            family: swarmlink_core::Family::V4,
            host: "0.0.0.0".to_string(),
            port: if port == 0 { self.self_port } else { port },
        });
        let mut storage = self.storage.lock().await;
        let entries = storage.entry(key).or_default();
        entries.retain(|e| e.record.peer_id != self.self_id);
        entries.push(Entry {
            record,
            expires_at: Instant::now() + self.ttl,
        });
    }

    async fn lookup(&self, content: &ContentId) -> Vec<PeerRecord> {
        let key = key_for(content);
        if !self.in_shard(&key) {
            return Vec::new();
        }
        let now = Instant::now();
        let mut storage = self.storage.lock().await;
        if let Some(entries) = storage.get_mut(&key) {
            entries.retain(|e| e.expires_at > now);
            let seen: HashSet<PeerIdentity> = HashSet::new();
            let _ = seen; // dedupe handled by the aggregator; bucket already unique per peer_id
            entries.iter().take(ALPHA.max(BUCKET_SIZE)).map(|e| e.record.clone()).collect()
        } else {
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn announce_then_lookup_finds_self() {
        let dht = DhtBackend::new(PeerIdentity::new("node-a"), 9000, vec![]);
        let content = ContentId::new("movie.iso");
        dht.announce(&content, 9000, Duration::from_secs(60)).await;

        let found = dht.lookup(&content).await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].peer_id, PeerIdentity::new("node-a"));
    }

    #[tokio::test]
    async fn shard_prefix_rejects_out_of_range_keys() {
        let dht = DhtBackend::new(PeerIdentity::new("node-a"), 9000, vec!["00".to_string()]);
        let content = ContentId::new("movie.iso");
        let key = key_for(&content);
        dht.announce(&content, 9000, Duration::from_secs(60)).await;

        let found = dht.lookup(&content).await;
        if key.starts_with("00") {
            assert_eq!(found.len(), 1);
        } else {
            assert!(found.is_empty());
        }
    }

    #[tokio::test]
    async fn unknown_content_returns_empty() {
        let dht = DhtBackend::new(PeerIdentity::new("node-a"), 9000, vec![]);
        let found = dht.lookup(&ContentId::new("nope")).await;
        assert!(found.is_empty());
    }
}
