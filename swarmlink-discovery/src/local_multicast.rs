//! Local multicast discovery (system specification §4.5): periodic announce
//! datagrams on a link-local group, received peers marked
//! `confidence = 0.9` with `lastSeen` from packet arrival. Socket handling
//! mirrors `swarmlink_transport::holepunch`'s bind/recv loop, generalized
//! from a single remote peer to a multicast group.

use crate::backend::DiscoveryBackend;
use async_trait::async_trait;
use std::{
    collections::HashMap,
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    sync::Arc,
    time::{Duration, Instant},
};
use swarmlink_core::{ContentId, Family, PeerAddress, PeerIdentity, PeerRecord, PeerSource};
use tokio::{net::UdpSocket, sync::Mutex, time::interval};
use tracing::{debug, warn};

pub const DEFAULT_GROUP: Ipv4Addr = Ipv4Addr::new(239, 71, 0, 1);
pub const DEFAULT_PORT: u16 = 28199;
pub const ANNOUNCE_INTERVAL: Duration = Duration::from_secs(15);
const CONFIDENCE: f64 = 0.9;

#[derive(serde::Serialize, serde::Deserialize)]
struct Announcement {
    peer_id: String,
    content: String,
    port: u16,
}

pub struct LocalMulticastBackend {
    self_id: PeerIdentity,
    group: SocketAddrV4,
    socket: Arc<UdpSocket>,
    cache: Arc<Mutex<HashMap<ContentId, Vec<(PeerRecord, Instant)>>>>,
}

impl LocalMulticastBackend {
    pub async fn bind(self_id: PeerIdentity, group: Ipv4Addr, port: u16) -> std::io::Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port)).await?;
        socket.join_multicast_v4(group, Ipv4Addr::UNSPECIFIED)?;
        Ok(Self {
            self_id,
            group: SocketAddrV4::new(group, port),
            socket: Arc::new(socket),
            cache: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Spawn the receive loop that ingests announcements from other nodes.
    pub fn spawn_receiver(&self) {
        let socket = self.socket.clone();
        let cache = self.cache.clone();
        let self_id = self.self_id.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 2048];
            loop {
                let (n, from) = match socket.recv_from(&mut buf).await {
                    Ok(v) => v,
                    Err(e) => {
                        warn!("local multicast recv error: {e}");
                        continue;
                    }
                };
                let Ok(ann) = serde_json::from_slice::<Announcement>(&buf[..n]) else {
                    continue;
                };
                if ann.peer_id == self_id.as_str() {
                    continue;
                }
                let host = match from {
                    SocketAddr::V4(v4) => v4.ip().to_string(),
                    SocketAddr::V6(v6) => v6.ip().to_string(),
                };
                let mut record = PeerRecord::new(PeerIdentity::new(ann.peer_id), PeerSource::Local, CONFIDENCE);
                record.addresses.insert(PeerAddress {
                    family: Family::V4,
                    host,
                    port: ann.port,
                });
                debug!(peer = %record.peer_id, "local multicast: discovered peer");
                let mut cache = cache.lock().await;
                let entries = cache.entry(ContentId::new(ann.content)).or_default();
                if let Some((existing, seen)) = entries.iter_mut().find(|(r, _)| r.peer_id == record.peer_id) {
                    existing.merge(&record);
                    *seen = Instant::now();
                } else {
                    entries.push((record, Instant::now()));
                }
            }
        });
    }

    /// Spawn the periodic announce loop for `content`/`port`.
    pub fn spawn_announcer(&self, content: ContentId, port: u16) {
        let socket = self.socket.clone();
        let group = self.group;
        let self_id = self.self_id.clone();
        tokio::spawn(async move {
            let mut ticker = interval(ANNOUNCE_INTERVAL);
            loop {
                ticker.tick().await;
                let ann = Announcement {
                    peer_id: self_id.as_str().to_string(),
                    content: content.as_str().to_string(),
                    port,
                };
                if let Ok(payload) = serde_json::to_vec(&ann) {
                    if let Err(e) = socket.send_to(&payload, group).await {
                        warn!("local multicast send error: {e}");
                    }
                }
            }
        });
    }
}

#[async_trait]
impl DiscoveryBackend for LocalMulticastBackend {
    async fn announce(&self, content: &ContentId, port: u16, _ttl: Duration) {
        self.spawn_announcer(content.clone(), port);
    }

    async fn lookup(&self, content: &ContentId) -> Vec<PeerRecord> {
        let cache = self.cache.lock().await;
        cache
            .get(content)
            .map(|entries| entries.iter().map(|(r, _)| r.clone()).collect())
            .unwrap_or_default()
    }

    async fn start(&self) {
        self.spawn_receiver();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bind_joins_multicast_group_without_error() {
        let backend = LocalMulticastBackend::bind(PeerIdentity::new("node-a"), DEFAULT_GROUP, 0).await;
        assert!(backend.is_ok());
    }

    #[tokio::test]
    async fn lookup_on_empty_cache_returns_nothing() {
        let backend = LocalMulticastBackend::bind(PeerIdentity::new("node-a"), DEFAULT_GROUP, 0)
            .await
            .unwrap();
        let found = backend.lookup(&ContentId::new("movie.iso")).await;
        assert!(found.is_empty());
    }
}
