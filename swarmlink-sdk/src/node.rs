//! Application-facing node: composes discovery, NAT traversal, the chunk
//! transfer protocol, and the scheduler into `download`/`serve` operations.
//!
//! Grounded on the teacher's `nyx_sdk::NyxClient` (`nyx-sdk/src/lib.rs`): one
//! long-lived struct holding the pieces a caller needs across calls, rather
//! than free functions — here, the local identity, the shared config, the
//! NAT traversal orchestrator, and the discovery aggregator. Unlike
//! `NyxClient`, which talks to a separate `nyx-daemon` process over JSON-RPC
//! and so carries a `daemon.rs` IPC client, every piece a `Node` holds is an
//! in-process library from this workspace, so there is no IPC layer here.

use std::{net::SocketAddr, sync::Arc, time::Duration};
use swarmlink_core::{config::Config, ContentDigest, ContentId, PeerIdentity, PEER_RECORD_TTL};
use swarmlink_discovery::{DiscoveryAggregator, DiscoveryBackend, FindPeersOptions};
use swarmlink_orchestrator::{ConnectOptions, Orchestrator};
use swarmlink_signal::CoordinationStore;

/// One swarmlink participant. Owns the pieces meant to be long-lived across
/// many transfers: the discovery aggregator keeps backends (and their
/// internal caches/background tasks) warm, and the orchestrator holds the
/// STUN/port-mapper seams configured once at construction.
pub struct Node<S: CoordinationStore + 'static> {
    self_id: PeerIdentity,
    config: Arc<Config>,
    orchestrator: Orchestrator<S>,
    aggregator: Arc<DiscoveryAggregator>,
}

impl<S: CoordinationStore + 'static> Node<S> {
    /// `backends` is built by the caller (e.g. wiring a `DhtBackend`,
    /// `PexBackend`, and a `CoordBackend<D>` for whatever `ContentDirectory`
    /// it has, each boxed as `Arc<dyn DiscoveryBackend>`) since the concrete
    /// `ContentDirectory` type only matters at that construction site, not
    /// to `Node` itself.
    pub fn new(
        self_id: PeerIdentity,
        config: Arc<Config>,
        store: Arc<S>,
        local_bind: SocketAddr,
        backends: Vec<Arc<dyn DiscoveryBackend>>,
    ) -> Self {
        Self {
            self_id,
            orchestrator: Orchestrator::new(store, local_bind),
            aggregator: Arc::new(DiscoveryAggregator::new(backends)),
            config,
        }
    }

    pub fn self_id(&self) -> &PeerIdentity {
        &self.self_id
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub(crate) fn aggregator(&self) -> &Arc<DiscoveryAggregator> {
        &self.aggregator
    }

    pub(crate) fn orchestrator(&self) -> &Orchestrator<S> {
        &self.orchestrator
    }

    /// Starts every discovery backend's background activity (DHT refresh,
    /// local multicast listener, PEX gossip, ...).
    pub async fn start(&self) {
        self.aggregator.start_all().await;
    }

    pub async fn stop(&self) {
        self.aggregator.stop_all().await;
    }

    /// Advertises this node as a source for `content` and records the
    /// `(content, digest)` binding the aggregator needs to translate
    /// digest-keyed results from backends that don't key by `ContentId`.
    pub async fn announce(&self, content: &ContentId, digest: ContentDigest, port: u16) {
        self.aggregator.add_content_mapping(content.clone(), digest).await;
        self.aggregator.announce(content, port, PEER_RECORD_TTL).await;
    }

    /// Looks up known peers for `content` via every discovery backend. Public
    /// so an out-of-process control surface (the daemon's HTTP peers lookup)
    /// can drive discovery the same way `download` does internally.
    pub async fn find_peers(&self, content: &ContentId) -> Vec<PeerIdentity> {
        self.aggregator
            .find_peers(content, FindPeersOptions::default())
            .await
            .into_iter()
            .map(|record| record.peer_id)
            .collect()
    }

    pub(crate) fn connect_options(&self) -> ConnectOptions {
        let stun_servers = self.config.stun_servers.iter().filter_map(|s| s.parse().ok()).collect();
        let turn_servers = self.config.turn_servers.iter().filter_map(|s| s.parse().ok()).collect();
        ConnectOptions {
            stun_servers,
            turn_servers,
            prefer_ipv6: self.config.prefer_ipv6,
            prefer_transport: self.config.prefer_transport,
            overall_timeout: Duration::from_millis(self.config.overall_timeout_ms),
            strategies: self.config.strategies.clone(),
            per_strategy_timeout: Some(Duration::from_millis(self.config.peer_timeout_ms)),
            local_candidates: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarmlink_core::config::Strategy;
    use swarmlink_signal::InMemoryCoordinationStore;

    fn node(config: Config) -> Node<InMemoryCoordinationStore> {
        Node::new(
            PeerIdentity::new("self"),
            Arc::new(config),
            Arc::new(InMemoryCoordinationStore::new()),
            "127.0.0.1:0".parse().unwrap(),
            vec![],
        )
    }

    #[test]
    fn connect_options_carries_timeouts_and_strategies_from_config() {
        let config = Config { peer_timeout_ms: 1500, overall_timeout_ms: 9000, strategies: vec![Strategy::Relay], ..Config::default() };
        let options = node(config).connect_options();
        assert_eq!(options.overall_timeout, Duration::from_millis(9000));
        assert_eq!(options.per_strategy_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(options.strategies, vec![Strategy::Relay]);
    }

    #[test]
    fn connect_options_drops_unparsable_stun_turn_entries() {
        let config = Config { stun_servers: vec!["not-an-addr".into(), "127.0.0.1:3478".into()], ..Config::default() };
        let options = node(config).connect_options();
        assert_eq!(options.stun_servers, vec!["127.0.0.1:3478".parse().unwrap()]);
    }
}
