//! STRATEGY_LOOP (system specification §4.4): each strategy either returns a
//! live `Channel` or a failure reason; the orchestrator races/sequences them
//! under a shared deadline and cancels the rest on first success.

use std::{net::SocketAddr, sync::Arc, time::Duration};
use swarmlink_core::{Candidate, CandidateKind, PeerIdentity, Transport as CoreTransport};
use swarmlink_signal::RelayOverStore;
use swarmlink_transport::{
    happy_eyeballs::{happy_eyeballs_connect, DEFAULT_STAGGER},
    holepunch::{tcp_simultaneous_open, udp_hole_punch},
    Channel, RelayChannel, TcpFrameChannel,
};

pub type StrategyResult = Result<Box<dyn Channel>, String>;

fn socket_addrs(candidates: &[Candidate], transport: CoreTransport, prefer_ipv6: bool) -> Vec<SocketAddr> {
    let mut addrs: Vec<SocketAddr> = candidates
        .iter()
        .filter(|c| c.transport == transport)
        .filter_map(|c| format!("{}:{}", c.host, c.port).parse().ok())
        .collect();
    addrs.sort_by_key(|a| if a.is_ipv6() == prefer_ipv6 { 0 } else { 1 });
    addrs
}

/// DIRECT: connect to each advertised candidate pair, TCP then UDP, IPv6
/// first if preferred.
pub async fn try_direct(remote_candidates: &[Candidate], prefer_ipv6: bool) -> StrategyResult {
    let tcp_addrs = socket_addrs(remote_candidates, CoreTransport::Tcp, prefer_ipv6);
    if !tcp_addrs.is_empty() {
        if let Ok(chan) = happy_eyeballs_connect(&tcp_addrs, DEFAULT_STAGGER).await {
            return Ok(Box::new(chan));
        }
    }
    Err("no direct candidate pair connected".to_string())
}

/// UPNP_NATPMP: a mapped candidate behaves like a direct connect once GATHER
/// has added it as a HOST candidate with the externalized port; this
/// strategy just retries DIRECT restricted to mapped candidates (those that
/// GATHER produced via `PortMapper`, tagged as `Host` but not caller-local).
/// Since candidates don't carry that provenance bit across the wire, we
/// treat any remaining HOST candidate the DIRECT pass didn't already try as
/// the mapped attempt, per the specification's "mapped direct" phrasing.
pub async fn try_upnp_natpmp(remote_candidates: &[Candidate], prefer_ipv6: bool) -> StrategyResult {
    let host_only: Vec<Candidate> = remote_candidates.iter().filter(|c| c.kind == CandidateKind::Host).cloned().collect();
    try_direct(&host_only, prefer_ipv6).await
}

pub async fn try_udp_holepunch(local_bind: SocketAddr, remote_candidates: &[Candidate], deadline: Duration) -> StrategyResult {
    let addrs = socket_addrs(remote_candidates, CoreTransport::Udp, true);
    if addrs.is_empty() {
        return Err("no udp candidates to punch".to_string());
    }
    let socket = tokio::net::UdpSocket::bind(local_bind)
        .await
        .map_err(|e| e.to_string())?;
    udp_hole_punch(socket, &addrs, deadline)
        .await
        .map(|chan| Box::new(chan) as Box<dyn Channel>)
        .map_err(|e| e.to_string())
}

pub async fn try_tcp_simultaneous(
    local: &PeerIdentity,
    remote: &PeerIdentity,
    remote_candidates: &[Candidate],
    local_bind: SocketAddr,
    attempts: u32,
    attempt_interval: Duration,
) -> StrategyResult {
    let addrs = socket_addrs(remote_candidates, CoreTransport::Tcp, true);
    if addrs.is_empty() {
        return Err("no tcp candidates for simultaneous open".to_string());
    }
    tcp_simultaneous_open(local, remote, local_bind, &addrs, attempts, attempt_interval)
        .await
        .and_then(|stream| TcpFrameChannel::new(stream, swarmlink_transport::codec::DEFAULT_MAX_FRAME_LEN))
        .map(|chan| Box::new(chan) as Box<dyn Channel>)
        .map_err(|e| e.to_string())
}

pub async fn try_relay<S: swarmlink_signal::CoordinationStore + 'static>(
    store: Arc<S>,
    local: &PeerIdentity,
    remote: &PeerIdentity,
) -> StrategyResult {
    let backend = Arc::new(RelayOverStore::new(store));
    let chan = RelayChannel::new(backend, local.as_str(), remote.as_str());
    Ok(Box::new(chan))
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarmlink_core::Family;

    #[tokio::test]
    async fn direct_fails_fast_with_no_candidates() {
        let result = try_direct(&[], true).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn relay_always_succeeds_in_constructing_a_channel() {
        let store = Arc::new(swarmlink_signal::InMemoryCoordinationStore::new());
        let result = try_relay(store, &PeerIdentity::new("a"), &PeerIdentity::new("b")).await;
        assert!(result.is_ok());
    }

    #[test]
    fn socket_addrs_filters_by_transport_and_orders_by_family() {
        let candidates = vec![
            Candidate::new(CandidateKind::Host, Family::V4, CoreTransport::Tcp, "10.0.0.1", 1, true, false),
            Candidate::new(CandidateKind::Host, Family::V6, CoreTransport::Tcp, "::1", 2, true, false),
            Candidate::new(CandidateKind::Host, Family::V4, CoreTransport::Udp, "10.0.0.2", 3, true, false),
        ];
        let addrs = socket_addrs(&candidates, CoreTransport::Tcp, true);
        assert_eq!(addrs.len(), 2);
        assert!(addrs[0].is_ipv6());
    }
}
