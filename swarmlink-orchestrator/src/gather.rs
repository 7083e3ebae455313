//! GATHER phase (system specification §4.4): collect local HOST candidates,
//! optionally discover SERVER_REFLEXIVE via STUN and open a port mapping via
//! UPnP/NAT-PMP, then exchange candidate lists over the signalling
//! rendezvous (C3).

use crate::{options::ConnectOptions, stun::StunClient};
use std::{sync::Arc, time::Duration};
use swarmlink_core::{Candidate, CandidateKind, Family, PeerIdentity, Transport};
use swarmlink_signal::{CoordinationStore, Message, MessageKind};
use swarmlink_transport::PortMapper;
use tracing::{debug, warn};

const CAPABILITIES_SESSION: &str = "signal";

#[derive(serde::Serialize, serde::Deserialize)]
struct Capabilities {
    candidates: Vec<Candidate>,
    protocol_version: u8,
}

pub const PROTOCOL_VERSION: u8 = 1;

/// Collect every candidate this node is reachable on for the attempt:
/// caller-supplied HOST candidates, plus SRFLX via STUN and a mapped HOST
/// candidate via port mapping when either succeeds.
pub async fn gather_local_candidates(
    options: &ConnectOptions,
    stun: &dyn StunClient,
    port_mapper: &dyn PortMapper,
) -> Vec<Candidate> {
    let mut candidates = options.local_candidates.clone();

    for host_candidate in options.local_candidates.iter().filter(|c| c.kind == CandidateKind::Host) {
        if let Some(stun_server) = options.stun_servers.first() {
            let local: std::net::SocketAddr = match format!("{}:{}", host_candidate.host, host_candidate.port).parse() {
                Ok(a) => a,
                Err(_) => continue,
            };
            if let Some(reflexive) = stun.server_reflexive(local, *stun_server).await {
                debug!(%reflexive, "gather: stun resolved server-reflexive candidate");
                candidates.push(Candidate::new(
                    CandidateKind::ServerReflexive,
                    if reflexive.is_ipv6() { Family::V6 } else { Family::V4 },
                    host_candidate.transport,
                    reflexive.ip().to_string(),
                    reflexive.port(),
                    options.prefer_ipv6,
                    matches!(options.prefer_transport, swarmlink_core::config::PreferTransport::Tcp),
                ));
            }
        }

        if host_candidate.transport == Transport::Udp {
            match port_mapper.map_external_port(host_candidate.port, 3600).await {
                Ok(mapping) => {
                    debug!(external = %mapping.external, "gather: port mapping succeeded");
                    candidates.push(Candidate::new(
                        CandidateKind::Host,
                        if mapping.external.is_ipv6() { Family::V6 } else { Family::V4 },
                        Transport::Udp,
                        mapping.external.ip().to_string(),
                        mapping.external.port(),
                        options.prefer_ipv6,
                        false,
                    ));
                }
                Err(e) => debug!("gather: port mapping unavailable: {e:?}"),
            }
        }
    }

    candidates
}

/// Publish our candidate list to `remote` and wait for theirs, over C3.
/// Returns the remote's candidates, or an empty list if the exchange times
/// out (the caller proceeds with whatever candidates it already has,
/// matching "GATHER... exchange candidate lists over C3" with no stated
/// fatal failure mode for that step alone).
pub async fn exchange_candidates<S: CoordinationStore>(
    store: &Arc<S>,
    local: &PeerIdentity,
    remote: &PeerIdentity,
    local_candidates: Vec<Candidate>,
    exchange_timeout: Duration,
) -> Vec<Candidate> {
    let caps = Capabilities {
        candidates: local_candidates,
        protocol_version: PROTOCOL_VERSION,
    };
    let body = match serde_json::to_vec(&caps) {
        Ok(b) => bytes::Bytes::from(b),
        Err(e) => {
            warn!("gather: failed to encode capabilities: {e}");
            return Vec::new();
        }
    };

    if let Err(e) = store
        .publish(
            CAPABILITIES_SESSION,
            local.as_str(),
            remote.as_str(),
            Message {
                id: rand::random(),
                kind: MessageKind::Capabilities,
                body,
            },
            swarmlink_signal::store::DEFAULT_MESSAGE_TTL,
        )
        .await
    {
        warn!("gather: failed to publish capabilities: {e}");
    }

    match tokio::time::timeout(exchange_timeout, store.consume_next(CAPABILITIES_SESSION, remote.as_str(), local.as_str())).await {
        Ok(Ok(msg)) if msg.kind == MessageKind::Capabilities => {
            match serde_json::from_slice::<Capabilities>(&msg.body) {
                Ok(caps) => caps.candidates,
                Err(e) => {
                    warn!("gather: failed to decode remote capabilities: {e}");
                    Vec::new()
                }
            }
        }
        Ok(Ok(_)) => Vec::new(),
        Ok(Err(e)) => {
            warn!("gather: candidate exchange failed: {e}");
            Vec::new()
        }
        Err(_) => {
            warn!("gather: candidate exchange timed out");
            Vec::new()
        }
    }
}
