//! NAT traversal orchestrator (C4, system specification §4.4): runs the
//! `INIT → GATHER → STRATEGY_LOOP → (SUCCESS | FAIL)` state machine for one
//! `connect()` attempt.

use crate::{
    gather::{exchange_candidates, gather_local_candidates},
    options::{AttemptRecord, ConnectOptions, OrchestratorFailure},
    stun::{NoopStunClient, StunClient},
    strategies,
};
use std::{net::SocketAddr, sync::Arc};
use swarmlink_core::{config::Strategy, PeerIdentity};
use swarmlink_signal::CoordinationStore;
use swarmlink_transport::{Channel, NoopPortMapper, PortMapper};
use tracing::{info, warn};

pub struct Orchestrator<S: CoordinationStore> {
    store: Arc<S>,
    stun: Arc<dyn StunClient>,
    port_mapper: Arc<dyn PortMapper>,
    local_bind: SocketAddr,
}

impl<S: CoordinationStore> Orchestrator<S> {
    pub fn new(store: Arc<S>, local_bind: SocketAddr) -> Self {
        Self {
            store,
            stun: Arc::new(NoopStunClient),
            port_mapper: Arc::new(NoopPortMapper),
            local_bind,
        }
    }

    pub fn with_stun(mut self, stun: Arc<dyn StunClient>) -> Self {
        self.stun = stun;
        self
    }

    pub fn with_port_mapper(mut self, port_mapper: Arc<dyn PortMapper>) -> Self {
        self.port_mapper = port_mapper;
        self
    }
}

impl<S: CoordinationStore + 'static> Orchestrator<S> {
    /// Run `INIT → GATHER → STRATEGY_LOOP` for one connect attempt, returning
    /// a live channel or the ordered attempt log as a failure.
    pub async fn connect(
        &self,
        local: &PeerIdentity,
        remote: &PeerIdentity,
        options: ConnectOptions,
    ) -> Result<Box<dyn Channel>, OrchestratorFailure> {
        info!(%local, %remote, "orchestrator: INIT");

        // GATHER
        let local_candidates = gather_local_candidates(&options, self.stun.as_ref(), self.port_mapper.as_ref()).await;
        let exchange_timeout = options.strategy_timeout();
        let remote_candidates = exchange_candidates(&self.store, local, remote, local_candidates, exchange_timeout).await;
        info!(count = remote_candidates.len(), "orchestrator: GATHER complete");

        // STRATEGY_LOOP
        let per_strategy_timeout = options.strategy_timeout();
        let mut attempts = Vec::new();

        let overall = tokio::time::timeout(options.overall_timeout, async {
            for strategy in &options.strategies {
                let attempt = tokio::time::timeout(
                    per_strategy_timeout,
                    self.run_strategy(*strategy, local, remote, &remote_candidates, &options),
                )
                .await;

                match attempt {
                    Ok(Ok(channel)) => {
                        info!(?strategy, "orchestrator: STRATEGY_LOOP succeeded");
                        return Some(channel);
                    }
                    Ok(Err(reason)) => {
                        warn!(?strategy, %reason, "orchestrator: strategy failed");
                        attempts.push(AttemptRecord { strategy: *strategy, reason });
                    }
                    Err(_elapsed) => {
                        let reason = "per-strategy timeout elapsed".to_string();
                        warn!(?strategy, "orchestrator: strategy timed out");
                        attempts.push(AttemptRecord { strategy: *strategy, reason });
                    }
                }
            }
            None
        })
        .await;

        match overall {
            Ok(Some(channel)) => Ok(channel),
            Ok(None) => Err(OrchestratorFailure(attempts)),
            Err(_elapsed) => {
                attempts.push(AttemptRecord {
                    strategy: *options.strategies.last().unwrap_or(&Strategy::Relay),
                    reason: "overall timeout exceeded".to_string(),
                });
                Err(OrchestratorFailure(attempts))
            }
        }
    }

    async fn run_strategy(
        &self,
        strategy: Strategy,
        local: &PeerIdentity,
        remote: &PeerIdentity,
        remote_candidates: &[swarmlink_core::Candidate],
        options: &ConnectOptions,
    ) -> Result<Box<dyn Channel>, String> {
        match strategy {
            Strategy::Direct => strategies::try_direct(remote_candidates, options.prefer_ipv6).await,
            Strategy::UpnpNatpmp => strategies::try_upnp_natpmp(remote_candidates, options.prefer_ipv6).await,
            Strategy::UdpHolepunch => strategies::try_udp_holepunch(self.local_bind, remote_candidates, options.strategy_timeout()).await,
            Strategy::TcpSimultaneous => {
                strategies::try_tcp_simultaneous(local, remote, remote_candidates, self.local_bind, 5, std::time::Duration::from_millis(200)).await
            }
            Strategy::Relay => strategies::try_relay(self.store.clone(), local, remote).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn falls_through_to_relay_when_no_direct_candidates_reachable() {
        let store = Arc::new(swarmlink_signal::InMemoryCoordinationStore::new());
        let orchestrator = Orchestrator::new(store, "127.0.0.1:0".parse().unwrap());

        let options = ConnectOptions {
            strategies: vec![Strategy::Direct, Strategy::Relay],
            overall_timeout: Duration::from_secs(2),
            per_strategy_timeout: Some(Duration::from_millis(200)),
            ..ConnectOptions::default()
        };

        let result = orchestrator
            .connect(&PeerIdentity::new("a"), &PeerIdentity::new("b"), options)
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn fails_with_attempt_log_when_every_strategy_fails() {
        let store = Arc::new(swarmlink_signal::InMemoryCoordinationStore::new());
        let orchestrator = Orchestrator::new(store, "127.0.0.1:0".parse().unwrap());

        let options = ConnectOptions {
            strategies: vec![Strategy::Direct],
            overall_timeout: Duration::from_secs(1),
            per_strategy_timeout: Some(Duration::from_millis(100)),
            ..ConnectOptions::default()
        };

        let result = orchestrator
            .connect(&PeerIdentity::new("a"), &PeerIdentity::new("b"), options)
            .await;
        assert!(result.is_err());
        let failure = match result {
            Err(e) => e,
            Ok(_) => unreachable!(),
        };
        assert_eq!(failure.0.len(), 1);
        assert_eq!(failure.0[0].strategy, Strategy::Direct);
    }
}
