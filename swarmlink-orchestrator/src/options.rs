//! `connect()` options and outcome types (system specification §4.4).

use std::{net::SocketAddr, time::Duration};
use swarmlink_core::config::{PreferTransport, Strategy};

#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub stun_servers: Vec<SocketAddr>,
    pub turn_servers: Vec<SocketAddr>,
    pub prefer_ipv6: bool,
    pub prefer_transport: PreferTransport,
    pub overall_timeout: Duration,
    /// Ordered subset of strategies to attempt. Default priority per the
    /// specification: DIRECT → UPNP_NATPMP → UDP_HOLEPUNCH →
    /// TCP_SIMULTANEOUS → RELAY.
    pub strategies: Vec<Strategy>,
    /// Per-strategy timeout; falls back to an even split of
    /// `overall_timeout` across `strategies` when unset.
    pub per_strategy_timeout: Option<Duration>,
    /// Local host candidates this node is reachable on. The orchestrator
    /// does not enumerate network interfaces itself; the embedder supplies
    /// them (mirroring how the teacher's `IceAgentConfig::network_interfaces`
    /// is caller-supplied rather than auto-detected).
    pub local_candidates: Vec<swarmlink_core::Candidate>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            stun_servers: Vec::new(),
            turn_servers: Vec::new(),
            prefer_ipv6: true,
            prefer_transport: PreferTransport::Auto,
            overall_timeout: Duration::from_secs(30),
            strategies: swarmlink_core::config::default_strategies(),
            per_strategy_timeout: None,
            local_candidates: Vec::new(),
        }
    }
}

impl ConnectOptions {
    pub fn strategy_timeout(&self) -> Duration {
        self.per_strategy_timeout.unwrap_or_else(|| {
            let n = self.strategies.len().max(1) as u32;
            self.overall_timeout / n
        })
    }
}

/// One attempted strategy's outcome, kept for the failure report.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub strategy: Strategy,
    pub reason: String,
}

#[derive(Debug, thiserror::Error)]
#[error("no strategy succeeded: {0:?}")]
pub struct OrchestratorFailure(pub Vec<AttemptRecord>);
