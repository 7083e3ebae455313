//! STUN seam (system specification §6: "use standard protocols unchanged;
//! treat as external"). Mirrors `swarmlink_transport::port_mapper`'s
//! trait-with-no-op-default shape so the orchestrator always has something
//! to call without fabricating a vendored STUN client.

use async_trait::async_trait;
use std::net::SocketAddr;

#[async_trait]
pub trait StunClient: Send + Sync {
    /// Resolve the server-reflexive (external) address as seen by `server`
    /// for a socket bound to `local`. Returns `None` if unreachable.
    async fn server_reflexive(&self, local: SocketAddr, server: SocketAddr) -> Option<SocketAddr>;
}

pub struct NoopStunClient;

#[async_trait]
impl StunClient for NoopStunClient {
    async fn server_reflexive(&self, _local: SocketAddr, _server: SocketAddr) -> Option<SocketAddr> {
        None
    }
}
