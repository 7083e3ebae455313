//! UPnP / NAT-PMP port mapping seam. The protocols themselves are treated as
//! external, already-specified services (system specification §1, §6) — this
//! module only defines the trait the orchestrator calls through, plus a
//! no-op implementation for environments without a mapper (or for tests).

use async_trait::async_trait;
use std::net::SocketAddr;

#[derive(Debug, thiserror::Error)]
pub enum PortMapError {
    #[error("no port mapper available")]
    Unavailable,
    #[error("mapping request failed: {0}")]
    Failed(String),
}

/// A HOST candidate produced by a successful mapping: the externally
/// reachable `(host, port)` plus the internal port it maps to.
#[derive(Debug, Clone, Copy)]
pub struct Mapping {
    pub external: SocketAddr,
    pub internal_port: u16,
}

#[async_trait]
pub trait PortMapper: Send + Sync {
    async fn map_external_port(&self, internal_port: u16, ttl_secs: u32) -> Result<Mapping, PortMapError>;
    async fn unmap(&self, internal_port: u16) -> Result<(), PortMapError>;
}

/// Default mapper for deployments without UPnP/NAT-PMP reachability, or for
/// tests exercising the orchestrator's strategy loop without real routers.
/// Always reports the strategy as unavailable so `STRATEGY_LOOP` correctly
/// rotates to the next strategy rather than hanging.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPortMapper;

#[async_trait]
impl PortMapper for NoopPortMapper {
    async fn map_external_port(&self, _internal_port: u16, _ttl_secs: u32) -> Result<Mapping, PortMapError> {
        Err(PortMapError::Unavailable)
    }

    async fn unmap(&self, _internal_port: u16) -> Result<(), PortMapError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_mapper_always_reports_unavailable() {
        let mapper = NoopPortMapper;
        assert!(matches!(
            mapper.map_external_port(4000, 600).await,
            Err(PortMapError::Unavailable)
        ));
    }
}
