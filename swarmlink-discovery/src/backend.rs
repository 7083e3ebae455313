//! Uniform discovery backend interface (system specification §4.5).

use async_trait::async_trait;
use swarmlink_core::{ContentId, PeerRecord};
use tokio::time::Duration;

#[async_trait]
pub trait DiscoveryBackend: Send + Sync {
    /// Advertise that this node serves `content` on `port`, for `ttl`.
    async fn announce(&self, content: &ContentId, port: u16, ttl: Duration);

    /// Best-effort lookup. A backend that cannot answer (unreachable,
    /// rate-limited, shard mismatch) returns an empty list rather than an
    /// error — discovery failure is per-backend, never fatal to the caller.
    async fn lookup(&self, content: &ContentId) -> Vec<PeerRecord>;

    async fn start(&self) {}

    async fn stop(&self) {}
}
