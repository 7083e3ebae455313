//! Serve side: accepts TCP connections and answers the chunk transfer
//! protocol against a caller-supplied [`ContentSource`], gated by a
//! caller-owned [`ChokeController`].
//!
//! Choke state is process-wide per `PeerIdentity` (system specification
//! §4.9), not per-content, so a `Node` does not own one `ChokeController`
//! itself — whatever embeds the SDK constructs a single controller and
//! passes it into every `serve()` call that accepts connections for any
//! content this node hosts, mirroring the teacher's `nyx-daemon` pattern of
//! one long-lived subsystem shared across every accepted session.

use std::{net::SocketAddr, sync::Arc};
use swarmlink_core::Result;
use swarmlink_protocol::server::{ChokeGate, ContentSource, ServerSession};
use swarmlink_scheduler::ChokeController;
use swarmlink_transport::{Channel, TcpFrameChannel};
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Adapts a shared [`ChokeController`] to the protocol layer's
/// [`ChokeGate`] seam.
pub struct SharedChoke(pub Arc<ChokeController>);

#[async_trait::async_trait]
impl ChokeGate for SharedChoke {
    async fn is_choked(&self, peer: &swarmlink_core::PeerIdentity) -> bool {
        self.0.is_choked(peer).await
    }
}

/// Binds `bind_addr` and serves `content` from `source` until the listener
/// is dropped or a fatal bind error occurs. Spawns one task per accepted
/// connection; each session runs until its peer disconnects.
pub async fn serve<C>(bind_addr: SocketAddr, source: Arc<C>, choke: Arc<ChokeController>) -> Result<()>
where
    C: ContentSource + 'static,
{
    let listener = TcpListener::bind(bind_addr).await?;
    info!(%bind_addr, "serving chunk transfer protocol");

    loop {
        let (stream, remote) = listener.accept().await?;
        let source = source.clone();
        let choke = choke.clone();

        tokio::spawn(async move {
            let channel = match TcpFrameChannel::new(stream, swarmlink_transport::codec::DEFAULT_MAX_FRAME_LEN) {
                Ok(channel) => channel,
                Err(e) => {
                    warn!(%remote, error = %e, "failed to frame accepted connection");
                    return;
                }
            };
            let peer = swarmlink_core::PeerIdentity::new(remote.to_string());
            choke.register_peer(peer.clone()).await;

            let gate = SharedChoke(choke.clone());
            let session = ServerSession::new(&channel as &dyn Channel, peer.clone(), source.as_ref(), &gate);
            if let Err(e) = session.run().await {
                warn!(%peer, error = %e, "session ended with error");
            }

            channel.close().await;
            choke.remove_peer(&peer).await;
        });
    }
}
