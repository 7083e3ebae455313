//! Typed progress/status events emitted by [`crate::node::Node`] operations.
//!
//! Replaces the callback-chain pattern the distilled design calls out
//! (system specification §9 "Event-emitter / callback chains. Replace with
//! typed channels") with a `tokio::sync::mpsc` sender a caller can subscribe
//! to, mirroring the teacher's `nyx_sdk::events::Event` but carrying a real
//! enum instead of a `(type, detail)` string pair since every producer here
//! is in-process and can afford a typed payload.

use swarmlink_core::PeerIdentity;

#[derive(Debug, Clone)]
pub enum SdkEvent {
    PeerConnected { peer: PeerIdentity },
    PeerFailed { peer: PeerIdentity, reason: String },
    PeerDropped { peer: PeerIdentity },
    Progress { received_chunks: usize, total_chunks: u32 },
    Completed { total_bytes: u64 },
    Failed { reason: String },
}
