//! Adapts a [`CoordinationStore`] into `swarmlink_transport::RelayBackend` so
//! the relay transport strategy can ride on the same rendezvous
//! infrastructure as candidate exchange.

use crate::store::{CoordinationStore, Message, MessageKind, DEFAULT_MESSAGE_TTL};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::{atomic::{AtomicU64, Ordering}, Arc};
use swarmlink_transport::{RelayBackend, Result as TransportResult, TransportError};

const RELAY_SESSION: &str = "relay";

pub struct RelayOverStore<S: CoordinationStore> {
    store: Arc<S>,
    next_id: AtomicU64,
}

impl<S: CoordinationStore> RelayOverStore<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            next_id: AtomicU64::new(1),
        }
    }
}

#[async_trait]
impl<S: CoordinationStore + 'static> RelayBackend for RelayOverStore<S> {
    async fn relay_send(&self, from: &str, to: &str, frame: Bytes) -> TransportResult<()> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.store
            .publish(
                RELAY_SESSION,
                from,
                to,
                Message {
                    id,
                    kind: MessageKind::Relay,
                    body: frame,
                },
                DEFAULT_MESSAGE_TTL,
            )
            .await
            .map_err(|e| TransportError::Relay(e.to_string()))
    }

    async fn relay_recv(&self, from: &str, to: &str) -> TransportResult<Bytes> {
        let msg = self
            .store
            .consume_next(RELAY_SESSION, from, to)
            .await
            .map_err(|e| TransportError::Relay(e.to_string()))?;
        Ok(msg.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryCoordinationStore;

    #[tokio::test]
    async fn relays_a_frame_between_two_logical_peers() {
        let store = Arc::new(InMemoryCoordinationStore::new());
        let relay = RelayOverStore::new(store);

        relay.relay_send("alice", "bob", Bytes::from_static(b"hi")).await.unwrap();
        let got = relay.relay_recv("alice", "bob").await.unwrap();
        assert_eq!(&got[..], b"hi");
    }
}
