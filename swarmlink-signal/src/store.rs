//! Signalling rendezvous (system specification §4.3): a publish/subscribe
//! channel keyed by `(sessionId, fromPeer, toPeer)`, per-sender FIFO,
//! idempotent on duplicates, TTL-expired and garbage-collected on next
//! write. Grounded on the periodic-sync shape of
//! `nyx_control::rendezvous::RendezvousClient`, generalized into a trait so
//! an in-memory double and an HTTP-backed store share one seam.

use async_trait::async_trait;
use bytes::Bytes;
use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::{Mutex, Notify};

pub const DEFAULT_MESSAGE_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("transport error: {0}")]
    Transport(String),
}

pub type Result<T, E = SignalError> = core::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    /// List of candidates, transport preferences, protocol version.
    Capabilities,
    Offer,
    Answer,
    ProbeAck,
    /// Opaque relayed application frame (used by `RelayChannel`).
    Relay,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub id: u64,
    pub kind: MessageKind,
    pub body: Bytes,
}

#[derive(Default)]
struct Queue {
    items: VecDeque<(Message, Instant)>,
    seen_ids: std::collections::HashSet<u64>,
    notify: Notify,
}

/// Trait implemented by any store that can back the rendezvous exchange.
/// `publish` is idempotent on duplicate message ids; `consume_next` blocks
/// until a message is available or the store is dropped.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    async fn publish(
        &self,
        session: &str,
        from: &str,
        to: &str,
        msg: Message,
        ttl: Duration,
    ) -> Result<()>;

    /// Pop the next undelivered message for `(from, to)` in FIFO order,
    /// waiting indefinitely until one arrives. At-most-once on the reader
    /// side: a popped message is not redelivered.
    async fn consume_next(&self, session: &str, from: &str, to: &str) -> Result<Message>;
}

type Key = (String, String, String);

/// Eventually-consistent in-process store suitable for tests and for the
/// relay transport when both peers share a process (as in an integration
/// test harness).
#[derive(Default, Clone)]
pub struct InMemoryCoordinationStore {
    queues: Arc<Mutex<HashMap<Key, Arc<Mutex<Queue>>>>>,
}

impl InMemoryCoordinationStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn queue_for(&self, session: &str, from: &str, to: &str) -> Arc<Mutex<Queue>> {
        let key = (session.to_string(), from.to_string(), to.to_string());
        let mut queues = self.queues.lock().await;
        queues
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(Queue::default())))
            .clone()
    }

    fn gc(queue: &mut Queue, ttl: Duration) {
        let now = Instant::now();
        queue.items.retain(|(_, published)| now.duration_since(*published) < ttl);
    }
}

#[async_trait]
impl CoordinationStore for InMemoryCoordinationStore {
    async fn publish(
        &self,
        session: &str,
        from: &str,
        to: &str,
        msg: Message,
        ttl: Duration,
    ) -> Result<()> {
        let queue = self.queue_for(session, from, to).await;
        let mut queue = queue.lock().await;
        Self::gc(&mut queue, ttl);
        if queue.seen_ids.insert(msg.id) {
            queue.items.push_back((msg, Instant::now()));
            queue.notify.notify_waiters();
        }
        Ok(())
    }

    async fn consume_next(&self, session: &str, from: &str, to: &str) -> Result<Message> {
        let queue = self.queue_for(session, from, to).await;
        loop {
            {
                let mut locked = queue.lock().await;
                if let Some((msg, _)) = locked.items.pop_front() {
                    return Ok(msg);
                }
            }
            queue.lock().await.notify.notified().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_then_consume_fifo() {
        let store = InMemoryCoordinationStore::new();
        store
            .publish(
                "s1",
                "a",
                "b",
                Message { id: 1, kind: MessageKind::Capabilities, body: Bytes::from_static(b"one") },
                DEFAULT_MESSAGE_TTL,
            )
            .await
            .unwrap();
        store
            .publish(
                "s1",
                "a",
                "b",
                Message { id: 2, kind: MessageKind::Capabilities, body: Bytes::from_static(b"two") },
                DEFAULT_MESSAGE_TTL,
            )
            .await
            .unwrap();

        let first = store.consume_next("s1", "a", "b").await.unwrap();
        assert_eq!(&first.body[..], b"one");
        let second = store.consume_next("s1", "a", "b").await.unwrap();
        assert_eq!(&second.body[..], b"two");
    }

    #[tokio::test]
    async fn duplicate_publish_is_idempotent() {
        let store = InMemoryCoordinationStore::new();
        let msg = Message { id: 7, kind: MessageKind::ProbeAck, body: Bytes::new() };
        store.publish("s", "a", "b", msg.clone(), DEFAULT_MESSAGE_TTL).await.unwrap();
        store.publish("s", "a", "b", msg, DEFAULT_MESSAGE_TTL).await.unwrap();

        let queue = store.queue_for("s", "a", "b").await;
        assert_eq!(queue.lock().await.items.len(), 1);
    }

    #[tokio::test]
    async fn consume_next_waits_for_publish() {
        let store = InMemoryCoordinationStore::new();
        let store2 = store.clone();
        let consumer = tokio::spawn(async move { store2.consume_next("s", "a", "b").await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        store
            .publish("s", "a", "b", Message { id: 1, kind: MessageKind::Offer, body: Bytes::new() }, DEFAULT_MESSAGE_TTL)
            .await
            .unwrap();

        let got = consumer.await.unwrap().unwrap();
        assert_eq!(got.id, 1);
    }
}
