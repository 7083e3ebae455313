//! Picks a concrete [`CoordinationStore`] for this process.
//!
//! `Node<S>` and `Orchestrator<S>` are generic over the store so a library
//! embedder can pick any implementation at compile time, but a daemon binary
//! has exactly one `main` and must settle on one concrete type before it can
//! even name `Node<S>`'s type parameter. Rather than forcing a build-time
//! feature flag, this follows the dispatch-by-variant pattern the channel
//! layer uses for `Channel`/`ChannelKind`: one enum wrapping either store,
//! implementing `CoordinationStore` itself by matching on which variant is
//! live. `main` then names a single type, `AnyCoordinationStore`, regardless
//! of which backend `[daemon].coordinator_url` selects at runtime.

use async_trait::async_trait;
use std::time::Duration;
use swarmlink_signal::{CoordinationStore, HttpCoordinationStore, InMemoryCoordinationStore, Message, Result};

pub enum AnyCoordinationStore {
    InMemory(InMemoryCoordinationStore),
    Http(HttpCoordinationStore),
}

impl AnyCoordinationStore {
    /// Uses `coordinator_url` when set, otherwise falls back to an
    /// in-process store (single-host demos and tests only).
    pub fn from_settings(coordinator_url: Option<&str>) -> Self {
        match coordinator_url {
            Some(url) => Self::Http(HttpCoordinationStore::new(url)),
            None => Self::InMemory(InMemoryCoordinationStore::new()),
        }
    }
}

#[async_trait]
impl CoordinationStore for AnyCoordinationStore {
    async fn publish(&self, session: &str, from: &str, to: &str, msg: Message, ttl: Duration) -> Result<()> {
        match self {
            Self::InMemory(store) => store.publish(session, from, to, msg, ttl).await,
            Self::Http(store) => store.publish(session, from, to, msg, ttl).await,
        }
    }

    async fn consume_next(&self, session: &str, from: &str, to: &str) -> Result<Message> {
        match self {
            Self::InMemory(store) => store.consume_next(session, from, to).await,
            Self::Http(store) => store.consume_next(session, from, to).await,
        }
    }
}
