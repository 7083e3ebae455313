//! HTTP-backed [`CoordinationStore`], speaking the coordination-store schema
//! from the system specification's §6 (`/hosts/{peerId}/messages/{id}`,
//! `/clients/{peerId}/signals/{id}`). Grounded on
//! `nyx_control::rendezvous::RendezvousClient`'s `ureq` + `spawn_blocking`
//! pattern: every blocking HTTP call runs on the blocking pool, and
//! `consume_next` polls on a short interval since plain HTTP has no
//! server push.

use crate::store::{CoordinationStore, Message, MessageKind, Result, SignalError};
use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// How often `consume_next` re-polls the store when nothing is queued yet.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Serialize)]
struct WireMessage<'a> {
    id: u64,
    from: &'a str,
    kind: &'static str,
    body: String,
    ttl_secs: u64,
}

#[derive(Deserialize)]
struct WireEnvelope {
    id: u64,
    from: String,
    kind: String,
    body: String,
}

fn kind_to_wire(kind: &MessageKind) -> &'static str {
    match kind {
        MessageKind::Capabilities => "capabilities",
        MessageKind::Offer => "offer",
        MessageKind::Answer => "answer",
        MessageKind::ProbeAck => "probe_ack",
        MessageKind::Relay => "relay",
    }
}

fn wire_to_kind(kind: &str) -> MessageKind {
    match kind {
        "offer" => MessageKind::Offer,
        "answer" => MessageKind::Answer,
        "probe_ack" => MessageKind::ProbeAck,
        "relay" => MessageKind::Relay,
        _ => MessageKind::Capabilities,
    }
}

/// Coordination store backed by an HTTP endpoint implementing the
/// `/hosts/{peerId}/messages/{id}` and `/clients/{peerId}/signals/{id}`
/// routes. `session` selects which of the two namespaces a call addresses:
/// `"signal"` uses `/hosts`, anything else uses `/clients`.
#[derive(Clone)]
pub struct HttpCoordinationStore {
    base_url: String,
    agent: ureq::Agent,
}

impl HttpCoordinationStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            agent: ureq::Agent::new(),
        }
    }

    fn namespace(session: &str) -> &'static str {
        if session == "signal" {
            "hosts"
        } else {
            "clients"
        }
    }

    fn messages_url(&self, session: &str, to: &str) -> String {
        let ns = Self::namespace(session);
        let leaf = if ns == "hosts" { "messages" } else { "signals" };
        format!("{}/{}/{}/{}", self.base_url, ns, to, leaf)
    }
}

#[async_trait]
impl CoordinationStore for HttpCoordinationStore {
    async fn publish(
        &self,
        session: &str,
        from: &str,
        to: &str,
        msg: Message,
        ttl: Duration,
    ) -> Result<()> {
        let url = self.messages_url(session, to);
        let wire = WireMessage {
            id: msg.id,
            from,
            kind: kind_to_wire(&msg.kind),
            body: base64::engine::general_purpose::STANDARD.encode(&msg.body),
            ttl_secs: ttl.as_secs(),
        };
        let body = serde_json::to_string(&wire)
            .map_err(|e| SignalError::Transport(e.to_string()))?;
        let agent = self.agent.clone();
        tokio::task::spawn_blocking(move || agent.post(&url).send_string(&body))
            .await
            .map_err(|e| SignalError::Transport(e.to_string()))?
            .map_err(|e| SignalError::Transport(e.to_string()))?;
        Ok(())
    }

    async fn consume_next(&self, session: &str, from: &str, to: &str) -> Result<Message> {
        let url = self.messages_url(session, to);
        let from = from.to_string();
        loop {
            let agent = self.agent.clone();
            let url_clone = url.clone();
            let response = tokio::task::spawn_blocking(move || agent.get(&url_clone).call())
                .await
                .map_err(|e| SignalError::Transport(e.to_string()))?;

            match response {
                Ok(resp) => {
                    let text = resp
                        .into_string()
                        .map_err(|e| SignalError::Transport(e.to_string()))?;
                    let envelopes: Vec<WireEnvelope> = serde_json::from_str(&text)
                        .map_err(|e| SignalError::Transport(e.to_string()))?;
                    if let Some(env) = envelopes.into_iter().find(|e| e.from == from) {
                        let body = base64::engine::general_purpose::STANDARD
                            .decode(env.body)
                            .map_err(|e| SignalError::Transport(e.to_string()))?;
                        return Ok(Message {
                            id: env.id,
                            kind: wire_to_kind(&env.kind),
                            body: Bytes::from(body),
                        });
                    }
                }
                Err(e) => warn!("coordination store poll failed: {e}"),
            }
            sleep(POLL_INTERVAL).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_selects_hosts_for_signal_session() {
        assert_eq!(HttpCoordinationStore::namespace("signal"), "hosts");
        assert_eq!(HttpCoordinationStore::namespace("relay"), "clients");
    }

    #[test]
    fn messages_url_uses_correct_leaf_per_namespace() {
        let store = HttpCoordinationStore::new("http://example.invalid");
        assert_eq!(
            store.messages_url("signal", "peer-a"),
            "http://example.invalid/hosts/peer-a/messages"
        );
        assert_eq!(
            store.messages_url("relay", "peer-a"),
            "http://example.invalid/clients/peer-a/signals"
        );
    }

    #[test]
    fn wire_kind_roundtrips() {
        for kind in [
            MessageKind::Capabilities,
            MessageKind::Offer,
            MessageKind::Answer,
            MessageKind::ProbeAck,
            MessageKind::Relay,
        ] {
            assert_eq!(wire_to_kind(kind_to_wire(&kind)), kind);
        }
    }
}
