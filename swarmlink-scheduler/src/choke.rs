//! Choke controller (system specification §4.9): a timer-driven admission
//! control policy deciding which peers a server-side session is willing to
//! serve chunks to.
//!
//! Grounded on the teacher's `HealthMonitor`
//! (`nyx-daemon/src/health_monitor.rs`): shared state behind an
//! `Arc<RwLock<...>>`, a `tokio::time::interval` loop owned by a spawned
//! task, started/stopped via a stored `Option<JoinHandle<()>>` rather than
//! leaking the task on drop.

use rand::seq::IteratorRandom;
use std::{collections::HashMap, sync::Arc, time::Duration};
use swarmlink_core::{ChokeState, PeerContribution, PeerIdentity};
use tokio::{sync::RwLock, task::JoinHandle, time::MissedTickBehavior};
use tracing::debug;

/// Unchoke interval (system specification §4.9 default `T`).
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

/// Number of peers unchoked at once, including the optimistic slot
/// (system specification §4.9 default `K`).
pub const DEFAULT_UNCHOKE_SLOTS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Rank by bytes served to us; reciprocate with the best uploaders.
    Normal,
    /// We have the complete file: split slots between peers we've never
    /// served and peers who have reciprocated, rotating periodically so
    /// every leecher eventually gets a turn (system specification §4.9
    /// "super-seed mode").
    SuperSeed,
}

struct Shared {
    peers: HashMap<PeerIdentity, PeerContribution>,
    unchoke_slots: usize,
    mode: Mode,
}

/// Implements [`swarmlink_protocol::ChokeGate`] indirectly: callers read
/// [`ChokeController::is_choked`] from a session to decide whether to serve
/// a `ChunkReq` or answer with `ChunkError::Choked`.
pub struct ChokeController {
    shared: Arc<RwLock<Shared>>,
    interval: Duration,
    task: Option<JoinHandle<()>>,
}

impl ChokeController {
    pub fn new(mode: Mode, unchoke_slots: usize, interval: Duration) -> Self {
        Self {
            shared: Arc::new(RwLock::new(Shared {
                peers: HashMap::new(),
                unchoke_slots,
                mode,
            })),
            interval,
            task: None,
        }
    }

    pub fn with_defaults(mode: Mode) -> Self {
        Self::new(mode, DEFAULT_UNCHOKE_SLOTS, DEFAULT_INTERVAL)
    }

    /// Register a peer so it starts out choked rather than absent (absent
    /// peers are treated as choked by [`is_choked`](Self::is_choked), but an
    /// explicit entry lets `bytes_served` accumulate before the first tick).
    pub async fn register_peer(&self, peer: PeerIdentity) {
        self.shared.write().await.peers.entry(peer).or_default();
    }

    pub async fn remove_peer(&self, peer: &PeerIdentity) {
        self.shared.write().await.peers.remove(peer);
    }

    pub async fn record_bytes_served(&self, peer: &PeerIdentity, bytes: u64) {
        self.shared
            .write()
            .await
            .peers
            .entry(peer.clone())
            .or_default()
            .record_bytes(bytes);
    }

    pub async fn is_choked(&self, peer: &PeerIdentity) -> bool {
        match self.shared.read().await.peers.get(peer) {
            Some(contribution) => contribution.choke_state == ChokeState::Choked,
            None => true,
        }
    }

    /// Spawn the periodic re-evaluation task. Mirrors the start/stop shape
    /// of a health-check loop: idempotent, replaces any previous task.
    pub fn start(&mut self) {
        if self.task.is_some() {
            return;
        }
        let shared = self.shared.clone();
        let interval = self.interval;
        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                Self::reevaluate(&shared).await;
            }
        }));
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    async fn reevaluate(shared: &Arc<RwLock<Shared>>) {
        let mut guard = shared.write().await;
        let unchoke_slots = guard.unchoke_slots;
        let mode = guard.mode;

        match mode {
            Mode::Normal => Self::reevaluate_normal(&mut guard.peers, unchoke_slots),
            Mode::SuperSeed => Self::reevaluate_super_seed(&mut guard.peers, unchoke_slots),
        }
    }

    /// Rank by `bytesServed` descending, unchoke the top `K-1`, choke
    /// everyone else, then pick one additional currently-choked peer at
    /// random for an optimistic unchoke (system specification §4.9).
    fn reevaluate_normal(peers: &mut HashMap<PeerIdentity, PeerContribution>, unchoke_slots: usize) {
        if peers.is_empty() {
            return;
        }
        let reciprocation_slots = unchoke_slots.saturating_sub(1);

        let mut ranked: Vec<PeerIdentity> = peers.keys().cloned().collect();
        ranked.sort_by(|a, b| peers[b].bytes_served.cmp(&peers[a].bytes_served));

        let reciprocated: std::collections::HashSet<PeerIdentity> =
            ranked.into_iter().take(reciprocation_slots).collect();

        for (peer, contribution) in peers.iter_mut() {
            contribution.choke_state = if reciprocated.contains(peer) {
                ChokeState::Unchoked
            } else {
                ChokeState::Choked
            };
        }

        let optimistic = peers
            .iter()
            .filter(|(_, c)| c.choke_state == ChokeState::Choked)
            .map(|(peer, _)| peer.clone())
            .choose(&mut rand::thread_rng());
        if let Some(peer) = optimistic {
            if let Some(contribution) = peers.get_mut(&peer) {
                contribution.choke_state = ChokeState::Optimistic;
                debug!(%peer, "optimistic unchoke");
            }
        }
    }

    /// Half the slots go to peers that have never been served anything by
    /// us yet, half to peers that have already reciprocated by re-uploading
    /// to others — approximated here by `bytes_served > 0`, since this
    /// controller only observes what a peer has sent *us*, which for a
    /// super-seed (complete-file) session is the peer's re-upload evidence.
    fn reevaluate_super_seed(peers: &mut HashMap<PeerIdentity, PeerContribution>, unchoke_slots: usize) {
        if peers.is_empty() {
            return;
        }
        let half = (unchoke_slots / 2).max(1);

        let never_served: Vec<PeerIdentity> = peers
            .iter()
            .filter(|(_, c)| c.bytes_served == 0)
            .map(|(p, _)| p.clone())
            .choose_multiple(&mut rand::thread_rng(), half);

        let mut reciprocated: Vec<PeerIdentity> = peers
            .iter()
            .filter(|(_, c)| c.bytes_served > 0)
            .map(|(p, _)| p.clone())
            .collect();
        reciprocated.sort_by(|a, b| peers[b].bytes_served.cmp(&peers[a].bytes_served));
        reciprocated.truncate(unchoke_slots.saturating_sub(never_served.len()));

        let unchoked: std::collections::HashSet<PeerIdentity> =
            never_served.into_iter().chain(reciprocated).collect();

        for (peer, contribution) in peers.iter_mut() {
            contribution.choke_state = if unchoked.contains(peer) {
                ChokeState::Unchoked
            } else {
                ChokeState::Choked
            };
        }
    }
}

impl Drop for ChokeController {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(name: &str) -> PeerIdentity {
        PeerIdentity::new(name)
    }

    #[tokio::test]
    async fn unknown_peer_is_treated_as_choked() {
        let controller = ChokeController::with_defaults(Mode::Normal);
        assert!(controller.is_choked(&peer("ghost")).await);
    }

    #[tokio::test]
    async fn top_reciprocators_are_unchoked_after_reevaluation() {
        let controller = ChokeController::new(Mode::Normal, 3, Duration::from_secs(1));
        for (name, bytes) in [("a", 1000u64), ("b", 500), ("c", 100), ("d", 0)] {
            controller.record_bytes_served(&peer(name), bytes).await;
        }

        let shared = controller.shared.clone();
        ChokeController::reevaluate(&shared).await;

        assert!(!controller.is_choked(&peer("a")).await);
        assert!(!controller.is_choked(&peer("b")).await);
        // third slot is either the next-best reciprocator or an optimistic pick
        let unchoked_count = {
            let guard = controller.shared.read().await;
            guard
                .peers
                .values()
                .filter(|c| c.choke_state != ChokeState::Choked)
                .count()
        };
        assert_eq!(unchoked_count, 3);
    }

    #[tokio::test]
    async fn super_seed_splits_slots_between_new_and_reciprocating_peers() {
        let controller = ChokeController::new(Mode::SuperSeed, 4, Duration::from_secs(1));
        for name in ["new-1", "new-2"] {
            controller.record_bytes_served(&peer(name), 0).await;
        }
        for (name, bytes) in [("old-1", 500u64), ("old-2", 200)] {
            controller.record_bytes_served(&peer(name), bytes).await;
        }

        let shared = controller.shared.clone();
        ChokeController::reevaluate(&shared).await;

        let guard = controller.shared.read().await;
        let unchoked = guard
            .peers
            .values()
            .filter(|c| c.choke_state == ChokeState::Unchoked)
            .count();
        assert!(unchoked >= 2, "expected at least one peer from each pool to be unchoked");
    }

    #[tokio::test]
    async fn start_and_stop_do_not_panic_and_are_idempotent() {
        let mut controller = ChokeController::with_defaults(Mode::Normal);
        controller.start();
        controller.start();
        controller.stop();
        controller.stop();
    }
}
