//! Multi-source chunk scheduler (system specification §4.8): owns the
//! `ChunkState` for one download and decides, on every pull, which
//! `(peer, chunkIndex)` pair to request next across every channel currently
//! open for this content.
//!
//! Grounded on the teacher's `WeightedRoundRobinScheduler`
//! (`nyx-stream/src/scheduler_v2.rs`): per-peer weight bookkeeping in a
//! `HashMap`, a `stats()` snapshot struct, and weight updates driven by
//! measured performance rather than a fixed priority. The selection policy
//! itself is different — fewest-in-flight-with-throughput-tiebreak instead
//! of smooth weighted round robin — because this scheduler assigns chunks,
//! not whole packets, to one of several concurrent sources.

use std::{
    collections::{HashMap, HashSet},
    time::{Duration, Instant},
};
use swarmlink_core::{ChunkState, PeerIdentity};
use tracing::{debug, warn};

/// A peer is dropped after this many consecutive request failures/timeouts
/// (system specification §4.8 "Retry").
pub const MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// Default endgame trigger: once this few chunks remain, request each of
/// them from every idle peer (system specification §4.8 "Endgame").
pub const DEFAULT_ENDGAME_THRESHOLD: usize = 5;

/// Default cap on simultaneously in-flight requests to one peer.
pub const DEFAULT_MAX_INFLIGHT_PER_PEER: usize = 5;

#[derive(Debug, Clone)]
struct PeerWeight {
    throughput_bytes_per_sec: f64,
    consecutive_failures: u32,
}

impl Default for PeerWeight {
    fn default() -> Self {
        Self { throughput_bytes_per_sec: 0.0, consecutive_failures: 0 }
    }
}

impl PeerWeight {
    /// Exponential moving average, same shape as the teacher's RTT-driven
    /// weight update: recent samples dominate but a single slow chunk
    /// doesn't erase a peer's track record.
    fn record_throughput(&mut self, bytes: u64, elapsed: Duration) {
        let sample = if elapsed.as_secs_f64() > 0.0 { bytes as f64 / elapsed.as_secs_f64() } else { bytes as f64 };
        const ALPHA: f64 = 0.3;
        self.throughput_bytes_per_sec = if self.throughput_bytes_per_sec == 0.0 {
            sample
        } else {
            ALPHA * sample + (1.0 - ALPHA) * self.throughput_bytes_per_sec
        };
        self.consecutive_failures = 0;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SchedulerOptions {
    pub max_inflight_per_peer: usize,
    pub endgame_threshold: usize,
    pub rarest_first: bool,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            max_inflight_per_peer: DEFAULT_MAX_INFLIGHT_PER_PEER,
            endgame_threshold: DEFAULT_ENDGAME_THRESHOLD,
            rarest_first: false,
        }
    }
}

/// One `(peer, chunkIndex)` pair the scheduler wants dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub peer: PeerIdentity,
    pub chunk_index: u32,
    /// Set when this assignment is a duplicate endgame request; the caller
    /// should `Cancel` the other copies once any one of them completes.
    pub is_endgame_duplicate: bool,
}

/// Snapshot of one peer's contribution, exposed via [`Scheduler::progress`].
#[derive(Debug, Clone)]
pub struct PeerStats {
    pub peer: PeerIdentity,
    pub in_flight: usize,
    pub throughput_bytes_per_sec: f64,
}

#[derive(Debug, Clone)]
pub struct Progress {
    pub received_chunks: usize,
    pub total_chunks: u32,
    pub per_peer: Vec<PeerStats>,
}

pub struct Scheduler {
    total_chunks: u32,
    state: ChunkState,
    peers: HashMap<PeerIdentity, PeerWeight>,
    have: HashMap<PeerIdentity, HashSet<u32>>,
    endgame_assignees: HashMap<u32, HashSet<PeerIdentity>>,
    options: SchedulerOptions,
}

impl Scheduler {
    pub fn new(total_chunks: u32, options: SchedulerOptions) -> Self {
        Self {
            total_chunks,
            state: ChunkState::new(),
            peers: HashMap::new(),
            have: HashMap::new(),
            endgame_assignees: HashMap::new(),
            options,
        }
    }

    pub fn register_peer(&mut self, peer: PeerIdentity) {
        self.peers.entry(peer).or_default();
    }

    pub fn remove_peer(&mut self, peer: &PeerIdentity) -> Vec<u32> {
        self.peers.remove(peer);
        self.have.remove(peer);
        let requeued = self.state.chunks_inflight_for(peer);
        for chunk in &requeued {
            self.state.requeue(*chunk);
        }
        requeued
    }

    /// Record (or replace) the set of chunks a peer has announced via
    /// `Have` frames, used by rarest-first selection.
    pub fn record_have(&mut self, peer: PeerIdentity, chunks: impl IntoIterator<Item = u32>) {
        self.have.entry(peer).or_default().extend(chunks);
    }

    pub fn mark_received_from_resume(&mut self, chunks: impl IntoIterator<Item = u32>) {
        self.state.mark_received_range(chunks);
    }

    pub fn is_complete(&self) -> bool {
        self.state.is_complete(self.total_chunks)
    }

    /// Requeues every chunk whose deadline has passed and applies the same
    /// consecutive-failure accounting as an explicit [`record_failure`].
    /// Returns the peers dropped as a result, each paired with the chunks
    /// that now need reassignment.
    pub fn sweep_timeouts(&mut self, now: Instant) -> Vec<(PeerIdentity, Vec<u32>)> {
        let mut dropped: HashMap<PeerIdentity, Vec<u32>> = HashMap::new();
        for chunk in self.state.expired_before(now) {
            let Some(peer) = self.state.owner_of(chunk) else { continue };
            let (was_dropped, requeued) = self.record_failure(&peer, chunk);
            if was_dropped {
                dropped.entry(peer).or_default().extend(requeued);
            }
        }
        dropped.into_iter().collect()
    }

    /// Chooses the next batch of `(peer, chunkIndex)` pairs to dispatch.
    /// Call this after every state change (a response arrives, a peer is
    /// added/removed, a deadline fires) rather than on a fixed timer — the
    /// scheduler is reactive, not polled.
    pub fn assign(&mut self, deadline: Duration) -> Vec<Assignment> {
        let missing = self.state.missing(self.total_chunks);
        if missing.is_empty() {
            return Vec::new();
        }

        if missing.len() <= self.options.endgame_threshold {
            return self.assign_endgame(missing, deadline);
        }

        self.assign_normal(missing, deadline)
    }

    fn eligible_peers(&self) -> Vec<PeerIdentity> {
        self.peers
            .iter()
            .filter(|(peer, _)| self.state.inflight_count_for(peer) < self.options.max_inflight_per_peer)
            .map(|(peer, _)| peer.clone())
            .collect()
    }

    fn rank_missing(&self, mut missing: Vec<u32>) -> Vec<u32> {
        if self.options.rarest_first {
            missing.sort_by_key(|chunk| self.availability(*chunk));
        }
        missing
    }

    /// Number of known peers advertising `chunk` via `Have`. A peer with no
    /// recorded `Have` set at all is assumed to have everything (the frame
    /// is optional per system specification §4.7), so it never counts
    /// toward rarity.
    fn availability(&self, chunk: u32) -> usize {
        self.have.values().filter(|set| !set.is_empty() && set.contains(&chunk)).count()
    }

    fn assign_normal(&mut self, missing: Vec<u32>, deadline: Duration) -> Vec<Assignment> {
        let ranked = self.rank_missing(missing);
        let mut assignments = Vec::new();

        for chunk in ranked {
            let mut candidates = self.eligible_peers();
            if candidates.is_empty() {
                break;
            }
            candidates.sort_by(|a, b| {
                let inflight_a = self.state.inflight_count_for(a);
                let inflight_b = self.state.inflight_count_for(b);
                inflight_a.cmp(&inflight_b).then_with(|| {
                    let throughput_a = self.peers.get(a).map(|w| w.throughput_bytes_per_sec).unwrap_or(0.0);
                    let throughput_b = self.peers.get(b).map(|w| w.throughput_bytes_per_sec).unwrap_or(0.0);
                    throughput_b.partial_cmp(&throughput_a).unwrap_or(std::cmp::Ordering::Equal)
                })
            });

            let Some(peer) = candidates.into_iter().next() else { break };
            self.state.mark_inflight(chunk, peer.clone(), Instant::now() + deadline);
            assignments.push(Assignment { peer, chunk_index: chunk, is_endgame_duplicate: false });
        }

        assignments
    }

    fn assign_endgame(&mut self, missing: Vec<u32>, deadline: Duration) -> Vec<Assignment> {
        let mut assignments = Vec::new();
        let candidates = self.eligible_peers();

        for chunk in missing {
            let already_first = !self.state.is_inflight(chunk);
            let assignees = self.endgame_assignees.entry(chunk).or_default();
            for peer in &candidates {
                if assignees.contains(peer) {
                    continue;
                }
                assignees.insert(peer.clone());
                let is_first = already_first && assignees.len() == 1;
                if is_first {
                    self.state.mark_inflight(chunk, peer.clone(), Instant::now() + deadline);
                }
                assignments.push(Assignment { peer: peer.clone(), chunk_index: chunk, is_endgame_duplicate: !is_first });
            }
        }

        assignments
    }

    /// A `ChunkResp` arrived and was written to disk. Returns the other
    /// peers who were sent a duplicate endgame request for this chunk, so
    /// the caller can send them `Cancel`.
    pub fn record_success(&mut self, peer: &PeerIdentity, chunk_index: u32, bytes: u64, elapsed: Duration) -> Vec<PeerIdentity> {
        self.state.mark_received(chunk_index);
        if let Some(weight) = self.peers.get_mut(peer) {
            weight.record_throughput(bytes, elapsed);
        }
        self.endgame_assignees
            .remove(&chunk_index)
            .map(|set| set.into_iter().filter(|p| p != peer).collect())
            .unwrap_or_default()
    }

    /// A peer errored or its deadline passed. Returns `true` if the peer
    /// was dropped (third consecutive failure) along with every chunk that
    /// now needs reassignment — `chunk_index` itself plus, if the peer was
    /// dropped, any other chunk still in flight to it.
    pub fn record_failure(&mut self, peer: &PeerIdentity, chunk_index: u32) -> (bool, Vec<u32>) {
        self.state.requeue(chunk_index);
        self.endgame_assignees.remove(&chunk_index);

        let Some(weight) = self.peers.get_mut(peer) else { return (false, vec![chunk_index]) };
        weight.consecutive_failures += 1;
        if weight.consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
            warn!(%peer, "dropping peer after repeated failures");
            let mut requeued = self.remove_peer(peer);
            requeued.push(chunk_index);
            return (true, requeued);
        }
        debug!(%peer, chunk_index, failures = weight.consecutive_failures, "chunk request failed");
        (false, vec![chunk_index])
    }

    pub fn progress(&self) -> Progress {
        Progress {
            received_chunks: self.state.received_count(),
            total_chunks: self.total_chunks,
            per_peer: self
                .peers
                .iter()
                .map(|(peer, weight)| PeerStats {
                    peer: peer.clone(),
                    in_flight: self.state.inflight_count_for(peer),
                    throughput_bytes_per_sec: weight.throughput_bytes_per_sec,
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(name: &str) -> PeerIdentity {
        PeerIdentity::new(name)
    }

    #[test]
    fn assigns_missing_chunks_to_idle_peers_round_robin() {
        let mut scheduler = Scheduler::new(4, SchedulerOptions { endgame_threshold: 0, ..Default::default() });
        scheduler.register_peer(peer("a"));
        scheduler.register_peer(peer("b"));

        let assignments = scheduler.assign(Duration::from_secs(30));
        assert_eq!(assignments.len(), 4.min(2 * DEFAULT_MAX_INFLIGHT_PER_PEER));
        let chunks: HashSet<u32> = assignments.iter().map(|a| a.chunk_index).collect();
        assert_eq!(chunks, (0..4).collect());
    }

    #[test]
    fn skips_peers_at_their_inflight_cap() {
        let mut scheduler = Scheduler::new(
            10,
            SchedulerOptions { max_inflight_per_peer: 2, endgame_threshold: 0, ..Default::default() },
        );
        scheduler.register_peer(peer("a"));
        let assignments = scheduler.assign(Duration::from_secs(30));
        assert_eq!(assignments.len(), 2);
        let more = scheduler.assign(Duration::from_secs(30));
        assert!(more.is_empty(), "peer a is already at its cap");
    }

    #[test]
    fn rarest_first_prefers_the_chunk_fewer_peers_have() {
        let mut scheduler = Scheduler::new(
            3,
            SchedulerOptions { max_inflight_per_peer: 1, endgame_threshold: 0, rarest_first: true },
        );
        scheduler.register_peer(peer("a"));
        // both peers have chunk 0; only "a" has announced 1 and 2, so those
        // are rarer and should be preferred over 0.
        scheduler.record_have(peer("a"), [0, 1, 2]);
        scheduler.record_have(peer("b"), [0]);

        let assignments = scheduler.assign(Duration::from_secs(30));
        assert_eq!(assignments.len(), 1);
        assert_ne!(assignments[0].chunk_index, 0);
    }

    #[test]
    fn endgame_requests_every_missing_chunk_from_every_idle_peer() {
        let mut scheduler = Scheduler::new(2, SchedulerOptions { endgame_threshold: 5, ..Default::default() });
        scheduler.register_peer(peer("a"));
        scheduler.register_peer(peer("b"));

        let assignments = scheduler.assign(Duration::from_secs(30));
        assert_eq!(assignments.len(), 4); // 2 chunks * 2 peers
        let duplicates = assignments.iter().filter(|a| a.is_endgame_duplicate).count();
        assert_eq!(duplicates, 2);
    }

    #[test]
    fn success_clears_duplicate_endgame_assignments() {
        let mut scheduler = Scheduler::new(1, SchedulerOptions { endgame_threshold: 5, ..Default::default() });
        scheduler.register_peer(peer("a"));
        scheduler.register_peer(peer("b"));
        scheduler.assign(Duration::from_secs(30));

        let to_cancel = scheduler.record_success(&peer("a"), 0, 1024, Duration::from_millis(100));
        assert_eq!(to_cancel, vec![peer("b")]);
        assert!(scheduler.is_complete());
    }

    #[test]
    fn drops_peer_after_three_consecutive_failures() {
        let mut scheduler = Scheduler::new(1, SchedulerOptions { endgame_threshold: 0, ..Default::default() });
        scheduler.register_peer(peer("a"));
        scheduler.assign(Duration::from_secs(30));

        let (dropped1, _) = scheduler.record_failure(&peer("a"), 0);
        assert!(!dropped1);
        scheduler.assign(Duration::from_secs(30));
        let (dropped2, _) = scheduler.record_failure(&peer("a"), 0);
        assert!(!dropped2);
        scheduler.assign(Duration::from_secs(30));
        let (dropped3, requeued) = scheduler.record_failure(&peer("a"), 0);
        assert!(dropped3);
        assert_eq!(requeued, vec![0]);
    }
}
