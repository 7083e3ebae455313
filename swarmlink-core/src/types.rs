//! Data model for the swarmlink workspace (system specification §3).

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{
    collections::{BTreeSet, HashMap, HashSet},
    fmt,
    str::FromStr,
    time::{Duration, Instant},
};

/// Default time-to-live for a [`PeerRecord`] before it is evicted from any
/// cache that holds it.
pub const PEER_RECORD_TTL: Duration = Duration::from_secs(3600);

/// Opaque, process-lifetime-scoped identifier for a node. Assigned at
/// startup and used for signalling rendezvous and reputation bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerIdentity(String);

impl PeerIdentity {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a random identity suitable for a single process run.
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for PeerIdentity {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Application-chosen identifier used for discovery. Opaque to swarmlink;
/// callers decide what it means (a name, a URL, a tracker info-hash, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentId(String);

impl ContentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A 32-byte cryptographic digest over the full content of a file, used for
/// integrity verification. The mapping between a [`ContentId`] and a
/// `ContentDigest` is one-to-one (system specification §3 invariant).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentDigest([u8; 32]);

impl ContentDigest {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Incrementally hash `chunks` (already in index order) into a digest.
    /// Used by the client to verify a completed download without
    /// re-reading the whole file from disk.
    pub fn hasher() -> Sha256 {
        Sha256::new()
    }

    pub fn finalize(hasher: Sha256) -> Self {
        let out = hasher.finalize();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&out);
        Self(bytes)
    }

    pub fn of_slice(data: &[u8]) -> Self {
        let mut h = Self::hasher();
        h.update(data);
        Self::finalize(h)
    }
}

impl fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentDigest({})", hex::encode(self.0))
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for ContentDigest {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|e| e.to_string())?;
        if bytes.len() != 32 {
            return Err(format!("expected 32 bytes, got {}", bytes.len()));
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes);
        Ok(Self(out))
    }
}

/// Address family for a candidate or peer address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Family {
    V4,
    V6,
}

/// Byte-stream transport carrying a [`crate::types::Candidate`] or a
/// [`Channel`](trait@crate::types::ChunkState) (see `swarmlink-transport`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Transport {
    Tcp,
    Udp,
}

/// Source backend that produced a [`PeerRecord`]. Ordering here (declared
/// top to bottom) is also the tie-break priority used by the discovery
/// aggregator: `Manual > Local > Dht > Coord > Pex`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PeerSource {
    Manual,
    Local,
    Dht,
    Coord,
    Pex,
}

impl PeerSource {
    /// Lower number sorts first (higher priority).
    fn rank(self) -> u8 {
        match self {
            PeerSource::Manual => 0,
            PeerSource::Local => 1,
            PeerSource::Dht => 2,
            PeerSource::Coord => 3,
            PeerSource::Pex => 4,
        }
    }
}

impl PartialOrd for PeerSource {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PeerSource {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.rank().cmp(&other.rank())
    }
}

/// A reachable `(family, host, port)` tuple advertised by a peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerAddress {
    pub family: Family,
    pub host: String,
    pub port: u16,
}

/// A discovered peer, merged across backends by `peerId` (system
/// specification §3). `lastSeen`/`confidence` take the max across merges;
/// `addresses` is set-unioned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerRecord {
    pub peer_id: PeerIdentity,
    pub addresses: HashSet<PeerAddress>,
    #[serde(skip, default = "Instant::now")]
    pub last_seen: Instant,
    pub source: PeerSource,
    pub confidence: f64,
}

// `HashSet<PeerAddress>` needs `PeerAddress: Eq + Hash`, already derived
// above; `Instant` is not serializable so it is skipped and reset on
// deserialize (process-local caches only, per the no-custom-database
// non-goal).

impl PeerRecord {
    pub fn new(peer_id: PeerIdentity, source: PeerSource, confidence: f64) -> Self {
        Self {
            peer_id,
            addresses: HashSet::new(),
            last_seen: Instant::now(),
            source,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.last_seen.elapsed() > ttl
    }

    /// Merge `other` into `self` per the §3 merge rule: `lastSeen = max`,
    /// `confidence = max`, `addresses` set-unioned. `source` keeps whichever
    /// side has the higher discovery priority so later ranking reflects the
    /// best channel that has ever seen this peer.
    pub fn merge(&mut self, other: &PeerRecord) {
        if other.last_seen > self.last_seen {
            self.last_seen = other.last_seen;
        }
        self.confidence = self.confidence.max(other.confidence);
        self.addresses.extend(other.addresses.iter().cloned());
        if other.source < self.source {
            self.source = other.source;
        }
    }
}

/// Kind of ICE-style candidate (system specification §3 preference
/// ordering: host > server-reflexive > relay).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CandidateKind {
    Host,
    ServerReflexive,
    Relay,
}

impl CandidateKind {
    fn type_preference(self) -> u32 {
        match self {
            CandidateKind::Host => 126,
            CandidateKind::ServerReflexive => 100,
            CandidateKind::Relay => 0,
        }
    }
}

/// A concrete `(address, port, transport)` a peer expects to be reachable
/// on, with a priority computed per the standard preference ordering (host
/// > srflx > relay; IPv6 > IPv4 when preferred; TCP > UDP when preferred;
/// lower port-change count preferred).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub kind: CandidateKind,
    pub family: Family,
    pub transport: Transport,
    pub host: String,
    pub port: u16,
    pub priority: u32,
    /// Number of times this candidate's external port has been observed to
    /// change across successive mappings (used by the port predictor and as
    /// a priority tie-break: fewer changes is preferred).
    pub port_change_count: u32,
}

impl Candidate {
    /// Compute priority per RFC 8445-style weighting, generalized with the
    /// `prefer_ipv6`/`prefer_tcp` knobs from the orchestrator options.
    pub fn compute_priority(
        kind: CandidateKind,
        family: Family,
        transport: Transport,
        port_change_count: u32,
        prefer_ipv6: bool,
        prefer_transport_tcp: bool,
    ) -> u32 {
        let type_pref = kind.type_preference();
        let family_pref: u32 = match (family, prefer_ipv6) {
            (Family::V6, true) | (Family::V4, false) => 10,
            _ => 5,
        };
        let transport_pref: u32 = match (transport, prefer_transport_tcp) {
            (Transport::Tcp, true) | (Transport::Udp, false) => 2,
            _ => 1,
        };
        let change_penalty = port_change_count.min(8);
        // (2^24)*type + (2^8)*(family*transport) - change_penalty, kept well
        // clear of u32 overflow for realistic inputs.
        (type_pref << 24) + ((family_pref * transport_pref) << 8) - change_penalty
    }

    pub fn new(
        kind: CandidateKind,
        family: Family,
        transport: Transport,
        host: impl Into<String>,
        port: u16,
        prefer_ipv6: bool,
        prefer_transport_tcp: bool,
    ) -> Self {
        let priority = Self::compute_priority(kind, family, transport, 0, prefer_ipv6, prefer_transport_tcp);
        Self {
            kind,
            family,
            transport,
            host: host.into(),
            port,
            priority,
            port_change_count: 0,
        }
    }
}

/// File-level metadata exchanged once per `(peer, content)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub digest: ContentDigest,
    pub total_bytes: u64,
    pub chunk_size: u32,
}

impl FileMetadata {
    pub fn new(digest: ContentDigest, total_bytes: u64, chunk_size: u32) -> Self {
        Self {
            digest,
            total_bytes,
            chunk_size,
        }
    }

    pub fn total_chunks(&self) -> u32 {
        if self.total_bytes == 0 {
            return 0;
        }
        let chunk_size = self.chunk_size as u64;
        (self.total_bytes.div_ceil(chunk_size)) as u32
    }

    /// Byte range `[start, end)` for `chunk_index`, clamped to `total_bytes`.
    pub fn chunk_range(&self, chunk_index: u32) -> (u64, u64) {
        let start = chunk_index as u64 * self.chunk_size as u64;
        let end = (start + self.chunk_size as u64).min(self.total_bytes);
        (start, end)
    }

    pub fn chunk_len(&self, chunk_index: u32) -> usize {
        let (start, end) = self.chunk_range(chunk_index);
        (end - start) as usize
    }
}

/// Per-content download state held by the client-side scheduler (system
/// specification §3). `received ∩ inflight = ∅` is maintained by
/// [`ChunkState::mark_inflight`] / [`ChunkState::mark_received`].
#[derive(Debug, Clone, Default)]
pub struct ChunkState {
    received: BTreeSet<u32>,
    inflight: HashMap<u32, (PeerIdentity, Instant)>,
}

impl ChunkState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_received(&self, chunk: u32) -> bool {
        self.received.contains(&chunk)
    }

    pub fn is_inflight(&self, chunk: u32) -> bool {
        self.inflight.contains_key(&chunk)
    }

    pub fn received_count(&self) -> usize {
        self.received.len()
    }

    pub fn inflight_count_for(&self, peer: &PeerIdentity) -> usize {
        self.inflight.values().filter(|(p, _)| p == peer).count()
    }

    /// Chunk indices currently assigned to `peer`, used to requeue its work
    /// when the scheduler drops it after repeated failures.
    pub fn chunks_inflight_for(&self, peer: &PeerIdentity) -> Vec<u32> {
        self.inflight
            .iter()
            .filter(|(_, (p, _))| p == peer)
            .map(|(chunk, _)| *chunk)
            .collect()
    }

    pub fn mark_inflight(&mut self, chunk: u32, peer: PeerIdentity, deadline: Instant) {
        debug_assert!(!self.received.contains(&chunk));
        self.inflight.insert(chunk, (peer, deadline));
    }

    pub fn mark_received(&mut self, chunk: u32) -> Option<PeerIdentity> {
        let owner = self.inflight.remove(&chunk).map(|(p, _)| p);
        self.received.insert(chunk);
        owner
    }

    /// Return the chunk to the missing set (peer error or deadline).
    pub fn requeue(&mut self, chunk: u32) -> Option<PeerIdentity> {
        self.inflight.remove(&chunk).map(|(p, _)| p)
    }

    pub fn owner_of(&self, chunk: u32) -> Option<PeerIdentity> {
        self.inflight.get(&chunk).map(|(peer, _)| peer.clone())
    }

    pub fn expired_before(&self, now: Instant) -> Vec<u32> {
        self.inflight
            .iter()
            .filter(|(_, (_, deadline))| *deadline <= now)
            .map(|(chunk, _)| *chunk)
            .collect()
    }

    pub fn missing(&self, total_chunks: u32) -> Vec<u32> {
        (0..total_chunks)
            .filter(|c| !self.received.contains(c) && !self.inflight.contains_key(c))
            .collect()
    }

    pub fn is_complete(&self, total_chunks: u32) -> bool {
        self.received.len() as u32 == total_chunks
    }

    pub fn mark_received_range(&mut self, chunks: impl IntoIterator<Item = u32>) {
        self.received.extend(chunks);
    }

    /// Chunk indices a partially-downloaded file of `file_len` bytes can
    /// trust as already received, given `meta` (system specification §8
    /// property 7, "resume from a partial download"). Only whole chunks
    /// that end at or before `file_len` count; a chunk straddling the
    /// current end of file is left out so the caller re-fetches and
    /// verifies it rather than trusting a possibly-truncated write.
    pub fn scan_existing(file_len: u64, meta: &FileMetadata) -> Vec<u32> {
        let total_chunks = meta.total_chunks();
        (0..total_chunks)
            .take_while(|&chunk| meta.chunk_range(chunk).1 <= file_len)
            .collect()
    }
}

/// Server-side admission-control state for one peer, mutated only by the
/// choke controller timer task (system specification §3, §4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChokeState {
    Choked,
    Unchoked,
    Optimistic,
}

#[derive(Debug, Clone)]
pub struct PeerContribution {
    pub bytes_served: u64,
    pub choke_state: ChokeState,
    pub last_update: Instant,
}

impl Default for PeerContribution {
    fn default() -> Self {
        Self {
            bytes_served: 0,
            choke_state: ChokeState::Choked,
            last_update: Instant::now(),
        }
    }
}

impl PeerContribution {
    pub fn record_bytes(&mut self, n: u64) {
        self.bytes_served += n;
        self.last_update = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_digest_round_trips_through_hex() {
        let digest = ContentDigest::of_slice(b"hello world");
        let s = digest.to_string();
        let parsed: ContentDigest = s.parse().unwrap();
        assert_eq!(digest, parsed);
    }

    #[test]
    fn content_digest_rejects_wrong_length() {
        assert!("abcd".parse::<ContentDigest>().is_err());
    }

    #[test]
    fn file_metadata_total_chunks_rounds_up() {
        let meta = FileMetadata::new(ContentDigest::from_bytes([0; 32]), 10_485_760, 65_536);
        assert_eq!(meta.total_chunks(), 160);

        let meta = FileMetadata::new(ContentDigest::from_bytes([0; 32]), 1, 65_536);
        assert_eq!(meta.total_chunks(), 1);
        assert_eq!(meta.chunk_len(0), 1);

        let meta = FileMetadata::new(ContentDigest::from_bytes([0; 32]), 0, 65_536);
        assert_eq!(meta.total_chunks(), 0);
    }

    #[test]
    fn scan_existing_only_trusts_whole_chunks() {
        let meta = FileMetadata::new(ContentDigest::from_bytes([0; 32]), 250, 100);
        assert_eq!(ChunkState::scan_existing(0, &meta), Vec::<u32>::new());
        assert_eq!(ChunkState::scan_existing(100, &meta), vec![0]);
        assert_eq!(ChunkState::scan_existing(150, &meta), vec![0]);
        assert_eq!(ChunkState::scan_existing(200, &meta), vec![0, 1]);
        assert_eq!(ChunkState::scan_existing(250, &meta), vec![0, 1, 2]);
    }

    #[test]
    fn chunk_state_keeps_received_and_inflight_disjoint() {
        let mut state = ChunkState::new();
        let peer = PeerIdentity::new("peer-a");
        state.mark_inflight(3, peer.clone(), Instant::now());
        assert!(state.is_inflight(3));
        let owner = state.mark_received(3);
        assert_eq!(owner, Some(peer));
        assert!(state.is_received(3));
        assert!(!state.is_inflight(3));
    }

    #[test]
    fn peer_record_merge_unions_addresses_and_takes_max() {
        let mut a = PeerRecord::new(PeerIdentity::new("p"), PeerSource::Dht, 0.2);
        a.addresses.insert(PeerAddress {
            family: Family::V4,
            host: "10.0.0.1".into(),
            port: 1234,
        });
        let mut b = PeerRecord::new(PeerIdentity::new("p"), PeerSource::Local, 0.9);
        b.addresses.insert(PeerAddress {
            family: Family::V4,
            host: "10.0.0.2".into(),
            port: 4321,
        });

        a.merge(&b);
        assert_eq!(a.addresses.len(), 2);
        assert_eq!(a.confidence, 0.9);
        assert_eq!(a.source, PeerSource::Local);
    }

    #[test]
    fn candidate_priority_prefers_host_over_relay() {
        let host = Candidate::new(
            CandidateKind::Host,
            Family::V4,
            Transport::Udp,
            "10.0.0.1",
            1,
            true,
            false,
        );
        let relay = Candidate::new(
            CandidateKind::Relay,
            Family::V4,
            Transport::Udp,
            "10.0.0.1",
            1,
            true,
            false,
        );
        assert!(host.priority > relay.priority);
    }
}
