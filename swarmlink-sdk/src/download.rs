//! Multi-peer download driver (system specification §4.7/§4.8 composed
//! together): connects to every peer the discovery aggregator and
//! orchestrator can reach for one content id, then runs a single scheduler
//! loop that assigns chunks across all of them.
//!
//! `swarmlink_protocol::client::download` only drives one already-connected
//! peer end to end — it owns the full missing-chunk set itself, which
//! leaves no seam for an external multi-source scheduler to hand it a
//! changing subset of chunks. This module instead talks `Frame`s directly:
//! one reader task per peer channel forwards `recv_frame` results into a
//! single aggregated `mpsc` channel, and one central loop here is the only
//! thing that touches the `Scheduler`, the output file, and the rolling
//! hasher — matching the spec's "no shared-mutable state across parallel
//! tasks inside the scheduler" requirement the same way a single-writer
//! actor would.

use crate::events::SdkEvent;
use crate::node::Node;
use std::{collections::HashMap, path::Path, sync::Arc, time::Duration};
use swarmlink_core::{
    ChunkState, ContentDigest, ContentId, Error, FileMetadata, PeerIdentity, Result,
};
use swarmlink_protocol::{
    client::{fetch_metadata, OrderedHasher},
    frame::{ChunkError, Frame},
    wire::{recv_frame, send_frame},
};
use swarmlink_scheduler::{Scheduler, SchedulerOptions};
use swarmlink_signal::CoordinationStore;
use swarmlink_transport::Channel;
use tokio::{
    fs::OpenOptions,
    io::{AsyncSeekExt, AsyncWriteExt},
    sync::mpsc,
};
use tracing::{debug, info, warn};

/// How often the driver wakes up even with no incoming frames, to sweep
/// chunk deadlines that have silently expired (system specification §4.8
/// "Retry" — a stalled peer that never answers must still be detected).
const TIMEOUT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

pub struct DownloadRequest {
    pub content: ContentId,
    pub expected_digest: ContentDigest,
    pub max_peers: usize,
    pub events: Option<mpsc::Sender<SdkEvent>>,
}

impl DownloadRequest {
    pub fn new(content: ContentId, expected_digest: ContentDigest) -> Self {
        Self { content, expected_digest, max_peers: 8, events: None }
    }

    pub fn with_max_peers(mut self, max_peers: usize) -> Self {
        self.max_peers = max_peers;
        self
    }

    pub fn with_events(mut self, events: mpsc::Sender<SdkEvent>) -> Self {
        self.events = Some(events);
        self
    }
}

#[derive(Debug)]
pub struct DownloadOutcome {
    pub total_bytes: u64,
    pub total_chunks: u32,
}

/// One frame arriving off a per-peer reader task, or that task reporting
/// its channel died.
enum DriverEvent {
    Frame(PeerIdentity, Frame),
    Disconnected(PeerIdentity),
}

impl<S: CoordinationStore + 'static> Node<S> {
    /// Downloads `request.content` into `output_path`, resuming from
    /// whatever whole chunks are already present on disk (system
    /// specification §8 property 7).
    pub async fn download(&self, request: DownloadRequest, output_path: impl AsRef<Path>) -> Result<DownloadOutcome> {
        let emit = |event: SdkEvent, sender: &Option<mpsc::Sender<SdkEvent>>| {
            if let Some(sender) = sender {
                let _ = sender.try_send(event);
            }
        };

        let candidates: Vec<PeerIdentity> =
            self.find_peers(&request.content).await.into_iter().filter(|p| p != self.self_id()).collect();
        if candidates.is_empty() {
            return Err(Error::NoPeers);
        }

        let connect_options = self.connect_options();
        let mut channels: HashMap<PeerIdentity, Arc<dyn Channel>> = HashMap::new();
        for remote in candidates.into_iter().take(request.max_peers) {
            match self.orchestrator().connect(self.self_id(), &remote, connect_options.clone()).await {
                Ok(channel) => {
                    info!(peer = %remote, "connected for download");
                    emit(SdkEvent::PeerConnected { peer: remote.clone() }, &request.events);
                    channels.insert(remote, Arc::from(channel));
                }
                Err(failure) => {
                    warn!(peer = %remote, %failure, "could not connect to candidate peer");
                    emit(SdkEvent::PeerFailed { peer: remote, reason: failure.to_string() }, &request.events);
                }
            }
        }
        if channels.is_empty() {
            return Err(Error::NoPeers);
        }

        let (first_peer, first_channel) = channels.iter().next().map(|(p, c)| (p.clone(), c.clone())).expect("non-empty");
        let meta = fetch_metadata(first_channel.as_ref(), &request.content).await?;
        if meta.digest != request.expected_digest {
            return Err(Error::integrity("remote metadata digest does not match expected content"));
        }
        let file_meta = FileMetadata::new(meta.digest, meta.total_bytes, meta.chunk_size);

        let mut file = OpenOptions::new().create(true).read(true).write(true).open(output_path.as_ref()).await?;
        let existing_len = file.metadata().await?.len();
        file.set_len(meta.total_bytes).await?;
        let already_present = ChunkState::scan_existing(existing_len, &file_meta);
        debug!(resumed_chunks = already_present.len(), total_chunks = meta.total_chunks, "starting download");

        let scheduler_options =
            SchedulerOptions { endgame_threshold: self.config().endgame_threshold, ..SchedulerOptions::default() };
        let mut scheduler = Scheduler::new(meta.total_chunks, scheduler_options);
        scheduler.mark_received_from_resume(already_present.iter().copied());
        for peer in channels.keys() {
            scheduler.register_peer(peer.clone());
        }

        let mut hasher = if already_present.is_empty() { Some(OrderedHasher::new()) } else { None };
        // Tracks which peer supplied each chunk written this session, so a
        // digest mismatch at the end can penalize exactly the peers that
        // contributed (system specification §4.7/§8 scenario 5).
        let mut chunk_owners: HashMap<u32, PeerIdentity> = HashMap::new();

        let (tx, mut rx) = mpsc::channel::<DriverEvent>(256);
        let mut readers = Vec::new();
        for (peer, channel) in &channels {
            let peer = peer.clone();
            let channel = channel.clone();
            let tx = tx.clone();
            readers.push(tokio::spawn(async move {
                loop {
                    match recv_frame(channel.as_ref()).await {
                        Ok(frame) => {
                            if tx.send(DriverEvent::Frame(peer.clone(), frame)).await.is_err() {
                                return;
                            }
                        }
                        Err(_closed) => {
                            let _ = tx.send(DriverEvent::Disconnected(peer)).await;
                            return;
                        }
                    }
                }
            }));
        }
        drop(tx);

        let chunk_timeout = Duration::from_millis(self.config().peer_timeout_ms);
        let mut sweep = tokio::time::interval(TIMEOUT_SWEEP_INTERVAL);

        let result: Result<()> = 'driver: loop {
            if scheduler.is_complete() {
                break Ok(());
            }

            for assignment in scheduler.assign(chunk_timeout) {
                let Some(channel) = channels.get(&assignment.peer).cloned() else { continue };
                let req = Frame::ChunkReq { content_id: request.content.clone(), chunk_index: assignment.chunk_index };
                if send_frame(channel.as_ref(), &req).await.is_err() {
                    let (dropped, _) = scheduler.record_failure(&assignment.peer, assignment.chunk_index);
                    if dropped {
                        channels.remove(&assignment.peer);
                    }
                }
            }

            tokio::select! {
                event = rx.recv() => {
                    let Some(event) = event else { break 'driver Ok(()) };
                    match event {
                        DriverEvent::Frame(peer, Frame::ChunkResp { chunk_index, payload: Some(data), err: None }) => {
                            let start = chunk_index as u64 * meta.chunk_size as u64;
                            file.seek(std::io::SeekFrom::Start(start)).await?;
                            file.write_all(&data).await?;
                            let len = data.len() as u64;
                            if let Some(hasher) = hasher.as_mut() {
                                hasher.feed(chunk_index, data);
                            }
                            chunk_owners.insert(chunk_index, peer.clone());
                            let cancel_peers = scheduler.record_success(&peer, chunk_index, len, Duration::from_millis(1));
                            for other in cancel_peers {
                                if let Some(channel) = channels.get(&other) {
                                    let _ = send_frame(channel.as_ref(), &Frame::Cancel { content_id: request.content.clone(), chunk_index }).await;
                                }
                            }
                            emit(SdkEvent::Progress { received_chunks: scheduler.progress().received_chunks, total_chunks: meta.total_chunks }, &request.events);
                        }
                        DriverEvent::Frame(peer, Frame::ChunkResp { chunk_index, err: Some(ChunkError::Choked), .. }) => {
                            debug!(%peer, chunk_index, "peer choked us, requeuing");
                            scheduler.record_failure(&peer, chunk_index);
                        }
                        DriverEvent::Frame(peer, Frame::ChunkResp { chunk_index, err: Some(ChunkError::NotFound), .. }) => {
                            warn!(%peer, chunk_index, "peer reports it does not have this chunk");
                            let (dropped, _) = scheduler.record_failure(&peer, chunk_index);
                            if dropped {
                                channels.remove(&peer);
                            }
                        }
                        DriverEvent::Frame(peer, Frame::Have { bitmap_delta }) => {
                            scheduler.record_have(peer, bitmap_delta);
                        }
                        DriverEvent::Frame(_, Frame::Choke) | DriverEvent::Frame(_, Frame::Unchoke) => {}
                        DriverEvent::Frame(peer, other) => {
                            warn!(%peer, ?other, "unexpected frame from peer during download");
                        }
                        DriverEvent::Disconnected(peer) => {
                            warn!(%peer, "peer disconnected during download");
                            scheduler.remove_peer(&peer);
                            channels.remove(&peer);
                            emit(SdkEvent::PeerDropped { peer }, &request.events);
                        }
                    }
                }
                _ = sweep.tick() => {
                    for (peer, _requeued) in scheduler.sweep_timeouts(std::time::Instant::now()) {
                        warn!(%peer, "peer dropped after repeated chunk timeouts");
                        channels.remove(&peer);
                        emit(SdkEvent::PeerDropped { peer }, &request.events);
                    }
                }
            }

            if channels.is_empty() && !scheduler.is_complete() {
                break Ok(());
            }
        };

        for reader in readers {
            reader.abort();
        }
        result?;

        if !scheduler.is_complete() {
            let reason = "ran out of peers before the download completed".to_string();
            emit(SdkEvent::Failed { reason: reason.clone() }, &request.events);
            return Err(Error::NoPeers);
        }

        if let Some(hasher) = hasher {
            if hasher.finalize() != request.expected_digest {
                // §4.7: discard the file and mark every contributing peer
                // with a reputation decrement rather than trusting any of
                // this session's chunks.
                let mut penalized: HashMap<PeerIdentity, ()> = HashMap::new();
                for (chunk_index, peer) in &chunk_owners {
                    if penalized.insert(peer.clone(), ()).is_none() {
                        debug!(%peer, "penalizing peer for contributing to a corrupted download");
                    }
                    scheduler.record_failure(peer, *chunk_index);
                }
                drop(file);
                let _ = tokio::fs::remove_file(output_path.as_ref()).await;
                emit(SdkEvent::Failed { reason: "digest mismatch".to_string() }, &request.events);
                return Err(Error::integrity("downloaded content does not match expected digest"));
            }
        }
        file.flush().await?;

        emit(SdkEvent::Completed { total_bytes: meta.total_bytes }, &request.events);
        Ok(DownloadOutcome { total_bytes: meta.total_bytes, total_chunks: meta.total_chunks })
    }
}
