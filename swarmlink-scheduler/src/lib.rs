#![forbid(unsafe_code)]

//! Multi-source chunk scheduling (system specification §4.8) and peer
//! admission control (§4.9) for a single swarmlink download/upload session.
//!
//! This crate owns decision-making only: it decides which `(peer,
//! chunkIndex)` pairs to request next and which peers to serve, but leaves
//! wire I/O to `swarmlink-protocol` and peer discovery to
//! `swarmlink-discovery`.

pub mod choke;
pub mod scheduler;

pub use choke::{ChokeController, Mode as ChokeMode, DEFAULT_INTERVAL as DEFAULT_CHOKE_INTERVAL, DEFAULT_UNCHOKE_SLOTS};
pub use scheduler::{
    Assignment, PeerStats, Progress, Scheduler, SchedulerOptions, DEFAULT_ENDGAME_THRESHOLD,
    DEFAULT_MAX_INFLIGHT_PER_PEER, MAX_CONSECUTIVE_FAILURES,
};
