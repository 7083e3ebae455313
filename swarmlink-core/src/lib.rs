#![forbid(unsafe_code)]

//! Core types, error handling, and configuration shared across the swarmlink
//! workspace.
//!
//! This crate intentionally stays lightweight: it defines the data model
//! from the system specification (peer identity, content identifiers,
//! candidates, peer records, file metadata, chunk state) plus the error and
//! config plumbing every other crate depends on. It does not perform I/O
//! beyond reading/watching the configuration file.

pub mod config;
pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{
    Candidate, CandidateKind, ChokeState, ChunkState, ContentDigest, ContentId, Family, FileMetadata,
    PeerAddress, PeerContribution, PeerIdentity, PeerRecord, PeerSource, Transport, PEER_RECORD_TTL,
};
