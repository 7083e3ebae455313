#![forbid(unsafe_code)]

//! Chunk transfer protocol (C7) from the system specification §4.7: a
//! tagged-union `Frame` carried over any `swarmlink_transport::Channel`,
//! plus the client and server algorithms that drive metadata exchange,
//! pipelined chunk requests, and whole-file integrity verification.

pub mod client;
pub mod errors;
pub mod frame;
pub mod server;
pub mod wire;

pub use client::{
    download, fetch_metadata, DownloadOptions, DownloadOutcome, OrderedHasher, RemoteMetadata,
    DEFAULT_CHUNK_TIMEOUT, DEFAULT_PIPELINE,
};
pub use errors::{ProtocolError, Result};
pub use frame::{ChunkError, Frame, FrameError, PROTOCOL_VERSION};
pub use server::{AlwaysUnchoked, ChokeGate, ContentSource, ServerSession, DEFAULT_CHUNK_SIZE};
pub use wire::{recv_frame, send_frame};
