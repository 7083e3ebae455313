#![forbid(unsafe_code)]

//! Application-facing API (system specification §4's components composed
//! together): a [`node::Node`] that discovers peers, traverses NAT to reach
//! them, and drives chunked transfer against them, either as a downloader
//! ([`download`]) or as a server ([`serve`]).
//!
//! This crate reuses [`swarmlink_core::Error`]/[`swarmlink_core::Result`]
//! rather than defining its own error type. The teacher's equivalent,
//! `nyx-sdk`, needs a dedicated `Error` because it is a client library
//! talking to a separate `nyx-daemon` process over JSON-RPC and has to
//! represent IPC-specific failures (stream errors, disconnects, timeouts)
//! that don't apply here. Every layer this crate calls into
//! (`swarmlink-orchestrator`, `swarmlink-discovery`, `swarmlink-protocol`,
//! `swarmlink-scheduler`) already converges on `swarmlink_core::Error` at
//! its public boundary, so introducing a second taxonomy here would only
//! add a conversion layer with nothing to convert.

pub mod download;
pub mod events;
pub mod node;
pub mod serve;

pub use download::{DownloadOutcome, DownloadRequest};
pub use events::SdkEvent;
pub use node::Node;
pub use serve::{serve, SharedChoke};
pub use swarmlink_core::{Error, Result};
