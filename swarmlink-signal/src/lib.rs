#![forbid(unsafe_code)]

//! Signalling rendezvous (C3) from the system specification §4.3: ordered
//! exchange of candidates and SDP-like descriptions via a shared
//! coordination store, plus a [`relay::RelayOverStore`] adapter that lets
//! the relay transport strategy ride on the same store.

pub mod directory;
pub mod http;
pub mod relay;
pub mod store;

pub use directory::{ContentDirectory, ContentEntry, HttpContentDirectory, InMemoryContentDirectory};
pub use http::HttpCoordinationStore;
pub use relay::RelayOverStore;
pub use store::{CoordinationStore, InMemoryCoordinationStore, Message, MessageKind, Result, SignalError};
