#![forbid(unsafe_code)]

//! Transport adapters (C1) and hole-punch primitives (C2) from the system
//! specification §4.1–§4.2.
//!
//! Three channel kinds share one [`channel::Channel`] contract: TCP
//! (length-prefixed framing), UDP (one datagram per frame), and relay
//! (opaque blobs carried through a signalling coordination store). The
//! [`holepunch`] module implements UDP hole punching and TCP simultaneous
//! open; [`happy_eyeballs`] races dual-stack candidates; [`port_mapper`]
//! is the seam for the external UPnP/NAT-PMP service.

pub mod channel;
pub mod codec;
pub mod errors;
pub mod happy_eyeballs;
pub mod holepunch;
pub mod port_mapper;

pub use channel::{Channel, RelayBackend, RelayChannel, TcpFrameChannel, UdpFrameChannel};
pub use errors::{Result, TransportError};
pub use port_mapper::{NoopPortMapper, PortMapError, PortMapper};
