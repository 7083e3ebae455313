#![forbid(unsafe_code)]

//! Discovery backends (C5) and aggregator (C6) from the system
//! specification §4.5–§4.6: a uniform `announce`/`lookup` interface over
//! DHT, peer exchange, local multicast and coordination-store backends,
//! fanned out and ranked by [`aggregator::DiscoveryAggregator`].

pub mod aggregator;
pub mod backend;
pub mod coord;
pub mod dht;
pub mod local_multicast;
pub mod pex;

pub use aggregator::{DiscoveryAggregator, FindPeersOptions};
pub use backend::DiscoveryBackend;
pub use coord::CoordBackend;
pub use dht::DhtBackend;
pub use local_multicast::LocalMulticastBackend;
pub use pex::PexBackend;
