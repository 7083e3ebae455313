use crate::frame::FrameError;
use thiserror::Error;

pub type Result<T, E = ProtocolError> = core::result::Result<T, E>;

/// Client/server errors for the chunk transfer protocol (system
/// specification §4.7), folded into `swarmlink_core::Error` at the SDK
/// boundary.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("transport: {0}")]
    Transport(#[from] swarmlink_transport::TransportError),

    #[error("frame: {0}")]
    Frame(#[from] FrameError),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("unexpected frame on the wire")]
    UnexpectedFrame,

    #[error("server reported error: {0:?}")]
    Remote(crate::frame::ChunkError),

    #[error("metadata request failed: {0}")]
    Metadata(String),

    #[error("integrity check failed: digest mismatch for content")]
    Integrity,

    #[error("chunk {0} deadline exceeded")]
    ChunkTimeout(u32),
}

impl From<ProtocolError> for swarmlink_core::Error {
    fn from(e: ProtocolError) -> Self {
        match e {
            ProtocolError::Integrity => swarmlink_core::Error::integrity("digest mismatch"),
            ProtocolError::ChunkTimeout(idx) => {
                swarmlink_core::Error::transient(format!("chunk {idx} deadline exceeded"))
            }
            other => swarmlink_core::Error::protocol(other.to_string()),
        }
    }
}
