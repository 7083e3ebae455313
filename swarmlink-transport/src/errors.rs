use thiserror::Error;
use swarmlink_core::Error as CoreError;

pub type Result<T, E = TransportError> = core::result::Result<T, E>;

/// Transport-local errors (system specification §4.1). Converted into
/// `swarmlink_core::Error` at the seam where a caller needs the shared
/// taxonomy (e.g. the orchestrator surfacing a fatal failure).
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame exceeds maximum size ({0} bytes)")]
    Oversize(usize),

    #[error("channel closed")]
    Closed,

    #[error("idle timeout with no frames received")]
    IdleTimeout,

    #[error("hole punch failed: {0}")]
    HolePunchFailed(String),

    #[error("simultaneous open failed after {0} attempts")]
    SimultaneousOpenFailed(u32),

    #[error("relay backend error: {0}")]
    Relay(String),
}

impl From<TransportError> for CoreError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Io(err) => CoreError::Io(err),
            TransportError::Oversize(n) => {
                CoreError::protocol(format!("frame exceeds maximum size ({n} bytes)"))
            }
            TransportError::Closed => CoreError::transient("channel closed"),
            TransportError::IdleTimeout => CoreError::transient("idle timeout"),
            TransportError::HolePunchFailed(reason) => CoreError::no_strategy(reason),
            TransportError::SimultaneousOpenFailed(n) => {
                CoreError::no_strategy(format!("simultaneous open failed after {n} attempts"))
            }
            TransportError::Relay(reason) => CoreError::transient(reason),
        }
    }
}
