use thiserror::Error;

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Error taxonomy from the system specification §7, shared by every crate in
/// the workspace so that component-local errors can convert into one type at
/// the public API boundary.
#[derive(Debug, Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("serde: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("config: {0}")]
    Config(String),

    /// Malformed frame or unexpected message on an otherwise-live channel.
    #[error("protocol: {0}")]
    Protocol(String),

    /// Single-socket / single-attempt failure that a caller may retry or
    /// route around (next peer, next strategy).
    #[error("transient: {0}")]
    Transient(String),

    /// Whole-file digest mismatch detected at the end of a download.
    #[error("integrity check failed: {0}")]
    Integrity(String),

    /// The discovery aggregator returned no peers for a content id.
    #[error("no peers available for content")]
    NoPeers,

    /// The NAT traversal orchestrator exhausted every configured strategy.
    #[error("no traversal strategy succeeded: {0}")]
    NoStrategy(String),

    /// A caller-initiated cancellation completed; not itself an error
    /// condition, but represented here so it can propagate through the same
    /// `Result` type as a terminal status.
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn integrity(msg: impl Into<String>) -> Self {
        Self::Integrity(msg.into())
    }

    pub fn no_strategy(attempted: impl Into<String>) -> Self {
        Self::NoStrategy(attempted.into())
    }
}

// TOML deserialization errors map into the config error domain without
// adding a new variant, mirroring how the teacher folds foreign config
// errors into its own `Config` variant.
impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}
