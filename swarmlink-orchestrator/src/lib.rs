#![forbid(unsafe_code)]

//! NAT traversal orchestrator (C4) from the system specification §4.4: the
//! `INIT → GATHER → STRATEGY_LOOP → (SUCCESS | FAIL)` state machine that
//! turns a `(local, remote)` peer pair into a live [`swarmlink_transport::Channel`].

pub mod gather;
pub mod options;
pub mod orchestrator;
pub mod strategies;
pub mod stun;

pub use options::{AttemptRecord, ConnectOptions, OrchestratorFailure};
pub use orchestrator::Orchestrator;
pub use stun::{NoopStunClient, StunClient};
