//! Fatal error conditions of the controller
//!
//! Everything here terminates the process. Per-cycle failures are logged
//! and defaulted where they happen and never surface as a `ControllerError`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("cannot read configuration: {0}")]
    ConfigSource(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("cannot communicate with container runtime: {0}")]
    RuntimeUnavailable(String),

    #[error("cannot initialize orchestrator client: {0}")]
    OrchestratorUnavailable(String),

    #[error("node name not set in environment variable {0}")]
    MissingNodeName(String),

    #[error("cannot read capacity of node {node}: {reason}")]
    NodeCapacity { node: String, reason: String },
}

pub type Result<T> = std::result::Result<T, ControllerError>;
