//! Error types for node and pool operations

use std::path::PathBuf;

/// Errors from node lifecycle and pool operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("node failed to start: {0}")]
    StartFailed(String),

    #[error("failed to spawn relay process: {0}")]
    Spawn(String),

    #[error("no free local port after {attempts} attempts")]
    PortsExhausted { attempts: u32 },

    #[error("node not started: {0}")]
    NotStarted(String),

    #[error("route rules file not found: {}", .0.display())]
    AclNotFound(PathBuf),

    #[error("route rules path is not a regular file: {}", .0.display())]
    AclNotAFile(PathBuf),

    #[error("no available nodes")]
    NoAvailableNodes,

    #[error("pool already started")]
    AlreadyStarted,

    #[error("pool not started")]
    PoolNotStarted,

    #[error("pool stopped")]
    PoolStopped,
}

/// Result alias for pool operations.
pub type Result<T> = std::result::Result<T, Error>;
