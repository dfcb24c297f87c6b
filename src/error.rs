//! Error types for barricade

use thiserror::Error;

use crate::net::NetError;
use crate::runtime::RuntimeError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("a session already exists here ({0}) - you may want to destroy it first")]
    AlreadyExists(String),

    #[error("container name conflict: {0} (re-run with --force to replace it)")]
    ContainerConflict(String),

    #[error("insufficient permissions: {0} - run as root or grant CAP_NET_ADMIN")]
    InsufficientPermissions(String),

    #[error("partitions contain unknown containers: {0:?}")]
    UnknownContainers(Vec<String>),

    #[error("partitions contain holy containers: {0:?}")]
    HolyContainers(Vec<String>),

    #[error("containers not found or not running: {0:?}")]
    NotRunning(Vec<String>),

    #[error("creation failed: {0}")]
    Creation(String),

    #[error("container runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("network engine error: {0}")]
    Net(#[from] NetError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("state error: {0}")]
    State(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Check if this is a permission error
    pub fn is_permission_error(&self) -> bool {
        matches!(self, Error::InsufficientPermissions(_))
    }

    /// Check if this error came out of partition validation
    pub fn is_partition_error(&self) -> bool {
        matches!(self, Error::UnknownContainers(_) | Error::HolyContainers(_))
    }
}
