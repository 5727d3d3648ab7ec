//! Error types for leader election

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ElectionError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connect to coordination service timeout after {0:?}")]
    ConnectTimeout(std::time::Duration),

    #[error("Coordination connection error: {0}")]
    Connection(String),

    #[error("Coordination session closed")]
    SessionClosed,

    #[error("Node already exists: {0}")]
    NodeExists(String),

    #[error("Node does not exist: {0}")]
    NoNode(String),

    #[error("Ephemeral nodes may not have children: {0}")]
    NoChildrenForEphemerals(String),

    #[error("Invalid node path: {0}")]
    InvalidPath(String),

    #[error("Created node mismatch, want: {want} created: {created}")]
    CreatedPathMismatch { want: String, created: String },

    #[error("Failed to acquire {0}")]
    NotOwner(String),

    #[error("Leadership lost: {0}")]
    LeadershipLost(String),

    #[error("Election already running")]
    AlreadyRunning,
}

impl ElectionError {
    /// Ownership races are part of normal multi-candidate operation.
    pub fn is_race(&self) -> bool {
        matches!(self, ElectionError::NodeExists(_) | ElectionError::NotOwner(_))
    }
}

pub type Result<T> = std::result::Result<T, ElectionError>;
