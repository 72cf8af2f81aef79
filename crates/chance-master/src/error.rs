//! Error types for the client.

use chance_master_core::{CoreError, MoveRejection};
use chance_master_indexer::IndexerError;
use chance_master_sync::{CommitError, ServiceError, SyncError};
use thiserror::Error;

/// Errors that can occur during client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Malformed identifier.
    #[error("invalid input: {0}")]
    Core(#[from] CoreError),

    /// Indexer error.
    #[error("indexer error: {0}")]
    Indexer(#[from] IndexerError),

    /// Synchronizer error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// Move commit failed.
    #[error("commit failed: {0}")]
    Commit(#[from] CommitError),

    /// Proof service or ledger error.
    #[error("service error: {0}")]
    Service(#[from] ServiceError),

    /// A game action was refused locally.
    #[error("action refused: {0}")]
    Refused(#[from] MoveRejection),

    /// The action is not available in the current game state.
    #[error("{0} is not available right now")]
    Unavailable(&'static str),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl ClientError {
    /// Whether this is a local rejection the UI should drop silently.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            ClientError::Refused(_) | ClientError::Commit(CommitError::Rejected(_))
        )
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
