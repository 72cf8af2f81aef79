//! Error types for the sync module.

use std::time::Duration;

use thiserror::Error;

use chance_master_core::{CodecError, MoveRejection, SessionId};
use chance_master_indexer::IndexerError;

/// Errors that can occur attaching to or synchronizing a session.
#[derive(Debug, Error)]
pub enum SyncError {
    /// One or more of the four session entities is missing.
    #[error("session {0} not found")]
    SessionNotFound(SessionId),

    /// The indexer could not be reached or answered garbage.
    #[error("indexer unreachable: {0}")]
    Unreachable(#[from] IndexerError),

    /// The confirmed board could not be encoded.
    #[error("board codec error: {0}")]
    Codec(#[from] CodecError),

    /// No session is attached.
    #[error("no session attached")]
    NotAttached,
}

/// Errors from an external service (proof service or ledger).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    /// Network failure or non-success transport status.
    #[error("service unreachable: {0}")]
    Unreachable(String),

    /// The service answered but refused the request.
    #[error("service rejected request: {0}")]
    Rejected(String),
}

/// Errors from a move commit attempt.
///
/// Every variant leaves local state as it was before the attempt.
#[derive(Debug, Error)]
pub enum CommitError {
    /// Local validation failed.
    #[error("move rejected: {0}")]
    Rejected(#[from] MoveRejection),

    /// The proof service did not answer in time.
    #[error("proof timed out after {0:?}")]
    ProofTimeout(Duration),

    /// The proof service answered without a proof.
    #[error("proof failed: {0}")]
    ProofFailed(String),

    /// The proof service could not be reached.
    #[error("prover unreachable: {0}")]
    ProverUnreachable(String),

    /// The pipeline needs an attached session.
    #[error(transparent)]
    Sync(#[from] SyncError),
}

impl From<ServiceError> for CommitError {
    fn from(e: ServiceError) -> Self {
        match e {
            ServiceError::Unreachable(msg) => CommitError::ProverUnreachable(msg),
            ServiceError::Rejected(msg) => CommitError::ProofFailed(msg),
        }
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
