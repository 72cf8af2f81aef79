//! Error types for the indexer module.

use thiserror::Error;

/// Errors that can occur talking to the state indexer.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// HTTP transport failure on a seed query.
    #[error("indexer unreachable: {0}")]
    Http(#[from] reqwest::Error),

    /// Websocket transport failure.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Non-success HTTP status.
    #[error("indexer returned HTTP {0}")]
    Status(u16),

    /// The indexer answered with GraphQL errors.
    #[error("graphql error: {0}")]
    GraphQl(String),

    /// Invalid endpoint URL.
    #[error("invalid endpoint: {0}")]
    Url(#[from] url::ParseError),

    /// A payload could not be decoded into a known model.
    #[error("malformed payload: {0}")]
    Malformed(String),

    /// JSON decoding failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The subscription (or the service behind it) has gone away.
    #[error("subscription closed")]
    Closed,

    /// The service is not reachable (used by test doubles).
    #[error("indexer unreachable: {0}")]
    Unreachable(String),
}

impl IndexerError {
    /// Whether the error is a transport failure the caller may retry.
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            IndexerError::Http(_)
                | IndexerError::WebSocket(_)
                | IndexerError::Status(_)
                | IndexerError::Unreachable(_)
        )
    }
}

/// Result type for indexer operations.
pub type Result<T> = std::result::Result<T, IndexerError>;
