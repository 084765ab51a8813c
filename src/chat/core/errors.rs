//! Error types for the chat subsystem.

use thiserror::Error;

/// Chat subsystem error type.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Invalid configuration or unsupported values.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Owner identity missing or malformed.
    #[error("invalid owner: {0}")]
    InvalidOwner(String),
    /// Stored or submitted message failed validation.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
    /// `SQLite` storage error (sync).
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// `SQLite` storage error (async).
    #[error("tokio-rusqlite error: {0}")]
    TokioSqlite(#[from] tokio_rusqlite::Error),
    /// HTTP transport error.
    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),
    /// The completion service answered with a non-success status.
    #[error("completion service returned status {status}: {body}")]
    HttpStatus {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly truncated.
        body: String,
    },
    /// The completion response did not contain any text.
    #[error("malformed completion response: {0}")]
    MalformedResponse(String),
    /// No API key is stored for the completion service.
    #[error("API key not found. Please set it.")]
    MissingCredential,
    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// URL parse error.
    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
    /// The live subscription ended.
    #[error("subscription closed")]
    SubscriptionClosed,
}

/// Convenience result alias for chat operations.
pub type ChatResult<T> = Result<T, ChatError>;
