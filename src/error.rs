//! Error types for lfs-batch operations.

use std::sync::Arc;

use thiserror::Error;

use crate::lock::Lock;

/// Result type for lfs-batch operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Result observed through a [`TransferFuture`](crate::TransferFuture).
///
/// The error side is shared because deduplicated callers wait on the same slot.
pub type TransferResult<T> = std::result::Result<T, Arc<Error>>;

/// Errors that can occur during LFS operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Server answered 401
    #[error("unauthorized: {url}")]
    Unauthorized { url: String },

    /// Server answered 403
    #[error("forbidden: {url}")]
    Forbidden { url: String },

    /// Object not found on server
    #[error("object not found: {0}")]
    NotFound(String),

    /// Request finished with an unexpected status
    #[error("request failed: {status} {reason} ({url})")]
    RequestFailed {
        status: u16,
        reason: String,
        url: String,
    },

    /// Redirect chain exceeded the limit or had no Location header
    #[error("too many redirects: {url}")]
    TooManyRedirects { url: String },

    /// Batch item error reported by the server
    #[error("can't process object (code {code}): {message}")]
    ServerError { code: u16, message: String },

    /// Batch response did not mention a requested object
    #[error("requested object not found in server response: {0}")]
    MissingObject(String),

    /// Batch item lacks a link required for the operation
    #[error("{kind} link not found for object {oid}")]
    MissingLink { kind: &'static str, oid: String },

    /// Transferred content does not match its declared oid/size
    #[error("stream validation failed: {0}")]
    Validation(String),

    /// Lock already exists
    #[error("lock conflict: {message}")]
    LockConflict { message: String, lock: Box<Lock> },

    /// Credential source failure
    #[error("authentication error: {0}")]
    Auth(String),

    /// Transfer task panicked
    #[error("transfer task panicked: {0}")]
    TaskPanicked(String),

    /// Transfer future was cancelled by the caller
    #[error("transfer cancelled")]
    Cancelled,

    /// HTTP transport failed before a response was received
    #[error("HTTP error: {0}")]
    Http(String),

    /// Invalid URL
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parsing error
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),
}

impl Error {
    /// Whether the server rejected the credentials (401).
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Error::Unauthorized { .. })
    }

    /// Whether the server denied access (403).
    pub fn is_forbidden(&self) -> bool {
        matches!(self, Error::Forbidden { .. })
    }

    /// Whether the object does not exist on the server.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Whether the content failed size or hash validation.
    pub fn is_validation(&self) -> bool {
        match self {
            Error::Validation(_) => true,
            Error::Io(e) => e
                .get_ref()
                .and_then(|inner| inner.downcast_ref::<Error>())
                .is_some_and(Error::is_validation),
            _ => false,
        }
    }
}
