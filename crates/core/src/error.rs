//! Unified error types for wikifetch.
//!
//! Every variant renders with a stable upper-case code prefix so log lines
//! can be grepped by failure class.

use tokio_rusqlite::rusqlite;

/// Unified error type shared by the core, client and binary crates.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid input parameters (e.g., empty URL, zero workers).
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// Invalid URL.
    #[error("INVALID_URL: {0}")]
    InvalidUrl(String),

    /// Network or HTTP failure, with the response status when one was received.
    #[error("HTTP_ERROR: {message}")]
    Http { status: Option<u16>, message: String },

    /// The origin answered 404.
    #[error("NOT_FOUND: {0}")]
    NotFound(String),

    /// The origin answered 429.
    #[error("RATE_LIMITED: {0}")]
    RateLimited(String),

    /// Transport timeout.
    #[error("FETCH_TIMEOUT: {0}")]
    FetchTimeout(String),

    /// Response body could not be decoded.
    #[error("PARSE_ERROR: {0}")]
    Parse(String),

    /// The query API reported a database-class error.
    #[error("API_DB_ERROR: {0}")]
    ApiDatabase(String),

    /// A rendering backend answered with a structured API error.
    #[error("RENDER_BACKEND_ERROR: {0}")]
    RenderBackend(String),

    /// Login was rejected by the wiki.
    #[error("LOGIN_FAILED: {0}")]
    LoginFailed(String),

    /// The request throttle was shut down.
    #[error("THROTTLE_CLOSED")]
    ThrottleClosed,

    /// Local disk cache read or write failed.
    #[error("CACHE_IO: {0}")]
    CacheIo(String),

    /// Object store operation failed.
    #[error("OBJECT_STORE_ERROR: {0}")]
    ObjectStore(String),

    /// Image compression failed.
    #[error("COMPRESSION_FAILED: {0}")]
    Compression(String),

    /// Value could not be encoded for or decoded from the store.
    #[error("STORE_ERROR: {0}")]
    Serialization(String),

    /// Database operation failed.
    #[error("STORE_ERROR: {0}")]
    Database(tokio_rusqlite::Error),

    /// Migration failed to apply.
    #[error("STORE_ERROR: migration failed: {0}")]
    MigrationFailed(String),
}

impl Error {
    /// HTTP status carried by the error, if the failure came from a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Http { status, .. } => *status,
            Error::NotFound(_) => Some(404),
            Error::RateLimited(_) => Some(429),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
            tokio_rusqlite::Error::Close(c) => Error::Database(tokio_rusqlite::Error::Close(c)),
            _ => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        Error::Database(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(tokio_rusqlite::Error::Error(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
