//! Error types for ytarr.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for ytarr.
#[derive(Error, Debug)]
pub enum Error {
    // Remote errors
    #[error("Transient remote error: {0}")]
    TransientRemote(String),

    #[error("Permanent remote error: {0}")]
    PermanentRemote(String),

    // Metadata errors
    #[error("Invalid metadata: {0}")]
    Metadata(String),

    // Ledger errors
    #[error("Ledger I/O failed: {0}")]
    LedgerIo(String),

    #[error("Ledger corrupt at {path}:{line}")]
    LedgerCorrupt { path: PathBuf, line: usize },

    // Placement errors
    #[error("Placement failed: {0}")]
    Placement(String),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Configuration file not found: {0}")]
    ConfigNotFound(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // HTTP errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // TOML errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    // Regex errors
    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    // Generic errors
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a generic error from a string.
    pub fn other<S: Into<String>>(msg: S) -> Self {
        Error::Other(msg.into())
    }

    /// Whether retrying the same request may succeed.
    ///
    /// Connection-level HTTP failures count as transient; everything that is
    /// not explicitly a remote error is treated as permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::TransientRemote(_) => true,
            Error::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// Whether this error must abort the running cycle.
    pub fn is_ledger_failure(&self) -> bool {
        matches!(self, Error::LedgerIo(_) | Error::LedgerCorrupt { .. })
    }

    /// Classify an unsuccessful HTTP status.
    pub fn from_status(status: reqwest::StatusCode, context: &str) -> Self {
        let msg = format!("{} returned {}", context, status);
        if status.is_server_error()
            || status == reqwest::StatusCode::TOO_MANY_REQUESTS
            || status == reqwest::StatusCode::REQUEST_TIMEOUT
        {
            Error::TransientRemote(msg)
        } else {
            Error::PermanentRemote(msg)
        }
    }
}
