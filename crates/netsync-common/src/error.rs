//! Error types shared across netsync binaries

use thiserror::Error;

/// Result type alias for netsync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-wide error type.
///
/// Distinguishes setup-fatal errors (abort the process before any work
/// starts) from everything else. Archive-local and record-local failures are
/// handled by the caller as outcome strings / log lines rather than
/// propagated through this type — see the playback crate's processor.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
