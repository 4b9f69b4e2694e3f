//! Error taxonomy for the playback pipeline.
//!
//! Setup errors are fatal: the process logs them and exits non-zero before
//! any worker starts. Archive-local and record-local failures (spec.md §7)
//! never reach this type — the processor turns them into outcome strings and
//! `tracing` warnings instead, so a single bad record or archive cannot take
//! down the run.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PlaybackError>;

#[derive(Error, Debug)]
pub enum PlaybackError {
    /// Fatal configuration or startup failure (bad CLI input, schema
    /// bootstrap failure, cluster connection failure).
    #[error("setup failed: {0}")]
    Setup(#[source] anyhow::Error),

    /// An archive under `--out-dir` could not be opened or decoded at all.
    #[error("failed to open archive for {did}: {source}")]
    ArchiveOpen {
        did: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[source] anyhow::Error),
}

impl From<netsync_common::Error> for PlaybackError {
    fn from(e: netsync_common::Error) -> Self {
        PlaybackError::Setup(e.into())
    }
}
