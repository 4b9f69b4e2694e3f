//! netsync-playback
//!
//! A parallel, file-directory-driven ingestor that decodes content-addressed
//! AT Protocol repository archives (CAR files) and materialises them into a
//! ScyllaDB-backed wide-column store across several denormalised views.
//!
//! # Pipeline
//!
//! A directory walk populates the [`queue::JobQueue`] with one job per
//! archive file name. A configurable number of worker tasks
//! ([`lifecycle::spawn_workers`]) each loop: dequeue an archive, run it
//! through [`processor::process_archive`], record the outcome. Shutdown
//! converges from three independent triggers — an OS signal, queue drain, or
//! external cancellation — onto one `tokio_util::sync::CancellationToken`.
//!
//! # Example
//!
//! ```no_run
//! use netsync_playback::config::Config;
//! use std::path::PathBuf;
//!
//! # fn run() -> anyhow::Result<()> {
//! let config = Config::from_cli(
//!     vec!["127.0.0.1:9042".to_string()],
//!     PathBuf::from("./archives"),
//!     Some(4),
//!     9090,
//! )?;
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod config;
pub mod db;
pub mod error;
pub mod lifecycle;
pub mod mappers;
pub mod metrics;
pub mod processor;
pub mod queue;
pub mod record;
pub mod schema;

pub use error::{PlaybackError, Result};
