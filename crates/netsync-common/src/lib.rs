//! netsync common library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error handling and logging setup for the netsync workspace members.
//!
//! # Example
//!
//! ```no_run
//! use netsync_common::{Result, Error};
//! use netsync_common::logging::{init_logging, LogConfig};
//!
//! fn start() -> Result<()> {
//!     init_logging(&LogConfig::from_env().unwrap_or_default()).map_err(Error::from)?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;

pub use error::{Error, Result};
