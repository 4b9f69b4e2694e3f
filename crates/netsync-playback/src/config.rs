//! Configuration (C0b): validates the CLI-derived settings before anything
//! connects to Scylla or touches the filesystem.

use std::path::PathBuf;

use crate::error::{PlaybackError, Result};

/// Fully validated configuration for one playback run, derived from CLI
/// flags (see `main.rs`). Unlike the CLI struct itself, every field here is
/// guaranteed sane: at least one Scylla node, a worker count of at least one,
/// and a port in the valid range.
#[derive(Debug, Clone)]
pub struct Config {
    pub scylla_nodes: Vec<String>,
    pub out_dir: PathBuf,
    pub worker_count: usize,
    pub metrics_port: u16,
}

impl Config {
    /// Builds a validated configuration from raw CLI input, applying the
    /// `num_cpus`-derived default worker count when none is given, matching
    /// the teacher's environment-derived default convention.
    pub fn from_cli(
        scylla_nodes: Vec<String>,
        out_dir: PathBuf,
        worker_count: Option<usize>,
        metrics_port: u16,
    ) -> Result<Self> {
        if scylla_nodes.is_empty() {
            return Err(PlaybackError::Setup(anyhow::anyhow!(
                "at least one --scylla-nodes value is required"
            )));
        }

        let worker_count = worker_count.unwrap_or_else(num_cpus::get);
        if worker_count == 0 {
            return Err(PlaybackError::Setup(anyhow::anyhow!(
                "--worker-count must be at least 1"
            )));
        }

        if !out_dir.exists() {
            return Err(PlaybackError::Setup(anyhow::anyhow!(
                "--out-dir {} does not exist",
                out_dir.display()
            )));
        }

        Ok(Self { scylla_nodes, out_dir, worker_count, metrics_port })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_node_list() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::from_cli(vec![], dir.path().to_path_buf(), Some(4), 9090);
        assert!(err.is_err());
    }

    #[test]
    fn rejects_zero_worker_count() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::from_cli(
            vec!["127.0.0.1:9042".to_string()],
            dir.path().to_path_buf(),
            Some(0),
            9090,
        );
        assert!(err.is_err());
    }

    #[test]
    fn rejects_missing_out_dir() {
        let err = Config::from_cli(
            vec!["127.0.0.1:9042".to_string()],
            PathBuf::from("/does/not/exist/surely"),
            Some(4),
            9090,
        );
        assert!(err.is_err());
    }

    #[test]
    fn defaults_worker_count_to_logical_cpus() {
        let dir = tempfile::tempdir().unwrap();
        let config =
            Config::from_cli(vec!["127.0.0.1:9042".to_string()], dir.path().to_path_buf(), None, 9090)
                .unwrap();
        assert_eq!(config.worker_count, num_cpus::get());
    }
}
