//! netsync-playback — repository playback ingestor entry point (C0a).
//!
//! Parses CLI flags, initialises logging, bootstraps the schema, walks the
//! output directory into a job queue, runs the worker pool to completion (or
//! shutdown), and reports a final summary line before exiting.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use netsync_common::logging::{init_logging, LogConfig, LogFormat, LogLevel};
use netsync_playback::config::Config;
use netsync_playback::db::Database;
use netsync_playback::lifecycle::{spawn_drain_watcher, spawn_workers, wait_for_shutdown};
use netsync_playback::metrics::{install_recorder, spawn_metrics_server};
use netsync_playback::queue::JobQueue;
use netsync_playback::PlaybackError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Repository playback ingestor: decodes AT Protocol repository archives
/// from `--out-dir` and materialises them into ScyllaDB.
#[derive(Parser, Debug)]
#[command(name = "netsync-playback")]
#[command(author, version, about)]
struct Cli {
    /// Scylla contact node, `host:port`. May be repeated.
    #[arg(long = "scylla-nodes", required = true)]
    scylla_nodes: Vec<String>,

    /// Flat directory of pre-staged repository archives, named by DID.
    #[arg(long = "out-dir")]
    out_dir: PathBuf,

    /// Number of concurrent workers. Defaults to the number of logical CPUs.
    #[arg(long = "worker-count")]
    worker_count: Option<usize>,

    /// Port the `/metrics` endpoint is served on.
    #[arg(long = "port", default_value_t = 9090)]
    port: u16,

    /// Minimum log level. Overrides `LOG_LEVEL` when given.
    #[arg(long = "log-level")]
    log_level: Option<LogLevel>,

    /// Log output format. Overrides `LOG_FORMAT` when given.
    #[arg(long = "log-format")]
    log_format: Option<LogFormat>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Start from the environment (or defaults, if env vars are unset/invalid),
    // then let an explicitly-given CLI flag override just that field — so
    // `--log-level`/`--log-format` take precedence over `LOG_LEVEL`/`LOG_FORMAT`
    // when both are set, rather than one wholesale replacing the other.
    let mut log_config = LogConfig::from_env().unwrap_or_default();
    log_config.log_file_prefix = "netsync-playback".to_string();
    if let Some(level) = cli.log_level {
        log_config.level = level;
    }
    if let Some(format) = cli.log_format.clone() {
        log_config.format = format;
    }

    if let Err(e) = init_logging(&log_config) {
        eprintln!("failed to initialise logging: {e:?}");
        return ExitCode::FAILURE;
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = ?e, "failed to start tokio runtime");
            return ExitCode::FAILURE;
        },
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = ?e, "playback run failed");
            ExitCode::FAILURE
        },
    }
}

async fn run(cli: Cli) -> netsync_playback::Result<()> {
    let start = Instant::now();

    let config = Config::from_cli(cli.scylla_nodes, cli.out_dir, cli.worker_count, cli.port)?;
    info!(
        nodes = ?config.scylla_nodes,
        out_dir = %config.out_dir.display(),
        worker_count = config.worker_count,
        port = config.metrics_port,
        "configuration validated"
    );

    let metrics_handle = install_recorder().map_err(PlaybackError::Setup)?;

    let db = Database::connect(&config.scylla_nodes).await.map_err(PlaybackError::Setup)?;
    let db = Arc::new(db);
    info!("schema bootstrap complete, database ready");

    let dids = walk_out_dir(&config.out_dir).map_err(PlaybackError::Setup)?;
    let archive_count = dids.len();
    let queue = Arc::new(JobQueue::from_dids(dids));
    info!(archive_count, "archives enqueued");

    let shutdown = CancellationToken::new();
    let text_len = Arc::new(AtomicU64::new(0));

    let metrics_server = spawn_metrics_server(config.metrics_port, metrics_handle, shutdown.clone());
    let drain_watcher = spawn_drain_watcher(queue.clone(), shutdown.clone());
    let workers = spawn_workers(
        queue.clone(),
        db.clone(),
        config.out_dir.clone(),
        config.worker_count,
        shutdown.clone(),
        text_len.clone(),
        tokio::runtime::Handle::current(),
    );

    info!("listening for signals");
    wait_for_shutdown(shutdown.clone()).await;

    info!("shutting down, waiting for workers to clean up...");
    for worker in workers {
        if let Err(e) = worker.await {
            error!(error = ?e, "worker task panicked");
        }
    }

    drain_watcher.abort();

    match metrics_server.await {
        Ok(Ok(())) => {},
        Ok(Err(e)) => error!(error = ?e, "metrics server failed"),
        Err(e) => error!(error = ?e, "metrics server task panicked"),
    }

    info!(
        finished = queue.finished_count(),
        total_archives = archive_count,
        text_bytes = text_len.load(Ordering::Relaxed),
        elapsed_secs = start.elapsed().as_secs_f64(),
        "processed repos and UTF-8 text bytes"
    );
    info!("shut down successfully");

    Ok(())
}

/// Walks `out_dir` non-recursively, treating every regular file's name as an
/// archive identifier; directories beneath it are skipped, per spec.md §6.
fn walk_out_dir(out_dir: &std::path::Path) -> anyhow::Result<Vec<String>> {
    let mut dids = Vec::new();
    for entry in std::fs::read_dir(out_dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        dids.push(name);
    }
    Ok(dids)
}
