//! Observability (C6): process-wide gauges/counters and the `/metrics`
//! exposition endpoint.
//!
//! Gauges (`netsync_enqueued_jobs`, `netsync_finished_jobs`) are updated by
//! the job queue (C2); the `netsync_text_len_total` counter is incremented by
//! the archive processor (C3) for every successfully bound post row. This
//! module only owns the Prometheus exporter and the HTTP server that exposes
//! them, mirroring the teacher's axum-server-plus-graceful-shutdown pattern.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::{routing::get, Router};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Installs the process-wide Prometheus recorder. Must be called exactly
/// once, before any `metrics::counter!`/`gauge!` call.
pub fn install_recorder() -> Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .context("installing prometheus metrics recorder")
}

/// Spawns the `/metrics` HTTP server bound to `port`, returning a handle that
/// resolves once the server has shut down. The server stops as soon as
/// `shutdown` is cancelled, mirroring `spec.md` §4.6's "bounded by the
/// lifecycle" requirement.
pub fn spawn_metrics_server(
    port: u16,
    handle: PrometheusHandle,
    shutdown: CancellationToken,
) -> JoinHandle<Result<()>> {
    tokio::spawn(async move {
        let app = Router::new().route("/metrics", get(move || render(handle.clone())));

        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("binding metrics listener on {addr}"))?;
        info!(%addr, "metrics server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .context("metrics server failed")?;

        info!("metrics server shut down successfully");
        Ok(())
    })
}

async fn render(handle: PrometheusHandle) -> String {
    handle.render()
}
