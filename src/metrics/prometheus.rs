//! Prometheus metrics definitions and HTTP server

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram, register_histogram_vec,
    CounterVec, Encoder, GaugeVec, Histogram, HistogramVec, TextEncoder,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

lazy_static::lazy_static! {
    /// Total number of work items processed
    pub static ref RECONCILIATIONS: CounterVec = register_counter_vec!(
        "ark_reconciliations_total",
        "Total number of work items processed",
        &["kind"]
    ).unwrap();

    /// Total number of work items that failed and were re-queued
    pub static ref RECONCILIATION_ERRORS: CounterVec = register_counter_vec!(
        "ark_reconciliation_errors_total",
        "Total number of work items that failed and were re-queued",
        &["kind"]
    ).unwrap();

    /// Work item processing duration histogram
    pub static ref RECONCILE_DURATION: HistogramVec = register_histogram_vec!(
        "ark_reconcile_duration_seconds",
        "Duration of work item processing in seconds",
        &["kind"],
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 60.0, 300.0]
    ).unwrap();

    /// Total number of backups by outcome
    pub static ref BACKUPS_TOTAL: CounterVec = register_counter_vec!(
        "ark_backups_total",
        "Total number of backups by outcome",
        &["outcome"]
    ).unwrap();

    /// Backup duration histogram
    pub static ref BACKUP_DURATION: Histogram = register_histogram!(
        "ark_backup_duration_seconds",
        "Duration of backup executions",
        vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0, 3600.0]
    ).unwrap();

    /// Total number of restores by outcome
    pub static ref RESTORES_TOTAL: CounterVec = register_counter_vec!(
        "ark_restores_total",
        "Total number of restores by outcome",
        &["outcome"]
    ).unwrap();

    /// Restore duration histogram
    pub static ref RESTORE_DURATION: Histogram = register_histogram!(
        "ark_restore_duration_seconds",
        "Duration of restore executions",
        vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0, 3600.0]
    ).unwrap();

    /// Warnings and errors reported by restores
    pub static ref RESTORE_ISSUES: CounterVec = register_counter_vec!(
        "ark_restore_issues_total",
        "Warnings and errors reported by restores",
        &["severity"]
    ).unwrap();

    /// Backups seen during object storage syncs by outcome
    pub static ref BACKUP_SYNC_ITEMS: CounterVec = register_counter_vec!(
        "ark_backup_sync_items_total",
        "Backups seen during object storage syncs by outcome",
        &["outcome"]
    ).unwrap();

    /// Object storage sync passes by outcome
    pub static ref BACKUP_SYNC_RUNS: CounterVec = register_counter_vec!(
        "ark_backup_sync_runs_total",
        "Object storage sync passes by outcome",
        &["outcome"]
    ).unwrap();

    /// Work items waiting in each controller queue
    pub static ref QUEUE_DEPTH: GaugeVec = register_gauge_vec!(
        "ark_queue_depth",
        "Work items waiting in each controller queue",
        &["kind"]
    ).unwrap();

    /// Operator health (1 = healthy, 0 = unhealthy)
    pub static ref OPERATOR_HEALTH: prometheus::Gauge = prometheus::register_gauge!(
        "ark_operator_health",
        "Operator health status (1 = healthy, 0 = unhealthy)"
    ).unwrap();
}

/// Serve `/metrics`, `/healthz` and `/readyz` until `shutdown` fires
pub async fn serve(port: u16, shutdown: CancellationToken) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, "Metrics server listening");
    OPERATOR_HEALTH.set(1.0);

    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted?,
        };

        tokio::spawn(async move {
            let service = service_fn(|req: Request<Incoming>| async move {
                Ok::<_, Infallible>(route(req.uri().path()))
            });
            if let Err(e) = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                debug!(peer = %peer, error = %e, "Metrics connection ended with error");
            }
        });
    }

    OPERATOR_HEALTH.set(0.0);
    info!("Metrics server stopped");
    Ok(())
}

/// Response for a request path
fn route(path: &str) -> Response<Full<Bytes>> {
    match path {
        "/metrics" => metrics_response(),
        "/healthz" | "/health" => health_response(),
        "/readyz" | "/ready" => ready_response(),
        _ => not_found_response(),
    }
}

/// Generate metrics response
fn metrics_response() -> Response<Full<Bytes>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return text_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics");
    }

    let mut response = Response::new(Full::new(Bytes::from(buffer)));
    if let Ok(content_type) = HeaderValue::from_str(encoder.format_type()) {
        response.headers_mut().insert(CONTENT_TYPE, content_type);
    }
    response
}

/// Health check response
fn health_response() -> Response<Full<Bytes>> {
    text_response(StatusCode::OK, "ok")
}

/// Readiness check response; ready once every controller has synced its caches
fn ready_response() -> Response<Full<Bytes>> {
    if is_ready() {
        text_response(StatusCode::OK, "ok")
    } else {
        text_response(StatusCode::SERVICE_UNAVAILABLE, "caches not synced")
    }
}

/// Not found response
fn not_found_response() -> Response<Full<Bytes>> {
    text_response(StatusCode::NOT_FOUND, "Not Found")
}

fn text_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
}

/// Controllers that have not synced their caches yet
static PENDING_CONTROLLERS: AtomicUsize = AtomicUsize::new(0);

/// Register a controller that must sync before the operator reports ready
pub fn controller_starting() {
    PENDING_CONTROLLERS.fetch_add(1, Ordering::SeqCst);
}

/// Mark a registered controller's caches as synced
pub fn controller_ready() {
    let _ = PENDING_CONTROLLERS.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
}

pub fn is_ready() -> bool {
    PENDING_CONTROLLERS.load(Ordering::SeqCst) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_routed() {
        assert_eq!(route("/healthz").status(), StatusCode::OK);
        assert_eq!(route("/metrics").status(), StatusCode::OK);
        assert_eq!(route("/nope").status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn server_stops_on_shutdown() {
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        serve(0, shutdown).await.unwrap();
    }

    #[test]
    fn metrics_are_exposed_in_text_format() {
        BACKUPS_TOTAL.with_label_values(&["completed"]).inc();
        let response = metrics_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(CONTENT_TYPE));
    }
}
