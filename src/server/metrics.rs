use axum::{http::StatusCode, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all media-server metrics
const PREFIX: &str = "dimora_media";

lazy_static! {
    // Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // HTTP Request Metrics
    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_http_requests_total"), "Total number of HTTP requests"),
        &["method", "path", "status"]
    ).expect("Failed to create http_requests_total metric");

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_http_request_duration_seconds"),
            "HTTP request duration in seconds"
        )
        .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
        &["method", "path"]
    ).expect("Failed to create http_request_duration_seconds metric");

    // Upload Metrics
    pub static ref UPLOADS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_uploads_total"), "Completed uploads by kind and tier"),
        &["kind", "tier"]
    ).expect("Failed to create uploads_total metric");

    pub static ref UPLOADED_BYTES_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_uploaded_bytes_total"),
        "Total bytes persisted through uploads"
    ).expect("Failed to create uploaded_bytes_total metric");

    pub static ref UPLOAD_DURATION_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            format!("{PREFIX}_upload_duration_seconds"),
            "Upload persist duration in seconds"
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0])
    ).expect("Failed to create upload_duration_seconds metric");

    // Dedup Metrics
    pub static ref DEDUP_HITS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_dedup_hits_total"), "Duplicate detections by check source"),
        &["source"]
    ).expect("Failed to create dedup_hits_total metric");

    // Asset Index Metrics
    pub static ref ASSETS_TOTAL: Gauge = Gauge::new(
        format!("{PREFIX}_assets_total"),
        "Assets in the index"
    ).expect("Failed to create assets_total metric");

    pub static ref STORED_BYTES: Gauge = Gauge::new(
        format!("{PREFIX}_stored_bytes"),
        "Total bytes in the media store"
    ).expect("Failed to create stored_bytes metric");

    // Chunked Session Metrics
    pub static ref UPLOAD_SESSIONS_ACTIVE: Gauge = Gauge::new(
        format!("{PREFIX}_upload_sessions_active"),
        "Open chunked upload sessions"
    ).expect("Failed to create upload_sessions_active metric");

    // Error Metrics
    pub static ref ERRORS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_errors_total"), "Total errors by type and endpoint"),
        &["error_type", "endpoint"]
    ).expect("Failed to create errors_total metric");
}

/// Initialize all metrics and register them with the Prometheus registry
pub fn init_metrics() {
    // Register all metrics - ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(UPLOADS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(UPLOADED_BYTES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(UPLOAD_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(DEDUP_HITS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(ASSETS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(STORED_BYTES.clone()));
    let _ = REGISTRY.register(Box::new(UPLOAD_SESSIONS_ACTIVE.clone()));
    let _ = REGISTRY.register(Box::new(ERRORS_TOTAL.clone()));

    tracing::info!("Metrics system initialized successfully");
}

/// Seed asset-index gauges from the store at startup
pub fn init_asset_metrics(asset_count: usize, stored_bytes: u64) {
    ASSETS_TOTAL.set(asset_count as f64);
    STORED_BYTES.set(stored_bytes as f64);

    tracing::info!(
        "Asset metrics initialized: {} assets, {} bytes stored",
        asset_count,
        stored_bytes
    );
}

/// Record an HTTP request
pub fn record_http_request(method: &str, path: &str, status: u16, duration: Duration) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();

    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration.as_secs_f64());
}

/// Record a persisted upload
pub fn record_upload(kind: &str, tier: &str, bytes: u64, duration: Duration) {
    UPLOADS_TOTAL.with_label_values(&[kind, tier]).inc();
    UPLOADED_BYTES_TOTAL.inc_by(bytes as f64);
    UPLOAD_DURATION_SECONDS.observe(duration.as_secs_f64());
    ASSETS_TOTAL.add(1.0);
    STORED_BYTES.add(bytes as f64);
}

/// Record a duplicate detection ("client" for index queries, "server" for
/// the authoritative check on received payloads)
pub fn record_dedup_hit(source: &str) {
    DEDUP_HITS_TOTAL.with_label_values(&[source]).inc();
}

/// Record an error
pub fn record_error(error_type: &str, endpoint: &str) {
    ERRORS_TOTAL
        .with_label_values(&[error_type, endpoint])
        .inc();
}

/// Handler for the /metrics scrape endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (StatusCode::OK, buffer).into_response(),
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Serve /metrics on its own port for Prometheus scraping
pub async fn run_metrics_server(port: u16) -> anyhow::Result<()> {
    let app = axum::Router::new().route("/metrics", axum::routing::get(metrics_handler));
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
