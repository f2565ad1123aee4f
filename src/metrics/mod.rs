/// Prometheus metrics for the screening service.
///
/// This module provides:
/// - HTTP request counts and latency (recorded by [`MetricsLayer`])
/// - Prediction counts by endpoint and risk level, and inference latency
/// - Narration collaborator outcomes
/// - Client (4xx) rejections by endpoint
///
/// # Example
/// ```no_run
/// use pcos_screening::metrics::PREDICTIONS_TOTAL;
///
/// PREDICTIONS_TOTAL
///     .with_label_values(&["simple", "Low"])
///     .inc();
/// ```

mod middleware;

pub use middleware::{MetricsLayer, MetricsService};

use lazy_static::lazy_static;
use prometheus::{CounterVec, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry};

const NAMESPACE: &str = "pcos_screening";

lazy_static! {
    /// Global Prometheus registry for all metrics
    pub static ref PROMETHEUS_REGISTRY: Registry = Registry::new();

    // ============================================================================
    // HTTP Metrics
    // ============================================================================

    /// Total number of HTTP requests received
    ///
    /// Labels: method, path, status_code
    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("http_requests_total", "Total number of HTTP requests")
            .namespace(NAMESPACE),
        &["method", "path", "status_code"]
    ).expect("Failed to create HTTP_REQUESTS_TOTAL metric");

    /// HTTP request duration in seconds
    ///
    /// Labels: method, path
    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "http_request_duration_seconds",
            "HTTP request duration in seconds"
        )
        .namespace(NAMESPACE)
        .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["method", "path"]
    ).expect("Failed to create HTTP_REQUEST_DURATION_SECONDS metric");

    // ============================================================================
    // Prediction Metrics
    // ============================================================================

    /// Total number of completed predictions
    ///
    /// Labels: endpoint (simple, clinical, image, combined), risk_level
    pub static ref PREDICTIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("predictions_total", "Total number of completed predictions")
            .namespace(NAMESPACE),
        &["endpoint", "risk_level"]
    ).expect("Failed to create PREDICTIONS_TOTAL metric");

    /// Time spent in model inference and attribution, narration excluded
    ///
    /// Labels: endpoint
    pub static ref PREDICTION_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "prediction_duration_seconds",
            "Model inference and attribution duration in seconds"
        )
        .namespace(NAMESPACE)
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]),
        &["endpoint"]
    ).expect("Failed to create PREDICTION_DURATION_SECONDS metric");

    /// Requests rejected for bad client input
    ///
    /// Labels: endpoint
    pub static ref CLIENT_ERRORS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("client_errors_total", "Requests rejected for invalid input")
            .namespace(NAMESPACE),
        &["endpoint"]
    ).expect("Failed to create CLIENT_ERRORS_TOTAL metric");

    // ============================================================================
    // Narration Metrics
    // ============================================================================

    /// Calls to the text-generation collaborator
    ///
    /// Labels: mode (simple, clinical, image), status (success, error)
    pub static ref NARRATION_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("narration_requests_total", "Total number of narration requests")
            .namespace(NAMESPACE),
        &["mode", "status"]
    ).expect("Failed to create NARRATION_REQUESTS_TOTAL metric");

    // ============================================================================
    // System Metrics
    // ============================================================================

    /// Build information
    ///
    /// Labels: version, onnx
    pub static ref BUILD_INFO: GaugeVec = GaugeVec::new(
        Opts::new("build_info", "Build information").namespace(NAMESPACE),
        &["version", "onnx"]
    ).expect("Failed to create BUILD_INFO metric");
}

/// Register every metric with [`PROMETHEUS_REGISTRY`].
///
/// Call once at startup; a second call fails with `AlreadyReg`.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    PROMETHEUS_REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()))?;

    PROMETHEUS_REGISTRY.register(Box::new(PREDICTIONS_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(PREDICTION_DURATION_SECONDS.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(CLIENT_ERRORS_TOTAL.clone()))?;

    PROMETHEUS_REGISTRY.register(Box::new(NARRATION_REQUESTS_TOTAL.clone()))?;

    PROMETHEUS_REGISTRY.register(Box::new(BUILD_INFO.clone()))?;
    BUILD_INFO
        .with_label_values(&[
            env!("CARGO_PKG_VERSION"),
            if cfg!(feature = "onnx") { "true" } else { "false" },
        ])
        .set(1.0);

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Prometheus text exposition of everything registered
pub fn gather_metrics() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = PROMETHEUS_REGISTRY.gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::from("# Error encoding metrics\n");
    }

    String::from_utf8(buffer).unwrap_or_else(|e| {
        tracing::error!("Failed to convert metrics to string: {}", e);
        String::from("# Error converting metrics\n")
    })
}
