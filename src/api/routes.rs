use crate::api::{handlers, AppState};
use crate::config::ServerConfig;
use crate::metrics::MetricsLayer;
use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method},
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};

/// Build the main API router
pub fn build_router(state: AppState, server: &ServerConfig) -> Router {
    let metrics_enabled = state.metrics_enabled;

    let mut router = Router::new()
        // Health
        .route("/health", get(handlers::health_check))
        // Predictions
        .route("/predict/simple", post(handlers::predict_simple))
        .route("/predict/clinical", post(handlers::predict_clinical))
        .route("/predict/image", post(handlers::predict_image))
        .route("/predict/combined", post(handlers::predict_combined));

    if metrics_enabled {
        router = router.route("/metrics", get(handlers::metrics));
    }

    router
        .route_layer(MetricsLayer::new(metrics_enabled))
        // Add state
        .with_state(state)
        // Add middleware
        .layer(DefaultBodyLimit::max(server.max_upload_bytes))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(false))
                .on_response(DefaultOnResponse::new()),
        )
        .layer(cors_layer(&server.cors_allowed_origins))
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    if origins.iter().any(|o| o == "*") {
        return base.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    base.allow_origin(AllowOrigin::list(allowed))
}
