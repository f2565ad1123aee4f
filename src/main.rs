use pcos_screening::{
    api::{build_router, AppState},
    artifacts::ArtifactStore,
    config::{Config, NarrationProvider},
    context::ServiceContext,
    narration::{GeminiClient, TextGenerator},
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        e
    })?;

    init_tracing(&config);

    tracing::info!("Starting PCOS screening service v{}", env!("CARGO_PKG_VERSION"));

    // Initialize Prometheus metrics
    if config.observability.prometheus_enabled {
        if let Err(e) = pcos_screening::metrics::init_metrics() {
            tracing::warn!("Failed to initialize metrics: {}", e);
            tracing::warn!("Continuing without metrics");
        }
    } else {
        tracing::info!("Prometheus metrics disabled in configuration");
    }

    // Narration collaborator; a missing credential is fatal
    let generator: Arc<dyn TextGenerator> = match config.narration.provider {
        NarrationProvider::Gemini => {
            let api_key = config.narration.api_key()?;
            Arc::new(GeminiClient::new(&config.narration, api_key)?)
        }
    };
    tracing::info!(
        provider = ?config.narration.provider,
        model = %config.narration.model,
        "Narration client initialized"
    );

    // Artifacts are loaded once, before the listener binds
    let mut artifacts_config = config.artifacts.clone();
    artifacts_config.resolve_dir(&artifact_bases());
    let store = ArtifactStore::new(artifacts_config);
    let artifacts = store.load_all()?;
    let context = ServiceContext::build(artifacts, generator, config.explain.top_k)?;
    tracing::info!(dir = %store.dir().display(), "Artifacts loaded");

    let app_state = AppState::new(Arc::new(context))
        .with_metrics(config.observability.prometheus_enabled);
    let app = build_router(app_state, &config.server);

    let http_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&http_addr).await?;

    tracing::info!("HTTP API server listening on http://{}", http_addr);
    tracing::info!("   Health check: http://{}/health", http_addr);
    tracing::info!("   Predictions:  http://{}/predict/{{simple,clinical,image,combined}}", http_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shut down gracefully");
    Ok(())
}

/// Where a relative artifact directory is looked up: next to the binary, then the working directory
fn artifact_bases() -> Vec<std::path::PathBuf> {
    let mut bases = Vec::new();
    if let Some(dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|p| p.to_path_buf()))
    {
        bases.push(dir);
    }
    if let Ok(cwd) = std::env::current_dir() {
        bases.push(cwd);
    }
    bases
}

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "pcos_screening={level},tower_http={level}",
            level = config.observability.log_level
        )
        .into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    if config.observability.json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
