use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,

    /// Artifact locations
    pub artifacts: ArtifactsConfig,

    /// Attribution settings
    #[serde(default)]
    pub explain: ExplainConfig,

    /// Narration collaborator
    pub narration: NarrationConfig,

    /// Observability configuration
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self, config::ConfigError> {
        let config_path =
            std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config/default.toml".to_string());

        config::Config::builder()
            // Start with default values
            .add_source(config::File::from_str(
                include_str!("../config/default.toml"),
                config::FileFormat::Toml,
            ))
            // Override with config file if it exists
            .add_source(config::File::with_name(&config_path).required(false))
            // Override with environment variables (prefix: PCOS__)
            .add_source(
                config::Environment::with_prefix("PCOS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP server host
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum accepted request body, uploads included (bytes)
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,

    /// Allowed CORS origins ("*" allows any)
    #[serde(default = "default_cors_origins")]
    pub cors_allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_upload_bytes: default_max_upload_bytes(),
            cors_allowed_origins: default_cors_origins(),
        }
    }
}

/// File names are resolved relative to `dir`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactsConfig {
    #[serde(default = "default_artifact_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_simple_schema")]
    pub simple_schema: String,
    #[serde(default = "default_clinical_schema")]
    pub clinical_schema: String,
    #[serde(default = "default_risk_thresholds")]
    pub risk_thresholds: String,
    #[serde(default = "default_simple_pipeline")]
    pub simple_pipeline: String,
    #[serde(default = "default_clinical_pipeline")]
    pub clinical_pipeline: String,
    #[serde(default = "default_simple_background")]
    pub simple_background: String,
    #[serde(default = "default_clinical_background")]
    pub clinical_background: String,
    #[serde(default = "default_image_model")]
    pub image_model: String,
    #[serde(default = "default_fusion_model")]
    pub fusion_model: String,
    #[serde(default = "default_fusion_scaler")]
    pub fusion_scaler: String,
}

impl ArtifactsConfig {
    /// Full path of an artifact file
    pub fn path(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }

    /// Anchor a relative `dir` to the first base it exists under.
    ///
    /// Absolute paths are kept. When no base contains the directory the
    /// relative path is left alone so the loader error names it as configured.
    pub fn resolve_dir(&mut self, bases: &[PathBuf]) {
        if self.dir.is_absolute() {
            return;
        }
        if let Some(found) = bases
            .iter()
            .map(|base| base.join(&self.dir))
            .find(|candidate| candidate.is_dir())
        {
            self.dir = found;
        }
    }
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            dir: default_artifact_dir(),
            simple_schema: default_simple_schema(),
            clinical_schema: default_clinical_schema(),
            risk_thresholds: default_risk_thresholds(),
            simple_pipeline: default_simple_pipeline(),
            clinical_pipeline: default_clinical_pipeline(),
            simple_background: default_simple_background(),
            clinical_background: default_clinical_background(),
            image_model: default_image_model(),
            fusion_model: default_fusion_model(),
            fusion_scaler: default_fusion_scaler(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplainConfig {
    /// Number of contributing factors returned per tabular prediction
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for ExplainConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum NarrationProvider {
    #[default]
    Gemini,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarrationConfig {
    #[serde(default)]
    pub provider: NarrationProvider,

    /// Generation model name
    #[serde(default = "default_narration_model")]
    pub model: String,

    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// API base URL
    #[serde(default = "default_narration_base_url")]
    pub base_url: String,

    /// Request timeout (seconds); unset waits indefinitely
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl NarrationConfig {
    /// Read the API key from the configured environment variable
    pub fn api_key(&self) -> Result<String, crate::error::AppError> {
        match std::env::var(&self.api_key_env) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(crate::error::AppError::Configuration(format!(
                "{} not set",
                self.api_key_env
            ))),
        }
    }
}

impl Default for NarrationConfig {
    fn default() -> Self {
        Self {
            provider: NarrationProvider::default(),
            model: default_narration_model(),
            api_key_env: default_api_key_env(),
            base_url: default_narration_base_url(),
            timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub json_logs: bool,

    /// Enable Prometheus metrics
    #[serde(default = "default_true")]
    pub prometheus_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
            prometheus_enabled: true,
        }
    }
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_artifact_dir() -> PathBuf {
    PathBuf::from("artifacts")
}

fn default_simple_schema() -> String {
    "simple_schema.json".to_string()
}

fn default_clinical_schema() -> String {
    "clinical_schema.json".to_string()
}

fn default_risk_thresholds() -> String {
    "risk_thresholds.json".to_string()
}

fn default_simple_pipeline() -> String {
    "pcos_simple_pipeline.json".to_string()
}

fn default_clinical_pipeline() -> String {
    "pcos_clinical_pipeline.json".to_string()
}

fn default_simple_background() -> String {
    "simple_shap_background.json".to_string()
}

fn default_clinical_background() -> String {
    "clinical_shap_background.json".to_string()
}

fn default_image_model() -> String {
    "pcos_resnet_model.onnx".to_string()
}

fn default_fusion_model() -> String {
    "pcos_fusion_model.onnx".to_string()
}

fn default_fusion_scaler() -> String {
    "fusion_scaler.json".to_string()
}

fn default_top_k() -> usize {
    crate::ml::attribution::DEFAULT_TOP_K
}

fn default_narration_model() -> String {
    "gemini-flash-latest".to_string()
}

fn default_api_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}

fn default_narration_base_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}
