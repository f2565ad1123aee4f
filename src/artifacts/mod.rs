//! Read-only loader for the pre-trained artifact directory.
//!
//! Everything here runs once at startup; any failure is fatal to bring-up.

use crate::config::ArtifactsConfig;
use crate::error::{AppError, Result};
use crate::ml::{
    FusionNetwork, ImageNetwork, RiskThresholds, Schema, StandardScaler, TabularMode,
    TabularPipeline, FUSION_FEATURE_KEYS,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
struct SchemaFile {
    features: Vec<String>,
}

/// Fitted tabular artifacts for one questionnaire
#[derive(Debug, Clone)]
pub struct TabularArtifacts {
    pub schema: Schema,
    pub pipeline: TabularPipeline,
    pub background: Vec<Map<String, Value>>,
}

/// Everything the service needs, loaded and validated
pub struct LoadedArtifacts {
    pub simple: TabularArtifacts,
    pub clinical: TabularArtifacts,
    pub thresholds: RiskThresholds,
    pub fusion_scaler: StandardScaler,
    pub image_network: Box<dyn ImageNetwork>,
    pub fusion_network: Box<dyn FusionNetwork>,
}

/// Resolves and parses artifact files under the configured directory
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    config: ArtifactsConfig,
}

impl ArtifactStore {
    pub fn new(config: ArtifactsConfig) -> Self {
        Self { config }
    }

    pub fn dir(&self) -> &Path {
        &self.config.dir
    }

    fn path(&self, file: &str) -> PathBuf {
        self.config.path(file)
    }

    fn read_json<T: DeserializeOwned>(&self, file: &str) -> Result<T> {
        let path = self.path(file);
        if !path.exists() {
            return Err(AppError::artifact(&path, "file not found"));
        }
        let raw = std::fs::read_to_string(&path)
            .map_err(|e| AppError::artifact(&path, e.to_string()))?;
        serde_json::from_str(&raw).map_err(|e| AppError::artifact(&path, e.to_string()))
    }

    pub fn load_schema(&self, mode: TabularMode) -> Result<Schema> {
        let file = match mode {
            TabularMode::Simple => &self.config.simple_schema,
            TabularMode::Clinical => &self.config.clinical_schema,
        };
        let parsed: SchemaFile = self.read_json(file)?;
        if parsed.features.is_empty() {
            return Err(AppError::artifact(self.path(file), "schema lists no features"));
        }
        Ok(Schema::new(parsed.features))
    }

    pub fn load_thresholds(&self) -> Result<RiskThresholds> {
        let thresholds: RiskThresholds = self.read_json(&self.config.risk_thresholds)?;
        thresholds.validate()?;
        Ok(thresholds)
    }

    pub fn load_pipeline(&self, mode: TabularMode) -> Result<TabularPipeline> {
        let file = match mode {
            TabularMode::Simple => &self.config.simple_pipeline,
            TabularMode::Clinical => &self.config.clinical_pipeline,
        };
        self.read_json(file)
    }

    pub fn load_background(&self, mode: TabularMode) -> Result<Vec<Map<String, Value>>> {
        let file = match mode {
            TabularMode::Simple => &self.config.simple_background,
            TabularMode::Clinical => &self.config.clinical_background,
        };
        let rows: Vec<Map<String, Value>> = self.read_json(file)?;
        if rows.is_empty() {
            return Err(AppError::artifact(self.path(file), "background sample is empty"));
        }
        Ok(rows)
    }

    /// Schema, pipeline and background sample for one mode, cross-validated
    pub fn load_tabular(&self, mode: TabularMode) -> Result<TabularArtifacts> {
        let schema = self.load_schema(mode)?;
        let pipeline = self.load_pipeline(mode)?;
        pipeline.validate(&schema)?;
        let background = self.load_background(mode)?;

        tracing::debug!(
            mode = %mode,
            features = schema.len(),
            background_rows = background.len(),
            "Loaded tabular artifacts"
        );

        Ok(TabularArtifacts {
            schema,
            pipeline,
            background,
        })
    }

    pub fn load_fusion_scaler(&self) -> Result<StandardScaler> {
        let scaler: StandardScaler = self.read_json(&self.config.fusion_scaler)?;
        scaler
            .validate(FUSION_FEATURE_KEYS.len())
            .map_err(|e| AppError::artifact(self.path(&self.config.fusion_scaler), e.to_string()))?;
        Ok(scaler)
    }

    /// Load the whole directory; the first failure aborts
    pub fn load_all(&self) -> Result<LoadedArtifacts> {
        tracing::info!(dir = %self.dir().display(), "Loading artifacts");

        let thresholds = self.load_thresholds()?;
        let simple = self.load_tabular(TabularMode::Simple)?;
        let clinical = self.load_tabular(TabularMode::Clinical)?;
        let fusion_scaler = self.load_fusion_scaler()?;
        let (image_network, fusion_network) = self.load_networks()?;

        Ok(LoadedArtifacts {
            simple,
            clinical,
            thresholds,
            fusion_scaler,
            image_network,
            fusion_network,
        })
    }

    /// Image and fusion networks from their ONNX exports
    #[cfg(feature = "onnx")]
    pub fn load_networks(&self) -> Result<(Box<dyn ImageNetwork>, Box<dyn FusionNetwork>)> {
        use crate::ml::onnx::{OnnxFusionNetwork, OnnxImageNetwork};

        let image = OnnxImageNetwork::load(&self.path(&self.config.image_model))?;
        let fusion = OnnxFusionNetwork::load(&self.path(&self.config.fusion_model))?;
        Ok((Box::new(image), Box::new(fusion)))
    }

    #[cfg(not(feature = "onnx"))]
    pub fn load_networks(&self) -> Result<(Box<dyn ImageNetwork>, Box<dyn FusionNetwork>)> {
        Err(AppError::Configuration(format!(
            "cannot load {} / {}: built without the `onnx` feature",
            self.config.image_model, self.config.fusion_model
        )))
    }
}
