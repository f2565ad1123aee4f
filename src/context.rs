use crate::artifacts::{LoadedArtifacts, TabularArtifacts};
use crate::error::Result;
use crate::ml::{
    FusionPredictor, ImagePredictor, RiskThresholds, TabularMode, TabularPredictor,
};
use crate::narration::{NarrationGenerator, TextGenerator};
use std::sync::Arc;

/// Immutable, process-wide state shared by every request.
///
/// Built once before the listener binds; nothing in here is mutated afterwards.
pub struct ServiceContext {
    pub simple: Arc<TabularPredictor>,
    pub clinical: Arc<TabularPredictor>,
    pub image: Arc<ImagePredictor>,
    pub fusion: Arc<FusionPredictor>,
    pub thresholds: RiskThresholds,
    pub narrator: NarrationGenerator,
}

impl ServiceContext {
    /// Bind predictors and explainers to the loaded artifacts
    pub fn build(
        artifacts: LoadedArtifacts,
        generator: Arc<dyn TextGenerator>,
        top_k: usize,
    ) -> Result<Self> {
        let LoadedArtifacts {
            simple,
            clinical,
            thresholds,
            fusion_scaler,
            image_network,
            fusion_network,
        } = artifacts;

        let simple = tabular_predictor(TabularMode::Simple, simple, top_k)?;
        let clinical = tabular_predictor(TabularMode::Clinical, clinical, top_k)?;

        Ok(Self {
            simple: Arc::new(simple),
            clinical: Arc::new(clinical),
            image: Arc::new(ImagePredictor::new(image_network)),
            fusion: Arc::new(FusionPredictor::new(fusion_network, fusion_scaler)?),
            thresholds,
            narrator: NarrationGenerator::new(generator),
        })
    }

    pub fn tabular(&self, mode: TabularMode) -> &Arc<TabularPredictor> {
        match mode {
            TabularMode::Simple => &self.simple,
            TabularMode::Clinical => &self.clinical,
        }
    }
}

fn tabular_predictor(
    mode: TabularMode,
    artifacts: TabularArtifacts,
    top_k: usize,
) -> Result<TabularPredictor> {
    TabularPredictor::new(
        mode,
        artifacts.schema,
        artifacts.pipeline,
        &artifacts.background,
        top_k,
    )
}
