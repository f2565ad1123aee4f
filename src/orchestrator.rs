use crate::context::ServiceContext;
use crate::error::{AppError, Result};
use crate::metrics::{CLIENT_ERRORS_TOTAL, PREDICTIONS_TOTAL, PREDICTION_DURATION_SECONDS};
use crate::ml::{
    FusionInput, ImageUpload, Predictor, RiskLevel, Scored, TabularMode, TopFactor,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Uniform response of every prediction endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionResult {
    pub probability: f64,
    pub risk_level: RiskLevel,
    pub top_factors: Vec<TopFactor>,
    pub narration: String,
}

/// Endpoint label used in logs and metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Simple,
    Clinical,
    Image,
    Combined,
}

impl Endpoint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Endpoint::Simple => "simple",
            Endpoint::Clinical => "clinical",
            Endpoint::Image => "image",
            Endpoint::Combined => "combined",
        }
    }
}

impl From<TabularMode> for Endpoint {
    fn from(mode: TabularMode) -> Self {
        match mode {
            TabularMode::Simple => Endpoint::Simple,
            TabularMode::Clinical => Endpoint::Clinical,
        }
    }
}

/// Count a rejected request when the error is the caller's fault
pub fn note_rejection(endpoint: Endpoint, err: &AppError) {
    if err.is_client_error() {
        CLIENT_ERRORS_TOTAL
            .with_label_values(&[endpoint.as_str()])
            .inc();
    }
}

/// Sequences predict -> risk band -> narrate -> assemble for each endpoint
#[derive(Clone)]
pub struct Orchestrator {
    context: Arc<ServiceContext>,
}

impl Orchestrator {
    pub fn new(context: Arc<ServiceContext>) -> Self {
        Self { context }
    }

    /// Questionnaire payload through the mode's pipeline and explainer
    pub async fn predict_tabular(
        &self,
        mode: TabularMode,
        payload: Map<String, Value>,
    ) -> Result<PredictionResult> {
        let start = Instant::now();
        let endpoint = Endpoint::from(mode);
        let predictor = self.context.tabular(mode).clone();
        let scored = self.score(endpoint, predictor, payload).await?;
        let risk_level = self.context.thresholds.classify(scored.probability);

        let narration = self
            .context
            .narrator
            .tabular(scored.probability, risk_level, &scored.top_factors, mode)
            .await?;

        Ok(self.finish(endpoint, start, scored, risk_level, narration))
    }

    /// Single ultrasound image
    pub async fn predict_image(&self, upload: ImageUpload) -> Result<PredictionResult> {
        let start = Instant::now();
        let predictor = self.context.image.clone();
        let scored = self.score(Endpoint::Image, predictor, upload).await?;
        let risk_level = self.context.thresholds.classify(scored.probability);

        let narration = self
            .context
            .narrator
            .image(scored.probability, risk_level)
            .await?;

        Ok(self.finish(Endpoint::Image, start, scored, risk_level, narration))
    }

    /// Image plus clinical JSON through the fusion network; narration is local
    pub async fn predict_combined(&self, input: FusionInput) -> Result<PredictionResult> {
        let start = Instant::now();
        let predictor = self.context.fusion.clone();
        let scored = self.score(Endpoint::Combined, predictor, input).await?;
        let risk_level = self.context.thresholds.classify(scored.probability);
        let narration = self.context.narrator.combined(risk_level);

        Ok(self.finish(Endpoint::Combined, start, scored, risk_level, narration))
    }

    /// Run a predictor off the async workers
    async fn score<P>(&self, endpoint: Endpoint, predictor: Arc<P>, input: P::Input) -> Result<Scored>
    where
        P: Predictor + 'static,
        P::Input: 'static,
    {
        let kind = predictor.kind();
        let start = Instant::now();
        let result = tokio::task::spawn_blocking(move || predictor.predict(&input))
            .await
            .map_err(AppError::from)
            .and_then(|r| r);

        match result {
            Ok(scored) => {
                let elapsed = start.elapsed();
                PREDICTION_DURATION_SECONDS
                    .with_label_values(&[endpoint.as_str()])
                    .observe(elapsed.as_secs_f64());
                tracing::debug!(
                    endpoint = endpoint.as_str(),
                    kind = %kind,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Model scored"
                );
                Ok(scored)
            }
            Err(e) => {
                note_rejection(endpoint, &e);
                Err(e)
            }
        }
    }

    fn finish(
        &self,
        endpoint: Endpoint,
        start: Instant,
        scored: Scored,
        risk_level: RiskLevel,
        narration: String,
    ) -> PredictionResult {
        PREDICTIONS_TOTAL
            .with_label_values(&[endpoint.as_str(), &risk_level.to_string()])
            .inc();

        info!(
            endpoint = endpoint.as_str(),
            probability = scored.probability,
            risk_level = %risk_level,
            factors = scored.top_factors.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Prediction served"
        );

        PredictionResult {
            probability: scored.probability,
            risk_level,
            top_factors: scored.top_factors,
            narration,
        }
    }
}
