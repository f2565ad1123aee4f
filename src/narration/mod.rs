//! Plain-language narration of screening results.
//!
//! Tabular and image results are narrated by an external text-generation
//! collaborator behind [`TextGenerator`]; the combined path uses a local
//! one-line template and never calls out.

pub mod gemini;

use crate::error::Result;
use crate::metrics::NARRATION_REQUESTS_TOTAL;
use crate::ml::{RiskLevel, TabularMode, TopFactor};
use async_trait::async_trait;
use std::sync::Arc;

pub use gemini::GeminiClient;

/// Anything that turns a prompt into text
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Builds constrained prompts and delegates to a [`TextGenerator`]
#[derive(Clone)]
pub struct NarrationGenerator {
    generator: Arc<dyn TextGenerator>,
}

impl NarrationGenerator {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    /// Narrate a questionnaire result, mentioning its top factors
    pub async fn tabular(
        &self,
        probability: f64,
        risk_level: RiskLevel,
        top_factors: &[TopFactor],
        mode: TabularMode,
    ) -> Result<String> {
        let prompt = tabular_prompt(probability, risk_level, top_factors, mode);
        self.call(&mode.to_string(), &prompt).await
    }

    /// Narrate an ultrasound-only result
    pub async fn image(&self, probability: f64, risk_level: RiskLevel) -> Result<String> {
        let prompt = image_prompt(probability, risk_level);
        self.call("image", &prompt).await
    }

    /// Local template for the combined endpoint
    pub fn combined(&self, risk_level: RiskLevel) -> String {
        combined_narration(risk_level)
    }

    async fn call(&self, mode: &str, prompt: &str) -> Result<String> {
        match self.generator.generate(prompt).await {
            Ok(text) => {
                NARRATION_REQUESTS_TOTAL
                    .with_label_values(&[mode, "success"])
                    .inc();
                Ok(text.trim().to_string())
            }
            Err(e) => {
                NARRATION_REQUESTS_TOTAL
                    .with_label_values(&[mode, "error"])
                    .inc();
                tracing::error!(mode = mode, error = %e, "Narration failed");
                Err(e)
            }
        }
    }
}

pub fn tabular_prompt(
    probability: f64,
    risk_level: RiskLevel,
    top_factors: &[TopFactor],
    mode: TabularMode,
) -> String {
    let factors_text = top_factors
        .iter()
        .map(|f| format!("- {}: {}", f.feature, f.direction.as_str()))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "You are a health education assistant. Do NOT diagnose.\n\
         Explain a PCOS risk screening result in simple language.\n\
         \n\
         Mode: {mode}\n\
         Risk probability: {probability:.2} (Risk level: {risk_level})\n\
         \n\
         Top contributing factors (from explainable AI):\n\
         {factors_text}\n\
         \n\
         Write 5-8 lines:\n\
         - Explain this is a screening estimate, not diagnosis\n\
         - Mention the main factors simply\n\
         - Suggest consulting a clinician for confirmation\n\
         - Avoid medicines/prescriptions\n"
    )
}

pub fn image_prompt(probability: f64, risk_level: RiskLevel) -> String {
    format!(
        "You are a health education assistant. Do NOT diagnose.\n\
         Explain a PCOS screening result based on ultrasound image analysis.\n\
         \n\
         Risk probability: {probability:.2} (Risk level: {risk_level})\n\
         \n\
         Write 5-8 lines:\n\
         - Explain this is a screening estimate, not diagnosis\n\
         - Suggest consulting a clinician for confirmation\n\
         - Avoid medicines/prescriptions\n"
    )
}

pub fn combined_narration(risk_level: RiskLevel) -> String {
    format!(
        "This combined screening estimate suggests a {} risk based on image + clinical inputs.",
        risk_level
    )
}
